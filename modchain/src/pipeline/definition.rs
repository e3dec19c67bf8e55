//! Pipeline and stage definitions.

use crate::core::DataKind;
use crate::errors::PipelineValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a stage is scheduled relative to its neighbours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs alone, after everything before it.
    #[default]
    Sequential,
    /// Runs concurrently with adjacent parallel stages.
    Parallel,
}

const fn default_required() -> bool {
    true
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Unique stage id within the pipeline.
    pub id: String,
    /// Module category that serves the stage.
    pub category: String,
    /// Whether failure of this stage rolls back the run.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Kind the stage consumes.
    #[serde(default)]
    pub input_kind: DataKind,
    /// Kind the stage produces.
    #[serde(default)]
    pub output_kind: DataKind,
    /// Scheduling mode.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Keywords fed to selection rules.
    #[serde(default)]
    pub hints: Vec<String>,
}

impl StageSpec {
    /// Creates a required sequential stage.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            required: true,
            input_kind: DataKind::Any,
            output_kind: DataKind::Any,
            mode: ExecutionMode::Sequential,
            hints: Vec::new(),
        }
    }

    /// Marks the stage as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Marks the stage as parallel.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.mode = ExecutionMode::Parallel;
        self
    }

    /// Sets the input and output kinds.
    #[must_use]
    pub fn with_kinds(mut self, input: DataKind, output: DataKind) -> Self {
        self.input_kind = input;
        self.output_kind = output;
        self
    }

    /// Adds a selection hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Stages in order.
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    /// Kind of the run's initial input.
    #[serde(default)]
    pub input_kind: DataKind,
}

impl PipelineDefinition {
    /// Creates an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            input_kind: DataKind::Any,
        }
    }

    /// Parses a definition from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the kind of the initial input.
    #[must_use]
    pub fn with_input_kind(mut self, kind: DataKind) -> Self {
        self.input_kind = kind;
        self
    }

    /// Looks a stage up by id.
    #[must_use]
    pub fn get_stage(&self, stage_id: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank, there are no stages, or a stage
    /// id is blank or duplicated, or a category is blank.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            ));
        }

        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                return Err(PipelineValidationError::new("Stage id cannot be empty"));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage id '{}'",
                    stage.id
                ))
                .with_stages(vec![stage.id.clone()]));
            }
            if stage.category.trim().is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' has no category",
                    stage.id
                ))
                .with_stages(vec![stage.id.clone()]));
            }
        }

        Ok(())
    }

    /// Splits the stages into execution groups.
    ///
    /// Every sequential stage is a group of its own; each maximal run of
    /// consecutive parallel stages forms one group.
    #[must_use]
    pub fn groups(&self) -> Vec<&[StageSpec]> {
        let mut groups = Vec::new();
        let mut start = 0;

        while start < self.stages.len() {
            let mut end = start + 1;
            if self.stages[start].mode == ExecutionMode::Parallel {
                while end < self.stages.len() && self.stages[end].mode == ExecutionMode::Parallel {
                    end += 1;
                }
            }
            groups.push(&self.stages[start..end]);
            start = end;
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(group: &[StageSpec]) -> Vec<&str> {
        group.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_grouping() {
        let definition = PipelineDefinition::new("p")
            .stage(StageSpec::new("ingest", "io"))
            .stage(StageSpec::new("ocr", "ocr").parallel())
            .stage(StageSpec::new("caption", "vision").parallel())
            .stage(StageSpec::new("merge", "text"))
            .stage(StageSpec::new("tts", "audio").parallel());

        let groups = definition.groups();
        assert_eq!(groups.len(), 4);
        assert_eq!(ids(groups[0]), vec!["ingest"]);
        assert_eq!(ids(groups[1]), vec!["ocr", "caption"]);
        assert_eq!(ids(groups[2]), vec!["merge"]);
        assert_eq!(ids(groups[3]), vec!["tts"]);
    }

    #[test]
    fn test_validation() {
        assert!(PipelineDefinition::new("  ").validate().is_err());
        assert!(PipelineDefinition::new("p").validate().is_err());

        let duplicate = PipelineDefinition::new("p")
            .stage(StageSpec::new("a", "x"))
            .stage(StageSpec::new("a", "y"));
        let err = duplicate.validate().unwrap_err();
        assert_eq!(err.stages, vec!["a".to_string()]);

        let no_category = PipelineDefinition::new("p").stage(StageSpec::new("a", ""));
        assert!(no_category.validate().is_err());

        let ok = PipelineDefinition::new("p").stage(StageSpec::new("a", "x"));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let definition = PipelineDefinition::from_json_str(
            r#"{
                "name": "doc",
                "input_kind": "image",
                "stages": [
                    {"id": "ocr", "category": "ocr", "input_kind": "image", "output_kind": "text"},
                    {"id": "enrich", "category": "nlp", "required": false, "mode": "parallel"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(definition.input_kind, DataKind::Image);
        let ocr = definition.get_stage("ocr").unwrap();
        assert!(ocr.required);
        assert_eq!(ocr.mode, ExecutionMode::Sequential);
        assert_eq!(ocr.output_kind, DataKind::Text);
        let enrich = definition.get_stage("enrich").unwrap();
        assert!(!enrich.required);
        assert_eq!(enrich.mode, ExecutionMode::Parallel);
    }
}
