//! Module descriptors.

use super::rules::{self, SelectionRule, SelectionSignals};
use crate::core::DataKind;
use serde::{Deserialize, Serialize};

const fn default_reliability() -> f64 {
    0.5
}

/// Catalog entry for one module.
///
/// Descriptors are flat values: modules differ only in their data, never in
/// their type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module id.
    pub id: String,
    /// Task category the module serves.
    pub category: String,
    /// Ids of declared alternative modules.
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Reliability declared by the catalog, in `[0, 1]`.
    #[serde(default = "default_reliability")]
    pub declared_reliability: f64,
    /// Expected success rate before any history exists, in `[0, 1]`.
    #[serde(default)]
    pub success_rate_prior: Option<f64>,
    /// Payload kind the module consumes.
    #[serde(default)]
    pub input_kind: DataKind,
    /// Payload kind the module produces.
    #[serde(default)]
    pub output_kind: DataKind,
    /// Free keywords describing the module.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Ranking adjustments.
    #[serde(default)]
    pub rules: Vec<SelectionRule>,
}

impl ModuleDescriptor {
    /// Creates a descriptor with default reliability and no rules.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            alternatives: Vec::new(),
            declared_reliability: default_reliability(),
            success_rate_prior: None,
            input_kind: DataKind::Any,
            output_kind: DataKind::Any,
            keywords: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Sets the declared reliability.
    #[must_use]
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.declared_reliability = reliability.clamp(0.0, 1.0);
        self
    }

    /// Sets the success-rate prior.
    #[must_use]
    pub fn with_success_prior(mut self, prior: f64) -> Self {
        self.success_rate_prior = Some(prior.clamp(0.0, 1.0));
        self
    }

    /// Adds a declared alternative.
    #[must_use]
    pub fn with_alternative(mut self, module_id: impl Into<String>) -> Self {
        self.alternatives.push(module_id.into());
        self
    }

    /// Sets the input and output kinds.
    #[must_use]
    pub fn with_kinds(mut self, input: DataKind, output: DataKind) -> Self {
        self.input_kind = input;
        self.output_kind = output;
        self
    }

    /// Adds a keyword.
    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Adds a selection rule.
    #[must_use]
    pub fn with_rule(mut self, rule: SelectionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Reliability clamped to `[0, 1]`, whatever the catalog declared.
    #[must_use]
    pub fn reliability(&self) -> f64 {
        self.declared_reliability.clamp(0.0, 1.0)
    }

    /// Sum of the adjustments of every rule matching `signals`.
    #[must_use]
    pub fn rule_adjustment(&self, signals: &SelectionSignals) -> f64 {
        rules::total_adjustment(&self.rules, signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RuleCondition;

    #[test]
    fn test_descriptor_defaults_from_json() {
        let descriptor: ModuleDescriptor =
            serde_json::from_str(r#"{"id": "ocr-fast", "category": "ocr"}"#).unwrap();
        assert_eq!(descriptor.id, "ocr-fast");
        assert!((descriptor.declared_reliability - 0.5).abs() < f64::EPSILON);
        assert_eq!(descriptor.input_kind, DataKind::Any);
        assert!(descriptor.rules.is_empty());
    }

    #[test]
    fn test_builders_clamp() {
        let descriptor = ModuleDescriptor::new("m", "text")
            .with_reliability(1.7)
            .with_success_prior(-0.2)
            .with_alternative("n")
            .with_kinds(DataKind::Image, DataKind::Text);

        assert!((descriptor.reliability() - 1.0).abs() < f64::EPSILON);
        assert_eq!(descriptor.success_rate_prior, Some(0.0));
        assert_eq!(descriptor.alternatives, vec!["n".to_string()]);
        assert_eq!(descriptor.output_kind, DataKind::Text);
    }

    #[test]
    fn test_rule_adjustment() {
        let descriptor = ModuleDescriptor::new("m", "ocr")
            .with_rule(SelectionRule::new(RuleCondition::include(["scan"]), 0.15));
        let matching = SelectionSignals::new().with_text("blurry scan");
        assert!((descriptor.rule_adjustment(&matching) - 0.15).abs() < 1e-9);
        assert!(descriptor.rule_adjustment(&SelectionSignals::new()).abs() < f64::EPSILON);
    }
}
