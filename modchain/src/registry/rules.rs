//! Structured selection rules.
//!
//! A module descriptor can carry rules that nudge its ranking up or down
//! depending on what the stage is about. Conditions are plain data and are
//! evaluated by [`evaluate`], a pure interpreter over [`SelectionSignals`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static WORD: LazyLock<Regex> = LazyLock::new(|| {
    // Letters, digits and inner hyphens/underscores: "text-to-speech", "gpt_4".
    Regex::new(r"[\p{L}\p{N}]+(?:[-_][\p{L}\p{N}]+)*").expect("word pattern compiles")
});

/// A condition over the selection signals of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Matches if any of the keywords is present.
    KeywordsInclude(Vec<String>),
    /// Matches if none of the keywords is present.
    KeywordsExclude(Vec<String>),
    /// Matches if every nested condition matches. An empty list matches.
    CompositeAnd(Vec<RuleCondition>),
}

impl RuleCondition {
    /// Shorthand for [`RuleCondition::KeywordsInclude`].
    pub fn include<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::KeywordsInclude(keywords.into_iter().map(Into::into).collect())
    }

    /// Shorthand for [`RuleCondition::KeywordsExclude`].
    pub fn exclude<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::KeywordsExclude(keywords.into_iter().map(Into::into).collect())
    }

    /// Shorthand for [`RuleCondition::CompositeAnd`].
    #[must_use]
    pub fn all(conditions: Vec<Self>) -> Self {
        Self::CompositeAnd(conditions)
    }
}

/// A condition paired with the score adjustment applied when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRule {
    /// When the rule applies.
    pub condition: RuleCondition,
    /// Added to the composite score when the condition matches. May be
    /// negative.
    pub adjustment: f64,
}

impl SelectionRule {
    /// Creates a new rule.
    #[must_use]
    pub fn new(condition: RuleCondition, adjustment: f64) -> Self {
        Self {
            condition,
            adjustment,
        }
    }
}

/// Lower-cased keywords describing what a stage is working on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSignals {
    keywords: BTreeSet<String>,
}

impl SelectionSignals {
    /// Creates an empty signal set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates signals from explicit hints.
    pub fn from_hints<I, S>(hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut signals = Self::new();
        for hint in hints {
            signals.add_keyword(hint.as_ref());
        }
        signals
    }

    /// Adds every word found in `text`.
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        for word in WORD.find_iter(text) {
            self.keywords.insert(word.as_str().to_lowercase());
        }
        self
    }

    /// Adds the words of a textual payload. Non-text payloads add nothing.
    #[must_use]
    pub fn with_payload(self, payload: &serde_json::Value) -> Self {
        match payload {
            serde_json::Value::String(text) => self.with_text(text),
            _ => self,
        }
    }

    /// Adds one keyword.
    pub fn add_keyword(&mut self, keyword: &str) {
        let keyword = keyword.trim().to_lowercase();
        if !keyword.is_empty() {
            self.keywords.insert(keyword);
        }
    }

    /// Returns true if the keyword is present (case-insensitive).
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords.contains(&keyword.trim().to_lowercase())
    }

    /// Returns true if there are no signals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Iterates the keywords in sorted order.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }
}

/// Evaluates a condition against the signals.
#[must_use]
pub fn evaluate(condition: &RuleCondition, signals: &SelectionSignals) -> bool {
    match condition {
        RuleCondition::KeywordsInclude(keywords) => keywords.iter().any(|k| signals.contains(k)),
        RuleCondition::KeywordsExclude(keywords) => !keywords.iter().any(|k| signals.contains(k)),
        RuleCondition::CompositeAnd(conditions) => {
            conditions.iter().all(|nested| evaluate(nested, signals))
        }
    }
}

/// Sums the adjustments of every matching rule.
#[must_use]
pub fn total_adjustment(rules: &[SelectionRule], signals: &SelectionSignals) -> f64 {
    rules
        .iter()
        .filter(|rule| evaluate(&rule.condition, signals))
        .map(|rule| rule.adjustment)
        .sum()
}
