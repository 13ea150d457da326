//! Core types for post-action verification

use perceiver_structural::ElementIndex;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;

/// ExpectSpec - Rule model for post-condition validation
///
/// Uses three rule categories: all (AND), any (OR), deny (NOT).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectSpec {
    /// All conditions must pass (AND logic)
    pub all: Vec<Condition>,

    /// At least one condition must pass (OR logic)
    pub any: Vec<Condition>,

    /// None of these conditions should pass (NOT logic)
    pub deny: Vec<Condition>,
}

impl ExpectSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add "all" condition (AND)
    pub fn with_all(mut self, condition: Condition) -> Self {
        self.all.push(condition);
        self
    }

    /// Add "any" condition (OR)
    pub fn with_any(mut self, condition: Condition) -> Self {
        self.any.push(condition);
        self
    }

    /// Add "deny" condition (NOT)
    pub fn with_deny(mut self, condition: Condition) -> Self {
        self.deny.push(condition);
        self
    }

    pub fn has_conditions(&self) -> bool {
        !self.all.is_empty() || !self.any.is_empty() || !self.deny.is_empty()
    }

    pub fn condition_count(&self) -> usize {
        self.all.len() + self.any.len() + self.deny.len()
    }
}

/// Fresh reading of the page taken after the step settled.
#[derive(Debug, Clone, Copy)]
pub struct PageReading<'a> {
    /// URL of the index the step's actions were planned against
    pub url_before: &'a str,

    /// Index rebuilt after the step
    pub index: &'a ElementIndex,
}

impl<'a> PageReading<'a> {
    pub fn new(url_before: &'a str, index: &'a ElementIndex) -> Self {
        Self { url_before, index }
    }

    pub fn url_after(&self) -> &'a str {
        self.index.url()
    }

    pub fn title(&self) -> &'a str {
        self.index.title()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Inconclusive => "inconclusive",
        }
    }
}

/// Verification result for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verdict: Verdict,

    /// Reasons for pass/fail
    pub reasons: Vec<String>,

    /// Evidence collected during validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
}

impl VerificationOutcome {
    pub fn pass(reasons: Vec<String>) -> Self {
        Self::with_verdict(Verdict::Pass, reasons)
    }

    pub fn fail(reasons: Vec<String>) -> Self {
        Self::with_verdict(Verdict::Fail, reasons)
    }

    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self::with_verdict(Verdict::Inconclusive, vec![reason.into()])
    }

    fn with_verdict(verdict: Verdict, reasons: Vec<String>) -> Self {
        Self {
            verdict,
            reasons,
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl IntoIterator<Item = Evidence>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }

    /// Reasons joined for a step summary.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.verdict.as_str(), self.reasons.join("; "))
    }
}

/// Evidence piece from validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_type: EvidenceType,

    pub description: String,

    /// Evidence value (JSON-serializable)
    pub value: serde_json::Value,

    /// Timestamp when evidence was collected
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Evidence {
    pub fn new(
        evidence_type: EvidenceType,
        description: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            evidence_type,
            description: description.into(),
            value,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    /// Executed action results
    Action,

    /// Element index
    Dom,

    Url,

    Title,
}

impl EvidenceType {
    pub fn name(&self) -> &'static str {
        match self {
            EvidenceType::Action => "action",
            EvidenceType::Dom => "dom",
            EvidenceType::Url => "url",
            EvidenceType::Title => "title",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_spec_parses_partial_lists() {
        let spec: ExpectSpec = serde_json::from_value(json!({
            "any": [{"url_contains": "/done"}, {"text_appears": "Thank you"}]
        }))
        .unwrap();
        assert!(spec.all.is_empty());
        assert_eq!(spec.any.len(), 2);
        assert_eq!(spec.condition_count(), 2);
    }

    #[test]
    fn test_empty_spec_has_no_conditions() {
        assert!(!ExpectSpec::new().has_conditions());
        assert!(ExpectSpec::new()
            .with_deny(Condition::TextAppears("Error".into()))
            .has_conditions());
    }

    #[test]
    fn test_outcome_summary() {
        let outcome = VerificationOutcome::fail(vec!["a".into(), "b".into()]);
        assert!(outcome.is_fail());
        assert_eq!(outcome.summary(), "fail: a; b");
    }
}
