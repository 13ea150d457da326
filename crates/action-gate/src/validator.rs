//! Step verifier

use action_primitives::ActionResult;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    conditions::Condition,
    errors::GateError,
    evidence::collect_evidence,
    types::{ExpectSpec, PageReading, VerificationOutcome},
};

/// Judges a step from its action results and an optional expectation.
///
/// Stale results are skipped work, not outcomes, and are ignored here.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(
        &self,
        results: &[ActionResult],
        expectation: Option<&ExpectSpec>,
        reading: Option<&PageReading<'_>>,
    ) -> VerificationOutcome {
        let evidence = collect_evidence(results, reading);
        let outcome = self.judge(results, expectation, reading);
        info!(
            verdict = outcome.verdict.as_str(),
            reasons = outcome.reasons.len(),
            "Step verified"
        );
        outcome.with_evidence(evidence)
    }

    fn judge(
        &self,
        results: &[ActionResult],
        expectation: Option<&ExpectSpec>,
        reading: Option<&PageReading<'_>>,
    ) -> VerificationOutcome {
        let executed: Vec<&ActionResult> = results.iter().filter(|r| !r.is_stale()).collect();
        if executed.is_empty() {
            return VerificationOutcome::inconclusive("no action was executed");
        }

        let errors: Vec<String> = executed
            .iter()
            .filter(|r| r.is_error())
            .map(|r| {
                format!(
                    "{} failed: {}",
                    r.action,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if !errors.is_empty() {
            return VerificationOutcome::fail(errors);
        }

        let spec = match expectation.filter(|spec| spec.has_conditions()) {
            Some(spec) => spec,
            None => {
                return VerificationOutcome::pass(vec![format!(
                    "{} action(s) succeeded",
                    executed.len()
                )])
            }
        };
        match reading {
            Some(reading) => self.check(spec, reading),
            None => VerificationOutcome::inconclusive("no page reading to check expectations"),
        }
    }

    /// Evaluates all/any/deny rules against the reading.
    pub fn check(&self, spec: &ExpectSpec, reading: &PageReading<'_>) -> VerificationOutcome {
        debug!(conditions = spec.condition_count(), "Checking expectations");
        let mut reasons = Vec::new();
        let mut all_passed = true;

        for condition in &spec.all {
            match evaluate(condition, reading) {
                Ok(true) => {}
                Ok(false) => {
                    reasons.push(format!("expected {condition}: {}", observed(condition, reading)));
                    all_passed = false;
                }
                Err(e) => {
                    reasons.push(e.to_string());
                    all_passed = false;
                }
            }
        }

        if !spec.any.is_empty() {
            let mut any_passed = false;
            for condition in &spec.any {
                match evaluate(condition, reading) {
                    Ok(true) => {
                        any_passed = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => reasons.push(e.to_string()),
                }
            }
            if !any_passed {
                let listed: Vec<String> = spec.any.iter().map(ToString::to_string).collect();
                reasons.push(format!("none of [{}] held", listed.join(", ")));
                all_passed = false;
            }
        }

        for condition in &spec.deny {
            match evaluate(condition, reading) {
                Ok(false) => {}
                Ok(true) => {
                    reasons.push(format!("denied condition held: {condition}"));
                    all_passed = false;
                }
                Err(e) => {
                    reasons.push(e.to_string());
                    all_passed = false;
                }
            }
        }

        if all_passed {
            VerificationOutcome::pass(vec!["all expectations met".to_string()])
        } else {
            warn!(reasons = ?reasons, "Expectations not met");
            VerificationOutcome::fail(reasons)
        }
    }
}

fn evaluate(condition: &Condition, reading: &PageReading<'_>) -> Result<bool, GateError> {
    let url = reading.url_after();
    Ok(match condition {
        Condition::UrlChanges => url != reading.url_before,
        Condition::UrlUnchanged => url == reading.url_before,
        Condition::UrlContains(part) => url.contains(part.as_str()),
        Condition::UrlMatches(pattern) => Regex::new(pattern)
            .map_err(|err| GateError::invalid_pattern(pattern, err))?
            .is_match(url),
        Condition::TextAppears(text) => reading.index.contains_text(text),
        Condition::TextAbsent(text) => !reading.index.contains_text(text),
        Condition::TitleContains(part) => reading
            .title()
            .to_lowercase()
            .contains(&part.to_lowercase()),
    })
}

fn observed(condition: &Condition, reading: &PageReading<'_>) -> String {
    match condition {
        Condition::TitleContains(_) => format!("title is '{}'", reading.title()),
        Condition::TextAppears(_) | Condition::TextAbsent(_) => format!(
            "{} element(s) indexed at {}",
            reading.index.len(),
            reading.index.generation()
        ),
        _ => format!("URL went from {} to {}", reading.url_before, reading.url_after()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Verdict;
    use action_primitives::{ActionError, ActionErrorKind};
    use qapilot_core_types::Generation;

    #[test]
    fn test_error_result_fails_with_message() {
        let results = vec![
            ActionResult::success("click [1]"),
            ActionResult::failure("click [2]", &ActionError::validation("no such handle")),
        ];
        let outcome = Verifier::new().verify(&results, None, None);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.reasons.len(), 1);
        assert!(outcome.reasons[0].contains("no such handle"));
    }

    #[test]
    fn test_success_without_expectation_passes() {
        let results = vec![ActionResult::success("scroll 300")];
        let outcome = Verifier::new().verify(&results, Some(&ExpectSpec::new()), None);
        assert!(outcome.is_pass());
        assert!(!outcome.evidence.is_empty());
    }

    #[test]
    fn test_nothing_executed_is_inconclusive() {
        let stale = ActionResult::failure(
            "click [3]",
            &ActionError::StaleHandle {
                requested: Generation(1),
                current: Generation(2),
            },
        );
        assert_eq!(stale.error_kind, Some(ActionErrorKind::StaleHandle));
        let verifier = Verifier::new();
        assert_eq!(verifier.verify(&[], None, None).verdict, Verdict::Inconclusive);
        assert_eq!(
            verifier.verify(&[stale], None, None).verdict,
            Verdict::Inconclusive
        );
    }

    #[test]
    fn test_expectation_without_reading_is_inconclusive() {
        let spec = ExpectSpec::new().with_all(Condition::UrlChanges);
        let outcome =
            Verifier::new().verify(&[ActionResult::success("click [7]")], Some(&spec), None);
        assert_eq!(outcome.verdict, Verdict::Inconclusive);
    }
}
