//! Evidence collection

use action_primitives::ActionResult;
use serde_json::json;
use tracing::debug;

use crate::types::{Evidence, EvidenceType, PageReading};

/// Collects what the verdict was based on: the action results and, when
/// present, the post-step reading.
pub fn collect_evidence(results: &[ActionResult], reading: Option<&PageReading<'_>>) -> Vec<Evidence> {
    let mut evidence = Vec::new();

    let actions: Vec<_> = results
        .iter()
        .map(|r| {
            json!({
                "action": r.action,
                "status": r.status,
                "error": r.error,
                "latency_ms": r.latency_ms,
            })
        })
        .collect();
    evidence.push(Evidence::new(
        EvidenceType::Action,
        format!("{} action result(s)", results.len()),
        json!(actions),
    ));

    if let Some(reading) = reading {
        evidence.push(Evidence::new(
            EvidenceType::Url,
            "URL before and after the step",
            json!({ "before": reading.url_before, "after": reading.url_after() }),
        ));
        evidence.push(Evidence::new(
            EvidenceType::Title,
            "Page title after the step",
            json!(reading.title()),
        ));
        evidence.push(Evidence::new(
            EvidenceType::Dom,
            "Element index after the step",
            json!({
                "generation": reading.index.generation(),
                "elements": reading.index.len(),
                "fresh": reading.index.fresh().count(),
                "truncated": reading.index.is_truncated(),
            }),
        ));
    }

    debug!(count = evidence.len(), "Collected evidence");
    evidence
}
