use std::path::Path;
use std::sync::Arc;

use agent_core::{AgentLoopConfig, FnOracle, PlanningContext, ScriptedOracle, TerminationReason};
use browser_port::memory::{MemoryPage, MemorySession};
use browser_port::RawNode;
use qapilot::{replay, run, ReplayOptions, RunRequest, Runner, Scenario};
use serde_json::json;

#[tokio::test]
async fn bundled_scenarios_meet_their_expectations() {
    let mut paths: Vec<_> = std::fs::read_dir(Path::new("scenarios"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "yaml"))
        .collect();
    paths.sort();
    assert!(paths.len() >= 5, "scenarios missing: {paths:?}");

    for path in paths {
        let scenario = Scenario::load(&path).await.unwrap();
        let report = replay(&scenario, &AgentLoopConfig::fast(), ReplayOptions::default())
            .await
            .unwrap();
        assert!(
            report.passed(),
            "{}: {:?}",
            path.display(),
            report.mismatches
        );
        assert!(report.outcome.completed, "{}", path.display());
    }
}

#[tokio::test]
async fn step_budget_override_applies() {
    let scenario = Scenario::load(Path::new("scenarios/submit_form.yaml"))
        .await
        .unwrap();
    let options = ReplayOptions {
        max_steps: Some(1),
        ..Default::default()
    };
    let report = replay(&scenario, &AgentLoopConfig::fast(), options)
        .await
        .unwrap();

    assert!(!report.passed());
    assert_eq!(report.outcome.termination(), TerminationReason::StepBudget);
    assert!(report.outcome.completed);
    assert!(!report.outcome.success);
}

#[tokio::test]
async fn live_oracle_replaces_scripted_decisions() {
    let scenario = Scenario::load(Path::new("scenarios/repeated_scroll.yaml"))
        .await
        .unwrap();
    let oracle = FnOracle::new(|ctx: &PlanningContext| {
        Ok(json!({
            "actions": [{
                "action": "terminate",
                "success": true,
                "summary": format!("gave up at step {}", ctx.step)
            }]
        })
        .to_string())
    });
    let options = ReplayOptions {
        oracle: Some(Arc::new(oracle)),
        ..Default::default()
    };
    let report = replay(&scenario, &AgentLoopConfig::fast(), options)
        .await
        .unwrap();

    assert_eq!(report.outcome.termination(), TerminationReason::Done);
    assert_eq!(report.outcome.report.summary, "gave up at step 1");
    assert_eq!(report.unused_decisions, 0);
    assert!(!report.passed());
}

#[tokio::test]
async fn run_boundary_reports_outcome() {
    let page = MemoryPage::new(
        "https://app.test/",
        "Home",
        RawNode::new(1, "body").with_child(RawNode::new(2, "h1").with_text("Welcome home")),
    );
    let session = MemorySession::new(vec![page]);
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        json!({ "actions": [{ "action": "extract", "query": "welcome" }] }),
        json!({ "actions": [{ "action": "terminate", "success": true, "summary": "Welcome home" }] }),
    ]));

    let outcome = run(
        &session,
        oracle.clone(),
        "read the heading",
        Some("https://app.test/"),
        Some(5),
        Some(2),
    )
    .await
    .unwrap();

    assert!(outcome.completed);
    assert!(outcome.success);
    assert_eq!(outcome.step_count, 2);
    assert_eq!(outcome.report.start_url.as_deref(), Some("https://app.test/"));
    let contexts = oracle.contexts();
    assert_eq!(contexts[0].max_steps, 5);
    assert!(contexts[1].history[0].summary.contains("Welcome home"));
    assert!(session.is_released());

    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["report"]["termination"], "done");
    assert!(value.get("error").is_none());
}

#[tokio::test]
async fn invalid_budgets_are_rejected_before_running() {
    let session = MemorySession::new(Vec::new());
    let runner = Runner::new(AgentLoopConfig::fast(), Arc::new(ScriptedOracle::new()));
    let request = RunRequest::new("anything").max_steps(0);

    assert!(runner.run(&session, &request).await.is_err());
    assert!(session.commands().is_empty());
}
