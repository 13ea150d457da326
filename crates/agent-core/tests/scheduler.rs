use std::sync::{Arc, Mutex};
use std::time::Duration;

use action_gate::Verdict;
use agent_core::{
    AgentError, AgentLoopConfig, Directive, FnOracle, ForcedReason, MemoryChecklist, Oracle,
    PlanningContext, ScriptedOracle, StepClass, StepPhase, TerminationReason, TrackerMode,
    WorkflowScheduler,
};
use async_trait::async_trait;
use browser_port::memory::{Behavior, Effect, MemoryPage, MemorySession, SessionCommand};
use browser_port::{NodeId, RawNode};
use qapilot_core_types::Generation;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const FORM: &str = "https://app.test/form";
const DONE: &str = "https://app.test/done";

/// Six links followed by the Submit button, which therefore gets handle 7.
fn form_site() -> Vec<MemoryPage> {
    let links = (1..=6u64).map(|i| {
        RawNode::new(10 + i, "a")
            .with_attr("href", format!("/section-{i}"))
            .with_text(format!("Section {i}"))
    });
    let form = MemoryPage::new(
        FORM,
        "Sign up",
        RawNode::new(1, "body")
            .with_children(links)
            .with_child(RawNode::new(30, "button").with_text("Submit")),
    )
    .with_behavior(Behavior::on_click(
        30,
        Effect::Navigate {
            url: DONE.to_string(),
        },
    ));
    let done = MemoryPage::new(
        DONE,
        "Thanks",
        RawNode::new(1, "body").with_child(RawNode::new(2, "p").with_text("Thanks for signing up")),
    );
    vec![form, done]
}

fn form_session() -> MemorySession {
    MemorySession::opened_at(form_site(), FORM).unwrap()
}

fn scheduler(config: AgentLoopConfig, oracle: Arc<dyn Oracle>) -> WorkflowScheduler {
    WorkflowScheduler::new(config, oracle).unwrap()
}

fn clicks(session: &MemorySession) -> Vec<NodeId> {
    session
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            SessionCommand::Click(node) => Some(node),
            _ => None,
        })
        .collect()
}

fn click(handle: u32) -> serde_json::Value {
    json!({ "actions": [{ "action": "click", "handle": handle }] })
}

fn terminate(success: bool, summary: &str) -> serde_json::Value {
    json!({ "actions": [{ "action": "terminate", "success": success, "summary": summary }] })
}

#[tokio::test]
async fn test_click_submit_then_terminate() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        json!({
            "next_goal": "submit the form",
            "actions": [{ "action": "click", "handle": 7 }],
            "expect": { "all": ["url_changes"] }
        }),
        terminate(true, "form submitted"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "click the button labeled Submit", None)
        .await;

    assert!(outcome.completed);
    assert!(outcome.success);
    assert_eq!(outcome.step_count, 2);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.termination(), TerminationReason::Done);
    assert_eq!(outcome.report.summary, "form submitted");
    assert_eq!(outcome.report.final_url, DONE);

    assert_eq!(clicks(&session), vec![NodeId(30)]);
    assert!(session.is_released());

    let contexts = oracle.contexts();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0].generation, Generation(1));
    assert!(contexts[0].page.contains("[7]<button"));
    assert!(contexts[0].page.contains("Submit"));
    assert!(contexts[0].history.is_empty());
    assert_eq!(contexts[1].url, DONE);
    assert_eq!(contexts[1].generation, Generation(2));
    assert_eq!(contexts[1].history.len(), 1);
    assert!(contexts[1].history[0].summary.contains("pass"));

    let steps = &outcome.report.steps;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].verdict, Some(Verdict::Pass));
    assert_eq!(steps[0].class, StepClass::Success);
    assert_eq!(steps[1].phase, StepPhase::Think);
}

#[tokio::test]
async fn test_start_url_is_opened_first() {
    let session = MemorySession::new(form_site());
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![terminate(
        true,
        "nothing to do",
    )]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "look at the form", Some(FORM))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.step_count, 1);
    assert_eq!(
        session.commands().first(),
        Some(&SessionCommand::Navigate(FORM.to_string()))
    );
    assert_eq!(oracle.contexts()[0].url, FORM);
    assert_eq!(outcome.report.start_url.as_deref(), Some(FORM));
}

#[tokio::test]
async fn test_consecutive_failures_force_after_ignored_warning() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        click(97),
        click(98),
        click(99),
        click(96),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "click the missing button", None)
        .await;

    assert!(outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 4);
    assert_eq!(oracle.calls(), 4);
    assert_eq!(outcome.termination(), TerminationReason::IgnoredFinalWarning);
    assert!(clicks(&session).is_empty());
    assert!(session.is_released());

    let contexts = oracle.contexts();
    assert!(contexts[2].directive.is_none());
    assert_eq!(
        contexts[3].directive,
        Some(Directive::TerminateOnly {
            reason: "3 consecutive steps failed".to_string()
        })
    );
    assert!(contexts[1].history[0].errors[0].contains("does not exist"));

    let last = outcome.report.steps.last().unwrap();
    assert_eq!(last.phase, StepPhase::Think);
    assert!(last.summary.contains("only a terminate action"));
    assert_eq!(
        outcome.report.failures.mode,
        TrackerMode::ForcedTermination(ForcedReason::IgnoredFinalWarning)
    );
}

#[tokio::test]
async fn test_terminate_honored_during_warning() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        click(97),
        click(98),
        click(99),
        json!({
            "actions": [
                { "action": "click", "handle": 7 },
                { "action": "terminate", "success": false, "summary": "no such button" }
            ]
        }),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle)
        .run(&session, "click the missing button", None)
        .await;

    assert!(outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 4);
    assert_eq!(outcome.termination(), TerminationReason::Done);
    assert_eq!(outcome.report.summary, "no such button");
    assert!(clicks(&session).is_empty());
}

#[tokio::test]
async fn test_warning_can_end_successfully() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        click(97),
        click(98),
        click(99),
        terminate(true, "the task was already done"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle)
        .run(&session, "check the form", None)
        .await;

    assert!(outcome.completed);
    assert!(outcome.success);
    assert_eq!(outcome.step_count, 4);
}

#[tokio::test]
async fn test_failures_without_final_response_force_immediately() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        click(97),
        click(98),
        click(99),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast().final_response(false), oracle.clone())
        .run(&session, "click the missing button", None)
        .await;

    assert!(outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 3);
    assert_eq!(oracle.calls(), 3);
    assert_eq!(outcome.termination(), TerminationReason::ConsecutiveFailures);
}

#[tokio::test]
async fn test_step_budget_ends_run() {
    let session = form_session();
    let oracle = Arc::new(FnOracle::new(|ctx: &PlanningContext| {
        let amount = if ctx.step % 2 == 0 { 200 } else { -100 };
        Ok(json!({ "actions": [{ "action": "scroll", "amount": amount }] }).to_string())
    }));
    let outcome = scheduler(AgentLoopConfig::fast().max_steps(50), oracle)
        .run(&session, "scroll forever", None)
        .await;

    assert!(outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 50);
    assert_eq!(outcome.termination(), TerminationReason::StepBudget);
    assert_eq!(outcome.report.steps.len(), 50);
    assert!(outcome
        .report
        .steps
        .iter()
        .all(|step| step.class == StepClass::Success));
    assert!(session.is_released());
}

#[tokio::test]
async fn test_identical_steps_force_repetition() {
    let session = form_session();
    let oracle = Arc::new(FnOracle::new(|_: &PlanningContext| {
        Ok(json!({ "actions": [{ "action": "scroll", "amount": 300 }] }).to_string())
    }));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle)
        .run(&session, "find the footer", None)
        .await;

    assert!(outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 3);
    assert_eq!(outcome.termination(), TerminationReason::RepeatedAction);
    assert_eq!(outcome.report.failures.repetition, 3);
    assert_eq!(outcome.report.failures.consecutive, 0);
    assert_eq!(session.scroll_position(), 900);
}

#[tokio::test]
async fn test_cancellation_between_phases() {
    let session = form_session();
    let token = CancellationToken::new();
    let trigger = token.clone();
    let oracle = Arc::new(FnOracle::new(move |ctx: &PlanningContext| {
        if ctx.step == 2 {
            trigger.cancel();
        }
        Ok(json!({ "actions": [{ "action": "scroll", "amount": 100 * ctx.step }] }).to_string())
    }));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle)
        .with_cancellation(token)
        .run(&session, "scroll until told to stop", None)
        .await;

    assert!(!outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 2);
    assert_eq!(outcome.termination(), TerminationReason::Cancelled);
    assert_eq!(session.scroll_position(), 100);
    assert!(session.is_released());
}

struct StalledOracle;

#[async_trait]
impl Oracle for StalledOracle {
    async fn decide(&self, _ctx: &PlanningContext) -> Result<String, AgentError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AgentError::oracle("never answered"))
    }
}

#[tokio::test]
async fn test_cancellation_interrupts_oracle() {
    let session = form_session();
    let runner = scheduler(
        AgentLoopConfig::fast().oracle_timeout(120_000),
        Arc::new(StalledOracle),
    );
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let outcome = runner.run(&session, "wait for a decision", None).await;

    assert!(!outcome.completed);
    assert_eq!(outcome.termination(), TerminationReason::Cancelled);
    assert_eq!(outcome.step_count, 1);
    assert!(session.is_released());
}

#[tokio::test]
async fn test_session_loss_is_not_completed() {
    let page = MemoryPage::new(
        FORM,
        "Crash",
        RawNode::new(1, "body").with_child(RawNode::new(2, "button").with_text("Crash")),
    )
    .with_behavior(Behavior::on_click(2, Effect::Disconnect));
    let session = MemorySession::opened_at(vec![page], FORM).unwrap();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![click(1)]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "press the button", None)
        .await;

    assert!(!outcome.completed);
    assert!(!outcome.success);
    assert_eq!(outcome.step_count, 1);
    assert_eq!(outcome.termination(), TerminationReason::SessionLost);
    assert!(outcome.error.is_some());
    assert_eq!(oracle.calls(), 1);
    assert!(session.is_released());

    let steps = &outcome.report.steps;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].phase, StepPhase::Act);
    assert_eq!(steps[0].class, StepClass::Failure);
}

#[tokio::test]
async fn test_unparseable_and_repaired_replies() {
    let session = form_session();
    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_reply("I think I should click the submit button.")
            .with_error("connection reset")
            .with_reply(
                "```json\n{\"next_goal\": \"submit\", \"actions\": [{\"action\": \"click\", \"element_index\": 7},],}\n```",
            )
            .with_reply(
                "{\"actions\": [{\"action\": \"done\", \"done_success\": true, \"done_text\": \"submitted\"}]}",
            ),
    );
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "click the button labeled Submit", None)
        .await;

    assert!(outcome.completed);
    assert!(outcome.success);
    assert_eq!(outcome.step_count, 4);
    assert_eq!(outcome.report.summary, "submitted");
    assert_eq!(clicks(&session), vec![NodeId(30)]);

    let steps = &outcome.report.steps;
    assert_eq!(steps[0].phase, StepPhase::Think);
    assert_eq!(steps[0].class, StepClass::Failure);
    assert_eq!(steps[1].class, StepClass::Failure);
    assert_eq!(steps[2].class, StepClass::Success);
    assert_eq!(outcome.report.failures.consecutive, 0);

    let contexts = oracle.contexts();
    assert!(contexts[2].history[1].errors[0].contains("connection reset"));
}

#[tokio::test]
async fn test_checklist_is_read_and_overwritten() {
    let session = form_session();
    let store = Arc::new(MemoryChecklist::with_contents("- [ ] submit the form"));
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        json!({
            "actions": [{ "action": "click", "handle": 7 }],
            "checklist": "- [x] submit the form"
        }),
        terminate(true, "done"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .with_checklist(store.clone())
        .run(&session, "submit the form", None)
        .await;

    assert!(outcome.success);
    let contexts = oracle.contexts();
    assert_eq!(contexts[0].checklist.as_deref(), Some("- [ ] submit the form"));
    assert_eq!(contexts[1].checklist.as_deref(), Some("- [x] submit the form"));
    assert_eq!(store.contents().as_deref(), Some("- [x] submit the form"));
}

#[tokio::test]
async fn test_stale_only_step_is_neutral_and_rebuilds() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        json!({ "actions": [{ "action": "click", "handle": 7, "generation": 99 }] }),
        terminate(true, "done"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "submit the form", None)
        .await;

    assert!(outcome.success);
    assert!(clicks(&session).is_empty());
    assert_eq!(outcome.report.steps[0].class, StepClass::Neutral);
    assert_eq!(outcome.report.failures.consecutive, 0);

    let contexts = oracle.contexts();
    assert_eq!(contexts[0].generation, Generation(1));
    assert_eq!(contexts[1].generation, Generation(2));
    assert!(contexts[1].history[0].errors[0].contains("stale"));
}

#[tokio::test]
async fn test_handles_planned_before_a_page_change_are_skipped() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        json!({
            "actions": [
                { "action": "click", "handle": 7 },
                { "action": "click", "handle": 3 }
            ]
        }),
        terminate(true, "done"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle)
        .run(&session, "submit the form", None)
        .await;

    assert!(outcome.success);
    assert_eq!(clicks(&session), vec![NodeId(30)]);
    assert_eq!(outcome.report.steps[0].class, StepClass::Success);
}

#[tokio::test]
async fn test_actions_beyond_limit_are_dropped() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        json!({
            "actions": [
                { "action": "scroll", "amount": 100 },
                { "action": "scroll", "amount": 100 },
                { "action": "scroll", "amount": 100 },
                { "action": "scroll", "amount": 100 }
            ]
        }),
        terminate(true, "scrolled"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle)
        .run(&session, "scroll down", None)
        .await;

    assert!(outcome.success);
    assert_eq!(session.scroll_position(), 300);
}

#[tokio::test]
async fn test_revealed_elements_are_marked_and_noted() {
    let options = (1..=6u64).map(|i| {
        RawNode::new(50 + i, "li")
            .with_role("option")
            .with_text(format!("Choice {i}"))
    });
    let page = MemoryPage::new(
        FORM,
        "Menu",
        RawNode::new(1, "body")
            .with_child(RawNode::new(40, "button").with_text("Open menu"))
            .with_child(RawNode::new(41, "ul")),
    )
    .with_behavior(Behavior::on_click(
        40,
        Effect::Reveal {
            parent: NodeId(41),
            nodes: options.collect(),
        },
    ));
    let session = MemorySession::opened_at(vec![page], FORM).unwrap();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        click(1),
        terminate(true, "menu opened"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "open the menu", None)
        .await;

    assert!(outcome.success);
    let contexts = oracle.contexts();
    assert!(!contexts[0].page.contains("*["));
    assert!(contexts[1].page.contains("*["));
    assert!(contexts[1].history[0]
        .summary
        .contains("6 new elements appeared: dropdown or menu likely opened"));
}

#[tokio::test]
async fn test_terminate_survives_action_limit() {
    let session = form_session();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![json!({
        "actions": [
            { "action": "scroll", "amount": 100 },
            { "action": "scroll", "amount": 200 },
            { "action": "scroll", "amount": 300 },
            { "action": "terminate", "success": true, "summary": "all done" }
        ]
    })]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "scroll to the end", None)
        .await;

    assert!(outcome.completed);
    assert!(outcome.success);
    assert_eq!(outcome.termination(), TerminationReason::Done);
    assert_eq!(outcome.report.summary, "all done");
    assert_eq!(outcome.step_count, 1);
    assert_eq!(oracle.calls(), 1);
    assert_eq!(session.scroll_position(), 600);
}

#[tokio::test]
async fn test_revealed_elements_are_not_new_on_later_steps() {
    let options = (1..=6u64).map(|i| {
        RawNode::new(50 + i, "li")
            .with_role("option")
            .with_text(format!("Choice {i}"))
    });
    let page = MemoryPage::new(
        FORM,
        "Menu",
        RawNode::new(1, "body")
            .with_child(RawNode::new(40, "button").with_text("Open menu"))
            .with_child(RawNode::new(41, "ul")),
    )
    .with_behavior(Behavior::on_click(
        40,
        Effect::Reveal {
            parent: NodeId(41),
            nodes: options.collect(),
        },
    ));
    let session = MemorySession::opened_at(vec![page], FORM).unwrap();
    let oracle = Arc::new(ScriptedOracle::from_decisions(vec![
        click(1),
        json!({ "actions": [{ "action": "scroll", "amount": 100 }] }),
        terminate(true, "menu read"),
    ]));
    let outcome = scheduler(AgentLoopConfig::fast(), oracle.clone())
        .run(&session, "open the menu and scroll", None)
        .await;

    assert!(outcome.success);
    let steps = &outcome.report.steps;
    assert_eq!(steps[0].new_elements, 6);
    assert_eq!(steps[1].new_elements, 0);
    assert!(!steps[1].summary.contains("new elements"));
    let history = &oracle.contexts()[2].history;
    assert!(!history[1].summary.contains("new elements"));
}

#[tokio::test]
async fn test_history_window_is_bounded() {
    let session = form_session();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let lengths = seen.clone();
    let oracle = Arc::new(FnOracle::new(move |ctx: &PlanningContext| {
        lengths.lock().unwrap().push(ctx.history.len());
        Ok(json!({ "actions": [{ "action": "scroll", "amount": 10 * ctx.step }] }).to_string())
    }));
    let mut config = AgentLoopConfig::fast().max_steps(6);
    config.max_history_items = 2;
    let outcome = scheduler(config, oracle).run(&session, "scroll", None).await;

    assert_eq!(outcome.termination(), TerminationReason::StepBudget);
    assert_eq!(outcome.report.steps.len(), 6);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 2, 2, 2]);
}

#[test]
fn test_invalid_config_is_rejected() {
    let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new());
    assert!(WorkflowScheduler::new(AgentLoopConfig::fast().max_steps(0), oracle).is_err());
}
