//! Workflow scheduler: drives one run through INIT -> THINK -> ACT ->
//! VERIFY -> ... -> REPORT.
//!
//! Each phase consumes the previous phase's output, so phases never overlap.
//! Cancellation is checked between phases and while the oracle is thinking.
//! Every run owns its index builder, executor, state store and failure
//! tracker; a scheduler can serve several concurrent runs as long as each
//! has its own session.

use std::sync::Arc;
use std::time::Instant;

use action_gate::{PageReading, Verifier};
use action_primitives::{
    ActionExecutor, ActionFingerprint, ActionKind, ActionResult, ErrorClass, StabilityGate,
};
use browser_port::BrowserSession;
use chrono::{DateTime, Utc};
use perceiver_structural::{ElementIndex, IndexBuilder, IndexRenderer};
use qapilot_core_types::{Generation, RunId};
use qapilot_state_center::StateStore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::AgentLoopConfig;
use super::decision::parse_decision;
use super::failure::{FailureTracker, ForcedReason, TrackerMode};
use super::report::{RunOutcome, RunReport, StepSummary, TerminationReason};
use super::state::{WorkflowState, WorkflowUpdate};
use super::types::{AgentDecision, Directive, PlanningContext, StepClass, StepPhase, StepRecord};
use crate::checklist::ChecklistStore;
use crate::errors::AgentError;
use crate::oracle::Oracle;

/// New elements after a single action that suggest an opened overlay.
const REVEAL_HINT_THRESHOLD: usize = 5;

const MAX_EXTRACT_IN_SUMMARY: usize = 200;

/// Drives runs of the decision loop against browser sessions.
pub struct WorkflowScheduler {
    config: AgentLoopConfig,
    oracle: Arc<dyn Oracle>,
    checklist: Option<Arc<dyn ChecklistStore>>,
    cancel: CancellationToken,
    verifier: Verifier,
}

impl WorkflowScheduler {
    pub fn new(config: AgentLoopConfig, oracle: Arc<dyn Oracle>) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            config,
            oracle,
            checklist: None,
            cancel: CancellationToken::new(),
            verifier: Verifier::new(),
        })
    }

    pub fn with_checklist(mut self, store: Arc<dyn ChecklistStore>) -> Self {
        self.checklist = Some(store);
        self
    }

    /// Uses an externally owned token; cancelling it stops every run of
    /// this scheduler at the next phase boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Runs one task to completion. The session is released before this
    /// returns, whatever the outcome.
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        task: &str,
        start_url: Option<&str>,
    ) -> RunOutcome {
        let mut run = Run::new(self, session, task, start_url);
        info!(
            run_id = %run.run_id,
            session = %session.session_id(),
            max_steps = self.config.max_steps,
            max_failures = self.config.max_failures,
            "Starting run"
        );

        let mut phase = Phase::Init;
        loop {
            phase = match phase {
                Phase::Report(ending) => return run.report(ending).await,
                _ if self.cancel.is_cancelled() => {
                    info!(run_id = %run.run_id, step = run.step, "Run cancelled");
                    Phase::Report(Ending::cancelled())
                }
                Phase::Init => run.init().await,
                Phase::Think => run.think().await,
                Phase::Act(planned) => run.act(planned).await,
                Phase::Verify(draft) => run.verify(draft).await,
            };
        }
    }
}

enum Phase {
    Init,
    Think,
    Act(Planned),
    Verify(Draft),
    Report(Ending),
}

/// A decision ready to execute.
struct Planned {
    decision: AgentDecision,
    generation: Generation,
    url_before: String,
}

/// What ACT produced, waiting to be judged.
struct Draft {
    planned: Planned,
    results: Vec<ActionResult>,
    rebuilt: bool,
    new_elements: usize,
    notes: Vec<String>,
}

struct Ending {
    reason: TerminationReason,
    success: bool,
    summary: String,
    error: Option<String>,
}

impl Ending {
    fn done(success: bool, summary: &str) -> Self {
        Self {
            reason: TerminationReason::Done,
            success,
            summary: summary.to_string(),
            error: None,
        }
    }

    fn because(reason: TerminationReason) -> Self {
        Self {
            reason,
            success: false,
            summary: reason.describe().to_string(),
            error: None,
        }
    }

    fn forced(reason: ForcedReason) -> Self {
        Self::because(reason.into())
    }

    fn cancelled() -> Self {
        Self::because(TerminationReason::Cancelled)
    }

    fn fatal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(error = %message, "Browser session lost");
        Self {
            error: Some(message),
            ..Self::because(TerminationReason::SessionLost)
        }
    }
}

struct Run<'a> {
    scheduler: &'a WorkflowScheduler,
    config: &'a AgentLoopConfig,
    session: &'a dyn BrowserSession,
    task: &'a str,
    start_url: Option<&'a str>,
    run_id: RunId,
    builder: IndexBuilder,
    executor: ActionExecutor,
    gate: StabilityGate,
    renderer: IndexRenderer,
    store: StateStore<WorkflowState>,
    tracker: FailureTracker,
    index: Option<ElementIndex>,
    index_dirty: bool,
    step: u32,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(
        scheduler: &'a WorkflowScheduler,
        session: &'a dyn BrowserSession,
        task: &'a str,
        start_url: Option<&'a str>,
    ) -> Self {
        let config = &scheduler.config;
        Self {
            scheduler,
            config,
            session,
            task,
            start_url,
            run_id: RunId::new(),
            builder: IndexBuilder::new(config.index_config()),
            executor: ActionExecutor::new(config.executor_config()),
            gate: config.stability_gate(),
            renderer: config.renderer(),
            store: StateStore::new(WorkflowState::default()),
            tracker: FailureTracker::new(config),
            index: None,
            index_dirty: false,
            step: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    async fn init(&mut self) -> Phase {
        if let Some(url) = self.start_url {
            info!(url, "Opening start URL");
            match timeout(self.config.command_timeout(), self.session.navigate(url)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_fatal() => {
                    return Phase::Report(Ending::fatal(err.to_string()))
                }
                Ok(Err(err)) => warn!(url, error = %err, "Start URL did not load"),
                Err(_) => warn!(
                    url,
                    timeout_ms = self.config.command_timeout_ms,
                    "Start URL navigation timed out"
                ),
            }
        }
        match self.settle_and_rebuild().await {
            Ok(_) => Phase::Think,
            Err(err) if err.is_fatal() => Phase::Report(Ending::fatal(err.to_string())),
            Err(err) => {
                warn!(error = %err, "Initial index build failed; retrying at THINK");
                self.index_dirty = true;
                Phase::Think
            }
        }
    }

    async fn think(&mut self) -> Phase {
        if self.step >= self.config.max_steps {
            return Phase::Report(Ending::because(TerminationReason::StepBudget));
        }
        self.step += 1;
        self.store.apply(WorkflowUpdate {
            step_count: Some(self.step),
            ..Default::default()
        });

        if self.index.is_none() || self.index_dirty {
            if let Err(err) = self.rebuild().await {
                if err.is_fatal() {
                    return Phase::Report(Ending::fatal(err.to_string()));
                }
                return self.close_without_decision(err);
            }
        }

        let ctx = match self.planning_context().await {
            Some(ctx) => ctx,
            None => return self.close_without_decision(AgentError::planner("no element index")),
        };
        info!(
            step = self.step,
            generation = %ctx.generation,
            url = %ctx.url,
            directive = ctx.directive.is_some(),
            "THINK"
        );

        let cancel = self.scheduler.cancel.clone();
        let limit = self.config.oracle_timeout_duration();
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Phase::Report(Ending::cancelled()),
            reply = timeout(limit, self.scheduler.oracle.decide(&ctx)) => reply,
        };
        let decision = match reply {
            Ok(Ok(raw)) => parse_decision(&raw),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AgentError::Timeout {
                what: "oracle call",
                ms: self.config.oracle_timeout_ms,
            }),
        };
        let mut decision = match decision {
            Ok(decision) => decision,
            Err(err) => return self.close_without_decision(err),
        };
        debug!(
            step = self.step,
            next_goal = %decision.next_goal,
            actions = %decision.describe_actions(),
            "Decision received"
        );

        if let Some(contents) = &decision.checklist {
            self.write_checklist(contents).await;
        }

        if self.tracker.counters().is_warning() {
            if let Some((success, summary)) = decision.terminate() {
                info!(step = self.step, success, "Terminate-only step honored");
                let summary = summary.to_string();
                self.record_terminal(&ctx, decision, success, &summary);
                return Phase::Report(Ending::done(success, &summary));
            }
            warn!(
                step = self.step,
                actions = %decision.describe_actions(),
                "Terminate-only step answered with other actions"
            );
            let record = StepRecord {
                decision: Some(decision),
                ..StepRecord::planner_failure(
                    self.step,
                    ctx.generation,
                    &ctx.url,
                    "only a terminate action was allowed in this step".to_string(),
                )
            };
            return self.close_step(record, None);
        }

        if decision.terminates_immediately() {
            let (success, summary) = decision.terminate().unwrap_or((false, ""));
            let summary = summary.to_string();
            info!(step = self.step, success, "Oracle terminated the run");
            self.record_terminal(&ctx, decision, success, &summary);
            return Phase::Report(Ending::done(success, &summary));
        }

        let max_actions = self.config.max_actions_per_step as usize;
        let planned = decision.actions.len();
        let dropped = decision.cap_actions(max_actions);
        if dropped > 0 {
            warn!(
                step = self.step,
                planned,
                dropped,
                max_actions,
                "Dropping actions beyond the per-step limit"
            );
        }

        Phase::Act(Planned {
            decision,
            generation: ctx.generation,
            url_before: ctx.url,
        })
    }

    async fn act(&mut self, planned: Planned) -> Phase {
        let mut results = Vec::with_capacity(planned.decision.actions.len());
        let mut rebuilt = false;
        let mut new_elements = 0;
        let mut notes = Vec::new();
        let count = planned.decision.actions.len();

        for (position, action) in planned.decision.actions.iter().enumerate() {
            if let ActionKind::Terminate { success, summary } = &action.kind {
                results.push(ActionResult::terminal(
                    action.kind.to_string(),
                    *success,
                    summary.clone(),
                ));
                break;
            }
            let Some(index) = self.index.as_ref() else {
                notes.push(format!("{} skipped: no element index", action.kind));
                break;
            };

            let mut request = action.to_request(planned.generation);
            if !action.kind.references_index() {
                request = request.rebased(index.generation());
            }
            let url_before = index.url().to_string();
            let result = self.executor.execute(self.session, &request, index).await;

            if result.error_class() == Some(ErrorClass::Fatal) {
                let message = result.error.clone().unwrap_or_else(|| "session lost".into());
                results.push(result);
                self.record_fatal(&planned, results, &message);
                return Phase::Report(Ending::fatal(message));
            }
            let stop = result.is_error() && !result.is_stale();
            let mutated = result.mutated;
            results.push(result);

            if mutated {
                match self.settle_and_rebuild().await {
                    Ok(added) => {
                        rebuilt = true;
                        new_elements += added;
                        let same_page =
                            self.index.as_ref().map(|i| i.url()) == Some(url_before.as_str());
                        if same_page && added > REVEAL_HINT_THRESHOLD {
                            notes.push(format!(
                                "{added} new elements appeared: dropdown or menu likely opened"
                            ));
                        }
                    }
                    Err(err) if err.is_fatal() => {
                        let message = err.to_string();
                        self.record_fatal(&planned, results, &message);
                        return Phase::Report(Ending::fatal(message));
                    }
                    Err(err) => {
                        warn!(error = %err, "Index rebuild failed after action");
                        notes.push(format!("page could not be re-read: {err}"));
                        self.index = None;
                        self.index_dirty = true;
                        break;
                    }
                }
            }
            if stop {
                break;
            }
            if position + 1 < count && self.config.wait_between_actions_ms > 0 {
                sleep(std::time::Duration::from_millis(
                    self.config.wait_between_actions_ms,
                ))
                .await;
            }
        }

        Phase::Verify(Draft {
            planned,
            results,
            rebuilt,
            new_elements,
            notes,
        })
    }

    async fn verify(&mut self, draft: Draft) -> Phase {
        let Draft {
            planned,
            results,
            rebuilt,
            new_elements,
            mut notes,
        } = draft;
        let expectation = planned
            .decision
            .expect
            .as_ref()
            .filter(|spec| spec.has_conditions());
        let executed = results.iter().any(|r| !r.is_stale() && !r.is_terminal);

        if expectation.is_some() && executed && !rebuilt {
            match self.rebuild().await {
                Ok(_) => {}
                Err(err) if err.is_fatal() => {
                    let message = err.to_string();
                    self.record_fatal(&planned, results, &message);
                    return Phase::Report(Ending::fatal(message));
                }
                Err(err) => {
                    warn!(error = %err, "Could not re-read the page for verification");
                    self.index = None;
                    self.index_dirty = true;
                }
            }
        }

        let reading = self
            .index
            .as_ref()
            .map(|index| PageReading::new(&planned.url_before, index));
        let outcome = self
            .scheduler
            .verifier
            .verify(&results, expectation, reading.as_ref());

        let class = StepClass::from_results(&results);
        if class == StepClass::Neutral && results.iter().any(ActionResult::is_stale) {
            debug!(step = self.step, "Only stale requests this step; index will be rebuilt");
            self.index_dirty = true;
        }

        for result in &results {
            if result.is_terminal {
                continue;
            }
            if let Some(content) = result.extracted_content.as_deref() {
                notes.push(format!("{}: {}", result.action, clip(content)));
            }
        }
        let mut summary = format!(
            "{} -> {}",
            planned.decision.describe_actions(),
            outcome.summary()
        );
        if !notes.is_empty() {
            summary.push_str(" | ");
            summary.push_str(&notes.join(" | "));
        }
        let errors = results.iter().filter_map(|r| r.error.clone()).collect();
        info!(
            step = self.step,
            verdict = outcome.verdict.as_str(),
            class = ?class,
            new_elements,
            "VERIFY"
        );

        let fingerprint = planned.decision.fingerprint();
        let record = StepRecord {
            step: self.step,
            phase: StepPhase::Verify,
            generation: planned.generation,
            url: self.current_url(&planned.url_before),
            decision: Some(planned.decision),
            results,
            verdict: Some(outcome.verdict),
            class,
            new_elements,
            summary,
            errors,
            recorded_at: Utc::now(),
        };
        self.close_step(record, Some(fingerprint))
    }

    async fn report(self, ending: Ending) -> RunOutcome {
        match timeout(self.config.command_timeout(), self.session.release()).await {
            Ok(Ok(())) => debug!(session = %self.session.session_id(), "Session released"),
            Ok(Err(err)) => warn!(error = %err, "Session release failed"),
            Err(_) => warn!(
                timeout_ms = self.config.command_timeout_ms,
                "Session release timed out"
            ),
        }

        let completed = ending.reason.is_completed();
        self.store.apply(WorkflowUpdate {
            completed: Some(completed),
            success: Some(ending.success),
            error: Some(ending.error.clone()),
            ..Default::default()
        });
        let state = self.store.into_inner();
        let finished_at = Utc::now();

        info!(
            run_id = %self.run_id,
            reason = ?ending.reason,
            completed,
            success = ending.success,
            steps = self.step,
            "Run finished"
        );

        RunOutcome {
            completed,
            success: ending.success,
            step_count: self.step,
            report: RunReport {
                run_id: self.run_id,
                task: self.task.to_string(),
                start_url: self.start_url.map(str::to_string),
                final_url: state.url.to_string(),
                termination: ending.reason,
                summary: ending.summary,
                steps: state.history.iter().map(StepSummary::from).collect(),
                failures: state.failures.clone().into_inner(),
                generation: *state.generation,
                started_at: self.started_at,
                finished_at,
                elapsed_ms: self.started.elapsed().as_millis() as u64,
            },
            error: ending.error,
        }
    }

    /// Records a closed step, feeds the tracker and picks the next phase.
    fn close_step(
        &mut self,
        record: StepRecord,
        fingerprint: Option<Vec<ActionFingerprint>>,
    ) -> Phase {
        let terminal = record.results.iter().find(|r| r.is_terminal).map(|r| {
            (
                r.terminal_success.unwrap_or(false),
                r.extracted_content.clone().unwrap_or_default(),
            )
        });

        let mode = if terminal.is_some() {
            self.tracker.mode()
        } else {
            self.tracker.observe(record.class, fingerprint)
        };
        self.store.apply(WorkflowUpdate::step(
            record,
            self.tracker.counters().clone(),
        ));

        if let Some((success, summary)) = terminal {
            return Phase::Report(Ending::done(success, &summary));
        }
        if let TrackerMode::ForcedTermination(reason) = mode {
            return Phase::Report(Ending::forced(reason));
        }
        if self.step >= self.config.max_steps {
            return Phase::Report(Ending::because(TerminationReason::StepBudget));
        }
        Phase::Think
    }

    /// THINK ended without a usable decision: a failed step.
    fn close_without_decision(&mut self, err: AgentError) -> Phase {
        warn!(step = self.step, error = %err, "No usable decision");
        let generation = self
            .index
            .as_ref()
            .map(ElementIndex::generation)
            .unwrap_or_else(|| self.builder.current_generation());
        let url = self.current_url("");
        let record = StepRecord::planner_failure(self.step, generation, &url, err.to_string());
        self.close_step(record, None)
    }

    fn record_terminal(
        &mut self,
        ctx: &PlanningContext,
        decision: AgentDecision,
        success: bool,
        summary: &str,
    ) {
        let result =
            ActionResult::terminal(format!("terminate success={success}"), success, summary);
        let record = StepRecord {
            step: self.step,
            phase: StepPhase::Think,
            generation: ctx.generation,
            url: ctx.url.clone(),
            decision: Some(decision),
            results: vec![result],
            verdict: None,
            class: StepClass::Neutral,
            new_elements: 0,
            summary: format!("terminate (success={success}): {summary}"),
            errors: Vec::new(),
            recorded_at: Utc::now(),
        };
        self.store.apply(WorkflowUpdate::step(
            record,
            self.tracker.counters().clone(),
        ));
    }

    /// Fatal errors bypass the tracker; the step is recorded for the report.
    fn record_fatal(&mut self, planned: &Planned, results: Vec<ActionResult>, message: &str) {
        let record = StepRecord {
            step: self.step,
            phase: StepPhase::Act,
            generation: planned.generation,
            url: planned.url_before.clone(),
            decision: Some(planned.decision.clone()),
            results,
            verdict: None,
            class: StepClass::Failure,
            new_elements: 0,
            summary: format!("session lost: {message}"),
            errors: vec![message.to_string()],
            recorded_at: Utc::now(),
        };
        self.store.apply(WorkflowUpdate::step(
            record,
            self.tracker.counters().clone(),
        ));
    }

    async fn planning_context(&self) -> Option<PlanningContext> {
        let index = self.index.as_ref()?;
        let history = {
            let state = self.store.snapshot();
            let skip = state.history.len().saturating_sub(self.config.max_history_items);
            state.history[skip..]
                .iter()
                .map(StepRecord::history_item)
                .collect()
        };
        let counters = self.tracker.counters();
        let directive = counters.is_warning().then(|| Directive::TerminateOnly {
            reason: format!("{} consecutive steps failed", counters.consecutive),
        });

        Some(PlanningContext {
            task: self.task.to_string(),
            step: self.step,
            max_steps: self.config.max_steps,
            url: index.url().to_string(),
            title: index.title().to_string(),
            generation: index.generation(),
            page: self.renderer.render(index),
            history,
            checklist: self.read_checklist().await,
            directive,
            screenshot: self.screenshot().await,
        })
    }

    async fn screenshot(&self) -> Option<Vec<u8>> {
        if !self.config.enable_vision {
            return None;
        }
        match timeout(self.config.command_timeout(), self.session.screenshot()).await {
            Ok(Ok(shot)) => shot,
            Ok(Err(err)) => {
                warn!(error = %err, "Screenshot failed");
                None
            }
            Err(_) => {
                warn!("Screenshot timed out");
                None
            }
        }
    }

    async fn read_checklist(&self) -> Option<String> {
        let store = self.scheduler.checklist.as_ref()?;
        match store.read().await {
            Ok(contents) => contents,
            Err(err) => {
                warn!(error = %err, "Checklist unavailable");
                None
            }
        }
    }

    async fn write_checklist(&self, contents: &str) {
        let Some(store) = self.scheduler.checklist.as_ref() else {
            debug!("Decision carried a checklist but no store is configured");
            return;
        };
        if let Err(err) = store.write(contents).await {
            warn!(error = %err, "Checklist update failed");
        }
    }

    /// Waits for the page to settle, then publishes a new index generation.
    /// Returns the number of elements added since the previous generation.
    async fn settle_and_rebuild(&mut self) -> Result<usize, AgentError> {
        let settled = self
            .gate
            .await_stable(self.session, self.config.stability_timeout())
            .await?;
        if !settled.settled {
            debug!(waited_ms = settled.waited_ms, "Rebuilding on an unsettled page");
        }
        self.rebuild().await
    }

    async fn rebuild(&mut self) -> Result<usize, AgentError> {
        let index = self.builder.build(self.session).await?;
        let added = index.added();
        debug!(
            generation = %index.generation(),
            elements = index.len(),
            added,
            fresh = index.fresh().count(),
            "Index rebuilt"
        );
        self.store.apply(WorkflowUpdate {
            generation: Some(index.generation()),
            url: Some(index.url().to_string()),
            ..Default::default()
        });
        self.index = Some(index);
        self.index_dirty = false;
        Ok(added)
    }

    fn current_url(&self, fallback: &str) -> String {
        match self.index.as_ref() {
            Some(index) => index.url().to_string(),
            None if fallback.is_empty() => self.store.snapshot().url.to_string(),
            None => fallback.to_string(),
        }
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_EXTRACT_IN_SUMMARY {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(MAX_EXTRACT_IN_SUMMARY).collect();
        format!("{clipped}...")
    }
}
