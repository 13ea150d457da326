//! DOM stability gate
//!
//! After a mutating action the page is polled until the network is idle and
//! the DOM has been quiet for a trailing window, or until the timeout. A
//! timeout is reported, never raised.

use std::time::Duration;

use browser_port::BrowserSession;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::errors::ActionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityGate {
    /// In-flight requests still considered idle
    pub network_idle_threshold: u32,

    /// Trailing window without DOM mutations (milliseconds)
    pub quiet_window_ms: u64,

    /// Delay between activity probes (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self {
            network_idle_threshold: 0,
            quiet_window_ms: 500,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityResult {
    /// Both conditions held before the timeout.
    pub settled: bool,
    pub waited_ms: u64,
    pub polls: u32,
    /// In-flight requests at the last successful probe.
    pub inflight: u32,
}

impl StabilityGate {
    pub fn new(network_idle_threshold: u32, quiet_window_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            network_idle_threshold,
            quiet_window_ms,
            poll_interval_ms,
        }
    }

    /// Waits for the page to settle, bounded by `limit`.
    ///
    /// Only a fatal session error is returned as `Err`; probe failures that
    /// leave the session usable count as "not settled yet".
    pub async fn await_stable(
        &self,
        session: &dyn BrowserSession,
        limit: Duration,
    ) -> Result<StabilityResult, ActionError> {
        let start = Instant::now();
        let deadline = start + limit;
        let quiet_window = Duration::from_millis(self.quiet_window_ms);
        let poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));

        let mut polls = 0u32;
        let mut inflight = 0u32;
        let mut last_seq: Option<u64> = None;
        let mut quiet_since = start;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, session.activity()).await {
                Ok(Ok(sample)) => {
                    polls += 1;
                    inflight = sample.inflight_requests;
                    let now = Instant::now();
                    if last_seq != Some(sample.mutation_seq) {
                        last_seq = Some(sample.mutation_seq);
                        quiet_since = now;
                    }
                    let network_idle = inflight <= self.network_idle_threshold;
                    if network_idle && now.duration_since(quiet_since) >= quiet_window {
                        let result = self.finish(true, start, polls, inflight);
                        debug!(waited_ms = result.waited_ms, polls, "Page settled");
                        return Ok(result);
                    }
                }
                Ok(Err(err)) if err.is_fatal() => return Err(ActionError::from(err)),
                Ok(Err(err)) => {
                    polls += 1;
                    debug!(error = %err, "Activity probe failed; treating page as busy");
                }
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let result = self.finish(false, start, polls, inflight);
                warn!(
                    waited_ms = result.waited_ms,
                    polls,
                    inflight,
                    "Page did not settle before timeout"
                );
                return Ok(result);
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn finish(&self, settled: bool, start: Instant, polls: u32, inflight: u32) -> StabilityResult {
        StabilityResult {
            settled,
            waited_ms: start.elapsed().as_millis() as u64,
            polls,
            inflight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_port::memory::{MemoryPage, MemorySession};
    use browser_port::RawNode;

    fn session() -> MemorySession {
        MemorySession::opened_at(
            [MemoryPage::new(
                "https://app.test/",
                "App",
                RawNode::new(1, "body"),
            )],
            "https://app.test/",
        )
        .unwrap()
    }

    #[test]
    fn test_default_gate_config() {
        let gate = StabilityGate::default();
        assert_eq!(gate.network_idle_threshold, 0);
        assert_eq!(gate.quiet_window_ms, 500);
        assert_eq!(gate.poll_interval_ms, 100);
    }

    #[tokio::test]
    async fn test_settles_once_requests_drain_and_dom_is_quiet() {
        let session = session();
        session.inject_activity(3, 2);
        let gate = StabilityGate::new(0, 10, 2);

        let result = gate
            .await_stable(&session, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(result.settled);
        assert_eq!(result.inflight, 0);
        assert!(result.polls >= 4);
    }

    #[tokio::test]
    async fn test_idle_threshold_tolerates_background_requests() {
        let session = session();
        session.inject_activity(1_000, 0);
        let gate = StabilityGate::new(5_000, 0, 1);

        let result = gate
            .await_stable(&session, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.settled);
        assert_eq!(result.polls, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_not_raised() {
        let session = session();
        session.inject_activity(1_000_000, 0);
        let gate = StabilityGate::new(0, 10, 5);

        let result = gate
            .await_stable(&session, Duration::from_millis(40))
            .await
            .unwrap();
        assert!(!result.settled);
        assert!(result.inflight > 0);
        assert!(result.waited_ms < 1_000);
    }

    #[tokio::test]
    async fn test_lost_session_is_fatal() {
        let session = session();
        session.disconnect("gone");
        let err = StabilityGate::default()
            .await_stable(&session, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
