//! Bounded readiness polling
//!
//! Turns the cluster's asynchronous reconciliation into a synchronous
//! "ready or timed out" answer. The waiter is resource-agnostic: it fetches
//! the target, hands the observation to a `Readiness` predicate, and sleeps
//! until the next poll or the deadline, whichever comes first.

mod clock;
pub mod readiness;

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterApi, ClusterContext, ObjectRef};
use crate::common::config::FetchErrorPolicy;
use crate::common::{Error, Result};

pub use clock::{Clock, ManualClock, TokioClock};
pub use readiness::Readiness;

/// Lower bound on the poll interval so virtual clocks always make progress
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A resource and the state it must reach
#[derive(Clone)]
pub struct ReadinessTarget {
    pub object: ObjectRef,
    pub readiness: Arc<dyn Readiness>,
}

impl ReadinessTarget {
    pub fn new(object: ObjectRef, readiness: impl Readiness + 'static) -> Self {
        Self {
            object,
            readiness: Arc::new(readiness),
        }
    }

    /// Target using the kind's default readiness policy, if it has one
    pub fn with_default(object: ObjectRef) -> Option<Self> {
        readiness::default_for(object.kind).map(|readiness| Self { object, readiness })
    }

    /// Target satisfied once the resource no longer exists
    pub fn gone(object: ObjectRef) -> Self {
        Self::new(object, readiness::Gone)
    }
}

impl std::fmt::Debug for ReadinessTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessTarget")
            .field("object", &self.object)
            .field("readiness", &self.readiness.describe())
            .finish()
    }
}

/// Terminal result of a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut { last_status: String },
    PollError(String),
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready)
    }

    /// Convert into a scenario failure naming the resource
    pub fn into_result(self, target: &ReadinessTarget) -> Result<()> {
        match self {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut { last_status } => Err(Error::poll_timeout(
                format!("{} to satisfy '{}'", target.object, target.readiness.describe()),
                last_status,
            )),
            WaitOutcome::PollError(cause) => Err(Error::PollFailed {
                resource: target.object.to_string(),
                cause,
            }),
        }
    }
}

/// Polls a cluster until a target is ready or the budget runs out
pub struct ResourceWaiter<'a> {
    api: &'a dyn ClusterApi,
    clock: &'a dyn Clock,
    policy: FetchErrorPolicy,
}

impl<'a> ResourceWaiter<'a> {
    pub fn new(api: &'a dyn ClusterApi, clock: &'a dyn Clock) -> Self {
        Self {
            api,
            clock,
            policy: FetchErrorPolicy::default(),
        }
    }

    /// Waiter using the context's API, clock and configured error policy
    pub fn from_context(ctx: &'a ClusterContext) -> Self {
        Self::new(ctx.api(), ctx.clock()).with_policy(ctx.config.polling.fetch_errors)
    }

    pub fn with_policy(mut self, policy: FetchErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll `target` every `poll_interval` until it is satisfied or `timeout` elapses
    ///
    /// The target is always polled at least once, so a zero timeout still
    /// reports `Ready` for an already-satisfied target. Sleeps are clamped
    /// to the remaining budget, so the call returns within
    /// `timeout + poll_interval` plus the latency of a single fetch.
    pub async fn wait_until_ready(
        &self,
        target: &ReadinessTarget,
        timeout: Duration,
        poll_interval: Duration,
    ) -> WaitOutcome {
        let interval = poll_interval.max(MIN_POLL_INTERVAL);
        // A budget too large for `Instant` never expires
        let deadline = self.clock.now().checked_add(timeout);
        let mut polls: u32 = 0;
        let mut last_status = "<not observed>".to_string();

        tracing::debug!(
            resource = %target.object,
            condition = %target.readiness.describe(),
            timeout_secs = timeout.as_secs(),
            "waiting for resource"
        );

        loop {
            polls += 1;
            match self.api.get(&target.object).await {
                Ok(observed) => {
                    if target.readiness.is_satisfied(observed.as_ref()) {
                        tracing::debug!(resource = %target.object, polls, "resource ready");
                        return WaitOutcome::Ready;
                    }
                    last_status = match &observed {
                        Some(obj) => obj.status_summary(),
                        None => "not found".to_string(),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        resource = %target.object,
                        error = %e,
                        "failed to fetch resource status"
                    );
                    if self.policy == FetchErrorPolicy::FailFast {
                        return WaitOutcome::PollError(e.to_string());
                    }
                    last_status = format!("fetch error: {}", e);
                }
            }

            let now = self.clock.now();
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(now),
                None => interval,
            };
            if remaining.is_zero() {
                tracing::warn!(
                    resource = %target.object,
                    polls,
                    last_status = %last_status,
                    "timed out waiting for resource"
                );
                return WaitOutcome::TimedOut { last_status };
            }

            self.clock.sleep(interval.min(remaining)).await;
        }
    }

    /// Wait and convert a non-ready outcome into an error
    pub async fn require_ready(
        &self,
        target: &ReadinessTarget,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        self.wait_until_ready(target, timeout, poll_interval)
            .await
            .into_result(target)
    }
}
