//! Polling for asynchronous reasoning runs.
//!
//! A run moves `queued → in_progress → completed | failed | cancelled |
//! expired | incomplete`. [`poll_until_terminal`] re-reads the state with a
//! doubling delay capped at `max_interval`, and gives up once `max_wait` would
//! be exceeded.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::InvocationError;

/// Observed state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Queued,
    InProgress,
    Completed,
    Failed(String),
    Cancelled,
    Expired,
    Incomplete(String),
    /// The run wants tool outputs; no tools are offered, so this is terminal.
    RequiresAction,
}

impl RunState {
    /// Map a service status string (and optional error message) to a state.
    pub fn parse(status: &str, message: Option<&str>) -> Self {
        let message = message.unwrap_or("no error message").to_string();
        match status {
            "queued" => RunState::Queued,
            "in_progress" | "cancelling" => RunState::InProgress,
            "completed" => RunState::Completed,
            "cancelled" => RunState::Cancelled,
            "expired" => RunState::Expired,
            "incomplete" => RunState::Incomplete(message),
            "requires_action" => RunState::RequiresAction,
            "failed" => RunState::Failed(message),
            other => RunState::Failed(format!("unknown run status '{}'", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Queued | RunState::InProgress)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::InProgress => "in_progress",
            RunState::Completed => "completed",
            RunState::Failed(_) => "failed",
            RunState::Cancelled => "cancelled",
            RunState::Expired => "expired",
            RunState::Incomplete(_) => "incomplete",
            RunState::RequiresAction => "requires_action",
        }
    }
}

/// Delay schedule and overall bound for polling.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_interval)
    }
}

/// Call `fetch` until it reports a terminal [`RunState`].
///
/// # Errors
///
/// Returns the first error from `fetch`, or
/// [`InvocationError::PollTimeout`] when the next sleep would overrun
/// `max_wait`.
pub async fn poll_until_terminal<F, Fut>(
    policy: &PollPolicy,
    mut fetch: F,
) -> Result<RunState, InvocationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RunState, InvocationError>>,
{
    let started = Instant::now();
    let mut delay = policy.interval;
    loop {
        let state = fetch().await?;
        if state.is_terminal() {
            return Ok(state);
        }
        if started.elapsed() + delay > policy.max_wait {
            return Err(InvocationError::PollTimeout(policy.max_wait));
        }
        tracing::debug!(state = state.label(), delay_ms = delay.as_millis() as u64, "run pending");
        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}
