pub mod choice;
pub mod parallel;
pub mod task;

pub use choice::ChoiceState;
pub use parallel::ParallelState;
pub use task::TaskState;

use crate::context::ExecutionContext;
use crate::types::{Document, StateKind, StateOutcome, TimeoutSecs, DEFAULT_STATE_TIMEOUT};
use anyhow::Result;
use async_trait::async_trait;

/// A unit of the machine: named, kinded, timed, with a successor
/// pointer and a `handle` behavior.
///
/// States are immutable once built and may be shared across concurrent
/// runs — the per-invocation successor override travels in the returned
/// [`StateOutcome`], never in state fields.
#[async_trait]
pub trait State: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> StateKind;

    /// Per-state deadline in seconds. Always ≥ 1.
    fn timeout(&self) -> TimeoutSecs;

    /// Configured successor; `None` is the terminal.
    fn next_state(&self) -> Option<&str>;

    /// Every successor name this state can route to. The build-time
    /// verifier checks each against the machine registry.
    fn successors(&self) -> Vec<String> {
        self.next_state().map(str::to_string).into_iter().collect()
    }

    async fn handle(&self, event: Document, ctx: &mut ExecutionContext) -> Result<StateOutcome>;
}

impl std::fmt::Debug for dyn State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("name", &self.name()).finish()
    }
}

pub(crate) fn clamp_timeout(timeout: Option<TimeoutSecs>) -> TimeoutSecs {
    timeout.unwrap_or(DEFAULT_STATE_TIMEOUT).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_floors() {
        assert_eq!(clamp_timeout(None), DEFAULT_STATE_TIMEOUT);
        assert_eq!(clamp_timeout(Some(0)), 1);
        assert_eq!(clamp_timeout(Some(7)), 7);
    }
}
