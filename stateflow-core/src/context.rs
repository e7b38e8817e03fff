use crate::types::{now_ms, Timestamp};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-run execution context threaded through every state.
///
/// The driver owns the identity and timing fields and refreshes
/// `state_name`/`timestamp_ms` at each state entry; handlers may read
/// everything and stash their own extensions in `vars`. Sub-machines
/// started by a parallel state receive a snapshot of the parent run's
/// context in `parent`.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub machine_name: String,
    pub machine_id: Uuid,
    /// Fresh v4 id per run.
    pub execution_id: Uuid,
    /// Name of the state currently entered.
    pub state_name: String,
    /// Monotonic run start — deadline math only.
    pub start_time: Instant,
    /// Wall-clock run start (epoch milliseconds).
    pub started_at_ms: Timestamp,
    /// Refreshed at each state entry (epoch milliseconds).
    pub timestamp_ms: Timestamp,
    /// Parent run's context when invoked from a parallel state.
    pub parent: Option<Box<ExecutionContext>>,
    /// Free-form handler extensions.
    pub vars: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub(crate) fn new(
        machine_name: String,
        machine_id: Uuid,
        head_state: String,
        parent: Option<ExecutionContext>,
    ) -> Self {
        let started_at_ms = now_ms();
        Self {
            machine_name,
            machine_id,
            execution_id: Uuid::new_v4(),
            state_name: head_state,
            start_time: Instant::now(),
            started_at_ms,
            timestamp_ms: started_at_ms,
            parent: parent.map(Box::new),
            vars: BTreeMap::new(),
        }
    }

    /// Record entry into a state: update `state_name`, refresh the
    /// timestamp. Happens-before the state's handler runs.
    pub(crate) fn enter_state(&mut self, state_name: &str) {
        self.state_name = state_name.to_string();
        self.touch();
    }

    /// Refresh `timestamp_ms` to now.
    pub fn touch(&mut self) {
        self.timestamp_ms = now_ms();
    }

    /// Time elapsed since the run started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
