use serde::{Deserialize, Serialize};

// ─── Scalar aliases ───────────────────────────────────────────

/// JSON document flowing between states. Each state's output is the
/// next state's input.
pub type Document = serde_json::Value;

/// Deadline budget in whole seconds.
pub type TimeoutSecs = u64;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Per-state deadline when the declaration omits one.
pub const DEFAULT_STATE_TIMEOUT: TimeoutSecs = 60;

// ─── State kinds ──────────────────────────────────────────────

/// The three state kinds of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Task,
    Choice,
    Parallel,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Task => "task",
            StateKind::Choice => "choice",
            StateKind::Parallel => "parallel",
        }
    }
}

// ─── Successor selection ──────────────────────────────────────

/// Successor selection returned by one state invocation.
///
/// Only choice states return `Goto`/`Unset`; every other state follows
/// its configured successor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Follow the state's configured `next_state`.
    Configured,
    /// Route to the named state.
    Goto(String),
    /// The decision yielded no successor — the driver ends the run.
    Unset,
}

/// Result of one state invocation: the produced event plus the
/// successor selection the driver consumes.
#[derive(Clone, Debug)]
pub struct StateOutcome {
    pub event: Document,
    pub next: Transition,
}

impl StateOutcome {
    /// Outcome that follows the state's configured successor.
    pub fn configured(event: Document) -> Self {
        Self {
            event,
            next: Transition::Configured,
        }
    }
}

pub(crate) fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
