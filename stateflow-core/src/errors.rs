use thiserror::Error;

/// Boxed cause carried inside the taxonomy errors. Handler and cache
/// failures arrive as `anyhow::Error` and convert with `.into()`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Statement compile-time errors. A program that fails to compile is
/// never cached.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("malformed statement: {0}")]
    MalformedStatement(String),

    #[error("unknown successor tag '#{tag}' in statement: {statement}")]
    UnknownTag { tag: String, statement: String },

    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    #[error("choice '{choice}': last statement is conditional and no unconditional default exists")]
    MissingDefault { choice: String },

    #[error("invalid JSONPath '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Machine construction errors. Everything here fires before the first
/// run — a machine that builds is structurally sound.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("machine '{0}' has no states")]
    EmptyMachine(String),

    #[error("duplicate state name '{0}'")]
    DuplicateState(String),

    #[error("state '{state}' points at unknown successor '{successor}'")]
    UnknownSuccessor { state: String, successor: String },

    #[error("handler '{dir}/{name}' is not registered")]
    HandlerNotFound { dir: String, name: String },

    #[error("handler '{dir}/{name}' failed to bind")]
    HandlerBinding {
        dir: String,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("choice '{choice}' failed to initialize")]
    ChoiceInitialization {
        choice: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid declaration: {0}")]
    Declaration(String),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Runtime errors surfaced by the driver. All of them are fatal for the
/// run; none of them roll back side effects a handler already performed.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("state '{0}' does not exist in the machine registry")]
    StateNotFound(String),

    #[error("state '{state}' failed")]
    StateExecution {
        state: String,
        #[source]
        source: BoxError,
    },

    #[error("state '{state}' timed out after {timeout_seconds}s")]
    StateTimeout {
        state: String,
        timeout_seconds: u64,
    },

    #[error("execution timed out after {timeout_seconds}s")]
    ExecutionTimeout { timeout_seconds: u64 },
}

impl MachineError {
    /// Taxonomy kind carried on emitted error events.
    pub fn kind(&self) -> &'static str {
        match self {
            MachineError::StateNotFound(_) => "StateNotFound",
            MachineError::StateExecution { .. } => "StateExecutionError",
            MachineError::StateTimeout { .. } => "StateTimeout",
            MachineError::ExecutionTimeout { .. } => "ExecutionTimeout",
        }
    }
}
