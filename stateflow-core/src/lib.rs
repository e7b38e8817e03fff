//! Declarative state-machine orchestrator.
//!
//! Workflows are described externally — an ordered list of states with
//! transitions, conditional statements, and per-state timeouts — and
//! compiled into an executable [`StateMachine`]. Task states run user
//! handlers resolved from a [`HandlerRegistry`]; choice states route via
//! decision functions compiled from a small statement language and
//! cached on disk by content hash; parallel states fan out into
//! sub-machines and aggregate per-slot results.

pub mod compiler;
pub mod context;
pub mod declaration;
pub mod errors;
pub mod events;
pub mod handler;
pub mod machine;
pub mod state;
pub mod types;
pub mod verifier;

pub use compiler::{CompileCache, CompileOptions, DecisionFn, DecisionValue};
pub use context::ExecutionContext;
pub use declaration::{MachineBuilder, WorkflowDeclaration};
pub use errors::{BuildError, CompileError, MachineError};
pub use events::{EventSink, MemorySink, RuntimeEvent, TracingSink};
pub use handler::{FnHandler, HandlerRegistry, TaskHandler};
pub use machine::StateMachine;
pub use state::{ChoiceState, ParallelState, State, TaskState};
pub use types::{Document, StateKind, StateOutcome, TimeoutSecs, Transition};
