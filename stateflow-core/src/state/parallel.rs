use super::State;
use crate::context::ExecutionContext;
use crate::errors::MachineError;
use crate::machine::{effective_timeout, StateMachine};
use crate::types::{Document, StateKind, StateOutcome, TimeoutSecs};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// A state that runs sub-machines concurrently and aggregates their
/// results into `{sub_machine_name → result | {"error": message}}`.
///
/// A sub-machine failure is captured in its slot and never
/// short-circuits its peers; the aggregate deadline is the only way the
/// parallel state itself fails.
pub struct ParallelState {
    name: String,
    next_state: Option<String>,
    timeout: TimeoutSecs,
    branches: Vec<Arc<StateMachine>>,
}

impl ParallelState {
    /// The effective timeout is `max(declared, Σ sub_timeouts + 1)`;
    /// a smaller declared budget is raised with a warning.
    pub fn new(
        name: &str,
        next_state: Option<String>,
        declared_timeout: Option<TimeoutSecs>,
        branches: Vec<Arc<StateMachine>>,
    ) -> Self {
        let sum: TimeoutSecs = branches.iter().map(|m| m.timeout()).sum();
        Self {
            name: name.to_string(),
            next_state,
            timeout: effective_timeout(declared_timeout, sum, "parallel state", name),
            branches,
        }
    }

    pub fn branches(&self) -> &[Arc<StateMachine>] {
        &self.branches
    }
}

#[async_trait]
impl State for ParallelState {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StateKind {
        StateKind::Parallel
    }

    fn timeout(&self) -> TimeoutSecs {
        self.timeout
    }

    fn next_state(&self) -> Option<&str> {
        self.next_state.as_deref()
    }

    async fn handle(&self, event: Document, ctx: &mut ExecutionContext) -> Result<StateOutcome> {
        ctx.touch();

        let mut handles = Vec::with_capacity(self.branches.len());
        for machine in &self.branches {
            let machine = Arc::clone(machine);
            let event = event.clone();
            let parent = ctx.clone();
            handles.push((
                machine.name().to_string(),
                tokio::spawn(async move { machine.run_with_parent(event, Some(parent)).await }),
            ));
        }
        let aborts: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();

        let gather = async {
            let mut results = serde_json::Map::new();
            for (name, handle) in handles {
                let slot = match handle.await {
                    Ok(Ok(output)) => output,
                    Ok(Err(err)) => json!({ "error": err.to_string() }),
                    Err(join_err) => json!({ "error": format!("sub-machine task failed: {join_err}") }),
                };
                results.insert(name, slot);
            }
            results
        };

        match tokio::time::timeout(Duration::from_secs(self.timeout), gather).await {
            Ok(results) => Ok(StateOutcome::configured(Value::Object(results))),
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                Err(anyhow::Error::new(MachineError::ExecutionTimeout {
                    timeout_seconds: self.timeout,
                }))
            }
        }
    }
}
