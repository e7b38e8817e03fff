use crate::context::ExecutionContext;
use crate::errors::{BuildError, MachineError};
use crate::events::{EventSink, RuntimeEvent};
use crate::state::State;
use crate::types::{Document, TimeoutSecs, Transition};
use crate::verifier;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A named, ordered set of states with one head state and a single
/// entry driver.
///
/// Machines are built once and reused for many runs; all per-run state
/// lives in the [`ExecutionContext`]. Within one run exactly one state
/// is active at a time — only parallel states introduce concurrency,
/// and each sub-machine there drives its own runs.
#[derive(Debug)]
pub struct StateMachine {
    name: String,
    id: Uuid,
    head: String,
    states: HashMap<String, Arc<dyn State>>,
    timeout: TimeoutSecs,
    sink: Arc<dyn EventSink>,
}

impl StateMachine {
    /// Build a machine from an ordered state list; the first entry is
    /// the head. The declared timeout is raised to Σ(state timeouts)+1
    /// with a warning when it is smaller.
    pub fn new(
        name: &str,
        states: Vec<Arc<dyn State>>,
        declared_timeout: Option<TimeoutSecs>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, BuildError> {
        if states.is_empty() {
            return Err(BuildError::EmptyMachine(name.to_string()));
        }

        let head = states[0].name().to_string();
        let timeout_sum: TimeoutSecs = states.iter().map(|s| s.timeout()).sum();

        let mut registry: HashMap<String, Arc<dyn State>> = HashMap::new();
        for state in &states {
            if registry
                .insert(state.name().to_string(), state.clone())
                .is_some()
            {
                return Err(BuildError::DuplicateState(state.name().to_string()));
            }
        }

        if let Some(problem) = verifier::verify(name, &head, &states).into_iter().next() {
            return Err(BuildError::UnknownSuccessor {
                state: problem.state,
                successor: problem.successor,
            });
        }

        Ok(Self {
            name: name.to_string(),
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()),
            head,
            states: registry,
            timeout: effective_timeout(declared_timeout, timeout_sum, "machine", name),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable id derived from the machine name (namespace UUID).
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn timeout(&self) -> TimeoutSecs {
        self.timeout
    }

    /// Drive the machine from its head state with a fresh context.
    pub async fn run(&self, event: Document) -> Result<Document, MachineError> {
        self.run_with_parent(event, None).await
    }

    /// As [`run`](Self::run), carrying a parent context snapshot into
    /// the run — the parallel-state entry point.
    pub async fn run_with_parent(
        &self,
        mut event: Document,
        parent: Option<ExecutionContext>,
    ) -> Result<Document, MachineError> {
        let mut ctx =
            ExecutionContext::new(self.name.clone(), self.id, self.head.clone(), parent);
        let execution_id = ctx.execution_id;
        tracing::debug!(machine = %self.name, %execution_id, "starting run");

        let mut current_name = self.head.clone();
        loop {
            if deadline_exceeded(ctx.elapsed(), self.timeout) {
                return Err(self.fail(
                    &ctx,
                    MachineError::ExecutionTimeout {
                        timeout_seconds: self.timeout,
                    },
                ));
            }

            let Some(state) = self.states.get(&current_name).cloned() else {
                return Err(self.fail(&ctx, MachineError::StateNotFound(current_name)));
            };

            ctx.enter_state(state.name());
            self.sink.emit(&RuntimeEvent::StateEntered {
                execution_id,
                state_name: current_name.clone(),
                input: event.clone(),
            });

            let step_start = Instant::now();
            let step_deadline = Duration::from_secs(state.timeout());
            let handled = tokio::time::timeout(step_deadline, state.handle(event, &mut ctx)).await;
            let outcome = match handled {
                // Deadline elapsed: the in-flight invocation is dropped
                // (best-effort cancel); already-performed side effects
                // stay.
                Err(_) => {
                    return Err(self.fail(
                        &ctx,
                        MachineError::StateTimeout {
                            state: current_name,
                            timeout_seconds: state.timeout(),
                        },
                    ));
                }
                Ok(Err(cause)) => {
                    let err = match cause.downcast::<MachineError>() {
                        // A parallel state's aggregate deadline keeps
                        // its taxonomy kind.
                        Ok(inner @ MachineError::ExecutionTimeout { .. }) => inner,
                        Ok(inner) => MachineError::StateExecution {
                            state: current_name,
                            source: Box::new(inner),
                        },
                        Err(cause) => MachineError::StateExecution {
                            state: current_name,
                            source: cause.into(),
                        },
                    };
                    return Err(self.fail(&ctx, err));
                }
                Ok(Ok(outcome)) => outcome,
            };

            event = outcome.event;
            self.sink.emit(&RuntimeEvent::StateExited {
                execution_id,
                state_name: current_name.clone(),
                output: event.clone(),
                duration_seconds: step_start.elapsed().as_secs_f64(),
            });

            let next = match outcome.next {
                Transition::Configured => state.next_state().map(str::to_string),
                Transition::Goto(name) => Some(name),
                Transition::Unset => None,
            };

            match next {
                Some(name) => current_name = name,
                None => {
                    self.sink.emit(&RuntimeEvent::RunCompleted {
                        execution_id,
                        final_output: event.clone(),
                        total_duration_seconds: ctx.elapsed().as_secs_f64(),
                    });
                    return Ok(event);
                }
            }
        }
    }

    fn fail(&self, ctx: &ExecutionContext, err: MachineError) -> MachineError {
        self.sink.emit(&RuntimeEvent::ErrorRaised {
            execution_id: ctx.execution_id,
            state_name: ctx.state_name.clone(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        err
    }
}

/// Strict comparison: an elapsed time exactly equal to the budget does
/// not fire the deadline.
fn deadline_exceeded(elapsed: Duration, timeout_secs: TimeoutSecs) -> bool {
    elapsed.as_secs_f64() > timeout_secs as f64
}

/// `max(declared, parts_sum + 1)`, warning when the declared budget is
/// below the member sum.
pub(crate) fn effective_timeout(
    declared: Option<TimeoutSecs>,
    parts_sum: TimeoutSecs,
    scope: &str,
    name: &str,
) -> TimeoutSecs {
    let floor = parts_sum + 1;
    match declared {
        None => floor,
        Some(declared) if declared < floor => {
            tracing::warn!(
                "{scope} '{name}': declared timeout {declared}s is below the sum of member \
                 timeouts ({parts_sum}s); raising to {floor}s"
            );
            floor
        }
        Some(declared) => declared,
    }
}
