use super::{clamp_timeout, State};
use crate::context::ExecutionContext;
use crate::errors::BuildError;
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::types::{Document, StateKind, StateOutcome, TimeoutSecs};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A state wrapping a user handler resolved by name. The handler is
/// located and bound at construction; a task state never exists with an
/// unresolved handler.
#[derive(Debug)]
pub struct TaskState {
    name: String,
    next_state: Option<String>,
    timeout: TimeoutSecs,
    handler: Arc<dyn TaskHandler>,
}

impl TaskState {
    /// Resolve the handler for `{lambda_dir}/{name}` from the registry.
    pub fn new(
        name: &str,
        next_state: Option<String>,
        lambda_dir: &str,
        timeout: Option<TimeoutSecs>,
        registry: &HandlerRegistry,
    ) -> Result<Self, BuildError> {
        let handler = registry.resolve(lambda_dir, name)?;
        Ok(Self::with_handler(name, next_state, timeout, handler))
    }

    /// Direct construction for embedders that hold their own handlers.
    pub fn with_handler(
        name: &str,
        next_state: Option<String>,
        timeout: Option<TimeoutSecs>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            name: name.to_string(),
            next_state,
            timeout: clamp_timeout(timeout),
            handler,
        }
    }
}

#[async_trait]
impl State for TaskState {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StateKind {
        StateKind::Task
    }

    fn timeout(&self) -> TimeoutSecs {
        self.timeout
    }

    fn next_state(&self) -> Option<&str> {
        self.next_state.as_deref()
    }

    async fn handle(&self, event: Document, ctx: &mut ExecutionContext) -> Result<StateOutcome> {
        ctx.touch();
        let event = self.handler.invoke(event, ctx).await?;
        Ok(StateOutcome::configured(event))
    }
}
