use crate::context::ExecutionContext;
use crate::errors::BuildError;
use crate::types::Document;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A user task handler: `(event, context) → event'`. The context is
/// freely readable and writable; the returned document becomes the next
/// state's input.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn invoke(&self, event: Document, ctx: &mut ExecutionContext) -> Result<Document>;
}

impl std::fmt::Debug for dyn TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<TaskHandler>")
    }
}

/// Adapter turning a plain closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(Document, &mut ExecutionContext) -> Result<Document> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(Document, &mut ExecutionContext) -> Result<Document> + Send + Sync,
{
    async fn invoke(&self, event: Document, ctx: &mut ExecutionContext) -> Result<Document> {
        (self.0)(event, ctx)
    }
}

/// Factory producing a handler at bind time. Lets registration succeed
/// while binding (resource acquisition, config validation) can still
/// fail when the machine is built.
pub type HandlerFactory = Box<dyn Fn() -> Result<Arc<dyn TaskHandler>> + Send + Sync>;

enum Registration {
    Ready(Arc<dyn TaskHandler>),
    Factory(HandlerFactory),
}

/// In-process handler registry. Handlers live under
/// `{lambda_dir}/{state_name}` and are resolved eagerly at machine
/// build time; a task state never starts with an unresolved handler.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dir: &str, name: &str, handler: Arc<dyn TaskHandler>) {
        self.entries
            .insert(Self::key(dir, name), Registration::Ready(handler));
    }

    /// Convenience for closure handlers.
    pub fn register_fn<F>(&mut self, dir: &str, name: &str, f: F)
    where
        F: Fn(Document, &mut ExecutionContext) -> Result<Document> + Send + Sync + 'static,
    {
        self.register(dir, name, Arc::new(FnHandler::new(f)));
    }

    /// Register a handler that binds lazily; the factory runs once per
    /// resolving task state, at build time.
    pub fn register_factory(&mut self, dir: &str, name: &str, factory: HandlerFactory) {
        self.entries
            .insert(Self::key(dir, name), Registration::Factory(factory));
    }

    /// Locate and bind a handler. Missing registration is
    /// [`BuildError::HandlerNotFound`]; a factory that fails is
    /// [`BuildError::HandlerBinding`].
    pub fn resolve(&self, dir: &str, name: &str) -> Result<Arc<dyn TaskHandler>, BuildError> {
        match self.entries.get(&Self::key(dir, name)) {
            None => Err(BuildError::HandlerNotFound {
                dir: dir.to_string(),
                name: name.to_string(),
            }),
            Some(Registration::Ready(handler)) => Ok(handler.clone()),
            Some(Registration::Factory(factory)) => {
                factory().map_err(|source| BuildError::HandlerBinding {
                    dir: dir.to_string(),
                    name: name.to_string(),
                    source: source.into(),
                })
            }
        }
    }

    fn key(dir: &str, name: &str) -> String {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
