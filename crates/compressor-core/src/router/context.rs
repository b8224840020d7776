//! Capabilities an isolated execution context must provide.

use std::sync::Arc;

use thiserror::Error;

use super::task::{TaskRequest, TaskResponse};

/// Something a context reports back to the router.
#[derive(Debug, Clone)]
pub enum ContextEvent {
    /// A correlated task response.
    Message(TaskResponse),
    /// A transport-level failure; the context is unusable afterwards.
    Error(String),
}

/// Callback through which a context delivers its events.
///
/// Contexts must not invoke it from inside [`ContextFactory::spawn`].
pub type EventSink = Arc<dyn Fn(ContextEvent) + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("isolated execution is not supported")]
    Unsupported,

    #[error("failed to spawn execution context: {0}")]
    Spawn(String),

    #[error("execution context is closed")]
    Closed,
}

/// A live isolated context accepting task messages.
pub trait ExecutionContext: Send + Sync {
    /// Send a self-contained task.
    fn post(&self, request: TaskRequest) -> Result<(), ContextError>;

    /// Stop accepting tasks and release the context.
    fn terminate(&self);
}

/// Creates execution contexts.
pub trait ContextFactory: Send + Sync {
    /// Whether this runtime can run isolated contexts at all.
    fn is_supported(&self) -> bool;

    /// Spawn a context. `script` is an optional external code location.
    fn spawn(
        &self,
        script: Option<&str>,
        events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError>;
}

/// Factory for runtimes without isolated execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIsolation;

impl ContextFactory for NoIsolation {
    fn is_supported(&self) -> bool {
        false
    }

    fn spawn(
        &self,
        _script: Option<&str>,
        _events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        Err(ContextError::Unsupported)
    }
}
