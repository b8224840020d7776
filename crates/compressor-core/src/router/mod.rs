//! Execution router: main thread or a shared background context.
//!
//! # Architecture
//!
//! One [`ExecutionRouter`] owns at most one live [`ExecutionContext`] at a
//! time. Sessions hold a [`ContextLease`] while they may submit work; the
//! context is spawned lazily on first demand and terminated once the last
//! lease is gone and no task is pending (after an optional grace window).
//!
//! Tasks are correlated by id through a pending table of oneshot senders.
//! Responses can arrive in any order. A transport error from the context
//! rejects every pending task and drops the context; the next submission
//! spawns a fresh one. Each spawn gets a new generation number, so events
//! from a context that was already replaced are ignored.
//!
//! The router is passed around explicitly, so tests can plug in a
//! deterministic [`ContextFactory`].

mod context;
mod task;

pub use context::{ContextError, ContextEvent, ContextFactory, EventSink, ExecutionContext, NoIsolation};
pub use task::{ImagePayload, RenderJob, TaskId, TaskRequest, TaskResponse, TaskResult};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::render::Rendered;

/// Default deadline for one background task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Router tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// How long a submitted task may wait for its response.
    pub task_timeout: Duration,
    /// How long an idle context is kept before termination.
    pub idle_grace: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            idle_grace: Duration::ZERO,
        }
    }
}

/// Requested execution path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// Background when supported, main thread otherwise or on failure.
    #[default]
    Auto,
    /// Background or fail.
    Always,
    /// Main thread only.
    Never,
}

impl From<Option<bool>> for WorkerMode {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => WorkerMode::Always,
            Some(false) => WorkerMode::Never,
            None => WorkerMode::Auto,
        }
    }
}

/// Errors of the background path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("background execution is not supported by this runtime")]
    Unsupported,

    #[error("failed to start the background context: {0}")]
    Spawn(String),

    #[error("task {task_id} timed out after {after:?}")]
    Timeout { task_id: TaskId, after: Duration },

    #[error("background context failed: {0}")]
    Transport(String),

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("background context was terminated")]
    Terminated,
}

impl From<ContextError> for RoutingError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Unsupported => RoutingError::Unsupported,
            ContextError::Spawn(message) => RoutingError::Spawn(message),
            ContextError::Closed => RoutingError::Transport("execution context is closed".into()),
        }
    }
}

impl From<TaskResult> for Result<Rendered, RoutingError> {
    fn from(result: TaskResult) -> Self {
        match result {
            TaskResult::Ok(rendered) => Ok(rendered),
            TaskResult::Error { message } => Err(RoutingError::TaskFailed(message)),
        }
    }
}

/// The path selected for one session.
#[derive(Debug)]
pub enum Route {
    MainThread,
    Background(ContextLease),
}

type Reply = oneshot::Sender<Result<Rendered, RoutingError>>;

struct LiveContext {
    generation: u64,
    handle: Arc<dyn ExecutionContext>,
}

#[derive(Default)]
struct RouterState {
    context: Option<LiveContext>,
    references: usize,
    pending: HashMap<TaskId, Reply>,
    generation: u64,
    /// Script location of the most recent spawn, reused on respawn.
    script: Option<String>,
}

/// Shares one background context between sessions.
pub struct ExecutionRouter {
    factory: Arc<dyn ContextFactory>,
    config: RouterConfig,
    state: Mutex<RouterState>,
    next_task_id: AtomicU64,
    this: Weak<ExecutionRouter>,
}

impl fmt::Debug for ExecutionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExecutionRouter")
            .field("config", &self.config)
            .field("running", &state.context.is_some())
            .field("references", &state.references)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl ExecutionRouter {
    pub fn new(factory: Arc<dyn ContextFactory>) -> Arc<Self> {
        Self::with_config(factory, RouterConfig::default())
    }

    pub fn with_config(factory: Arc<dyn ContextFactory>, config: RouterConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            factory,
            config,
            state: Mutex::new(RouterState::default()),
            next_task_id: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// A router that always renders on the calling thread.
    pub fn main_thread_only() -> Arc<Self> {
        Self::new(Arc::new(NoIsolation))
    }

    /// Pick the execution path for a session.
    ///
    /// `Never` always yields the main thread. `Always` fails when the runtime
    /// cannot isolate or the context cannot start. `Auto` takes the
    /// background path when possible and falls back silently otherwise.
    ///
    /// The background path awaits with timers, so it also requires a tokio
    /// runtime on the calling thread.
    pub fn route(&self, mode: WorkerMode, script: Option<&str>) -> Result<Route, RoutingError> {
        if mode == WorkerMode::Never {
            return Ok(Route::MainThread);
        }

        let supported =
            self.factory.is_supported() && tokio::runtime::Handle::try_current().is_ok();
        if !supported {
            return match mode {
                WorkerMode::Always => Err(RoutingError::Unsupported),
                _ => {
                    trace!("background execution unavailable, using the main thread");
                    Ok(Route::MainThread)
                }
            };
        }

        match self.acquire(script) {
            Ok(lease) => Ok(Route::Background(lease)),
            Err(error) if mode == WorkerMode::Auto => {
                warn!(%error, "background context unavailable, falling back to the main thread");
                Ok(Route::MainThread)
            }
            Err(error) => Err(error),
        }
    }

    /// Take a reference on the shared context, spawning it if needed.
    pub fn acquire(&self, script: Option<&str>) -> Result<ContextLease, RoutingError> {
        let router = self.this.upgrade().ok_or(RoutingError::Terminated)?;
        let mut state = self.state.lock();
        self.ensure_context(&mut state, script)?;
        state.references += 1;
        trace!(references = state.references, "context acquired");
        Ok(ContextLease {
            router,
            released: false,
        })
    }

    fn ensure_context(
        &self,
        state: &mut RouterState,
        script: Option<&str>,
    ) -> Result<(u64, Arc<dyn ExecutionContext>), RoutingError> {
        if let Some(live) = &state.context {
            return Ok((live.generation, Arc::clone(&live.handle)));
        }

        if let Some(script) = script {
            state.script = Some(script.to_string());
        }
        state.generation += 1;
        let generation = state.generation;
        let router = self.this.clone();
        let events: EventSink = Arc::new(move |event| {
            if let Some(router) = router.upgrade() {
                router.handle_event(generation, event);
            }
        });

        let handle = self.factory.spawn(state.script.as_deref(), events)?;
        debug!(generation, "spawned background context");
        state.context = Some(LiveContext {
            generation,
            handle: Arc::clone(&handle),
        });
        Ok((generation, handle))
    }

    async fn submit(&self, job: RenderJob) -> Result<Rendered, RoutingError> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, response) = oneshot::channel();

        let (generation, handle) = {
            let mut state = self.state.lock();
            let context = self.ensure_context(&mut state, None)?;
            state.pending.insert(task_id, reply);
            context
        };
        let _pending = PendingTask {
            router: self,
            task_id,
        };

        trace!(task_id, generation, "posting task");
        if let Err(error) = handle.post(TaskRequest { task_id, job }) {
            let message = error.to_string();
            self.handle_event(generation, ContextEvent::Error(message.clone()));
            return Err(RoutingError::Transport(message));
        }

        match tokio::time::timeout(self.config.task_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RoutingError::Terminated),
            Err(_) => {
                warn!(task_id, "background task timed out");
                Err(RoutingError::Timeout {
                    task_id,
                    after: self.config.task_timeout,
                })
            }
        }
    }

    fn handle_event(&self, generation: u64, event: ContextEvent) {
        let mut state = self.state.lock();
        if state.context.as_ref().map(|c| c.generation) != Some(generation) {
            trace!(generation, "discarding event from a replaced context");
            return;
        }

        match event {
            ContextEvent::Message(response) => match state.pending.remove(&response.task_id) {
                Some(reply) => {
                    let _ = reply.send(response.result.into());
                }
                None => debug!(task_id = response.task_id, "discarding response for unknown task"),
            },
            ContextEvent::Error(message) => {
                warn!(%message, generation, "background context failed");
                let context = state.context.take();
                let pending: Vec<Reply> = state.pending.drain().map(|(_, reply)| reply).collect();
                drop(state);

                for reply in pending {
                    let _ = reply.send(Err(RoutingError::Transport(message.clone())));
                }
                if let Some(context) = context {
                    context.handle.terminate();
                }
            }
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.references = state.references.saturating_sub(1);
            trace!(references = state.references, "context released");
        }
        self.schedule_idle_teardown();
    }

    fn schedule_idle_teardown(&self) {
        let grace = self.config.idle_grace;
        if grace.is_zero() {
            self.teardown_if_idle();
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let router = self.this.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(router) = router.upgrade() {
                        router.teardown_if_idle();
                    }
                });
            }
            Err(_) => {
                self.teardown_if_idle();
            }
        }
    }

    /// Terminate the context when nothing references it. Returns true if
    /// a context was terminated.
    pub fn teardown_if_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.references > 0 || !state.pending.is_empty() {
            return false;
        }
        let Some(context) = state.context.take() else {
            return false;
        };
        drop(state);

        context.handle.terminate();
        debug!(generation = context.generation, "terminated idle background context");
        true
    }

    /// Terminate the context unconditionally, rejecting pending tasks.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let context = state.context.take();
        let pending: Vec<Reply> = state.pending.drain().map(|(_, reply)| reply).collect();
        drop(state);

        for reply in pending {
            let _ = reply.send(Err(RoutingError::Terminated));
        }
        if let Some(context) = context {
            context.handle.terminate();
            debug!(generation = context.generation, "background context shut down");
        }
    }

    pub fn reference_count(&self) -> usize {
        self.state.lock().references
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().context.is_some()
    }
}

/// Removes a task's slot when its submission finishes or is dropped.
struct PendingTask<'a> {
    router: &'a ExecutionRouter,
    task_id: TaskId,
}

impl Drop for PendingTask<'_> {
    fn drop(&mut self) {
        let removed = self.router.state.lock().pending.remove(&self.task_id);
        if removed.is_some() {
            trace!(task_id = self.task_id, "task slot freed before a response");
        }
    }
}

/// A counted reference on the shared background context.
///
/// Dropping the lease releases the reference.
pub struct ContextLease {
    router: Arc<ExecutionRouter>,
    released: bool,
}

impl ContextLease {
    /// Run a render job in the background context.
    ///
    /// # Errors
    ///
    /// `RoutingError::Timeout` when no response arrives in time,
    /// `RoutingError::Transport` when the context fails, and
    /// `RoutingError::TaskFailed` when the task itself reports an error.
    pub async fn submit(&self, job: RenderJob) -> Result<Rendered, RoutingError> {
        self.router.submit(job).await
    }
}

impl fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLease")
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.router.release();
        }
    }
}
