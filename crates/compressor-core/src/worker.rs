//! The background execution context: a dedicated OS thread.
//!
//! The thread owns its decode and render work end to end; the sending side
//! only hands over bytes. A panic inside a task is reported as a transport
//! error, which makes the router reject everything in flight and replace the
//! thread on next demand.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::decode::decode_image;
use crate::render::{render, DrawHooks};
use crate::router::{
    ContextError, ContextEvent, ContextFactory, EventSink, ExecutionContext, TaskRequest,
    TaskResponse, TaskResult,
};

const THREAD_NAME: &str = "compressor-worker";

/// Spawns worker threads. Unsupported on `wasm32`, where threads are not
/// available to this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadContextFactory;

impl ContextFactory for ThreadContextFactory {
    fn is_supported(&self) -> bool {
        cfg!(not(target_arch = "wasm32"))
    }

    fn spawn(
        &self,
        script: Option<&str>,
        events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        if !self.is_supported() {
            return Err(ContextError::Unsupported);
        }
        if let Some(script) = script {
            debug!(script, "worker code is compiled in, ignoring script location");
        }

        let (sender, mut receiver) = mpsc::unbounded_channel::<TaskRequest>();
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(request) = receiver.blocking_recv() {
                    let task_id = request.task_id;
                    match panic::catch_unwind(AssertUnwindSafe(|| handle_request(request))) {
                        Ok(result) => events(ContextEvent::Message(TaskResponse { task_id, result })),
                        Err(payload) => {
                            events(ContextEvent::Error(panic_message(payload.as_ref())));
                            break;
                        }
                    }
                }
                trace!("worker thread exiting");
            })
            .map_err(|e| ContextError::Spawn(e.to_string()))?;

        Ok(Arc::new(ThreadContext {
            sender: Mutex::new(Some(sender)),
        }))
    }
}

struct ThreadContext {
    sender: Mutex<Option<mpsc::UnboundedSender<TaskRequest>>>,
}

impl ExecutionContext for ThreadContext {
    fn post(&self, request: TaskRequest) -> Result<(), ContextError> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(request).map_err(|_| ContextError::Closed),
            None => Err(ContextError::Closed),
        }
    }

    fn terminate(&self) {
        // Closing the channel ends the thread after its current task
        self.sender.lock().take();
    }
}

/// Decode and render one task. Hooks never reach this side.
pub fn handle_request(request: TaskRequest) -> TaskResult {
    let TaskRequest { task_id, job } = request;
    trace!(task_id, "handling task");

    let result = job
        .payload
        .into_bytes()
        .and_then(|bytes| decode_image(&bytes, &job.source_type, job.transform))
        .map_err(|e| e.to_string())
        .and_then(|image| {
            render(&image, &job.options, &mut DrawHooks::default(), &|| false)
                .map_err(|e| e.to_string())
        });

    match result {
        Ok(Some(rendered)) => TaskResult::Ok(rendered),
        Ok(None) => TaskResult::Error {
            message: "rendering was interrupted".to_string(),
        },
        Err(message) => TaskResult::Error { message },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}
