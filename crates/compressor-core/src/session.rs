//! Compression session: one request from validation to a terminal state.
//!
//! # Architecture
//!
//! A [`Compressor`] walks these states exactly once:
//!
//! ```text
//! Validating -> ReadingMetadata? -> Loading -> Routing -> Rendering -> Finalizing
//!            -> Done | Failed | Aborted
//! ```
//!
//! Every terminal transition goes through one exit path that first releases
//! the session's resources (object URL, context lease) and then fires at most
//! one callback.
//!
//! # Abort
//!
//! [`AbortHandle::abort`] records what the abort means for the stage the
//! session is in at that moment:
//!
//! - before the session starts, or while the image is still loading: the
//!   session ends silently ([`Completion::Aborted`], no callback)
//! - while reading source bytes for metadata: a [`CompressError::ReadFailure`]
//! - once the image is loaded, or handed to the background context: a
//!   [`CompressError::Aborted`] failure
//! - after a terminal state: nothing
//!
//! A task already sent to the background context is not interrupted; its
//! response is discarded when it arrives.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::blob::Blob;
use crate::decode::{decode_image, DecodeError};
use crate::error::CompressError;
use crate::metadata::{
    extract_app1_segments, insert_app1_segments, parse_orientation, read_orientation,
    OrientationTransform,
};
use crate::mime;
use crate::object_url::{InMemoryUrlRegistry, ObjectUrl, ObjectUrlRegistry};
use crate::options::CompressOptions;
use crate::render::{render, DrawHooks, DrawingSurface, EncodeError, RenderOptions, Rendered};
use crate::router::{
    ExecutionRouter, ImagePayload, RenderJob, Route, RoutingError, WorkerMode,
};

/// Milliseconds since the Unix epoch.
pub type Clock = fn() -> u64;

/// Called with the result of a successful session.
pub type SuccessCallback = Box<dyn FnOnce(&Blob) + Send>;

/// Called with the error of a failed session.
pub type ErrorCallback = Box<dyn FnOnce(&CompressError) + Send>;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The collaborators a session runs against.
#[derive(Clone)]
pub struct Runtime {
    pub router: Arc<ExecutionRouter>,
    /// `None` models a runtime without object-URL support.
    pub urls: Option<Arc<dyn ObjectUrlRegistry>>,
    pub clock: Clock,
}

impl Runtime {
    pub fn new(router: Arc<ExecutionRouter>) -> Self {
        Self {
            router,
            urls: Some(Arc::new(InMemoryUrlRegistry::new())),
            clock: system_clock,
        }
    }

    /// The process-wide shared router.
    pub fn shared() -> Self {
        Self::new(crate::shared_router())
    }

    /// A runtime that never leaves the calling thread.
    pub fn main_thread() -> Self {
        Self::new(ExecutionRouter::main_thread_only())
    }

    pub fn with_urls(mut self, urls: Option<Arc<dyn ObjectUrlRegistry>>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("router", &self.router)
            .field("urls", &self.urls.is_some())
            .finish()
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Validating,
    ReadingMetadata,
    Loading,
    Routing,
    Rendering,
    Finalizing,
    Done,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed | SessionState::Aborted
        )
    }
}

/// How a session ended without an error.
#[derive(Debug, Clone)]
pub enum Completion {
    Compressed(Blob),
    /// Aborted before anything was reported.
    Aborted,
}

/// Why the pipeline stopped early.
#[derive(Debug, Clone)]
enum Halt {
    /// End without a callback.
    Silent,
    Fail(CompressError),
}

impl From<CompressError> for Halt {
    fn from(err: CompressError) -> Self {
        Halt::Fail(err)
    }
}

impl From<DecodeError> for Halt {
    fn from(err: DecodeError) -> Self {
        Halt::Fail(err.into())
    }
}

impl From<EncodeError> for Halt {
    fn from(err: EncodeError) -> Self {
        Halt::Fail(err.into())
    }
}

impl From<RoutingError> for Halt {
    fn from(err: RoutingError) -> Self {
        Halt::Fail(err.into())
    }
}

struct AbortState {
    stage: SessionState,
    image_ready: bool,
    halt: Option<Halt>,
}

impl AbortState {
    fn disposition(&self) -> Halt {
        match self.stage {
            SessionState::ReadingMetadata => {
                Halt::Fail(CompressError::ReadFailure("aborted while reading the image".into()))
            }
            _ if self.image_ready => Halt::Fail(CompressError::Aborted),
            _ => Halt::Silent,
        }
    }
}

/// Aborts a session from anywhere, including from inside a draw hook.
#[derive(Clone)]
pub struct AbortHandle {
    state: Arc<Mutex<AbortState>>,
    signal: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(AbortState {
                stage: SessionState::Idle,
                image_ready: false,
                halt: None,
            })),
            signal: Arc::new(signal),
        }
    }

    /// Request an abort. Returns false if the session already ended or was
    /// already aborted.
    pub fn abort(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.stage.is_terminal() || state.halt.is_some() {
                return false;
            }
            let halt = state.disposition();
            debug!(stage = ?state.stage, ?halt, "abort requested");
            state.halt = Some(halt);
        }
        self.signal.send_replace(true);
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().halt.is_some()
    }

    fn stage(&self) -> SessionState {
        self.state.lock().stage
    }

    fn enter(&self, stage: SessionState) {
        trace!(?stage, "session stage");
        self.state.lock().stage = stage;
    }

    fn set_image_ready(&self, ready: bool) {
        self.state.lock().image_ready = ready;
    }

    fn halt(&self) -> Option<Halt> {
        self.state.lock().halt.clone()
    }

    /// Await `future` unless an abort arrives first.
    async fn until_aborted<F: Future>(&self, future: F) -> Result<F::Output, Halt> {
        let mut aborted = self.signal.subscribe();
        tokio::select! {
            biased;
            _ = aborted.wait_for(|aborted| *aborted) => {
                Err(self.halt().unwrap_or(Halt::Silent))
            }
            output = future => Ok(output),
        }
    }

    /// Move to a terminal state; returns the pending abort, if any.
    fn finish(&self, stage: SessionState) -> Option<Halt> {
        let mut state = self.state.lock();
        state.stage = stage;
        state.halt.clone()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Source bytes ready for decoding, plus what metadata handling produced.
struct Prepared {
    bytes: Arc<[u8]>,
    transform: OrientationTransform,
}

/// One compression request.
///
/// # Examples
///
/// ```ignore
/// use compressor_core::{Blob, CompressOptions, Compressor};
///
/// let source = Blob::new(std::fs::read("photo.jpg")?, "image/jpeg").with_name("photo.jpg");
/// let mut compressor = Compressor::new(source, CompressOptions::default())
///     .on_success(|blob| println!("{} bytes", blob.size()));
/// let completion = compressor.run().await?;
/// ```
pub struct Compressor {
    source: Blob,
    options: CompressOptions,
    runtime: Runtime,
    hooks: DrawHooks,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    abort: AbortHandle,
    started: bool,
    result: Option<Blob>,
    exif: Vec<Vec<u8>>,
    object_url: Option<ObjectUrl>,
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("source", &self.source)
            .field("options", &self.options)
            .field("state", &self.state())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Compressor {
    /// A session on the shared runtime.
    pub fn new(source: Blob, options: CompressOptions) -> Self {
        Self::with_runtime(source, options, Runtime::shared())
    }

    pub fn with_runtime(source: Blob, options: CompressOptions, runtime: Runtime) -> Self {
        Self {
            source,
            options,
            runtime,
            hooks: DrawHooks::default(),
            on_success: None,
            on_error: None,
            abort: AbortHandle::new(),
            started: false,
            result: None,
            exif: Vec::new(),
            object_url: None,
        }
    }

    /// Hook run after the background fill, before drawing. Main thread only.
    pub fn before_draw(mut self, hook: impl FnMut(&mut dyn DrawingSurface) + Send + 'static) -> Self {
        self.hooks.before_draw = Some(Box::new(hook));
        self
    }

    /// Hook run after drawing, before export. Main thread only.
    pub fn drew(mut self, hook: impl FnMut(&mut dyn DrawingSurface) + Send + 'static) -> Self {
        self.hooks.drew = Some(Box::new(hook));
        self
    }

    pub fn on_success(mut self, callback: impl FnOnce(&Blob) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&CompressError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Shorthand for `abort_handle().abort()`.
    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn state(&self) -> SessionState {
        self.abort.stage()
    }

    /// The output of a successful session.
    pub fn result(&self) -> Option<&Blob> {
        self.result.as_ref()
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    /// Drive the session to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the error also passed to the `on_error` callback, or
    /// `CompressError::AlreadyFinished` when called a second time.
    pub async fn run(&mut self) -> Result<Completion, CompressError> {
        if self.started {
            return Err(CompressError::AlreadyFinished);
        }
        self.started = true;

        let outcome = self.execute().await;
        self.complete(outcome)
    }

    /// [`Compressor::run`] on the calling thread, without an async runtime.
    ///
    /// Forces main-thread rendering, as no timer can be awaited here.
    pub fn run_blocking(&mut self) -> Result<Completion, CompressError> {
        self.options.use_worker = Some(false);
        futures::executor::block_on(self.run())
    }

    /// Revoke the object URL created for main-thread loading.
    ///
    /// Runs automatically on every terminal transition and on drop. Returns
    /// true when something was still held. The context lease never outlives
    /// the rendering stage.
    pub fn release(&mut self) -> bool {
        let Some(url) = self.object_url.take() else {
            return false;
        };
        if let Some(urls) = &self.runtime.urls {
            urls.revoke(&url);
        }
        trace!(url = url.as_str(), "object URL revoked");
        true
    }

    async fn execute(&mut self) -> Result<Blob, Halt> {
        self.checkpoint()?;

        self.abort.enter(SessionState::Validating);
        self.validate()?;

        let prepared = self.read_metadata();
        self.checkpoint()?;

        self.abort.enter(SessionState::Loading);
        let source_type = self.source.mime_type().to_string();
        let render_options =
            RenderOptions::from_options(&self.options, &source_type, self.source.size() as u64);

        self.abort.enter(SessionState::Routing);
        let mode = self.options.worker_mode();
        let route = self
            .runtime
            .router
            .route(mode, self.options.worker_path.as_deref())?;
        self.checkpoint()?;

        self.abort.enter(SessionState::Rendering);
        let rendered = match route {
            Route::Background(lease) => {
                let job = self.background_job(&prepared, &render_options);
                // The image now belongs to the background context
                self.abort.set_image_ready(true);
                self.checkpoint()?;

                let submitted = self.abort.until_aborted(lease.submit(job)).await?;
                drop(lease);
                match submitted {
                    Ok(rendered) => rendered,
                    Err(error) if mode == WorkerMode::Auto => {
                        warn!(%error, "background rendering failed, falling back to the main thread");
                        self.abort.set_image_ready(false);
                        self.checkpoint()?;
                        self.render_on_main_thread(prepared, &render_options)?
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            Route::MainThread => self.render_on_main_thread(prepared, &render_options)?,
        };
        self.checkpoint()?;

        self.abort.enter(SessionState::Finalizing);
        Ok(self.finalize(rendered, &render_options.output_type))
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        match self.abort.halt() {
            Some(halt) => Err(halt),
            None => Ok(()),
        }
    }

    fn validate(&self) -> Result<(), CompressError> {
        let mime_type = self.source.mime_type();
        if !mime::is_image_type(mime_type) {
            return Err(CompressError::InvalidInput(format!(
                "unsupported type {mime_type:?}"
            )));
        }
        if self.runtime.urls.is_none() {
            return Err(CompressError::UnsupportedRuntime("object URLs".into()));
        }
        Ok(())
    }

    /// Read orientation and EXIF segments of JPEG sources when requested.
    fn read_metadata(&mut self) -> Prepared {
        let source = self.source.read_bytes();
        let is_jpeg = mime::is_jpeg_type(self.source.mime_type());
        let check_orientation = is_jpeg && self.options.check_orientation;
        let retain_metadata = is_jpeg && self.options.retain_metadata;

        if !check_orientation && !retain_metadata {
            return Prepared {
                bytes: source,
                transform: OrientationTransform::IDENTITY,
            };
        }

        self.abort.enter(SessionState::ReadingMetadata);
        let mut working = source.to_vec();
        let mut orientation = 1;
        if check_orientation {
            orientation = read_orientation(&mut working);
        }
        if retain_metadata {
            self.exif = extract_app1_segments(&working);
        }
        debug!(orientation, segments = self.exif.len(), "read source metadata");

        if orientation > 1 {
            Prepared {
                bytes: Arc::from(working),
                transform: parse_orientation(orientation),
            }
        } else {
            Prepared {
                bytes: source,
                transform: OrientationTransform::IDENTITY,
            }
        }
    }

    fn background_job(&self, prepared: &Prepared, options: &RenderOptions) -> RenderJob {
        if !self.hooks.is_empty() {
            debug!("draw hooks do not run in the background context");
        }
        RenderJob {
            payload: ImagePayload::Bytes(Arc::clone(&prepared.bytes)),
            source_type: self.source.mime_type().to_string(),
            transform: prepared.transform,
            options: options.clone(),
        }
    }

    fn render_on_main_thread(
        &mut self,
        prepared: Prepared,
        options: &RenderOptions,
    ) -> Result<Rendered, Halt> {
        let urls = self
            .runtime
            .urls
            .clone()
            .ok_or_else(|| CompressError::UnsupportedRuntime("object URLs".into()))?;
        let url = urls.create(prepared.bytes);
        let bytes = urls.resolve(&url);
        self.object_url = Some(url);
        let bytes = bytes.ok_or_else(|| CompressError::ReadFailure("object URL was revoked".into()))?;

        let image = decode_image(&bytes, self.source.mime_type(), prepared.transform)?;
        self.abort.set_image_ready(true);
        self.checkpoint()?;

        let abort = self.abort.clone();
        let is_aborted = move || abort.is_aborted();
        match render(&image, options, &mut self.hooks, &is_aborted)? {
            Some(rendered) => Ok(rendered),
            None => Err(self.abort.halt().unwrap_or(Halt::Silent)),
        }
    }

    /// `requested_type` is the resolved output type; the export may have
    /// fallen back to another format.
    fn finalize(&self, rendered: Rendered, requested_type: &str) -> Blob {
        let source = &self.source;
        let Rendered {
            bytes,
            mime_type,
            natural_width,
            natural_height,
            ..
        } = rendered;

        let bytes = if self.options.retain_metadata
            && mime::is_jpeg_type(&mime_type)
            && !self.exif.is_empty()
        {
            insert_app1_segments(&bytes, &self.exif)
        } else {
            bytes
        };

        let constraints = self.options.size_constraints();
        if self.options.strict
            && !self.options.retain_metadata
            && bytes.len() > source.size()
            && mime::same_type(requested_type, source.mime_type())
            && !constraints.binds(natural_width, natural_height)
        {
            debug!(
                result = bytes.len(),
                source = source.size(),
                "result is larger than the source, keeping the source"
            );
            return source.clone();
        }

        let mut result =
            Blob::new(bytes, mime_type.as_str()).with_last_modified((self.runtime.clock)());
        if let Some(name) = source.name() {
            let name = if !mime::same_type(&mime_type, source.mime_type()) {
                mime::replace_extension(name, &mime::image_type_to_extension(&mime_type))
            } else {
                name.to_string()
            };
            result = result.with_name(name);
        }
        result
    }

    fn complete(&mut self, outcome: Result<Blob, Halt>) -> Result<Completion, CompressError> {
        let stage = match &outcome {
            Ok(_) => SessionState::Done,
            Err(Halt::Silent) => SessionState::Aborted,
            Err(Halt::Fail(_)) => SessionState::Failed,
        };
        let pending_abort = self.abort.finish(stage);
        let outcome = match (outcome, pending_abort) {
            (Ok(_), Some(halt)) => {
                // Aborted after the last checkpoint: the result is dropped
                let stage = match halt {
                    Halt::Silent => SessionState::Aborted,
                    Halt::Fail(_) => SessionState::Failed,
                };
                self.abort.finish(stage);
                Err(halt)
            }
            (outcome, _) => outcome,
        };

        self.release();
        self.hooks = DrawHooks::default();

        match outcome {
            Ok(blob) => {
                debug!(size = blob.size(), mime_type = blob.mime_type(), "compression finished");
                self.result = Some(blob.clone());
                self.on_error = None;
                if let Some(callback) = self.on_success.take() {
                    callback(&blob);
                }
                Ok(Completion::Compressed(blob))
            }
            Err(Halt::Silent) => {
                debug!("compression aborted");
                self.on_success = None;
                self.on_error = None;
                Ok(Completion::Aborted)
            }
            Err(Halt::Fail(error)) => {
                debug!(%error, "compression failed");
                self.on_success = None;
                if let Some(callback) = self.on_error.take() {
                    callback(&error);
                }
                Err(error)
            }
        }
    }
}

impl Drop for Compressor {
    fn drop(&mut self) {
        self.release();
    }
}
