//! Shared test utilities: encoded image fixtures and deterministic
//! execution-context fakes.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let jpeg = jpeg_with_exif(&solid_jpeg(40, 20, [255, 0, 0]), 6, false);
//! let router = ExecutionRouter::new(Arc::new(ManualFactory::default()));
//! ```

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::router::{
    ContextError, ContextEvent, ContextFactory, EventSink, ExecutionContext, TaskId, TaskRequest,
    TaskResponse,
};

// =========================================================================
// Image fixtures
// =========================================================================

/// Encode an RGB image as JPEG at quality 90.
pub fn encode_jpeg(image: &RgbImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, 90)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .unwrap();
    buffer.into_inner()
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    PngEncoder::new(&mut buffer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .unwrap();
    buffer.into_inner()
}

pub fn solid_gif(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    RgbaImage::from_pixel(width, height, Rgba(color))
        .write_to(&mut buffer, ImageFormat::Gif)
        .unwrap();
    buffer.into_inner()
}

pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_jpeg(&RgbImage::from_pixel(width, height, Rgb(color)))
}

pub fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(width, height, Rgba(color)))
}

/// High-frequency content that compresses poorly.
pub fn noise_image(width: u32, height: u32) -> RgbImage {
    let mut seed: u32 = 0x2545_F491;
    RgbImage::from_fn(width, height, |_, _| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let [r, g, b, _] = seed.to_le_bytes();
        Rgb([r, g, b])
    })
}

/// Left half `left`, right half `right`.
pub fn split_jpeg(width: u32, height: u32, left: [u8; 3], right: [u8; 3]) -> Vec<u8> {
    encode_jpeg(&RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb(left)
        } else {
            Rgb(right)
        }
    }))
}

/// A complete APP1 segment holding a TIFF block with one orientation entry.
pub fn exif_app1(orientation: u16, little_endian: bool) -> Vec<u8> {
    let u16_bytes = |v: u16| {
        if little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        }
    };
    let u32_bytes = |v: u32| {
        if little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        }
    };

    let mut tiff = Vec::new();
    tiff.extend_from_slice(if little_endian { b"II" } else { b"MM" });
    tiff.extend_from_slice(&u16_bytes(0x002A));
    tiff.extend_from_slice(&u32_bytes(8));
    // IFD0: one entry
    tiff.extend_from_slice(&u16_bytes(1));
    tiff.extend_from_slice(&u16_bytes(0x0112));
    tiff.extend_from_slice(&u16_bytes(3));
    tiff.extend_from_slice(&u32_bytes(1));
    tiff.extend_from_slice(&u16_bytes(orientation));
    tiff.extend_from_slice(&[0, 0]);
    // No next IFD
    tiff.extend_from_slice(&u32_bytes(0));

    let length = (2 + 6 + tiff.len()) as u16;
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(b"Exif\0\0");
    segment.extend_from_slice(&tiff);
    segment
}

/// Insert an EXIF APP1 right after SOI of an encoded JPEG.
pub fn jpeg_with_exif(jpeg: &[u8], orientation: u16, little_endian: bool) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    out.extend_from_slice(&exif_app1(orientation, little_endian));
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub fn decode_rgba(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().into_rgba8()
}

/// Assert a pixel is within `tolerance` of `expected` on every RGB channel.
pub fn assert_close(actual: Rgba<u8>, expected: [u8; 3], tolerance: u8) {
    for (i, (a, e)) in actual.0.iter().zip(expected).enumerate() {
        assert!(
            a.abs_diff(e) <= tolerance,
            "channel {i}: {:?} not within {tolerance} of {:?}",
            actual.0,
            expected
        );
    }
}

// =========================================================================
// Execution context fakes
// =========================================================================

/// A runtime without isolated execution.
#[derive(Debug, Default)]
pub struct UnsupportedFactory;

impl ContextFactory for UnsupportedFactory {
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

/// Advertises support but never manages to start.
#[derive(Debug, Default)]
pub struct FailingFactory;

impl ContextFactory for FailingFactory {
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        _script: Option<&str>,
        _events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        Err(ContextError::Spawn("refused to start".into()))
    }
}

/// Accepts tasks and never answers.
#[derive(Debug, Default)]
pub struct SilentFactory;

struct SilentContext;

impl ExecutionContext for SilentContext {
    fn post(&self, _request: TaskRequest) -> Result<(), ContextError> {
        Ok(())
    }

    fn terminate(&self) {}
}

impl ContextFactory for SilentFactory {
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        _script: Option<&str>,
        _events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        Ok(Arc::new(SilentContext))
    }
}

/// Reports a transport error for every task it receives.
#[derive(Debug, Default)]
pub struct CrashingFactory {
    spawned: AtomicUsize,
}

impl CrashingFactory {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

struct CrashingContext {
    events: EventSink,
}

impl ExecutionContext for CrashingContext {
    fn post(&self, _request: TaskRequest) -> Result<(), ContextError> {
        (self.events)(ContextEvent::Error("context crashed".into()));
        Ok(())
    }

    fn terminate(&self) {}
}

impl ContextFactory for CrashingFactory {
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        _script: Option<&str>,
        events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CrashingContext { events }))
    }
}

#[derive(Default)]
struct ManualState {
    sinks: Vec<EventSink>,
    scripts: Vec<Option<String>>,
    posted: Vec<TaskId>,
    terminated: usize,
}

/// Records every spawn and post; tests drive responses by hand.
#[derive(Default)]
pub struct ManualFactory {
    state: Arc<Mutex<ManualState>>,
}

impl ManualFactory {
    pub fn spawned(&self) -> usize {
        self.state.lock().sinks.len()
    }

    pub fn scripts(&self) -> Vec<Option<String>> {
        self.state.lock().scripts.clone()
    }

    /// Task ids in the order they were posted.
    pub fn posted(&self) -> Vec<TaskId> {
        self.state.lock().posted.clone()
    }

    pub fn terminated(&self) -> usize {
        self.state.lock().terminated
    }

    /// Deliver an event through the sink of the `index`-th spawned context.
    pub fn emit_to(&self, index: usize, event: ContextEvent) {
        let sink = Arc::clone(&self.state.lock().sinks[index]);
        sink(event);
    }

    /// Answer through the most recently spawned context.
    pub fn reply(&self, response: TaskResponse) {
        let index = self.spawned() - 1;
        self.emit_to(index, ContextEvent::Message(response));
    }
}

struct ManualContext {
    state: Arc<Mutex<ManualState>>,
}

impl ExecutionContext for ManualContext {
    fn post(&self, request: TaskRequest) -> Result<(), ContextError> {
        self.state.lock().posted.push(request.task_id);
        Ok(())
    }

    fn terminate(&self) {
        self.state.lock().terminated += 1;
    }
}

impl ContextFactory for ManualFactory {
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        script: Option<&str>,
        events: EventSink,
    ) -> Result<Arc<dyn ExecutionContext>, ContextError> {
        let mut state = self.state.lock();
        state.sinks.push(events);
        state.scripts.push(script.map(str::to_string));
        Ok(Arc::new(ManualContext {
            state: Arc::clone(&self.state),
        }))
    }
}
