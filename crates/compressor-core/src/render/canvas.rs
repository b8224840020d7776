//! A software 2D drawing surface with canvas-style transforms.
//!
//! # Algorithm
//!
//! The surface keeps a current affine transform `[a b c d e f]` mapping user
//! space to device pixels:
//! ```text
//! device_x = a * x + c * y + e
//! device_y = b * x + d * y + f
//! ```
//! `translate`/`rotate`/`scale` post-multiply it, as a 2D canvas context does.
//! Drawing uses inverse mapping: each device pixel center is mapped back to
//! user space, tested against the destination rectangle, then projected into
//! the source rectangle and sampled bilinearly. Sources outside the image
//! contribute nothing, so a source rectangle larger than the image leaves
//! the background visible.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::encode::{encode_rgba, EncodeError, OutputFormat};
use crate::geometry::Rect;

/// Largest surface that will be allocated (16384 x 16384).
pub const MAX_CANVAS_PIXELS: u64 = 16_384 * 16_384;

/// Sub-epsilon trig results are snapped so quarter turns stay exact.
const SNAP_EPSILON: f64 = 1e-12;

/// The drawing capabilities handed to render hooks.
pub trait DrawingSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Push the current transform.
    fn save(&mut self);
    /// Pop the last saved transform. No-op when nothing was saved.
    fn restore(&mut self);
    fn translate(&mut self, x: f64, y: f64);
    /// Rotate clockwise by `radians`.
    fn rotate(&mut self, radians: f64);
    fn scale(&mut self, x: f64, y: f64);

    /// Fill a user-space rectangle with `color` (source-over).
    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>);

    /// Draw `source` (the full image when `None`) of `image` into `destination`.
    fn draw_image(&mut self, image: &RgbaImage, source: Option<Rect>, destination: Rect);

    /// Direct access to the device pixels.
    fn pixels(&self) -> &RgbaImage;
    fn pixels_mut(&mut self) -> &mut RgbaImage;

    /// Encode the current pixels.
    fn export(&self, format: OutputFormat, quality: f64) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Affine {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f64::EPSILON {
            return None;
        }
        Some(Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }

    #[inline]
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    }
}

/// In-memory RGBA surface, initially fully transparent.
#[derive(Debug, Clone)]
pub struct Canvas {
    pixels: RgbaImage,
    transform: Affine,
    stack: Vec<Affine>,
}

impl Canvas {
    /// Allocate a surface.
    ///
    /// # Errors
    ///
    /// Returns `EncodeError::InvalidDimensions` for a zero side or a surface
    /// above [`MAX_CANVAS_PIXELS`].
    pub fn new(width: u32, height: u32) -> Result<Self, EncodeError> {
        if width == 0 || height == 0 || width as u64 * height as u64 > MAX_CANVAS_PIXELS {
            return Err(EncodeError::InvalidDimensions { width, height });
        }
        Ok(Self {
            pixels: RgbaImage::new(width, height),
            transform: Affine::IDENTITY,
            stack: Vec::new(),
        })
    }

    /// Visit every device pixel whose center maps inside `rect`, with the
    /// user-space coordinates of that center.
    fn for_each_covered(&mut self, rect: Rect, mut paint: impl FnMut(&mut Rgba<u8>, f64, f64)) {
        let Some(inverse) = self.transform.invert() else {
            return;
        };
        for (px, py, pixel) in self.pixels.enumerate_pixels_mut() {
            let (ux, uy) = inverse.apply(px as f64 + 0.5, py as f64 + 0.5);
            if rect.contains(ux, uy) {
                paint(pixel, ux, uy);
            }
        }
    }
}

impl DrawingSurface for Canvas {
    fn width(&self) -> u32 {
        self.pixels.width()
    }

    fn height(&self) -> u32 {
        self.pixels.height()
    }

    fn save(&mut self) {
        self.stack.push(self.transform);
    }

    fn restore(&mut self) {
        if let Some(saved) = self.stack.pop() {
            self.transform = saved;
        }
    }

    fn translate(&mut self, x: f64, y: f64) {
        let t = &mut self.transform;
        t.e += t.a * x + t.c * y;
        t.f += t.b * x + t.d * y;
    }

    fn rotate(&mut self, radians: f64) {
        let (sin, cos) = (snap(radians.sin()), snap(radians.cos()));
        let Affine { a, b, c, d, .. } = self.transform;
        let t = &mut self.transform;
        t.a = a * cos + c * sin;
        t.b = b * cos + d * sin;
        t.c = c * cos - a * sin;
        t.d = d * cos - b * sin;
    }

    fn scale(&mut self, x: f64, y: f64) {
        let t = &mut self.transform;
        t.a *= x;
        t.b *= x;
        t.c *= y;
        t.d *= y;
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        self.for_each_covered(rect, |pixel, _, _| blend_over(pixel, color.0));
    }

    fn draw_image(&mut self, image: &RgbaImage, source: Option<Rect>, destination: Rect) {
        if image.width() == 0 || image.height() == 0 {
            return;
        }
        let source = source.unwrap_or_else(|| {
            Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64)
        });
        if source.width <= 0.0 || source.height <= 0.0 {
            return;
        }

        let (image, source) = downscaled_source(image, source, destination);
        let image = image.as_ref();
        let bounds = Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64);
        let scale_x = source.width / destination.width;
        let scale_y = source.height / destination.height;

        self.for_each_covered(destination, |pixel, ux, uy| {
            let sx = source.x + (ux - destination.x) * scale_x;
            let sy = source.y + (uy - destination.y) * scale_y;
            if bounds.contains(sx, sy) {
                blend_over(pixel, sample_bilinear(image, sx, sy));
            }
        });
    }

    fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    fn export(&self, format: OutputFormat, quality: f64) -> Result<Vec<u8>, EncodeError> {
        encode_rgba(&self.pixels, format, quality)
    }
}

/// Shrink the image first when it is drawn at less than half size, so
/// bilinear sampling does not skip most source pixels.
fn downscaled_source(
    image: &RgbaImage,
    source: Rect,
    destination: Rect,
) -> (std::borrow::Cow<'_, RgbaImage>, Rect) {
    let factor_x = destination.width.abs() / source.width;
    let factor_y = destination.height.abs() / source.height;
    if factor_x >= 0.5 || factor_y >= 0.5 {
        return (std::borrow::Cow::Borrowed(image), source);
    }

    let width = ((image.width() as f64 * factor_x).ceil() as u32).max(1);
    let height = ((image.height() as f64 * factor_y).ceil() as u32).max(1);
    let resized = imageops::resize(image, width, height, FilterType::Triangle);
    let rx = width as f64 / image.width() as f64;
    let ry = height as f64 / image.height() as f64;
    let source = Rect::new(
        source.x * rx,
        source.y * ry,
        source.width * rx,
        source.height * ry,
    );
    (std::borrow::Cow::Owned(resized), source)
}

/// Sample at continuous coordinates where pixel `i` covers `[i, i + 1)`.
///
/// Interpolates premultiplied values so transparent neighbours do not
/// darken edges.
fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> [u8; 4] {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let x = (x - 0.5).clamp(0.0, max_x);
    let y = (y - 0.5).clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let weights = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x1, y0, fx * (1.0 - fy)),
        (x0, y1, (1.0 - fx) * fy),
        (x1, y1, fx * fy),
    ];

    let mut acc = [0.0f64; 4];
    for (px, py, w) in weights {
        let p = image.get_pixel(px, py).0;
        let alpha = p[3] as f64 / 255.0;
        for (sum, channel) in acc.iter_mut().zip(&p[..3]) {
            *sum += *channel as f64 * alpha * w;
        }
        acc[3] += alpha * w;
    }

    if acc[3] <= 0.0 {
        return [0, 0, 0, 0];
    }
    [
        (acc[0] / acc[3]).round().clamp(0.0, 255.0) as u8,
        (acc[1] / acc[3]).round().clamp(0.0, 255.0) as u8,
        (acc[2] / acc[3]).round().clamp(0.0, 255.0) as u8,
        (acc[3] * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Source-over compositing of straight-alpha colors.
fn blend_over(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let sa = src[3] as f64 / 255.0;
    if sa >= 1.0 {
        dst.0 = src;
        return;
    }
    if sa <= 0.0 {
        return;
    }

    let da = dst.0[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for (d, s) in dst.0.iter_mut().zip(&src[..3]) {
        let c = *s as f64 * sa + *d as f64 * da * (1.0 - sa);
        *d = (c / out_a).round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
