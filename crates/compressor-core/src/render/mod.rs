//! Render engine: draw a decoded image onto a surface and export it.
//!
//! # Architecture
//!
//! [`render`] runs the same sequence in every execution context:
//!
//! 1. resolve the draw geometry ([`crate::geometry::plan_draw`])
//! 2. allocate a [`Canvas`] and fill it (white for formats without alpha)
//! 3. run the `before_draw` hook, stop if the session was aborted
//! 4. translate to the center, rotate, scale, draw, restore
//! 5. run the `drew` hook, stop if the session was aborted
//! 6. export at the resolved format and quality
//!
//! [`RenderOptions`] is the serializable half of the configuration: it is
//! what crosses into a background context. Hooks live in [`DrawHooks`] and
//! never leave the calling thread.

mod canvas;
mod encode;

pub use canvas::{Canvas, DrawingSurface, MAX_CANVAS_PIXELS};
pub use encode::{encode_rgba, jpeg_quality, EncodeError, OutputFormat};

use std::fmt;

use image::Rgba;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::DecodedImage;
use crate::geometry::{plan_draw, Rect, SizeConstraints};
use crate::mime;
use crate::options::CompressOptions;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Resolve the output media type.
///
/// The configured type wins when it is an image type, otherwise the source
/// type is kept. A source larger than `convert_size` whose resolved type is
/// listed in `convert_types` is converted to JPEG. JPEG aliases resolve to
/// `image/jpeg`.
pub fn resolve_output_type(
    configured: &str,
    source_type: &str,
    source_size: u64,
    convert_size: u64,
    convert_types: &[String],
) -> String {
    let resolved = if mime::is_image_type(configured) {
        mime::canonical_type(configured)
    } else {
        mime::canonical_type(source_type)
    };

    if source_size > convert_size && convert_types.iter().any(|t| mime::same_type(t, resolved)) {
        mime::JPEG.to_string()
    } else {
        resolved.to_string()
    }
}

/// Fully resolved, serializable render configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub constraints: SizeConstraints,
    /// The resolved output media type.
    pub output_type: String,
    pub quality: f64,
}

impl RenderOptions {
    pub fn from_options(options: &CompressOptions, source_type: &str, source_size: u64) -> Self {
        Self {
            constraints: options.size_constraints(),
            output_type: resolve_output_type(
                &options.mime_type,
                source_type,
                source_size,
                options.convert_size,
                &options.convert_types,
            ),
            quality: options.quality,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::for_export(&self.output_type)
    }
}

/// Encoded output of one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendered {
    pub bytes: Vec<u8>,
    /// Media type actually produced by the export.
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Dimensions of the decoded source, before orientation.
    pub natural_width: u32,
    pub natural_height: u32,
}

/// A side-effecting hook that receives the drawing surface.
pub type DrawHook = Box<dyn FnMut(&mut dyn DrawingSurface) + Send>;

/// Optional hooks run around the draw.
#[derive(Default)]
pub struct DrawHooks {
    /// Runs after the background fill, before the image is drawn.
    pub before_draw: Option<DrawHook>,
    /// Runs after the image is drawn, before export.
    pub drew: Option<DrawHook>,
}

impl DrawHooks {
    pub fn is_empty(&self) -> bool {
        self.before_draw.is_none() && self.drew.is_none()
    }
}

impl fmt::Debug for DrawHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawHooks")
            .field("before_draw", &self.before_draw.is_some())
            .field("drew", &self.drew.is_some())
            .finish()
    }
}

/// Draw `image` and export it.
///
/// Returns `Ok(None)` when `is_aborted` reports an abort after one of the
/// hooks; nothing is encoded in that case.
///
/// # Errors
///
/// Returns `EncodeError` when the surface cannot be allocated or the export
/// fails.
pub fn render(
    image: &DecodedImage,
    options: &RenderOptions,
    hooks: &mut DrawHooks,
    is_aborted: &dyn Fn() -> bool,
) -> Result<Option<Rendered>, EncodeError> {
    let natural_width = image.natural_width();
    let natural_height = image.natural_height();
    let transform = image.transform;
    let plan = plan_draw(
        natural_width,
        natural_height,
        transform.rotate,
        &options.constraints,
    );
    let format = options.output_format();

    debug!(
        natural_width,
        natural_height,
        width = plan.canvas_width,
        height = plan.canvas_height,
        output = format.mime_type(),
        "rendering"
    );

    let mut canvas = Canvas::new(plan.canvas_width, plan.canvas_height)?;
    let width = plan.canvas_width as f64;
    let height = plan.canvas_height as f64;

    if !format.supports_alpha() {
        canvas.fill_rect(Rect::new(0.0, 0.0, width, height), WHITE);
    }

    if let Some(hook) = hooks.before_draw.as_mut() {
        hook(&mut canvas);
        if is_aborted() {
            return Ok(None);
        }
    }

    canvas.save();
    canvas.translate(width / 2.0, height / 2.0);
    canvas.rotate((transform.rotate as f64).to_radians());
    canvas.scale(transform.scale_x, transform.scale_y);
    canvas.draw_image(&image.pixels, plan.source, plan.destination);
    canvas.restore();

    if let Some(hook) = hooks.drew.as_mut() {
        hook(&mut canvas);
        if is_aborted() {
            return Ok(None);
        }
    }

    let bytes = canvas.export(format, options.quality)?;

    Ok(Some(Rendered {
        bytes,
        mime_type: format.mime_type().to_string(),
        width: plan.canvas_width,
        height: plan.canvas_height,
        natural_width,
        natural_height,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeStrategy;
    use crate::geometry::ResizeMode;
    use crate::metadata::{parse_orientation, OrientationTransform};
    use image::RgbaImage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn decoded(pixels: RgbaImage, transform: OrientationTransform) -> DecodedImage {
        DecodedImage {
            pixels,
            transform,
            strategy: DecodeStrategy::DeclaredType,
        }
    }

    fn options(output_type: &str) -> RenderOptions {
        RenderOptions {
            constraints: SizeConstraints::default(),
            output_type: output_type.to_string(),
            quality: 0.8,
        }
    }

    fn never() -> bool {
        false
    }

    fn decode_output(rendered: &Rendered) -> RgbaImage {
        image::load_from_memory(&rendered.bytes).unwrap().into_rgba8()
    }

    #[test]
    fn test_resolve_output_type() {
        let png = vec!["image/png".to_string()];
        assert_eq!(resolve_output_type("auto", "image/png", 100, 5_000_000, &png), "image/png");
        assert_eq!(
            resolve_output_type("auto", "image/png", 6_000_000, 5_000_000, &png),
            "image/jpeg"
        );
        assert_eq!(
            resolve_output_type("image/webp", "image/png", 6_000_000, 5_000_000, &png),
            "image/webp"
        );
        assert_eq!(
            resolve_output_type("image/png", "image/jpeg", 6_000_000, 5_000_000, &png),
            "image/jpeg"
        );
        // Exactly at the threshold is not "exceeding"
        assert_eq!(
            resolve_output_type("auto", "image/png", 5_000_000, 5_000_000, &png),
            "image/png"
        );
    }

    #[test]
    fn test_resolve_output_type_canonicalizes_jpeg_aliases() {
        let png = vec!["image/png".to_string()];
        assert_eq!(resolve_output_type("image/jpg", "image/png", 10, 5_000_000, &png), "image/jpeg");
        assert_eq!(resolve_output_type("auto", "image/pjpeg", 10, 5_000_000, &png), "image/jpeg");

        let jpg = vec!["image/jpg".to_string()];
        assert_eq!(
            resolve_output_type("image/webp", "image/png", 10, 5, &jpg),
            "image/webp"
        );
        assert_eq!(resolve_output_type("auto", "image/jpeg", 10, 5, &jpg), "image/jpeg");
    }

    #[test]
    fn test_render_png_keeps_transparency() {
        let image = decoded(
            RgbaImage::from_pixel(6, 4, Rgba([0, 0, 0, 0])),
            OrientationTransform::IDENTITY,
        );
        let rendered = render(&image, &options("image/png"), &mut DrawHooks::default(), &never)
            .unwrap()
            .unwrap();

        assert_eq!(rendered.mime_type, "image/png");
        assert_eq!(decode_output(&rendered).get_pixel(3, 2).0[3], 0);
    }

    #[test]
    fn test_render_jpeg_fills_white() {
        let image = decoded(
            RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0])),
            OrientationTransform::IDENTITY,
        );
        let rendered = render(&image, &options("image/jpeg"), &mut DrawHooks::default(), &never)
            .unwrap()
            .unwrap();

        let px = decode_output(&rendered).get_pixel(8, 8).0;
        assert!(px[0] > 245 && px[1] > 245 && px[2] > 245, "{px:?}");
    }

    #[test]
    fn test_render_unsupported_type_exports_png() {
        let image = decoded(RgbaImage::new(2, 2), OrientationTransform::IDENTITY);
        let rendered = render(&image, &options("image/gif"), &mut DrawHooks::default(), &never)
            .unwrap()
            .unwrap();
        assert_eq!(rendered.mime_type, "image/png");
    }

    #[test]
    fn test_render_applies_orientation() {
        // Landscape, red on the left. Orientation 6 draws it portrait with
        // red on top.
        let pixels = RgbaImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let image = decoded(pixels, parse_orientation(6));
        let rendered = render(&image, &options("image/png"), &mut DrawHooks::default(), &never)
            .unwrap()
            .unwrap();

        assert_eq!((rendered.width, rendered.height), (20, 40));
        assert_eq!((rendered.natural_width, rendered.natural_height), (40, 20));
        let out = decode_output(&rendered);
        assert_eq!(out.get_pixel(10, 5).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(10, 35).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_render_cover_box() {
        let pixels = RgbaImage::from_pixel(100, 100, Rgba([255, 0, 0, 255]));
        let image = decoded(pixels, OrientationTransform::IDENTITY);
        let mut opts = options("image/png");
        opts.constraints = SizeConstraints {
            width: Some(200.0),
            height: Some(100.0),
            resize: ResizeMode::Cover,
            ..Default::default()
        };

        let rendered = render(&image, &opts, &mut DrawHooks::default(), &never)
            .unwrap()
            .unwrap();
        assert_eq!((rendered.width, rendered.height), (200, 100));
        assert!(decode_output(&rendered)
            .pixels()
            .all(|p| p.0 == [255, 0, 0, 255]));
    }

    #[test]
    fn test_hooks_run_in_order() {
        let image = decoded(
            RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255])),
            OrientationTransform::IDENTITY,
        );
        let mut hooks = DrawHooks {
            before_draw: Some(Box::new(|surface: &mut dyn DrawingSurface| {
                surface.pixels_mut().put_pixel(0, 0, Rgba([1, 1, 1, 255]));
            })),
            drew: Some(Box::new(|surface: &mut dyn DrawingSurface| {
                // The image has been drawn over the before_draw mark
                assert_eq!(surface.pixels().get_pixel(0, 0).0, [0, 255, 0, 255]);
                surface.pixels_mut().put_pixel(3, 3, Rgba([9, 9, 9, 255]));
            })),
        };

        let rendered = render(&image, &options("image/png"), &mut hooks, &never)
            .unwrap()
            .unwrap();
        assert_eq!(decode_output(&rendered).get_pixel(3, 3).0, [9, 9, 9, 255]);
    }

    #[test]
    fn test_abort_during_hook_skips_encode() {
        let image = decoded(RgbaImage::new(4, 4), OrientationTransform::IDENTITY);
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        let drew_ran = Arc::new(AtomicBool::new(false));
        let drew_flag = Arc::clone(&drew_ran);

        let mut hooks = DrawHooks {
            before_draw: Some(Box::new(move |_: &mut dyn DrawingSurface| {
                flag.store(true, Ordering::SeqCst);
            })),
            drew: Some(Box::new(move |_: &mut dyn DrawingSurface| {
                drew_flag.store(true, Ordering::SeqCst);
            })),
        };

        let is_aborted = || aborted.load(Ordering::SeqCst);
        let result = render(&image, &options("image/png"), &mut hooks, &is_aborted).unwrap();
        assert!(result.is_none());
        assert!(!drew_ran.load(Ordering::SeqCst));
    }
}
