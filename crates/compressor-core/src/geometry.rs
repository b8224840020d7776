//! Target-size resolution under aspect-ratio, min/max and fixed-box constraints.
//!
//! Every draw goes through [`plan_draw`], which resolves the final pixel size
//! of the output surface in this order:
//!
//! 1. the max box, fitted with `contain` against the aspect ratio
//! 2. the min box, fitted with `cover`
//! 3. the target box, under the requested [`ResizeMode`] (or natural size)
//! 4. clamp the target between the min box and the max box
//! 5. normalize floating-point drift, then floor
//!
//! A quarter-turn rotation swaps width/height of every constraint before
//! resolution and swaps the surface size back afterwards, so the geometry is
//! computed in the frame of the unrotated source.

use serde::{Deserialize, Serialize};

/// Scale used by [`normalize_decimal_number`] when rounding drift away.
pub const DEFAULT_DECIMAL_SCALE: f64 = 100_000_000_000.0;

/// Length of a run of `0`/`9` digits that marks a value as drifted.
const DRIFT_RUN: usize = 12;

/// How a fixed `width` x `height` box is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// No explicit box fitting; behaves like `Contain` when both sides are set.
    #[default]
    None,
    /// Shrink to fit inside the box without cropping.
    Contain,
    /// Fill the box, cropping whatever overflows.
    Cover,
}

impl ResizeMode {
    /// The mode used to pick the source crop for an explicit box fit.
    pub fn inverted(self) -> Self {
        match self {
            ResizeMode::Contain => ResizeMode::Cover,
            ResizeMode::Cover => ResizeMode::Contain,
            ResizeMode::None => ResizeMode::None,
        }
    }
}

/// A width/height pair in (possibly fractional) pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn swapped(self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// An axis-aligned rectangle in user space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check whether a point lies inside the rectangle (right/bottom exclusive).
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Returns true for finite values strictly greater than zero.
#[inline]
pub fn is_positive_number(value: f64) -> bool {
    value > 0.0 && value < f64::INFINITY
}

/// Resolve a box against an aspect ratio.
///
/// * both sides positive: fit the box under `mode` (`Contain`/`None` shrink to
///   fit, `Cover` fills and may overflow)
/// * one side positive: derive the other from the aspect ratio
/// * neither positive: return both values unchanged, the caller substitutes
///   natural dimensions
pub fn resolve_box(aspect_ratio: f64, width: f64, height: f64, mode: ResizeMode) -> Size {
    let valid_width = is_positive_number(width);
    let valid_height = is_positive_number(height);

    if valid_width && valid_height {
        let adjusted_width = height * aspect_ratio;
        let shrink = match mode {
            ResizeMode::Contain | ResizeMode::None => adjusted_width > width,
            ResizeMode::Cover => adjusted_width < width,
        };

        if shrink {
            Size::new(width, width / aspect_ratio)
        } else {
            Size::new(adjusted_width, height)
        }
    } else if valid_width {
        Size::new(width, width / aspect_ratio)
    } else if valid_height {
        Size::new(height * aspect_ratio, height)
    } else {
        Size::new(width, height)
    }
}

/// Round away floating-point drift such as `99.99999999999999` before flooring.
pub fn normalize_decimal_number(value: f64) -> f64 {
    normalize_decimal_number_with(value, DEFAULT_DECIMAL_SCALE)
}

/// [`normalize_decimal_number`] with an explicit rounding scale.
///
/// A value is considered drifted when its shortest decimal representation
/// has a run of twelve or more `0`/`9` digits after the decimal point.
pub fn normalize_decimal_number_with(value: f64, scale: f64) -> f64 {
    if has_drifting_decimals(value) {
        (value * scale).round() / scale
    } else {
        value
    }
}

fn has_drifting_decimals(value: f64) -> bool {
    if !value.is_finite() {
        return false;
    }

    let repr = value.to_string();
    let Some((_, fraction)) = repr.split_once('.') else {
        return false;
    };

    let mut run = 0;
    for digit in fraction.bytes() {
        if digit == b'0' || digit == b'9' {
            run += 1;
            if run >= DRIFT_RUN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Size constraints for one draw.
///
/// `max_*` values that are not positive mean "unbounded", `min_*` values
/// that are not positive mean "no minimum". A fixed `width`/`height` that is
/// not a positive finite number is treated as unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeConstraints {
    pub max_width: f64,
    pub max_height: f64,
    pub min_width: f64,
    pub min_height: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub resize: ResizeMode,
}

impl Default for SizeConstraints {
    fn default() -> Self {
        Self {
            max_width: f64::INFINITY,
            max_height: f64::INFINITY,
            min_width: 0.0,
            min_height: 0.0,
            width: None,
            height: None,
            resize: ResizeMode::None,
        }
    }
}

impl SizeConstraints {
    fn max_box(&self) -> Size {
        Size::new(upper_bound(self.max_width), upper_bound(self.max_height))
    }

    fn min_box(&self) -> Size {
        Size::new(lower_bound(self.min_width), lower_bound(self.min_height))
    }

    fn target_box(&self) -> Size {
        Size::new(fixed_side(self.width), fixed_side(self.height))
    }

    /// An explicit `contain`/`cover` fit against a complete fixed box.
    pub fn is_box_fit(&self) -> bool {
        self.resize != ResizeMode::None
            && is_positive_number(fixed_side(self.width))
            && is_positive_number(fixed_side(self.height))
    }

    /// Whether any constraint forces a size different from the natural one.
    pub fn binds(&self, natural_width: u32, natural_height: u32) -> bool {
        let (nw, nh) = (natural_width as f64, natural_height as f64);
        let max = self.max_box();
        let min = self.min_box();
        let target = self.target_box();

        target.width > nw
            || target.height > nh
            || min.width > nw
            || min.height > nh
            || max.width < nw
            || max.height < nh
    }
}

fn upper_bound(value: f64) -> f64 {
    if is_positive_number(value) {
        value
    } else {
        f64::INFINITY
    }
}

fn lower_bound(value: f64) -> f64 {
    if is_positive_number(value) {
        value
    } else {
        0.0
    }
}

fn fixed_side(value: Option<f64>) -> f64 {
    value.filter(|v| is_positive_number(*v)).unwrap_or(0.0)
}

/// Final geometry of one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawPlan {
    /// Output surface width (already swapped back for quarter turns).
    pub canvas_width: u32,
    /// Output surface height (already swapped back for quarter turns).
    pub canvas_height: u32,
    /// Source crop, only present for an explicit `contain`/`cover` box fit.
    pub source: Option<Rect>,
    /// Destination rectangle, centered on the origin of the rotated frame.
    pub destination: Rect,
}

/// Resolve the draw geometry for a source of the given natural size.
pub fn plan_draw(
    natural_width: u32,
    natural_height: u32,
    rotate: i32,
    constraints: &SizeConstraints,
) -> DrawPlan {
    let nw = natural_width.max(1) as f64;
    let nh = natural_height.max(1) as f64;
    let quarter_turn = rotate.rem_euclid(180) == 90;
    let box_fit = constraints.is_box_fit();

    let mut max = constraints.max_box();
    let mut min = constraints.min_box();
    let mut target = constraints.target_box();

    if quarter_turn {
        max = max.swapped();
        min = min.swapped();
        target = target.swapped();
    }

    let aspect_ratio = if box_fit {
        target.width / target.height
    } else {
        nw / nh
    };

    let max = resolve_box(aspect_ratio, max.width, max.height, ResizeMode::Contain);
    let min = resolve_box(aspect_ratio, min.width, min.height, ResizeMode::Cover);

    let target = if box_fit {
        resolve_box(aspect_ratio, target.width, target.height, constraints.resize)
    } else {
        let resolved = resolve_box(aspect_ratio, target.width, target.height, ResizeMode::None);
        Size::new(
            natural_or(resolved.width, nw),
            natural_or(resolved.height, nh),
        )
    };

    let width = finalize_side(target.width, min.width, max.width);
    let height = finalize_side(target.height, min.height, max.height);

    let source = box_fit.then(|| {
        let crop = resolve_box(aspect_ratio, nw, nh, constraints.resize.inverted());
        Rect::new(
            (nw - crop.width) / 2.0,
            (nh - crop.height) / 2.0,
            crop.width,
            crop.height,
        )
    });

    let destination = Rect::new(-width / 2.0, -height / 2.0, width, height);

    let (canvas_width, canvas_height) = if quarter_turn {
        (height as u32, width as u32)
    } else {
        (width as u32, height as u32)
    };

    DrawPlan {
        canvas_width,
        canvas_height,
        source,
        destination,
    }
}

fn natural_or(value: f64, natural: f64) -> f64 {
    if is_positive_number(value) {
        value
    } else {
        natural
    }
}

/// Clamp between the bounds (the max wins when they conflict), then floor.
fn finalize_side(value: f64, lower: f64, upper: f64) -> f64 {
    let clamped = value.max(lower).min(upper);
    normalize_decimal_number(clamped).floor().max(1.0)
}
