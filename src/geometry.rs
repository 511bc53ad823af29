//! Text-layer placement for recognized words.
//!
//! Converts a word's pixel quadrilateral into everything needed to draw the
//! word's text over the page so it lines up with the handwriting: rotation,
//! font size, horizontal stretch and baseline insertion point.
//!
//! OCR runs on a raster snapshot of a per-page render, while the text lands
//! on the assembled document whose page may have a different size. Two scale
//! stages are therefore chained per axis:
//!
//! ```text
//! image px ──(src_pt / img_px)──▶ source page pt ──(target_pt / src_pt)──▶ target page pt
//! ```
//!
//! Everything here is pure; drawing lives in [`crate::overlay`].

use kurbo::{Affine, Point, Vec2};

/// Fraction of the box height from the top edge to the baseline.
pub const BASELINE_RATIO: f64 = 0.75;
/// Font size as a fraction of the box height.
pub const FONT_SIZE_RATIO: f64 = 0.75;
/// Smallest font size emitted.
pub const MIN_FONT_SIZE: f64 = 6.0;
/// Words tilted by more than this many degrees are reported as rotated.
pub const ROTATED_THRESHOLD_DEG: f64 = 5.0;

/// Width/height pair in arbitrary units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_usable(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Per-axis factor from OCR pixels to target page units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The two chained scale stages between the OCR image and the target page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleChain {
    /// Image pixels → source page points.
    pub pixel_to_source: Scale,
    /// Source page points → target page points.
    pub source_to_target: Scale,
}

impl ScaleChain {
    /// Build the chain from the three sizes involved. Returns `None` when any
    /// dimension is zero, negative or not finite.
    pub fn new(image_px: Dimensions, source_pt: Dimensions, target_pt: Dimensions) -> Option<Self> {
        if !(image_px.is_usable() && source_pt.is_usable() && target_pt.is_usable()) {
            return None;
        }
        Some(Self {
            pixel_to_source: Scale::new(
                source_pt.width / image_px.width,
                source_pt.height / image_px.height,
            ),
            source_to_target: Scale::new(
                target_pt.width / source_pt.width,
                target_pt.height / source_pt.height,
            ),
        })
    }

    pub fn combined(&self) -> Scale {
        Scale::new(
            self.pixel_to_source.x * self.source_to_target.x,
            self.pixel_to_source.y * self.source_to_target.y,
        )
    }
}

/// Where and how to draw one word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Rotation in degrees, counter-clockwise in the target's y-up space.
    pub angle: f64,
    pub font_size: f64,
    /// Stretch applied along the text direction.
    pub horizontal_scale: f64,
    /// Baseline start point in target page units, y growing downwards.
    pub insertion: Point,
    /// Box width in target page units.
    pub box_width: f64,
    /// Box height in target page units.
    pub box_height: f64,
}

impl Placement {
    pub fn is_rotated(&self) -> bool {
        self.angle.abs() > ROTATED_THRESHOLD_DEG
    }

    /// Text matrix in PDF user space (origin bottom-left) for a page of
    /// `page_height`: stretch, then rotate, then move to the insertion point.
    pub fn transform(&self, page_height: f64) -> Affine {
        Affine::translate(Vec2::new(self.insertion.x, page_height - self.insertion.y))
            * Affine::rotate(self.angle.to_radians())
            * Affine::scale_non_uniform(self.horizontal_scale, 1.0)
    }

    fn is_finite(&self) -> bool {
        self.angle.is_finite()
            && self.font_size.is_finite()
            && self.horizontal_scale.is_finite()
            && self.insertion.x.is_finite()
            && self.insertion.y.is_finite()
    }
}

/// Compute the placement for one word.
///
/// `measure(text, font_size)` must return the natural width of `text` in the
/// font that will be drawn. Returns `None` for fewer than four vertices or
/// when the geometry degenerates into non-finite numbers.
pub fn project<F>(vertices: &[Point], text: &str, measure: F, scale: Scale) -> Option<Placement>
where
    F: Fn(&str, f64) -> f64,
{
    if vertices.len() < 4 {
        return None;
    }
    let origin = vertices[0];
    let along: Vec2 = vertices[1] - origin;
    let across: Vec2 = vertices[3] - origin;

    // Image y grows downwards, PDF y upwards.
    let angle = -along.y.atan2(along.x).to_degrees();

    let baseline = origin + across * BASELINE_RATIO;
    let insertion = Point::new(baseline.x * scale.x, baseline.y * scale.y);

    let box_width = along.length() * scale.x;
    let box_height = across.length() * scale.y;

    let font_size = (box_height * FONT_SIZE_RATIO).max(MIN_FONT_SIZE);

    let natural = measure(text, font_size);
    let horizontal_scale = if natural > 0.0 && natural.is_finite() {
        box_width / natural
    } else {
        1.0
    };

    let placement = Placement {
        angle,
        font_size,
        horizontal_scale,
        insertion,
        box_width,
        box_height,
    };
    placement.is_finite().then_some(placement)
}
