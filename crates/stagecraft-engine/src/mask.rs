//! Dual-surface mask painting.
//!
//! Strokes land on two surfaces at once: a display-resolution RGBA paint
//! layer the user sees (brush color at partial opacity), and a fixed
//! 1024x1024 single-channel mask the model receives (full value on black).
//! Mask coordinates and line width are scaled by the mask/display ratio, so
//! the exported mask is independent of the viewport the strokes came from.

use anyhow::{ensure, Result};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use stagecraft_contracts::palette::{BrushColor, RegionInstructions};

use crate::normalize::encode_png_rgba;

/// Side length of the internal mask buffer.
pub const MASK_RESOLUTION: u32 = 1024;

pub const MIN_BRUSH_SIZE: f32 = 5.0;
pub const MAX_BRUSH_SIZE: f32 = 100.0;
pub const DEFAULT_BRUSH_SIZE: f32 = 20.0;

/// Opacity of the visible stroke layer. Feedback only; the mask always
/// paints at full value.
const PAINT_OPACITY: f32 = 0.6;

/// The "selected for edit" mask value.
const MASK_SELECTED: u8 = 255;

/// Paint-surface state for one loaded base image.
///
/// Constructed in the ready state (both surfaces cleared, no active
/// regions); strokes move it into painting and [`MaskPainter::reset`]
/// clears it back without requiring a new base.
pub struct MaskPainter {
    paint: RgbaImage,
    mask: GrayImage,
    brush_color: BrushColor,
    brush_size: f32,
    regions: RegionInstructions,
    last_point: Option<(f32, f32)>,
}

impl MaskPainter {
    /// `display_width`/`display_height` are the logical dimensions stroke
    /// coordinates arrive in; they need not match the mask resolution.
    pub fn new(display_width: u32, display_height: u32) -> Result<MaskPainter> {
        ensure!(
            display_width > 0 && display_height > 0,
            "paint surface dimensions must be non-zero"
        );
        Ok(MaskPainter {
            paint: RgbaImage::from_pixel(display_width, display_height, Rgba([0, 0, 0, 0])),
            mask: GrayImage::from_pixel(MASK_RESOLUTION, MASK_RESOLUTION, Luma([0])),
            brush_color: BrushColor::Red,
            brush_size: DEFAULT_BRUSH_SIZE,
            regions: RegionInstructions::new(),
            last_point: None,
        })
    }

    pub fn set_brush_color(&mut self, color: BrushColor) {
        self.brush_color = color;
    }

    pub fn brush_color(&self) -> BrushColor {
        self.brush_color
    }

    /// Brush diameter in display pixels, clamped to the slider bounds.
    pub fn set_brush_size(&mut self, size: f32) {
        self.brush_size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
    }

    pub fn brush_size(&self) -> f32 {
        self.brush_size
    }

    /// Start a stroke at `point`, registering the brush color as an active
    /// region and stamping an initial dot on both surfaces.
    pub fn begin_stroke(&mut self, point: (f32, f32)) {
        self.regions.register(self.brush_color);
        self.last_point = Some(point);
        self.stamp_segment(point, point);
    }

    /// Extend the active stroke with a round-capped segment. Segments must
    /// arrive in input order; each one starts where the previous ended.
    /// No-op when no stroke is active.
    pub fn continue_stroke(&mut self, point: (f32, f32)) {
        let Some(last) = self.last_point else {
            return;
        };
        self.stamp_segment(last, point);
        self.last_point = Some(point);
    }

    /// Terminate the active stroke. Idempotent.
    pub fn end_stroke(&mut self) {
        self.last_point = None;
    }

    pub fn set_instruction(&mut self, color: BrushColor, text: impl Into<String>) {
        self.regions.set_instruction(color, text);
    }

    pub fn regions(&self) -> &RegionInstructions {
        &self.regions
    }

    /// True iff every mask pixel still holds the untouched value. Single
    /// pass, stops at the first marked channel.
    pub fn is_mask_empty(&self) -> bool {
        self.mask.as_raw().iter().all(|&value| value == 0)
    }

    /// The mask buffer, losslessly encoded.
    pub fn export_mask(&self) -> Result<Vec<u8>> {
        let mut rgba = RgbaImage::from_pixel(self.mask.width(), self.mask.height(), Rgba([0, 0, 0, 255]));
        for (x, y, pixel) in self.mask.enumerate_pixels() {
            let v = pixel[0];
            if v != 0 {
                rgba.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        encode_png_rgba(&rgba)
    }

    /// Clear both surfaces and every region instruction, keeping the base.
    pub fn reset(&mut self) {
        for pixel in self.paint.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        for pixel in self.mask.pixels_mut() {
            *pixel = Luma([0]);
        }
        self.regions.clear();
        self.last_point = None;
    }

    /// The visible stroke layer, for display compositing.
    pub fn paint_surface(&self) -> &RgbaImage {
        &self.paint
    }

    fn stamp_segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        let radius = self.brush_size / 2.0;
        let color = self.brush_color.rgba();
        let paint = &mut self.paint;
        for_each_segment_pixel(paint.width(), paint.height(), from, to, radius, |x, y| {
            blend_over(paint.get_pixel_mut(x, y), color, PAINT_OPACITY);
        });

        let (scale_x, scale_y) = (
            self.mask.width() as f32 / self.paint.width() as f32,
            self.mask.height() as f32 / self.paint.height() as f32,
        );
        let mask_from = (from.0 * scale_x, from.1 * scale_y);
        let mask_to = (to.0 * scale_x, to.1 * scale_y);
        let mask_radius = (self.brush_size * scale_x) / 2.0;
        let mask = &mut self.mask;
        for_each_segment_pixel(
            mask.width(),
            mask.height(),
            mask_from,
            mask_to,
            mask_radius,
            |x, y| {
                mask.put_pixel(x, y, Luma([MASK_SELECTED]));
            },
        );
    }
}

/// Visit every pixel whose center lies within `radius` of the segment
/// `from..to`. Covers the round caps; cost is proportional to the
/// segment's bounding box, never the full buffer.
fn for_each_segment_pixel(
    width: u32,
    height: u32,
    from: (f32, f32),
    to: (f32, f32),
    radius: f32,
    mut apply: impl FnMut(u32, u32),
) {
    if radius <= 0.0 {
        return;
    }
    let min_x = (from.0.min(to.0) - radius).floor() as i64;
    let max_x = (from.0.max(to.0) + radius).ceil() as i64;
    let min_y = (from.1.min(to.1) - radius).floor() as i64;
    let max_y = (from.1.max(to.1) + radius).ceil() as i64;

    let min_x = min_x.max(0);
    let min_y = min_y.max(0);
    let max_x = max_x.min(i64::from(width) - 1);
    let max_y = max_y.min(i64::from(height) - 1);
    if min_x > max_x || min_y > max_y {
        return;
    }

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let center = (x as f32 + 0.5, y as f32 + 0.5);
            if distance_to_segment(center, from, to) <= radius {
                apply(x as u32, y as u32);
            }
        }
    }
}

fn distance_to_segment(point: (f32, f32), from: (f32, f32), to: (f32, f32)) -> f32 {
    let (px, py) = (point.0 - from.0, point.1 - from.1);
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        ((px * dx + py * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (from.0 + t * dx - point.0, from.1 + t * dy - point.1);
    (cx * cx + cy * cy).sqrt()
}

/// Source-over blend of `color` at `opacity` onto `pixel`.
fn blend_over(pixel: &mut Rgba<u8>, color: [u8; 4], opacity: f32) {
    let src_a = opacity.clamp(0.0, 1.0);
    let dst_a = f32::from(pixel[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        *pixel = Rgba([0, 0, 0, 0]);
        return;
    }
    for channel in 0..3 {
        let src = f32::from(color[channel]);
        let dst = f32::from(pixel[channel]);
        let blended = (src * src_a + dst * dst_a * (1.0 - src_a)) / out_a;
        pixel[channel] = blended.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_empty_until_a_stroke_lands() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        assert!(painter.is_mask_empty());

        painter.begin_stroke((100.0, 100.0));
        painter.end_stroke();
        assert!(!painter.is_mask_empty());
        Ok(())
    }

    #[test]
    fn reset_restores_the_ready_state() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.begin_stroke((50.0, 50.0));
        painter.continue_stroke((80.0, 90.0));
        painter.end_stroke();
        painter.set_instruction(BrushColor::Red, "add steam");
        assert!(!painter.is_mask_empty());

        painter.reset();
        assert!(painter.is_mask_empty());
        assert_eq!(painter.regions().painted_colors().count(), 0);
        assert_eq!(painter.regions().combined(), "");
        Ok(())
    }

    #[test]
    fn stroke_coordinates_scale_to_the_mask_resolution() -> Result<()> {
        // Display is half the mask resolution: (100, 100) -> (200, 200).
        let mut painter = MaskPainter::new(512, 512)?;
        painter.begin_stroke((100.0, 100.0));
        painter.end_stroke();

        let mask = image::load_from_memory(&painter.export_mask()?)?.to_luma8();
        assert_eq!(mask.get_pixel(200, 200)[0], 255);
        // Far corner stays untouched.
        assert_eq!(mask.get_pixel(900, 900)[0], 0);
        Ok(())
    }

    #[test]
    fn brush_width_scales_with_the_display_ratio() -> Result<()> {
        // Display twice the mask resolution: a 20px brush maps to 10px.
        let mut painter = MaskPainter::new(2048, 2048)?;
        painter.begin_stroke((1000.0, 1000.0));
        painter.end_stroke();

        let mask = image::load_from_memory(&painter.export_mask()?)?.to_luma8();
        assert_eq!(mask.get_pixel(500, 500)[0], 255);
        // 10px diameter at (500,500): 8px away is outside the cap.
        assert_eq!(mask.get_pixel(508, 500)[0], 0);
        Ok(())
    }

    #[test]
    fn segments_connect_consecutive_points() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.begin_stroke((100.0, 100.0));
        painter.continue_stroke((300.0, 100.0));
        painter.end_stroke();

        let mask = image::load_from_memory(&painter.export_mask()?)?.to_luma8();
        // Midpoint of the segment is covered, not just the endpoints.
        assert_eq!(mask.get_pixel(200, 100)[0], 255);
        Ok(())
    }

    #[test]
    fn continue_without_begin_is_a_no_op() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.continue_stroke((100.0, 100.0));
        assert!(painter.is_mask_empty());

        painter.end_stroke();
        painter.end_stroke();
        assert!(painter.is_mask_empty());
        Ok(())
    }

    #[test]
    fn painting_registers_the_brush_color_once() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.set_brush_color(BrushColor::Blue);
        painter.begin_stroke((10.0, 10.0));
        painter.end_stroke();
        painter.begin_stroke((30.0, 30.0));
        painter.end_stroke();

        let painted: Vec<_> = painter.regions().painted_colors().collect();
        assert_eq!(painted, vec![BrushColor::Blue]);
        Ok(())
    }

    #[test]
    fn strokes_off_the_canvas_edge_are_clipped() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.begin_stroke((-50.0, -50.0));
        painter.continue_stroke((5.0, 5.0));
        painter.end_stroke();
        // The in-bounds tail of the stroke landed; nothing panicked.
        assert!(!painter.is_mask_empty());
        Ok(())
    }

    #[test]
    fn paint_surface_shows_partial_opacity_feedback() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.begin_stroke((100.0, 100.0));
        painter.end_stroke();

        let pixel = painter.paint_surface().get_pixel(100, 100);
        assert!(pixel[3] > 0);
        assert!(pixel[3] < 255);
        Ok(())
    }

    #[test]
    fn exported_mask_is_white_on_black() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.begin_stroke((512.0, 512.0));
        painter.end_stroke();

        let decoded = image::load_from_memory(&painter.export_mask()?)?.to_rgba8();
        assert_eq!((decoded.width(), decoded.height()), (1024, 1024));
        assert_eq!(decoded.get_pixel(512, 512), &Rgba([255, 255, 255, 255]));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        Ok(())
    }

    #[test]
    fn brush_size_is_clamped_to_slider_bounds() -> Result<()> {
        let mut painter = MaskPainter::new(1024, 1024)?;
        painter.set_brush_size(1.0);
        assert_eq!(painter.brush_size(), MIN_BRUSH_SIZE);
        painter.set_brush_size(500.0);
        assert_eq!(painter.brush_size(), MAX_BRUSH_SIZE);
        Ok(())
    }
}
