use image::{Rgba, RgbaImage};

use crate::detect::{BoundingBox, Detection};
use crate::overlay::glyphs::{glyph_pixel, GLYPH_HEIGHT, GLYPH_WIDTH};

pub const CORNER_RADIUS: f32 = 8.0;
pub const STROKE_WIDTH: f32 = 2.0;
pub const PILL_HEIGHT: f32 = 28.0;
/// Horizontal padding added to the label text width (9 px each side).
pub const PILL_PADDING: f32 = 18.0;
const TEXT_SCALE: u32 = 2;
const GLYPH_ADVANCE: u32 = (GLYPH_WIDTH + 1) * TEXT_SCALE;

const STROKE_COLOR: [u8; 3] = [75, 85, 99];
const STROKE_ALPHA: f32 = 0.95;
const PILL_COLOR: [u8; 3] = [255, 255, 255];
const PILL_ALPHA: f32 = 0.9;
const TEXT_COLOR: [u8; 3] = [0x11, 0x18, 0x27];

/// Width in pixels of `text` drawn with the label font.
pub fn label_width(text: &str) -> f32 {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return 0.0;
    }
    (chars * GLYPH_ADVANCE - TEXT_SCALE) as f32
}

/// Draws detections onto a transparent RGBA surface sized to the frame.
///
/// Each call starts from a cleared surface, so the result depends only on
/// the frame size and the detections. Detections are drawn in order; later
/// pills may cover earlier ones.
pub struct OverlayRenderer {
    surface: RgbaImage,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
        }
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn render(&mut self, width: u32, height: u32, detections: &[Detection]) {
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbaImage::new(width, height);
        } else {
            self.clear();
        }
        for det in detections {
            stroke_rounded_rect(&mut self.surface, &det.bbox);
            draw_label_pill(&mut self.surface, &det.bbox, &det.label());
        }
    }

    /// Erase everything drawn so far, keeping the size.
    pub fn clear(&mut self) {
        for pixel in self.surface.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }
}

fn stroke_rounded_rect(surface: &mut RgbaImage, bbox: &BoundingBox) {
    if !(bbox.w > 0.0 && bbox.h > 0.0 && bbox.x.is_finite() && bbox.y.is_finite()) {
        return;
    }
    let radius = CORNER_RADIUS.min(bbox.w / 2.0).min(bbox.h / 2.0);
    let half_stroke = STROKE_WIDTH / 2.0;
    let (x0, x1) = clip_to(
        pixel_span(bbox.x - half_stroke - 1.0, bbox.x + bbox.w + half_stroke + 1.0),
        surface.width(),
    );
    let (y0, y1) = clip_to(
        pixel_span(bbox.y - half_stroke - 1.0, bbox.y + bbox.h + half_stroke + 1.0),
        surface.height(),
    );

    for py in y0..y1 {
        for px in x0..x1 {
            let d = rounded_rect_distance(px as f32 + 0.5, py as f32 + 0.5, bbox, radius);
            let coverage = (half_stroke + 0.5 - d.abs()).clamp(0.0, 1.0);
            if coverage > 0.0 {
                blend_at(surface, px, py, STROKE_COLOR, STROKE_ALPHA * coverage);
            }
        }
    }
}

/// Signed distance from a point to the outline of a rounded rectangle.
fn rounded_rect_distance(px: f32, py: f32, bbox: &BoundingBox, radius: f32) -> f32 {
    let cx = bbox.x + bbox.w / 2.0;
    let cy = bbox.y + bbox.h / 2.0;
    let qx = (px - cx).abs() - (bbox.w / 2.0 - radius);
    let qy = (py - cy).abs() - (bbox.h / 2.0 - radius);
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    outside + qx.max(qy).min(0.0) - radius
}

fn draw_label_pill(surface: &mut RgbaImage, bbox: &BoundingBox, label: &str) {
    // Clamped to the top edge when the box is near it.
    let top = (bbox.y - PILL_HEIGHT).max(0.0);
    let text_w = label_width(label);
    fill_rect(
        surface,
        bbox.x,
        top,
        text_w + PILL_PADDING,
        PILL_HEIGHT,
        PILL_COLOR,
        PILL_ALPHA,
    );
    let text_h = (GLYPH_HEIGHT * TEXT_SCALE) as f32;
    draw_text(
        surface,
        bbox.x + PILL_PADDING / 2.0,
        top + (PILL_HEIGHT - text_h) / 2.0,
        label,
    );
}

fn fill_rect(
    surface: &mut RgbaImage,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    color: [u8; 3],
    alpha: f32,
) {
    let (x0, x1) = clip_to(pixel_centers_within(x, x + w), surface.width());
    let (y0, y1) = clip_to(pixel_centers_within(y, y + h), surface.height());
    for py in y0..y1 {
        for px in x0..x1 {
            blend_at(surface, px, py, color, alpha);
        }
    }
}

fn draw_text(surface: &mut RgbaImage, left: f32, top: f32, text: &str) {
    let ox = left.round() as i64;
    let oy = top.round() as i64;
    for (i, ch) in text.chars().enumerate() {
        let gx = ox + (i as u32 * GLYPH_ADVANCE) as i64;
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !glyph_pixel(ch, col, row) {
                    continue;
                }
                for dy in 0..TEXT_SCALE {
                    for dx in 0..TEXT_SCALE {
                        blend_at(
                            surface,
                            gx + (col * TEXT_SCALE + dx) as i64,
                            oy + (row * TEXT_SCALE + dy) as i64,
                            TEXT_COLOR,
                            1.0,
                        );
                    }
                }
            }
        }
    }
}

/// Whole pixels touched by `[start, end)`.
fn pixel_span(start: f32, end: f32) -> (i64, i64) {
    (start.floor() as i64, end.ceil() as i64)
}

/// Pixels whose centres fall in `[start, end)`.
fn pixel_centers_within(start: f32, end: f32) -> (i64, i64) {
    ((start - 0.5).ceil() as i64, (end - 0.5).ceil() as i64)
}

/// Restrict a pixel range to `0..limit`.
fn clip_to((start, end): (i64, i64), limit: u32) -> (i64, i64) {
    (start.max(0), end.min(limit as i64))
}

/// Source-over composite of a straight-alpha colour onto one pixel.
fn blend_at(surface: &mut RgbaImage, x: i64, y: i64, color: [u8; 3], alpha: f32) {
    if x < 0 || y < 0 || x >= surface.width() as i64 || y >= surface.height() as i64 {
        return;
    }
    let src_a = alpha.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return;
    }
    let pixel = surface.get_pixel_mut(x as u32, y as u32);
    let dst_a = pixel[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    for c in 0..3 {
        let value =
            (color[c] as f32 * src_a + pixel[c] as f32 * dst_a * (1.0 - src_a)) / out_a;
        pixel[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Detection {
        Detection::new("person", 0.9, [20.0, 40.0, 100.0, 60.0])
    }

    fn is_transparent(surface: &RgbaImage) -> bool {
        surface.pixels().all(|p| p[3] == 0)
    }

    #[test]
    fn surface_follows_frame_size() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(320, 240, &[]);
        assert_eq!(renderer.surface().dimensions(), (320, 240));
        renderer.render(64, 48, &[]);
        assert_eq!(renderer.surface().dimensions(), (64, 48));
        assert!(is_transparent(renderer.surface()));
    }

    #[test]
    fn rendering_is_deterministic() {
        let detections = vec![
            person(),
            Detection::new("cat", 0.51, [150.5, 10.25, 40.0, 33.3]),
            Detection::new("dog", 0.77, [130.0, 60.0, 80.0, 70.0]),
        ];
        let mut first = OverlayRenderer::new();
        first.render(240, 160, &detections);

        let mut second = OverlayRenderer::new();
        second.render(240, 160, &[Detection::new("bus", 0.3, [0.0, 0.0, 240.0, 160.0])]);
        second.render(240, 160, &detections);

        assert_eq!(first.surface().as_raw(), second.surface().as_raw());
        assert!(!is_transparent(first.surface()));
    }

    #[test]
    fn each_render_clears_prior_content() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(200, 120, &[person()]);
        assert!(!is_transparent(renderer.surface()));
        renderer.render(200, 120, &[]);
        assert!(is_transparent(renderer.surface()));
    }

    #[test]
    fn outline_uses_the_stroke_colour() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(200, 120, &[person()]);
        // Middle of the bottom edge, away from the label pill.
        let px = renderer.surface().get_pixel(70, 99);
        assert_eq!(&px.0[..3], &STROKE_COLOR);
        assert_eq!(px[3], 242);
        // Box interior stays transparent.
        assert_eq!(renderer.surface().get_pixel(70, 70)[3], 0);
    }

    #[test]
    fn corners_are_rounded() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(200, 120, &[person()]);
        // The square corner pixel lies outside the arc.
        assert_eq!(renderer.surface().get_pixel(20, 99)[3], 0);
    }

    #[test]
    fn label_pill_sits_above_the_box() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(200, 120, &[person()]);
        let width = label_width("person 90%") + PILL_PADDING;
        assert_eq!(width, 136.0);

        let pill = renderer.surface().get_pixel(21, 13);
        assert_eq!(&pill.0[..3], &PILL_COLOR);
        assert!((229..=230).contains(&pill[3]));
        // Right of the pill: untouched.
        assert_eq!(renderer.surface().get_pixel(20 + 137, 13)[3], 0);
        // Above the pill: untouched.
        assert_eq!(renderer.surface().get_pixel(21, 11)[3], 0);
    }

    #[test]
    fn label_pill_clamps_to_the_top_edge() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(200, 120, &[Detection::new("cup", 0.5, [30.0, 5.0, 40.0, 40.0])]);
        let pill = renderer.surface().get_pixel(32, 0);
        assert!(pill[3] > 0);
        assert_eq!(renderer.surface().get_pixel(32, 28)[3], 0);
    }

    #[test]
    fn label_text_is_drawn_inside_the_pill() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(200, 120, &[person()]);
        let text_pixels = renderer
            .surface()
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] == TEXT_COLOR[0] && p[1] == TEXT_COLOR[1] && p[3] == 255)
            .collect::<Vec<_>>();
        assert!(!text_pixels.is_empty());
        assert!(text_pixels
            .iter()
            .all(|(x, y, _)| *x >= 29 && *x < 20 + 136 && *y >= 12 && *y < 40));
    }

    #[test]
    fn oversized_boxes_cost_no_more_than_the_surface() {
        let mut renderer = OverlayRenderer::new();
        let started = std::time::Instant::now();
        renderer.render(
            64,
            48,
            &[Detection::new("bus", 0.8, [0.0, 30.0, 1e7, 1e7])],
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        let surface = renderer.surface();
        // Left edge is on screen; the interior and far edges are not.
        assert_eq!(surface.get_pixel(0, 40).0, [75, 85, 99, 242]);
        assert_eq!(surface.get_pixel(63, 40)[3], 0);
        assert_eq!(clip_to(pixel_span(-3.0, 1e7), 64), (0, 64));
    }

    #[test]
    fn degenerate_boxes_draw_only_the_label() {
        let mut renderer = OverlayRenderer::new();
        renderer.render(100, 100, &[Detection::new("x", 0.5, [50.0, 50.0, 0.0, 10.0])]);
        assert_eq!(renderer.surface().get_pixel(50, 55)[3], 0);
        assert!(renderer.surface().get_pixel(51, 30)[3] > 0);
    }
}
