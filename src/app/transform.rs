//! Pan/zoom state of the canvas and the matrices derived from it.
//!
//! Coordinate spaces:
//! - texture: `[0, 1]²` over the image, y down.
//! - pixel: image pixels, `[0, size)`.
//! - screen: canvas-local window units, origin at the canvas' top-left.
//! - NDC: `[-1, 1]²`, y up.
//!
//! The user transform lives in a space centered on the canvas, measured in
//! window units.

use glam::{Affine2, IVec2, Mat3, Vec2};

use crate::app::types::ScrollModifier;

/// Zoom factor per scroll step.
pub const ZOOM_BASE: f32 = 1.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformEngine {
    transform: Affine2,
    pixel_ratio: f32,
    canvas_size: Vec2,
    canvas_position: Vec2,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self {
            transform: Affine2::IDENTITY,
            pixel_ratio: 1.0,
            canvas_size: Vec2::ONE,
            canvas_position: Vec2::ZERO,
        }
    }
}

/// Extra translation that keeps pixel centers from landing exactly on screen
/// pixel boundaries.
pub fn pixel_offset(image_size: IVec2) -> Vec2 {
    let x = if image_size.x % 2 == 0 { 0.5 } else { 0.0 };
    let y = if image_size.y % 2 == 0 { -0.5 } else { 0.0 };
    Vec2::new(x, y) + Vec2::splat(0.111_111_1)
}

impl TransformEngine {
    pub fn new(canvas_size: Vec2, pixel_ratio: f32) -> Self {
        Self {
            canvas_size,
            pixel_ratio,
            ..Self::default()
        }
    }

    pub fn transform(&self) -> Affine2 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Affine2) {
        self.transform = transform;
    }

    /// Uniform scale of the current transform.
    pub fn scale(&self) -> f32 {
        self.transform.matrix2.x_axis.x
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    pub fn set_pixel_ratio(&mut self, pixel_ratio: f32) {
        self.pixel_ratio = pixel_ratio;
    }

    pub fn canvas_size(&self) -> Vec2 {
        self.canvas_size
    }

    /// Canvas extent and its top-left corner in window coordinates.
    pub fn set_canvas(&mut self, position: Vec2, size: Vec2) {
        self.canvas_position = position;
        self.canvas_size = size;
    }

    pub fn reset(&mut self) {
        self.transform = Affine2::IDENTITY;
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.transform = Affine2::from_translation(delta) * self.transform;
    }

    /// Zoom by `ZOOM_BASE^amount` about `origin` (window coordinates).
    pub fn scale_by(&mut self, amount: f32, origin: Vec2) {
        let factor = ZOOM_BASE.powf(amount);
        let offset = -(origin - self.canvas_position) + 0.5 * self.canvas_size;
        let about_origin = Affine2::from_translation(-offset)
            * Affine2::from_scale(Vec2::splat(factor))
            * Affine2::from_translation(offset);
        self.transform = about_origin * self.transform;
    }

    /// Scroll input, adjusted by the held modifier, then [`Self::scale_by`].
    pub fn scroll(&mut self, amount: f32, origin: Vec2, modifier: ScrollModifier) {
        let amount = match modifier {
            ScrollModifier::None => amount,
            ScrollModifier::Fine => amount / 10.0,
            ScrollModifier::Logarithmic => amount / ZOOM_BASE.log2(),
        };
        self.scale_by(amount, origin);
    }

    /// Largest uniform scale that shows the whole image; drops translation.
    pub fn fit_to_screen(&mut self, image_size: IVec2) {
        let image_points = image_size.as_vec2() / self.pixel_ratio;
        let fit = self.canvas_size / image_points;
        self.transform = Affine2::from_scale(Vec2::splat(fit.min_element()));
    }

    /// Center `pixel` on the canvas keeping the current scale.
    pub fn focus_pixel(&mut self, pixel: IVec2, image_size: IVec2) {
        let scale = self.scale();
        let offset = image_size.as_vec2() * 0.5 - pixel.as_vec2() - Vec2::splat(0.5);
        self.transform = Affine2::from_translation(offset / self.pixel_ratio * scale)
            * Affine2::from_scale(Vec2::splat(scale));
    }

    /// Texture coordinates of `image_size` to NDC.
    pub fn image_to_ndc(&self, image_size: IVec2) -> Affine2 {
        let size = image_size.as_vec2();
        Affine2::from_scale(Vec2::new(2.0 / self.canvas_size.x, -2.0 / self.canvas_size.y))
            * self.transform
            * Affine2::from_scale(Vec2::splat(1.0 / self.pixel_ratio))
            * Affine2::from_translation(pixel_offset(image_size))
            * Affine2::from_scale(size)
            * Affine2::from_translation(Vec2::splat(-0.5))
    }

    /// Inverse of [`Self::image_to_ndc`] as the shader consumes it.
    pub fn ndc_to_image(&self, image_size: IVec2) -> Mat3 {
        Mat3::from(self.image_to_ndc(image_size).inverse())
    }

    /// Pixel coordinates to canvas-local screen coordinates.
    pub fn texel_to_screen(&self, image_size: IVec2) -> Affine2 {
        Affine2::from_translation(0.5 * self.canvas_size)
            * self.transform
            * Affine2::from_scale(Vec2::splat(1.0 / self.pixel_ratio))
            * Affine2::from_translation(-0.5 * image_size.as_vec2() + pixel_offset(image_size))
    }

    pub fn screen_to_texel(&self, image_size: IVec2) -> Affine2 {
        self.texel_to_screen(image_size).inverse()
    }

    /// Integer pixel under a canvas-local screen position; may lie outside the image.
    pub fn image_coords(&self, image_size: IVec2, screen_pos: Vec2) -> IVec2 {
        self.screen_to_texel(image_size)
            .transform_point2(screen_pos)
            .floor()
            .as_ivec2()
    }

    /// Screen-space size of one image pixel.
    pub fn pixel_screen_size(&self) -> f32 {
        self.scale() / self.pixel_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_vec(a: Vec2, b: Vec2) -> bool {
        (a - b).abs().max_element() < 1e-3
    }

    #[test]
    fn pixel_offset_depends_on_parity() {
        assert!(approx_vec(pixel_offset(IVec2::new(4, 4)), Vec2::new(0.6111111, -0.3888889)));
        assert!(approx_vec(pixel_offset(IVec2::new(3, 3)), Vec2::splat(0.1111111)));
    }

    #[test]
    fn scale_about_canvas_center_keeps_center_fixed() {
        let mut t = TransformEngine::new(Vec2::new(800.0, 600.0), 1.0);
        t.scale_by(3.0, Vec2::new(400.0, 300.0));
        let f = ZOOM_BASE.powi(3);
        assert!((t.scale() - f).abs() < 1e-5);
        assert!(t.transform().translation.length() < 1e-4);
    }

    #[test]
    fn scale_about_origin_keeps_origin_pixel_under_cursor() {
        let mut t = TransformEngine::new(Vec2::new(800.0, 600.0), 1.0);
        let size = IVec2::new(256, 128);
        let cursor = Vec2::new(100.0, 50.0);
        let before = t.screen_to_texel(size).transform_point2(cursor);
        t.scale_by(5.0, cursor);
        let after = t.screen_to_texel(size).transform_point2(cursor);
        assert!(approx_vec(before, after), "{before} vs {after}");
    }

    #[test]
    fn scale_by_zero_is_identity() {
        let mut t = TransformEngine::new(Vec2::new(640.0, 480.0), 2.0);
        t.translate(Vec2::new(3.0, -7.0));
        let before = t.transform();
        t.scale_by(0.0, Vec2::new(10.0, 10.0));
        assert!(t.transform().abs_diff_eq(before, 1e-6));
    }

    #[test]
    fn zoom_steps_compose_logarithmically() {
        let center = Vec2::new(320.0, 240.0);
        let mut twice = TransformEngine::new(Vec2::new(640.0, 480.0), 1.0);
        twice.scale_by(1.0, center);
        twice.scale_by(1.0, center);
        let mut once = TransformEngine::new(Vec2::new(640.0, 480.0), 1.0);
        once.scale_by(2.0, center);
        assert!(twice.transform().abs_diff_eq(once.transform(), 1e-5));
    }

    #[test]
    fn scroll_modifiers_scale_amount() {
        let center = Vec2::new(50.0, 50.0);
        let mut fine = TransformEngine::new(Vec2::splat(100.0), 1.0);
        fine.scroll(10.0, center, ScrollModifier::Fine);
        assert!((fine.scale() - ZOOM_BASE).abs() < 1e-5);

        let mut log = TransformEngine::new(Vec2::splat(100.0), 1.0);
        log.scroll(1.0, center, ScrollModifier::Logarithmic);
        assert!((log.scale() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn fit_to_screen_fits_the_limiting_axis() {
        let mut t = TransformEngine::new(Vec2::new(800.0, 600.0), 1.0);
        t.translate(Vec2::new(20.0, 20.0));
        t.fit_to_screen(IVec2::new(1600, 600));
        assert!((t.scale() - 0.5).abs() < 1e-6);
        assert_eq!(t.transform().translation, Vec2::ZERO);
    }

    #[test]
    fn focus_pixel_centers_pixel() {
        let mut t = TransformEngine::new(Vec2::new(300.0, 200.0), 1.0);
        t.scale_by(4.0, Vec2::new(150.0, 100.0));
        let size = IVec2::new(64, 32);
        t.focus_pixel(IVec2::new(10, 5), size);
        let center = t.texel_to_screen(size).transform_point2(Vec2::new(10.5, 5.5));
        let expected = Vec2::new(150.0, 100.0) + pixel_offset(size) * t.scale();
        assert!(approx_vec(center, expected), "{center} vs {expected}");
    }

    #[test]
    fn image_to_ndc_maps_texture_corners_inside_view_at_fit() {
        let mut t = TransformEngine::new(Vec2::new(200.0, 100.0), 1.0);
        let size = IVec2::new(201, 101);
        t.fit_to_screen(size);
        let m = t.image_to_ndc(size);
        let top_left = m.transform_point2(Vec2::ZERO);
        let bottom_right = m.transform_point2(Vec2::ONE);
        assert!(top_left.x >= -1.01 && top_left.y <= 1.01);
        assert!(bottom_right.x <= 1.01 && bottom_right.y >= -1.01);
        assert!(top_left.y > bottom_right.y);
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_screen_texel_roundtrip(
                w in 1i32..4096,
                h in 1i32..4096,
                zoom in -20.0f32..20.0,
                tx in -500.0f32..500.0,
                ty in -500.0f32..500.0,
                px in 0.0f32..4096.0,
                py in 0.0f32..4096.0,
            ) {
                let mut t = TransformEngine::new(Vec2::new(1280.0, 720.0), 1.5);
                t.translate(Vec2::new(tx, ty));
                t.scale_by(zoom, Vec2::new(300.0, 200.0));
                let size = IVec2::new(w, h);
                let p = Vec2::new(px, py);
                let screen = t.texel_to_screen(size).transform_point2(p);
                let back = t.screen_to_texel(size).transform_point2(screen);
                prop_assert!((back - p).abs().max_element() <= 1e-2 * (1.0 + p.abs().max_element() / 1000.0));
            }

            #[test]
            fn prop_fit_to_screen_contains_image(
                w in 1i32..8192,
                h in 1i32..8192,
                cw in 16.0f32..4096.0,
                ch in 16.0f32..4096.0,
                ratio in 0.5f32..3.0,
            ) {
                let mut t = TransformEngine::new(Vec2::new(cw, ch), ratio);
                t.fit_to_screen(IVec2::new(w, h));
                let shown = IVec2::new(w, h).as_vec2() / ratio * t.scale();
                prop_assert!(shown.x <= cw * 1.0001 && shown.y <= ch * 1.0001);
                let touches = (shown.x - cw).abs() <= cw * 1e-4 || (shown.y - ch).abs() <= ch * 1e-4;
                prop_assert!(touches);
            }
        }
    }
}
