//! The image canvas: owns what is shown and how, turns that state into one
//! draw command per frame and answers value queries at screen positions.

use std::{path::Path, sync::Arc};

use anyhow::{Result, bail};
use glam::{IVec2, Vec2};
use rayon::ThreadPool;

use crate::{
    app::{
        transform::TransformEngine,
        types::{CanvasModifiers, HistogramScale, Metric, Tonemap, TonemapSettings},
    },
    color::linear_to_srgb_u8,
    config::ViewerSettings,
    export::{self, quantize},
    raster::{Box2i, Channel, Image, channel_color, is_alpha_channel},
    renderer::uber_shader::{UberUniforms, pack_mat3},
    stats::{CanvasStatistics, ComparisonContext, Lazy, StatisticsCache, channels_from_images},
};

/// Pixel value labels are drawn while one image pixel covers this many
/// screen units or more.
pub const LABEL_MIN_PIXEL_SIZE: f32 = 50.0;
pub const LABEL_MAX_PIXEL_SIZE: f32 = 1024.0;

/// What the renderer should draw this frame. Textures are built from
/// `group` of each image.
#[derive(Clone, Debug)]
pub enum DrawCommand {
    Checkerboard {
        uniforms: UberUniforms,
    },
    Image {
        image: Arc<Image>,
        group: String,
        uniforms: UberUniforms,
    },
    Comparison {
        image: Arc<Image>,
        reference: Arc<Image>,
        group: String,
        uniforms: UberUniforms,
    },
}

impl DrawCommand {
    pub fn uniforms(&self) -> &UberUniforms {
        match self {
            Self::Checkerboard { uniforms } | Self::Image { uniforms, .. } | Self::Comparison { uniforms, .. } => {
                uniforms
            }
        }
    }
}

/// Text drawn over one channel of one pixel at high zoom.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelValueLabel {
    pub pixel: IVec2,
    /// Canvas-local screen position of the label center.
    pub position: Vec2,
    pub text: String,
    pub color: [f32; 4],
}

pub struct Canvas {
    transform: TransformEngine,
    image: Option<Arc<Image>>,
    reference: Option<Arc<Image>>,
    requested_group: String,
    settings: TonemapSettings,
    tonemap: Tonemap,
    metric: Metric,
    histogram_scale: HistogramScale,
    clamp_to_ldr: bool,
    checker_size: f32,
    background: [f32; 4],
    crop: Option<Box2i>,
    crop_drag_start: Option<IVec2>,
    statistics: StatisticsCache,
}

impl Canvas {
    pub fn new(canvas_size: Vec2, pool: Arc<ThreadPool>) -> Self {
        Self::from_settings(canvas_size, &ViewerSettings::default(), pool)
    }

    pub fn from_settings(canvas_size: Vec2, settings: &ViewerSettings, pool: Arc<ThreadPool>) -> Self {
        Self {
            transform: TransformEngine::new(canvas_size, settings.pixel_ratio),
            image: None,
            reference: None,
            requested_group: String::new(),
            settings: settings.default_tonemap,
            tonemap: settings.tonemap,
            metric: settings.metric,
            histogram_scale: settings.histogram_scale,
            clamp_to_ldr: settings.clamp_to_ldr,
            checker_size: settings.checker_size,
            background: settings.background,
            crop: None,
            crop_drag_start: None,
            statistics: StatisticsCache::new(pool),
        }
    }

    pub fn transform(&self) -> &TransformEngine {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut TransformEngine {
        &mut self.transform
    }

    pub fn scale(&self) -> f32 {
        self.transform.scale()
    }

    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: Option<Arc<Image>>) {
        self.image = image;
    }

    pub fn reference(&self) -> Option<&Arc<Image>> {
        self.reference.as_ref()
    }

    pub fn set_reference(&mut self, reference: Option<Arc<Image>>) {
        self.reference = reference;
    }

    pub fn requested_group(&self) -> &str {
        &self.requested_group
    }

    pub fn set_requested_group(&mut self, group: impl Into<String>) {
        self.requested_group = group.into();
    }

    /// The requested group if the current image has it, else its first group.
    pub fn resolved_group(&self) -> String {
        let Some(image) = &self.image else {
            return String::new();
        };
        if image.group(&self.requested_group).is_some() {
            return self.requested_group.clone();
        }
        image
            .groups()
            .first()
            .map(|g| g.name.clone())
            .unwrap_or_default()
    }

    pub fn tonemap_settings(&self) -> TonemapSettings {
        self.settings
    }

    pub fn set_tonemap_settings(&mut self, settings: TonemapSettings) {
        self.settings = settings;
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.settings.exposure = exposure;
    }

    pub fn set_offset(&mut self, offset: f32) {
        self.settings.offset = offset;
    }

    pub fn set_gamma(&mut self, gamma: f32) {
        self.settings.gamma = gamma;
    }

    pub fn tonemap(&self) -> Tonemap {
        self.tonemap
    }

    pub fn set_tonemap(&mut self, tonemap: Tonemap) {
        self.tonemap = tonemap;
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn set_metric(&mut self, metric: Metric) {
        self.metric = metric;
    }

    pub fn histogram_scale(&self) -> HistogramScale {
        self.histogram_scale
    }

    pub fn set_histogram_scale(&mut self, scale: HistogramScale) {
        self.histogram_scale = scale;
    }

    pub fn clamp_to_ldr(&self) -> bool {
        self.clamp_to_ldr
    }

    pub fn set_clamp_to_ldr(&mut self, clamp: bool) {
        self.clamp_to_ldr = clamp;
    }

    pub fn set_background(&mut self, background: [f32; 4]) {
        self.background = background;
    }

    /// The reference the current image is compared against. An image set as
    /// its own reference is shown alone.
    pub fn comparison_reference(&self) -> Option<&Arc<Image>> {
        let image = self.image.as_ref()?;
        self.reference.as_ref().filter(|r| !Arc::ptr_eq(*r, image))
    }

    /// Primary and reference image as shown with `modifiers` held.
    fn displayed(&self, modifiers: CanvasModifiers) -> Option<(Arc<Image>, Option<Arc<Image>>)> {
        let image = self.image.as_ref()?;
        if let (true, Some(reference)) = (modifiers.compare, &self.reference) {
            return Some((Arc::clone(reference), None));
        }
        let reference = self.comparison_reference().filter(|_| !modifiers.raw).map(Arc::clone);
        Some((Arc::clone(image), reference))
    }

    fn uniforms(&self, image: Option<&Image>, reference: Option<&Image>) -> UberUniforms {
        let pixel_size = 2.0 / self.transform.canvas_size();
        let mut uniforms = UberUniforms {
            bg_color: self.background,
            pixel_size: pixel_size.to_array(),
            checker_size: [self.checker_size; 2],
            exposure: self.settings.exposure,
            offset: self.settings.offset,
            gamma: self.settings.gamma,
            tonemap: self.tonemap.shader_code(),
            metric: self.metric.shader_code(),
            clamp_to_ldr: u32::from(self.clamp_to_ldr),
            ..Default::default()
        };
        if let Some(image) = image {
            uniforms.has_image = 1;
            uniforms.image_transform = pack_mat3(self.transform.ndc_to_image(image.size()));
        }
        if let Some(reference) = reference {
            uniforms.has_reference = 1;
            uniforms.reference_transform = pack_mat3(self.transform.ndc_to_image(reference.size()));
        }
        uniforms
    }

    pub fn draw(&self, modifiers: CanvasModifiers) -> DrawCommand {
        let Some((image, reference)) = self.displayed(modifiers) else {
            return DrawCommand::Checkerboard {
                uniforms: self.uniforms(None, None),
            };
        };
        let group = self.resolved_group();
        match reference {
            None => DrawCommand::Image {
                uniforms: self.uniforms(Some(&*image), None),
                image,
                group,
            },
            Some(reference) => DrawCommand::Comparison {
                uniforms: self.uniforms(Some(&*image), Some(&*reference)),
                image,
                reference,
                group,
            },
        }
    }

    /// Image pixel under a canvas-local screen position.
    pub fn pixel_at(&self, screen_pos: Vec2) -> Option<IVec2> {
        let image = self.image.as_ref()?;
        Some(self.transform.image_coords(image.size(), screen_pos))
    }

    /// Displayed values of `channels` at a canvas-local screen position:
    /// raw values without a reference, metric values against it otherwise.
    /// Empty when no image is loaded or the position is outside the image.
    pub fn values_at_screen_pos(&self, screen_pos: Vec2, channels: &[String]) -> Result<Vec<f32>> {
        let Some(image) = &self.image else {
            return Ok(Vec::new());
        };
        let pixel = self.transform.image_coords(image.size(), screen_pos);
        if !Box2i::new(IVec2::ZERO, image.size()).contains(pixel) {
            return Ok(Vec::new());
        }
        let reference = self.comparison_reference().map(|r| &**r);
        let context = ComparisonContext::new(image, reference, channels.to_vec(), self.metric)?;
        Ok(context.values_at(pixel))
    }

    pub fn crop(&self) -> Option<Box2i> {
        self.crop
    }

    pub fn set_crop(&mut self, crop: Option<Box2i>) {
        self.crop = crop.map(Box2i::sanitized);
    }

    /// The crop clipped to the current image, or the whole image when there
    /// is no usable crop.
    pub fn effective_region(&self) -> Box2i {
        let bounds = Box2i::new(IVec2::ZERO, self.image.as_ref().map_or(IVec2::ZERO, |i| i.size()));
        match self.crop.map(|c| c.intersect(&bounds)) {
            Some(region) if region.is_valid() => region,
            _ => bounds,
        }
    }

    pub fn begin_crop_drag(&mut self, screen_pos: Vec2) {
        self.crop_drag_start = self.pixel_at(screen_pos);
    }

    /// Crop spans the drag start and the pixel under `screen_pos`, both included.
    pub fn update_crop_drag(&mut self, screen_pos: Vec2) {
        let (Some(start), Some(current), Some(image)) =
            (self.crop_drag_start, self.pixel_at(screen_pos), self.image.as_ref())
        else {
            return;
        };
        let bounds = Box2i::new(IVec2::ZERO, image.size());
        let crop = Box2i::new(start.min(current), start.max(current) + IVec2::ONE).intersect(&bounds);
        self.crop = Some(crop);
    }

    /// Ends a drag; a crop that ended up empty is removed.
    pub fn end_crop_drag(&mut self) {
        self.crop_drag_start = None;
        if self.crop.is_some_and(|c| !c.is_valid()) {
            self.crop = None;
        }
    }

    pub fn is_dragging_crop(&self) -> bool {
        self.crop_drag_start.is_some()
    }

    /// Per-channel value labels for the pixels on screen, empty unless the
    /// zoom makes one image pixel large enough to hold them.
    pub fn pixel_value_labels(&self, modifiers: CanvasModifiers) -> Result<Vec<PixelValueLabel>> {
        let pixel_screen = self.transform.pixel_screen_size();
        if !(LABEL_MIN_PIXEL_SIZE..=LABEL_MAX_PIXEL_SIZE).contains(&pixel_screen) {
            return Ok(Vec::new());
        }
        let Some((image, reference)) = self.displayed(modifiers) else {
            return Ok(Vec::new());
        };
        let names = image.channels_in_group(&self.resolved_group());
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let context = ComparisonContext::new(&image, reference.as_deref(), names.clone(), self.metric)?;

        let size = image.size();
        let a = self.transform.image_coords(size, Vec2::ZERO);
        let b = self.transform.image_coords(size, self.transform.canvas_size());
        let first = a.min(b).max(IVec2::ZERO);
        let last = a.max(b).min(size - IVec2::ONE);

        let texel_to_screen = self.transform.texel_to_screen(size);
        let line = pixel_screen / (names.len() as f32 + 1.0);
        let mut labels = Vec::new();
        for y in first.y..=last.y {
            for x in first.x..=last.x {
                let pixel = IVec2::new(x, y);
                let center = texel_to_screen.transform_point2(pixel.as_vec2() + Vec2::splat(0.5));
                for (ci, name) in names.iter().enumerate() {
                    let value = context.value_at(ci, pixel);
                    let text = match (modifiers.alt, is_alpha_channel(name)) {
                        (true, true) => format!("{:03}", quantize(value)),
                        (true, false) => format!("{:03}", linear_to_srgb_u8(value)),
                        (false, _) => format!("{value:.4}"),
                    };
                    let row = ci as f32 - (names.len() as f32 - 1.0) * 0.5;
                    labels.push(PixelValueLabel {
                        pixel,
                        position: center + Vec2::new(0.0, row * line),
                        text,
                        color: channel_color(name),
                    });
                }
            }
        }
        Ok(labels)
    }

    /// Flattened channels of the current group, cut to the effective region.
    fn flattened(&self) -> Result<Vec<Channel>> {
        let Some(image) = &self.image else {
            bail!("no image loaded");
        };
        let reference = self.comparison_reference().map(|r| &**r);
        let channels = channels_from_images(image, reference, &self.resolved_group(), self.metric)?;
        let region = self.effective_region();
        if region == Box2i::new(IVec2::ZERO, image.size()) {
            return Ok(channels);
        }
        Ok(channels.iter().map(|c| c.cropped(region)).collect())
    }

    /// Size of the buffers returned by the export entry points.
    pub fn export_size(&self) -> IVec2 {
        self.effective_region().size()
    }

    pub fn hdr_image_data(&self, divide_alpha: bool) -> Result<Vec<f32>> {
        Ok(export::hdr_image_data(&self.flattened()?, divide_alpha))
    }

    pub fn ldr_image_data(&self, divide_alpha: bool) -> Result<Vec<u8>> {
        let hdr = self.hdr_image_data(divide_alpha)?;
        Ok(export::ldr_from_hdr(&hdr, self.settings, self.tonemap))
    }

    pub fn save_image(&self, path: &Path) -> Result<()> {
        export::save_image(path, &self.flattened()?, self.settings, self.tonemap)
    }

    /// Statistics for the current image, reference and group, scheduled on
    /// the worker pool when not cached. `None` without an image.
    pub fn canvas_statistics(&mut self) -> Result<Option<Arc<Lazy<CanvasStatistics>>>> {
        let Some(image) = self.image.clone() else {
            return Ok(None);
        };
        let group = self.resolved_group();
        let reference = self.comparison_reference().cloned();
        let statistics = self.statistics.get_or_request(
            &image,
            reference.as_ref(),
            &group,
            self.metric,
            self.histogram_scale,
        )?;
        Ok(Some(statistics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{renderer::uber_shader::unpack_mat3, stats::build_worker_pool};

    fn rgb_image(name: &str, size: IVec2, rgb: [f32; 3]) -> Arc<Image> {
        let n = (size.x * size.y) as usize;
        let channels = ["R", "G", "B"]
            .iter()
            .zip(rgb)
            .map(|(c, v)| Channel::from_data(*c, size, vec![v; n]).unwrap())
            .collect();
        Arc::new(Image::new(name, channels).unwrap())
    }

    fn canvas() -> Canvas {
        Canvas::new(Vec2::new(200.0, 100.0), build_worker_pool(Some(1)).unwrap())
    }

    #[test]
    fn draw_without_image_is_checkerboard() {
        let c = canvas();
        let cmd = c.draw(CanvasModifiers::default());
        assert!(matches!(cmd, DrawCommand::Checkerboard { .. }));
        assert_eq!(cmd.uniforms().has_image, 0);
        assert_eq!(cmd.uniforms().pixel_size, [0.01, 0.02]);
    }

    #[test]
    fn draw_picks_primary_by_modifiers() {
        let mut c = canvas();
        let image = rgb_image("a", IVec2::new(4, 4), [1.0; 3]);
        let reference = rgb_image("b", IVec2::new(8, 8), [0.5; 3]);
        c.set_image(Some(Arc::clone(&image)));
        c.set_reference(Some(Arc::clone(&reference)));

        let DrawCommand::Comparison { group, uniforms, .. } = c.draw(CanvasModifiers::default()) else {
            panic!("expected a comparison");
        };
        assert_eq!(group, "RGB");
        assert_eq!(uniforms.has_reference, 1);
        assert_ne!(unpack_mat3(&uniforms.image_transform), unpack_mat3(&uniforms.reference_transform));

        let raw = CanvasModifiers { raw: true, ..Default::default() };
        assert!(matches!(c.draw(raw), DrawCommand::Image { image: i, .. } if Arc::ptr_eq(&i, &image)));

        let compare = CanvasModifiers { compare: true, ..Default::default() };
        assert!(matches!(c.draw(compare), DrawCommand::Image { image: i, .. } if Arc::ptr_eq(&i, &reference)));
    }

    #[test]
    fn comparing_an_image_with_itself_draws_it_alone() {
        let mut c = canvas();
        let image = rgb_image("a", IVec2::new(4, 4), [1.0; 3]);
        c.set_image(Some(Arc::clone(&image)));
        c.set_reference(Some(image));
        assert!(matches!(c.draw(CanvasModifiers::default()), DrawCommand::Image { .. }));
    }

    #[test]
    fn values_outside_image_are_empty() {
        let mut c = canvas();
        let names = vec!["R".to_string()];
        assert!(c.values_at_screen_pos(Vec2::new(100.0, 50.0), &names).unwrap().is_empty());

        c.set_image(Some(rgb_image("a", IVec2::new(4, 4), [0.25, 0.5, 1.0])));
        assert_eq!(c.values_at_screen_pos(Vec2::new(100.0, 50.0), &names).unwrap(), vec![0.25]);
        assert!(c.values_at_screen_pos(Vec2::new(0.0, 0.0), &names).unwrap().is_empty());
    }

    #[test]
    fn values_apply_metric_against_reference() {
        let mut c = canvas();
        c.set_image(Some(rgb_image("a", IVec2::new(4, 4), [1.0, 1.0, 1.0])));
        c.set_reference(Some(rgb_image("b", IVec2::new(4, 4), [0.5, 1.0, 3.0])));
        c.set_metric(Metric::SquaredError);
        let names: Vec<String> = ["R", "G", "B"].iter().map(|s| s.to_string()).collect();
        assert_eq!(c.values_at_screen_pos(Vec2::new(100.0, 50.0), &names).unwrap(), vec![0.25, 0.0, 4.0]);
    }

    #[test]
    fn crop_is_sanitized_and_limits_export() {
        let mut c = canvas();
        c.set_image(Some(rgb_image("a", IVec2::new(4, 4), [0.5; 3])));
        c.set_crop(Some(Box2i::new(IVec2::new(3, 3), IVec2::new(1, 1))));
        assert_eq!(c.crop(), Some(Box2i::new(IVec2::new(1, 1), IVec2::new(3, 3))));
        assert_eq!(c.export_size(), IVec2::new(2, 2));
        assert_eq!(c.hdr_image_data(false).unwrap().len(), 2 * 2 * 4);

        c.set_crop(None);
        assert_eq!(c.export_size(), IVec2::new(4, 4));
    }

    #[test]
    fn crop_drag_covers_both_corner_pixels() {
        let mut c = canvas();
        c.set_image(Some(rgb_image("a", IVec2::new(10, 10), [0.5; 3])));
        c.transform_mut().fit_to_screen(IVec2::new(10, 10));
        let texel_to_screen = c.transform().texel_to_screen(IVec2::new(10, 10));
        let at = |p: Vec2| texel_to_screen.transform_point2(p + Vec2::splat(0.5));

        c.begin_crop_drag(at(Vec2::new(6.0, 7.0)));
        c.update_crop_drag(at(Vec2::new(2.0, 3.0)));
        c.end_crop_drag();
        assert_eq!(c.crop(), Some(Box2i::new(IVec2::new(2, 3), IVec2::new(7, 8))));
        assert!(!c.is_dragging_crop());
    }

    #[test]
    fn export_without_image_fails() {
        let c = canvas();
        assert!(c.hdr_image_data(true).is_err());
        assert!(c.ldr_image_data(true).is_err());
    }

    #[test]
    fn labels_only_at_high_zoom() {
        let mut c = canvas();
        c.set_image(Some(rgb_image("a", IVec2::new(2, 2), [0.5, 0.25, 1.0])));
        assert!(c.pixel_value_labels(CanvasModifiers::default()).unwrap().is_empty());

        c.transform_mut().scale_by(45.0, Vec2::new(100.0, 50.0));
        assert!(c.transform().pixel_screen_size() >= LABEL_MIN_PIXEL_SIZE);
        let labels = c.pixel_value_labels(CanvasModifiers::default()).unwrap();
        assert!(!labels.is_empty());
        assert_eq!(labels.len() % 3, 0);
        let red = labels.iter().find(|l| l.text == "0.5000").unwrap();
        assert_eq!(red.color, channel_color("R"));

        let alt = c
            .pixel_value_labels(CanvasModifiers { alt: true, ..Default::default() })
            .unwrap();
        assert!(alt.iter().any(|l| l.text == "255"));
    }

    #[test]
    fn statistics_are_requested_for_current_state() {
        let mut c = canvas();
        assert!(c.canvas_statistics().unwrap().is_none());
        c.set_image(Some(rgb_image("a", IVec2::new(4, 4), [1.0, 2.0, 3.0])));
        let stats = c.canvas_statistics().unwrap().unwrap();
        assert_eq!(stats.get().mean, 2.0);
        assert!(stats.is_ready());
    }
}
