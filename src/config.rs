//! Viewer settings loaded from JSON. Missing fields take their defaults and
//! out-of-range values are replaced on load.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::types::{HistogramScale, Metric, ResizeMode, Tonemap, TonemapSettings};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub tonemap: Tonemap,
    pub metric: Metric,
    pub histogram_scale: HistogramScale,
    /// Tonemap values applied to newly selected and reset images.
    pub default_tonemap: TonemapSettings,
    /// Apply exposure/offset/gamma changes to every image at once.
    pub sync_tonemapping: bool,
    pub clamp_to_ldr: bool,
    pub pixel_ratio: f32,
    /// Checkerboard square size in window units.
    pub checker_size: f32,
    /// Background color blended over the checkerboard by its alpha.
    pub background: [f32; 4],
    pub copy_resize: [f32; 2],
    pub copy_resize_mode: ResizeMode,
    /// Worker threads for statistics; `None` uses one per core.
    pub worker_threads: Option<usize>,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            tonemap: Tonemap::Srgb,
            metric: Metric::Error,
            histogram_scale: HistogramScale::Log,
            default_tonemap: TonemapSettings::default(),
            sync_tonemapping: false,
            clamp_to_ldr: false,
            pixel_ratio: 1.0,
            checker_size: 8.0,
            background: [0.0; 4],
            copy_resize: [1.0, 1.0],
            copy_resize_mode: ResizeMode::Nearest,
            worker_threads: None,
        }
    }
}

impl ViewerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        Ok(settings.sanitize())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn sanitize(mut self) -> Self {
        let defaults = Self::default();
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            warn!("[config] pixel_ratio {} is not positive; using {}", self.pixel_ratio, defaults.pixel_ratio);
            self.pixel_ratio = defaults.pixel_ratio;
        }
        if !(self.checker_size.is_finite() && self.checker_size > 0.0) {
            warn!("[config] checker_size {} is not positive; using {}", self.checker_size, defaults.checker_size);
            self.checker_size = defaults.checker_size;
        }
        if !(self.default_tonemap.gamma.is_finite() && self.default_tonemap.gamma > 0.0) {
            warn!("[config] gamma {} is not positive; using 2.2", self.default_tonemap.gamma);
            self.default_tonemap.gamma = defaults.default_tonemap.gamma;
        }
        if self.copy_resize.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            warn!("[config] copy_resize {:?} must be positive; using 1x1", self.copy_resize);
            self.copy_resize = defaults.copy_resize;
        }
        for c in &mut self.background {
            *c = c.clamp(0.0, 1.0);
        }
        if self.worker_threads == Some(0) {
            self.worker_threads = None;
        }
        self
    }
}
