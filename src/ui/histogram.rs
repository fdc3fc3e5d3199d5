//! Widget-ready histogram data: one normalized polyline per channel plus the
//! marker and tooltip text drawn alongside it.

use crate::{
    app::types::HistogramScale,
    stats::{CanvasStatistics, NUM_BINS},
};

pub const HISTOGRAM_TOOLTIP_BASE: &str =
    "Histogram of color values. Adapts to the currently chosen channel group and error metric.";

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramCurve {
    pub color: [f32; 4],
    /// `(x, y)` in `[0, 1]²`, x along the bins, y up.
    pub points: Vec<[f32; 2]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramView {
    pub curves: Vec<HistogramCurve>,
    /// Horizontal position of the bin holding 0.
    pub zero: f32,
    pub minimum: f32,
    pub mean: f32,
    pub maximum: f32,
    pub tooltip: String,
}

impl HistogramView {
    /// Flat single-channel placeholder shown while nothing is loaded.
    pub fn empty(scale: HistogramScale) -> Self {
        Self {
            curves: vec![HistogramCurve {
                color: [1.0; 4],
                points: vec![[0.0, 0.0], [1.0, 0.0]],
            }],
            zero: 0.0,
            minimum: 0.0,
            mean: 0.0,
            maximum: 0.0,
            tooltip: format!("{HISTOGRAM_TOOLTIP_BASE}\n\nScale: {}", scale.label()),
        }
    }

    pub fn from_statistics(statistics: &CanvasStatistics, scale: HistogramScale) -> Self {
        if statistics.histogram_channels == 0 {
            return Self::empty(scale);
        }
        let step = 1.0 / (NUM_BINS - 1) as f32;
        let curves = (0..statistics.histogram_channels)
            .map(|c| HistogramCurve {
                color: statistics.histogram_colors.get(c).copied().unwrap_or([1.0; 4]),
                points: (0..NUM_BINS)
                    .map(|bin| [bin as f32 * step, statistics.bin(bin, c).clamp(0.0, 1.0)])
                    .collect(),
            })
            .collect();

        Self {
            curves,
            zero: statistics.histogram_zero as f32 * step,
            minimum: statistics.minimum,
            mean: statistics.mean,
            maximum: statistics.maximum,
            tooltip: format!(
                "{HISTOGRAM_TOOLTIP_BASE}\n\nScale: {}\n\nMinimum: {:.6}\nMean: {:.6}\nMaximum: {:.6}",
                scale.label(),
                statistics.minimum,
                statistics.mean,
                statistics.maximum
            ),
        }
    }
}
