//! Statistics and histograms of the displayed channels, computed on a worker
//! pool and cached per image version.

pub mod cache;
pub mod flatten;
pub mod lazy;
pub mod pool;

use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    app::types::{HistogramScale, Metric},
    raster::{Channel, Image, channel_color},
    renderer::tonemap::apply_histogram_space,
};

pub use cache::{StatisticsCache, StatisticsKey};
pub use flatten::{ComparisonContext, channels_from_images, check_metric_channels};
pub use lazy::Lazy;
pub use pool::build_worker_pool;

pub const NUM_BINS: usize = 400;

/// Summary of the displayed (flattened) channels of one image/reference pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CanvasStatistics {
    pub mean: f32,
    pub minimum: f32,
    pub maximum: f32,
    /// `NUM_BINS` rows of `histogram_channels` columns, row-major.
    pub histogram: Vec<f32>,
    pub histogram_channels: usize,
    /// Bin containing the value 0.
    pub histogram_zero: usize,
    pub channel_names: Vec<String>,
    pub histogram_colors: Vec<[f32; 4]>,
}

impl CanvasStatistics {
    pub fn bin(&self, bin: usize, channel: usize) -> f32 {
        self.histogram[bin * self.histogram_channels + channel]
    }

    pub fn summary(&self) -> String {
        format!(
            "min: {:.4}  mean: {:.4}  max: {:.4}",
            self.minimum, self.mean, self.maximum
        )
    }
}

/// Maps values to histogram bins in a space that is symmetric around 0, so
/// negative values (signed error) get mirrored log bins.
#[derive(Clone, Copy, Debug)]
pub struct HistogramBinning {
    scale: HistogramScale,
    addition: f32,
    smallest: f32,
    min_val: f32,
    diff_val: f32,
}

impl HistogramBinning {
    pub fn new(minimum: f32, maximum: f32, scale: HistogramScale) -> Self {
        let addition = match scale {
            HistogramScale::Log => 0.001,
            HistogramScale::Linear => 0.0,
        };
        let mut binning = Self {
            scale,
            addition,
            smallest: apply_histogram_space(addition, scale, false),
            min_val: 0.0,
            diff_val: 0.0,
        };
        binning.min_val = binning.symmetric(minimum);
        binning.diff_val = binning.symmetric(maximum) - binning.min_val;
        binning
    }

    fn symmetric(&self, v: f32) -> f32 {
        let space = |x: f32| apply_histogram_space(x, self.scale, false);
        if v > 0.0 {
            space(v + self.addition) - self.smallest
        } else {
            -(space(-v + self.addition) - self.smallest)
        }
    }

    fn symmetric_inverse(&self, v: f32) -> f32 {
        let inverse = |x: f32| apply_histogram_space(x, self.scale, true);
        if v > 0.0 {
            inverse(v + self.smallest) - self.addition
        } else {
            -(inverse(-v + self.smallest) - self.addition)
        }
    }

    pub fn val_to_bin(&self, v: f32) -> usize {
        let bin = (NUM_BINS as f32 * (self.symmetric(v) - self.min_val) / self.diff_val) as i64;
        bin.clamp(0, NUM_BINS as i64 - 1) as usize
    }

    /// Value at the lower edge of (fractional) bin `bin`.
    pub fn bin_to_val(&self, bin: f32) -> f32 {
        self.symmetric_inverse(self.diff_val * bin / NUM_BINS as f32 + self.min_val)
    }

    /// Raw per-bin counts of `values`, weighted by `weights` when present.
    pub fn accumulate(&self, values: &[f32], weights: Option<&[f32]>) -> Vec<f32> {
        let mut bins = vec![0.0; NUM_BINS];
        match weights {
            Some(weights) => {
                for (&v, &w) in values.iter().zip(weights) {
                    bins[self.val_to_bin(v)] += w;
                }
            }
            None => {
                for &v in values {
                    bins[self.val_to_bin(v)] += 1.0;
                }
            }
        }
        bins
    }
}

/// Flatten, then reduce to mean/extrema and a spike-clipped histogram.
///
/// A blended alpha channel does not count as a color channel: it is excluded
/// from mean and extrema and weights the histogram instead.
pub fn compute_canvas_statistics(
    image: &Image,
    reference: Option<&Image>,
    group: &str,
    metric: Metric,
    scale: HistogramScale,
) -> Result<CanvasStatistics> {
    let mut flattened = channels_from_images(image, reference, group, metric)?;

    let only_alpha = flattened.iter().all(Channel::is_alpha);
    let alpha_index = if only_alpha {
        None
    } else {
        flattened.iter().position(Channel::is_alpha)
    };
    if let Some(i) = alpha_index {
        let alpha = flattened.remove(i);
        flattened.push(alpha);
    }
    let n_channels = flattened.len() - usize::from(alpha_index.is_some());
    let (colors, alpha) = flattened.split_at(n_channels);
    let alpha = alpha.first().map(Channel::data);

    if n_channels == 0 {
        return Ok(CanvasStatistics::default());
    }

    let extrema: Vec<(f32, f32, f32)> = colors.par_iter().map(Channel::min_max_mean).collect();
    let mean = extrema.iter().map(|e| e.2).sum::<f32>() / n_channels as f32;
    let minimum = extrema.iter().map(|e| e.0).fold(f32::INFINITY, f32::min);
    let maximum = extrema.iter().map(|e| e.1).fold(f32::NEG_INFINITY, f32::max);

    let binning = HistogramBinning::new(minimum, maximum, scale);
    let columns: Vec<Vec<f32>> = colors
        .par_iter()
        .map(|c| binning.accumulate(c.data(), alpha))
        .collect();

    let mut histogram = vec![0.0; NUM_BINS * n_channels];
    for bin in 0..NUM_BINS {
        let width = binning.bin_to_val((bin + 1) as f32) - binning.bin_to_val(bin as f32);
        let norm = if width.is_finite() && width > 0.0 { 1.0 / width } else { 1.0 };
        for (c, column) in columns.iter().enumerate() {
            histogram[bin * n_channels + c] = column[bin] * norm;
        }
    }

    // Clip to the 10th largest entry so single spikes don't flatten the rest.
    let mut sorted = histogram.clone();
    let idx = sorted.len().saturating_sub(10);
    let (_, &mut tenth_largest, _) = sorted.select_nth_unstable_by(idx, f32::total_cmp);
    let divisor = tenth_largest.max(0.1) * 1.3;
    for v in &mut histogram {
        *v /= divisor;
    }

    Ok(CanvasStatistics {
        mean,
        minimum,
        maximum,
        histogram,
        histogram_channels: n_channels,
        histogram_zero: binning.val_to_bin(0.0),
        channel_names: colors.iter().map(|c| c.name().to_string()).collect(),
        histogram_colors: colors.iter().map(|c| channel_color(c.name())).collect(),
    })
}

#[cfg(test)]
mod tests {
    use glam::IVec2;

    use super::*;

    fn ramp_image(values: &[f32]) -> Image {
        let size = IVec2::new(values.len() as i32, 1);
        Image::new(
            "ramp",
            vec![
                Channel::from_data("R", size, values.to_vec()).unwrap(),
                Channel::from_data("G", size, values.iter().map(|v| v * 0.5).collect()).unwrap(),
                Channel::from_data("B", size, values.iter().map(|v| v * 0.25).collect()).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn extrema_cover_all_color_channels() {
        let image = ramp_image(&[-1.0, 0.0, 2.0, 4.0]);
        let stats = compute_canvas_statistics(&image, None, "RGB", Metric::Error, HistogramScale::Linear).unwrap();
        assert_eq!(stats.minimum, -1.0);
        assert_eq!(stats.maximum, 4.0);
        let expected_mean = (1.25 + 0.625 + 0.3125) / 3.0;
        assert!((stats.mean - expected_mean).abs() < 1e-6);
        assert_eq!(stats.histogram.len(), NUM_BINS * 3);
        assert_eq!(stats.channel_names, vec!["R", "G", "B"]);
    }

    #[test]
    fn alpha_is_moved_out_of_color_channels() {
        let size = IVec2::new(2, 1);
        let image = Image::new(
            "rgba",
            vec![
                Channel::from_data("A", size, vec![1.0, 0.0]).unwrap(),
                Channel::from_data("R", size, vec![0.5, 9.0]).unwrap(),
                Channel::from_data("G", size, vec![0.5, 9.0]).unwrap(),
                Channel::from_data("B", size, vec![0.5, 9.0]).unwrap(),
            ],
        )
        .unwrap();
        let stats = compute_canvas_statistics(&image, None, "RGBA", Metric::Error, HistogramScale::Log).unwrap();
        assert_eq!(stats.histogram_channels, 3);
        assert_eq!(stats.maximum, 9.0);
    }

    #[test]
    fn histogram_zero_brackets_zero() {
        for scale in [HistogramScale::Linear, HistogramScale::Log] {
            let binning = HistogramBinning::new(-3.0, 10.0, scale);
            let zero = binning.val_to_bin(0.0);
            assert!(binning.bin_to_val(zero as f32) <= 1e-6, "{scale:?}");
            assert!(binning.bin_to_val(zero as f32 + 1.0) >= -1e-6, "{scale:?}");
        }
    }

    #[test]
    fn histogram_is_clipped_to_tenth_largest() {
        let image = ramp_image(&[0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        let stats = compute_canvas_statistics(&image, None, "RGB", Metric::Error, HistogramScale::Linear).unwrap();
        assert!(stats.histogram.iter().all(|v| v.is_finite() && *v >= 0.0));
        let mut sorted = stats.histogram.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        assert!(sorted[9] <= 1.0 / 1.3 + 1e-6);
    }

    #[test]
    fn alpha_only_group_keeps_its_channel() {
        let size = IVec2::new(1, 1);
        let image = Image::new("a", vec![Channel::from_data("A", size, vec![0.5]).unwrap()]).unwrap();
        let stats = compute_canvas_statistics(&image, None, "A", Metric::Error, HistogramScale::Linear).unwrap();
        assert_eq!(stats.histogram_channels, 1);
        assert_eq!(stats.mean, 0.5);
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_unweighted_counts_sum_to_pixel_count(
                values in proptest::collection::vec(-1000.0f32..1000.0, 1..512),
                log in any::<bool>(),
            ) {
                let scale = if log { HistogramScale::Log } else { HistogramScale::Linear };
                let min = values.iter().copied().fold(f32::INFINITY, f32::min);
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let binning = HistogramBinning::new(min, max, scale);
                let bins = binning.accumulate(&values, None);
                prop_assert_eq!(bins.len(), NUM_BINS);
                prop_assert_eq!(bins.iter().sum::<f32>(), values.len() as f32);
            }

            #[test]
            fn prop_alpha_weighted_counts_sum_to_total_alpha(
                pixels in proptest::collection::vec((-1000.0f32..1000.0, 0u8..=4), 1..512),
                log in any::<bool>(),
            ) {
                let scale = if log { HistogramScale::Log } else { HistogramScale::Linear };
                let values: Vec<f32> = pixels.iter().map(|(v, _)| *v).collect();
                // Quarter steps keep every partial sum exact in f32.
                let alpha: Vec<f32> = pixels.iter().map(|(_, a)| *a as f32 / 4.0).collect();
                let min = values.iter().copied().fold(f32::INFINITY, f32::min);
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let binning = HistogramBinning::new(min, max, scale);
                let bins = binning.accumulate(&values, Some(&alpha));
                prop_assert_eq!(bins.iter().sum::<f32>(), alpha.iter().sum::<f32>());
            }

            #[test]
            fn prop_histogram_zero_brackets_zero(
                min in -1000.0f32..-0.01,
                max in 0.01f32..1000.0,
                log in any::<bool>(),
            ) {
                let scale = if log { HistogramScale::Log } else { HistogramScale::Linear };
                let binning = HistogramBinning::new(min, max, scale);
                let zero = binning.val_to_bin(0.0);
                let tolerance = 1e-3 * (max - min);
                prop_assert!(binning.bin_to_val(zero as f32) <= tolerance);
                prop_assert!(binning.bin_to_val(zero as f32 + 1.0) >= -tolerance);
            }
        }
    }
}
