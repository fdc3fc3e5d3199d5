//! CPU versions of the per-pixel display functions. The uber shader is
//! generated from the same constants, and `uber_shader::cpu_shade` composes
//! these functions the way the fragment shader does.

use crate::{
    app::types::{HistogramScale, Metric, Tonemap},
    color::{clamp01, false_color, linear_to_srgb},
};

/// Bias added before the log in the false-color mapping.
pub const FALSE_COLOR_BIAS: f32 = 0.03125;
/// Regularizer of the relative metrics.
pub const RELATIVE_EPSILON: f32 = 0.01;

pub fn apply_exposure_and_offset(v: f32, exposure: f32, offset: f32) -> f32 {
    exposure.exp2() * v + offset
}

fn mean3(rgb: [f32; 3]) -> f32 {
    (rgb[0] + rgb[1] + rgb[2]) / 3.0
}

/// Map the input of the false-color tonemap to its LUT coordinate.
pub fn false_color_coordinate(rgb: [f32; 3]) -> f32 {
    (mean3(rgb) + FALSE_COLOR_BIAS).log2() / 10.0 + 0.5
}

/// Tonemap `rgb` over a background color whose weight is `background[3]`.
///
/// The background enters in the tonemap's own input space, so a fully
/// transparent pixel over the checkerboard shows the checkerboard regardless of
/// exposure. `offset` is the current tonemap offset, which the shader subtracts
/// from the background before blending.
pub fn apply_tonemap_over(
    rgb: [f32; 3],
    gamma: f32,
    tonemap: Tonemap,
    background: [f32; 4],
    offset: f32,
) -> [f32; 3] {
    let bg = [background[0], background[1], background[2]];
    let weight = background[3];
    let mut out = match tonemap {
        Tonemap::Srgb => std::array::from_fn(|i| {
            let blended = rgb[i] + (crate::color::srgb_to_linear(bg[i]) - offset) * weight;
            linear_to_srgb(blended)
        }),
        Tonemap::Gamma => std::array::from_fn(|i| {
            let blended = rgb[i] + (bg[i].max(0.0).powf(gamma) - offset) * weight;
            blended.max(0.0).powf(1.0 / gamma)
        }),
        Tonemap::FalseColor => {
            let fc = false_color(false_color_coordinate(rgb));
            let fc_zero = false_color(false_color_coordinate([0.0; 3]));
            std::array::from_fn(|i| fc[i] + (bg[i] - fc_zero[i]) * weight)
        }
        Tonemap::PositiveNegative => {
            let negative = -2.0 * mean3(rgb.map(|v| v.min(0.0)));
            let positive = 2.0 * mean3(rgb.map(|v| v.max(0.0)));
            let pn = [negative, positive, 0.0];
            std::array::from_fn(|i| pn[i] + bg[i] * weight)
        }
    };
    for v in &mut out {
        *v = clamp01(*v);
    }
    out
}

/// Tonemap without a background contribution, used by export and readouts.
pub fn apply_tonemap(rgb: [f32; 3], gamma: f32, tonemap: Tonemap) -> [f32; 3] {
    apply_tonemap_over(rgb, gamma, tonemap, [0.0; 4], 0.0)
}

/// Per-channel error metric of `value` against `reference`.
///
/// [`Metric::RelativeSquaredError2`] is joint over the RGB triple and yields 0
/// here; use [`apply_joint_relative_squared_error`].
pub fn apply_metric(value: f32, reference: f32, metric: Metric) -> f32 {
    let diff = value - reference;
    match metric {
        Metric::Error => diff,
        Metric::AbsoluteError => diff.abs(),
        Metric::SquaredError => diff * diff,
        Metric::RelativeAbsoluteError => diff.abs() / (reference + RELATIVE_EPSILON),
        Metric::RelativeSquaredError => diff * diff / (reference * reference + RELATIVE_EPSILON),
        Metric::RelativeSquaredError2 => 0.0,
        Metric::LogAbsoluteError => ((1.0 + value).ln() - (1.0 + reference).ln()).abs(),
    }
}

/// Mean squared difference of the triple divided by the squared mean of the
/// reference triple. Every channel of the pixel receives this value.
pub fn apply_joint_relative_squared_error(values: [f32; 3], references: [f32; 3]) -> f32 {
    let mut diff_square_sum = 0.0;
    let mut reference_mean = 0.0;
    for i in 0..3 {
        let d = values[i] - references[i];
        diff_square_sum += d * d;
        reference_mean += references[i];
    }
    reference_mean /= 3.0;
    diff_square_sum / 3.0 / (reference_mean * reference_mean + RELATIVE_EPSILON)
}

/// Map into (or with `inverse`, out of) the space histograms are binned in.
pub fn apply_histogram_space(v: f32, scale: HistogramScale, inverse: bool) -> f32 {
    match (scale, inverse) {
        (HistogramScale::Linear, _) => v,
        (HistogramScale::Log, false) => v.ln(),
        (HistogramScale::Log, true) => v.exp(),
    }
}
