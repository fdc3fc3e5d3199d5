use std::sync::OnceLock;

/// Number of entries in the false-color lookup table.
pub const TURBO_ENTRIES: usize = 256;

pub fn clamp01(x: f32) -> f32 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

pub fn linear_to_srgb(x: f32) -> f32 {
    // https://en.wikipedia.org/wiki/SRGB
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

pub fn srgb_to_linear(x: f32) -> f32 {
    if x <= 0.040_45 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

/// 8-bit sRGB code value of a linear sample, as shown in pixel value labels.
pub fn linear_to_srgb_u8(x: f32) -> u8 {
    (clamp01(linear_to_srgb(x)) * 255.0 + 0.5) as u8
}

fn turbo_polynomial(x: f32) -> [f32; 3] {
    // Polynomial fit of Google's Turbo colormap (A. Mikhailov, 2019).
    let x = x as f64;
    let r = 0.135_721_38
        + x * (4.615_392_60 + x * (-42.660_322_58 + x * (132.131_082_34 + x * (-152.942_393_96 + x * 59.286_379_43))));
    let g = 0.091_402_61
        + x * (2.194_188_39 + x * (4.842_966_58 + x * (-14.185_033_33 + x * (4.277_298_57 + x * 2.829_566_04))));
    let b = 0.106_673_30
        + x * (12.641_946_08 + x * (-60.582_048_36 + x * (110.362_767_71 + x * (-89.903_109_12 + x * 27.348_249_73))));
    [
        clamp01(r as f32),
        clamp01(g as f32),
        clamp01(b as f32),
    ]
}

/// Turbo colormap as `TURBO_ENTRIES` entries of four floats (RGB + padding).
pub fn turbo_lut() -> &'static [f32] {
    static LUT: OnceLock<Vec<f32>> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = Vec::with_capacity(TURBO_ENTRIES * 4);
        for i in 0..TURBO_ENTRIES {
            let [r, g, b] = turbo_polynomial(i as f32 / (TURBO_ENTRIES - 1) as f32);
            lut.extend_from_slice(&[r, g, b, 1.0]);
        }
        lut
    })
}

/// Look up the false color of a value in [0, 1]; inputs outside are clamped.
pub fn false_color(v: f32) -> [f32; 3] {
    let index = ((clamp01(v) * TURBO_ENTRIES as f32) as usize).min(TURBO_ENTRIES - 1);
    let start = index * 4;
    let lut = turbo_lut();
    [lut[start], lut[start + 1], lut[start + 2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_roundtrip_is_close() {
        for &v in &[0.0, 0.001, 0.0031308, 0.18, 0.5, 1.0] {
            let back = srgb_to_linear(linear_to_srgb(v));
            assert!((back - v).abs() < 1e-5, "{v} -> {back}");
        }
    }

    #[test]
    fn srgb_u8_endpoints() {
        assert_eq!(linear_to_srgb_u8(0.0), 0);
        assert_eq!(linear_to_srgb_u8(1.0), 255);
        assert_eq!(linear_to_srgb_u8(-3.0), 0);
        assert_eq!(linear_to_srgb_u8(7.0), 255);
    }

    #[test]
    fn turbo_lut_has_256_padded_entries_in_unit_range() {
        let lut = turbo_lut();
        assert_eq!(lut.len(), TURBO_ENTRIES * 4);
        assert!(lut.iter().all(|v| (0.0..=1.0).contains(v)));
        // Bright green in the middle, dark red at the top.
        let mid = false_color(0.5);
        let last = false_color(1.0);
        assert!(mid[1] > 0.9);
        assert!(last[0] > last[2]);
    }

    #[test]
    fn false_color_clamps_and_handles_nan() {
        assert_eq!(false_color(-5.0), false_color(0.0));
        assert_eq!(false_color(5.0), false_color(1.0));
        assert_eq!(false_color(f32::NAN), false_color(0.0));
    }
}
