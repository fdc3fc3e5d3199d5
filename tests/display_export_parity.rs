use std::sync::Arc;

use glam::{IVec2, Vec2};
use hdr_compare_viewer::{
    app::{Canvas, CanvasModifiers, Metric, Tonemap},
    export::quantize,
    raster::Image,
    renderer::{
        cpu_shade,
        uber_shader::{RgbaTexture, validate_uber_shader},
    },
    stats::build_worker_pool,
};

fn samples(size: IVec2, seed: f32, alpha: impl Fn(i32) -> f32) -> Vec<f32> {
    (0..size.x * size.y)
        .flat_map(|i| {
            let v = i as f32 * 0.37 + seed;
            [v.sin() * 2.0, (v * 0.5).cos(), v * 0.1 - 0.3, alpha(i)]
        })
        .collect()
}

fn rgba_image(name: &str, size: IVec2, samples: &[f32]) -> Arc<Image> {
    Arc::new(Image::from_interleaved(name, size, &["R", "G", "B", "A"], samples).unwrap())
}

fn opaque_image(name: &str, size: IVec2, seed: f32) -> Arc<Image> {
    rgba_image(name, size, &samples(size, seed, |_| 1.0))
}

/// Shade the center of every image pixel and compare with the exported LDR
/// buffer of the same canvas state.
fn assert_display_matches_export(canvas: &Canvas, reference: Option<&Arc<Image>>) {
    let ldr = canvas.ldr_image_data(false).unwrap();
    assert_display_matches(canvas, reference, &ldr);
}

/// Shade the center of every image pixel and compare the RGB bytes with `ldr`.
fn assert_display_matches(canvas: &Canvas, reference: Option<&Arc<Image>>, ldr: &[u8]) {
    let image = canvas.image().unwrap();
    let size = image.size();
    let group = canvas.resolved_group();
    let uniforms = *canvas.draw(CanvasModifiers::default()).uniforms();
    let texture = RgbaTexture::from_image(image, &group);
    let reference_texture = reference.map(|r| RgbaTexture::from_image(r, &group));
    let image_to_ndc = canvas.transform().image_to_ndc(size);

    for y in 0..size.y {
        for x in 0..size.x {
            let uv = Vec2::new((x as f32 + 0.5) / size.x as f32, (y as f32 + 0.5) / size.y as f32);
            let ndc = image_to_ndc.transform_point2(uv);
            let shaded = cpu_shade(&uniforms, ndc, Some(&texture), reference_texture.as_ref()).unwrap();
            let p = (y * size.x + x) as usize * 4;
            for c in 0..3 {
                let displayed = quantize(shaded[c]) as i32;
                let exported = ldr[p + c] as i32;
                assert!(
                    (displayed - exported).abs() <= 1,
                    "pixel ({x}, {y}) channel {c}: displayed {displayed}, exported {exported} ({:?})",
                    canvas.tonemap()
                );
            }
        }
    }
}

fn canvas() -> Canvas {
    Canvas::new(Vec2::new(120.0, 80.0), build_worker_pool(Some(1)).unwrap())
}

#[test]
fn displayed_pixels_match_export_for_every_tonemap() {
    let mut canvas = canvas();
    canvas.set_image(Some(opaque_image("a", IVec2::new(5, 4), 0.0)));
    canvas.set_exposure(0.5);
    canvas.set_offset(0.02);
    canvas.set_gamma(1.8);
    for tonemap in [Tonemap::Srgb, Tonemap::Gamma, Tonemap::FalseColor, Tonemap::PositiveNegative] {
        canvas.set_tonemap(tonemap);
        assert_display_matches_export(&canvas, None);
    }
}

#[test]
fn displayed_comparison_matches_export() {
    let mut canvas = canvas();
    let reference = opaque_image("b", IVec2::new(5, 4), 1.3);
    canvas.set_image(Some(opaque_image("a", IVec2::new(5, 4), 0.0)));
    canvas.set_reference(Some(Arc::clone(&reference)));
    for metric in [
        Metric::Error,
        Metric::AbsoluteError,
        Metric::SquaredError,
        Metric::RelativeAbsoluteError,
        Metric::RelativeSquaredError,
        Metric::RelativeSquaredError2,
        Metric::LogAbsoluteError,
    ] {
        canvas.set_metric(metric);
        canvas.set_tonemap(Tonemap::PositiveNegative);
        assert_display_matches_export(&canvas, Some(&reference));
    }
}

#[test]
fn log_and_relative_errors_match_export_under_gamma() {
    let mut canvas = canvas();
    let reference = opaque_image("b", IVec2::new(4, 4), 2.1);
    canvas.set_image(Some(opaque_image("a", IVec2::new(4, 4), 0.4)));
    canvas.set_reference(Some(Arc::clone(&reference)));
    canvas.set_tonemap(Tonemap::Gamma);
    canvas.set_gamma(2.2);
    for metric in [Metric::LogAbsoluteError, Metric::RelativeAbsoluteError] {
        canvas.set_metric(metric);
        assert_display_matches_export(&canvas, Some(&reference));
    }
}

#[test]
fn translucent_pixels_over_black_match_premultiplied_export() {
    let size = IVec2::new(5, 3);
    let mut canvas = canvas();
    canvas.set_image(Some(rgba_image("a", size, &samples(size, 0.2, |i| (i % 5) as f32 * 0.25))));
    // An opaque black background adds nothing, so the displayed color is the
    // premultiplied color the export keeps without alpha division.
    canvas.set_background([0.0, 0.0, 0.0, 1.0]);
    for tonemap in [Tonemap::Srgb, Tonemap::Gamma] {
        canvas.set_tonemap(tonemap);
        assert_display_matches_export(&canvas, None);
    }

    let premultiplied = canvas.hdr_image_data(false).unwrap();
    let divided = canvas.hdr_image_data(true).unwrap();
    for (p, d) in premultiplied.chunks(4).zip(divided.chunks(4)) {
        assert_eq!(p[3], d[3]);
        for c in 0..3 {
            let expected = if p[3] == 0.0 { 0.0 } else { p[c] / p[3] };
            assert!((d[c] - expected).abs() <= 1e-6, "{d:?} vs {p:?}");
        }
    }
}

#[test]
fn clamp_to_ldr_displays_the_clamped_image() {
    let size = IVec2::new(5, 4);
    let raw = samples(size, 0.9, |_| 1.0);
    let clamped: Vec<f32> = raw.iter().map(|v| v.clamp(0.0, 1.0)).collect();
    assert!(raw.iter().any(|&v| !(0.0..=1.0).contains(&v)));

    let mut expected = canvas();
    expected.set_image(Some(rgba_image("clamped", size, &clamped)));
    expected.set_exposure(1.0);
    let ldr = expected.ldr_image_data(false).unwrap();

    let mut displayed = canvas();
    displayed.set_image(Some(rgba_image("raw", size, &raw)));
    displayed.set_exposure(1.0);
    displayed.set_clamp_to_ldr(true);
    assert_display_matches(&displayed, None, &ldr);
}

#[test]
fn zoomed_and_panned_view_samples_the_same_texels() {
    let mut canvas = canvas();
    canvas.set_image(Some(opaque_image("a", IVec2::new(6, 3), 0.7)));
    canvas.transform_mut().scale_by(7.0, Vec2::new(30.0, 20.0));
    canvas.transform_mut().translate(Vec2::new(-13.0, 5.0));
    assert_display_matches_export(&canvas, None);
}

#[test]
fn generated_shader_validates() {
    let module = validate_uber_shader().unwrap();
    assert!(module.entry_points.iter().any(|e| e.name == "fs_main"));
}
