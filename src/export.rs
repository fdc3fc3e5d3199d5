//! Interleaved RGBA buffers that match what the canvas displays, plus the
//! savers and the clipboard sink that consume them.

use std::{borrow::Cow, path::Path, time::Instant};

use anyhow::{Context, Result, anyhow, bail};
use glam::{IVec2, Vec2};
use rayon::prelude::*;
use tracing::info;

use crate::{
    app::types::{ResizeMode, Tonemap, TonemapSettings},
    raster::{Channel, RgbaLayout},
    renderer::tonemap::{apply_exposure_and_offset, apply_tonemap},
};

/// RGBA interleaved `f32` pixels of flattened channels.
///
/// Channels are mapped into RGBA with [`RgbaLayout`]; alpha is 1 when the
/// group has none. With `divide_alpha`, color is un-premultiplied and pixels
/// with zero alpha become black.
pub fn hdr_image_data(flattened: &[Channel], divide_alpha: bool) -> Vec<f32> {
    let Some(first) = flattened.first() else {
        return Vec::new();
    };
    let names: Vec<&str> = flattened.iter().map(Channel::name).collect();
    let layout = RgbaLayout::for_channels(&names);
    let mut out = vec![0.0; first.count() * 4];

    out.par_chunks_mut(4).enumerate().for_each(|(i, px)| {
        let alpha = layout.alpha.map_or(1.0, |c| flattened[c].eval_index(i));
        for (slot, source) in layout.rgb.iter().enumerate() {
            let v = source.map_or(0.0, |c| flattened[c].eval_index(i));
            px[slot] = match (divide_alpha, layout.alpha.is_some()) {
                (true, true) if alpha == 0.0 => 0.0,
                (true, true) => v / alpha,
                _ => v,
            };
        }
        px[3] = alpha;
    });
    out
}

/// Quantize HDR RGBA to 8 bits with the current exposure, offset and tonemap.
/// Alpha is quantized unchanged.
pub fn ldr_from_hdr(hdr: &[f32], settings: TonemapSettings, tonemap: Tonemap) -> Vec<u8> {
    let mut out = vec![0u8; hdr.len()];
    out.par_chunks_mut(4)
        .zip(hdr.par_chunks(4))
        .for_each(|(dst, src)| {
            let exposed = [0, 1, 2].map(|i| apply_exposure_and_offset(src[i], settings.exposure, settings.offset));
            let rgb = apply_tonemap(exposed, settings.gamma, tonemap);
            for (i, v) in rgb.into_iter().chain(std::iter::once(src[3])).enumerate() {
                dst[i] = quantize(v);
            }
        });
    out
}

/// `v * 255 + 0.5`, saturating at both ends.
pub fn quantize(v: f32) -> u8 {
    (v * 255.0 + 0.5) as u8
}

/// Resize an RGBA `f32` buffer by per-axis ratios; the output size is the
/// rounded product. A ratio of exactly 1 on both axes returns the input.
pub fn resize_rgba(data: &[f32], size: IVec2, ratio: Vec2, mode: ResizeMode) -> Result<(Vec<f32>, IVec2)> {
    if !(ratio.x > 0.0 && ratio.y > 0.0) {
        bail!("resize ratios must be positive, got {}x{}", ratio.x, ratio.y);
    }
    if data.len() != size.x.max(0) as usize * size.y.max(0) as usize * 4 {
        bail!("RGBA buffer of {} floats does not match {}x{}", data.len(), size.x, size.y);
    }
    if ratio == Vec2::ONE {
        return Ok((data.to_vec(), size));
    }

    let out_size = (size.as_vec2() * ratio).round().as_ivec2().max(IVec2::ZERO);
    let mut out = vec![0.0; out_size.x as usize * out_size.y as usize * 4];
    if out.is_empty() || size.x == 0 || size.y == 0 {
        return Ok((out, out_size));
    }

    let texel = move |x: i32, y: i32| {
        let i = (y * size.x + x) as usize * 4;
        &data[i..i + 4]
    };
    let row_len = out_size.x as usize * 4;
    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            match mode {
                ResizeMode::Nearest => {
                    let sx = ((x as f32 / ratio.x) as i32).min(size.x - 1);
                    let sy = ((y as f32 / ratio.y) as i32).min(size.y - 1);
                    px.copy_from_slice(texel(sx, sy));
                }
                ResizeMode::Bilinear => {
                    let fx = x as f32 / ratio.x;
                    let fy = y as f32 / ratio.y;
                    let x0 = (fx as i32).min(size.x - 1);
                    let y0 = (fy as i32).min(size.y - 1);
                    let x1 = (x0 + 1).min(size.x - 1);
                    let y1 = (y0 + 1).min(size.y - 1);
                    let tx = fx - x0 as f32;
                    let ty = fy - y0 as f32;
                    for c in 0..4 {
                        let top = texel(x0, y0)[c] * (1.0 - tx) + texel(x1, y0)[c] * tx;
                        let bottom = texel(x0, y1)[c] * (1.0 - tx) + texel(x1, y1)[c] * tx;
                        px[c] = (top * (1.0 - ty) + bottom * ty).clamp(0.0, 1.0);
                    }
                }
            }
        }
    });
    Ok((out, out_size))
}

/// Which pixel data a file format wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFormat {
    /// Float data; `premultiplied` formats take color as-is.
    Hdr { format: image::ImageFormat, premultiplied: bool },
    Ldr { format: image::ImageFormat, alpha: bool },
}

impl SaveFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| anyhow!("cannot save {}: missing file extension", path.display()))?;
        use image::ImageFormat as F;
        Ok(match ext.as_str() {
            "exr" => Self::Hdr { format: F::OpenExr, premultiplied: true },
            "hdr" => Self::Hdr { format: F::Hdr, premultiplied: false },
            "png" => Self::Ldr { format: F::Png, alpha: true },
            "tga" => Self::Ldr { format: F::Tga, alpha: true },
            "bmp" => Self::Ldr { format: F::Bmp, alpha: false },
            "jpg" | "jpeg" => Self::Ldr { format: F::Jpeg, alpha: false },
            other => bail!(
                "cannot save {}: unsupported extension '.{other}' (supported: exr, hdr, png, tga, bmp, jpg)",
                path.display()
            ),
        })
    }

    /// Whether color must be divided by alpha before saving.
    pub fn divide_alpha(self) -> bool {
        match self {
            Self::Hdr { premultiplied, .. } => !premultiplied,
            Self::Ldr { .. } => true,
        }
    }
}

fn dims(size: IVec2) -> Result<(u32, u32)> {
    let w = u32::try_from(size.x).context("negative image width")?;
    let h = u32::try_from(size.y).context("negative image height")?;
    Ok((w, h))
}

/// Write float RGBA pixels to an HDR format.
pub fn save_hdr(path: &Path, format: image::ImageFormat, size: IVec2, data: Vec<f32>) -> Result<()> {
    let (w, h) = dims(size)?;
    let buffer = image::Rgba32FImage::from_raw(w, h, data)
        .ok_or_else(|| anyhow!("pixel buffer does not match {w}x{h}"))?;
    let dynamic = image::DynamicImage::ImageRgba32F(buffer);
    let result = match format {
        image::ImageFormat::Hdr => image::DynamicImage::ImageRgb32F(dynamic.to_rgb32f()).save_with_format(path, format),
        _ => dynamic.save_with_format(path, format),
    };
    result.with_context(|| format!("failed to write {}", path.display()))
}

/// Write 8-bit RGBA pixels; formats without alpha drop it.
pub fn save_ldr(path: &Path, format: image::ImageFormat, alpha: bool, size: IVec2, data: Vec<u8>) -> Result<()> {
    let (w, h) = dims(size)?;
    let buffer =
        image::RgbaImage::from_raw(w, h, data).ok_or_else(|| anyhow!("pixel buffer does not match {w}x{h}"))?;
    let dynamic = image::DynamicImage::ImageRgba8(buffer);
    let result = if alpha {
        dynamic.save_with_format(path, format)
    } else {
        image::DynamicImage::ImageRgb8(dynamic.to_rgb8()).save_with_format(path, format)
    };
    result.with_context(|| format!("failed to write {}", path.display()))
}

/// Save flattened channels, picking HDR or LDR data by the path's extension.
pub fn save_image(
    path: &Path,
    flattened: &[Channel],
    settings: TonemapSettings,
    tonemap: Tonemap,
) -> Result<()> {
    let start = Instant::now();
    let format = SaveFormat::from_path(path)?;
    let Some(first) = flattened.first() else {
        bail!("cannot save {}: nothing to save", path.display());
    };
    let size = first.size();
    let hdr = hdr_image_data(flattened, format.divide_alpha());
    match format {
        SaveFormat::Hdr { format, .. } => save_hdr(path, format, size, hdr)?,
        SaveFormat::Ldr { format, alpha } => save_ldr(path, format, alpha, size, ldr_from_hdr(&hdr, settings, tonemap))?,
    }
    info!(
        "[export] saved {} in {:.1} ms",
        path.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Put 8-bit RGBA pixels on the system clipboard.
pub fn copy_to_clipboard(rgba: Vec<u8>, size: IVec2) -> Result<()> {
    let (w, h) = dims(size)?;
    if rgba.len() != w as usize * h as usize * 4 {
        bail!("clipboard image of {} bytes does not match {w}x{h}", rgba.len());
    }
    let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
    clipboard
        .set_image(arboard::ImageData {
            width: w as usize,
            height: h as usize,
            bytes: Cow::Owned(rgba),
        })
        .context("failed to copy image to clipboard")?;
    info!("[export] copied {w}x{h} image to clipboard");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, data: &[f32]) -> Channel {
        Channel::from_data(name, IVec2::new(data.len() as i32, 1), data.to_vec()).unwrap()
    }

    #[test]
    fn hdr_data_pads_missing_alpha_with_one() {
        let data = hdr_image_data(
            &[channel("R", &[1.0]), channel("G", &[2.0]), channel("B", &[3.0])],
            true,
        );
        assert_eq!(data, vec![1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn divide_alpha_unpremultiplies_and_zeroes_transparent() {
        let flattened = [
            channel("R", &[0.5, 0.5]),
            channel("G", &[0.25, 0.5]),
            channel("B", &[0.0, 0.5]),
            channel("A", &[0.5, 0.0]),
        ];
        let divided = hdr_image_data(&flattened, true);
        assert_eq!(divided, vec![1.0, 0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0]);
        let kept = hdr_image_data(&flattened, false);
        assert_eq!(&kept[4..], &[0.5, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn single_channel_exports_gray() {
        assert_eq!(hdr_image_data(&[channel("Y", &[0.3])], false), vec![0.3, 0.3, 0.3, 1.0]);
    }

    #[test]
    fn ldr_quantizes_with_rounding_and_saturation() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 255);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(-1.0), 0);
        assert_eq!(quantize(2.0), 255);
        let ldr = ldr_from_hdr(&[0.0, 1.0, 4.0, 1.0], TonemapSettings::default(), Tonemap::Srgb);
        assert_eq!(ldr, vec![0, 255, 255, 255]);
    }

    #[test]
    fn resize_rejects_bad_ratio_and_short_circuits_identity() {
        let data = vec![0.5; 4 * 4];
        assert!(resize_rgba(&data, IVec2::new(2, 2), Vec2::new(0.0, 1.0), ResizeMode::Nearest).is_err());
        let (same, size) = resize_rgba(&data, IVec2::new(2, 2), Vec2::ONE, ResizeMode::Bilinear).unwrap();
        assert_eq!(size, IVec2::new(2, 2));
        assert_eq!(same, data);
    }

    #[test]
    fn nearest_upscale_duplicates_pixels() {
        let data = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let (out, size) = resize_rgba(&data, IVec2::new(2, 1), Vec2::new(2.0, 1.0), ResizeMode::Nearest).unwrap();
        assert_eq!(size, IVec2::new(4, 1));
        let reds: Vec<f32> = out.chunks(4).map(|p| p[0]).collect();
        assert_eq!(reds, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn bilinear_interpolates_and_clamps() {
        let data = [0.0, 0.0, 0.0, 1.0, 4.0, 1.0, 1.0, 1.0];
        let (out, size) = resize_rgba(&data, IVec2::new(2, 1), Vec2::new(2.0, 1.0), ResizeMode::Bilinear).unwrap();
        assert_eq!(size, IVec2::new(4, 1));
        let greens: Vec<f32> = out.chunks(4).map(|p| p[1]).collect();
        assert_eq!(greens, vec![0.0, 0.5, 1.0, 1.0]);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn save_format_by_extension() {
        assert_eq!(
            SaveFormat::from_path(Path::new("a.EXR")).unwrap(),
            SaveFormat::Hdr { format: image::ImageFormat::OpenExr, premultiplied: true }
        );
        assert!(!SaveFormat::from_path(Path::new("a.exr")).unwrap().divide_alpha());
        assert!(SaveFormat::from_path(Path::new("a.png")).unwrap().divide_alpha());
        assert!(SaveFormat::from_path(Path::new("a.gif")).is_err());
        assert!(SaveFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn save_png_roundtrips_through_image_crate() {
        let dir = std::env::temp_dir().join(format!("hdr-compare-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.png");
        let flattened = [channel("R", &[1.0, 0.0]), channel("G", &[0.0, 1.0]), channel("B", &[0.0, 0.0])];
        save_image(&path, &flattened, TonemapSettings::default(), Tonemap::Srgb).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (2, 1));
        assert_eq!(loaded.get_pixel(0, 0).0, [255, 0, 0, 255]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
