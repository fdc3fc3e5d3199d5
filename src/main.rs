use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use glam::{IVec2, Vec2};
use hdr_compare_viewer::{
    app::{HistogramScale, Metric, Tonemap, Viewer},
    config::ViewerSettings,
    raster::{Box2i, Image},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Clone, PartialEq)]
struct Cli {
    image: Option<PathBuf>,
    reference: Option<PathBuf>,
    group: Option<String>,
    metric: Option<Metric>,
    tonemap: Option<Tonemap>,
    exposure: Option<f32>,
    offset: Option<f32>,
    gamma: Option<f32>,
    histogram: Option<HistogramScale>,
    crop: Option<Box2i>,
    normalize: bool,
    find_max: bool,
    find_min: bool,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    stats: bool,
}

const SUPPORTED: &str = "--image <file>, --reference <file>, --group <name>, --metric <E|AE|SE|RAE|RSE|RSE2|LAE>, \
     --tonemap <srgb|gamma|falsecolor|posneg>, --exposure <f>, --offset <f>, --gamma <f>, --histogram <Linear|Log>, \
     --crop <x0,y0,x1,y1>, --normalize, --find-max, --find-min, --config <settings.json>, --output <file>, --stats";

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing value for {flag}"))
}

fn parse_f32(text: &str, flag: &str) -> Result<f32> {
    text.parse()
        .map_err(|e| anyhow!("invalid value for {flag}: {text} ({e})"))
}

fn parse_crop(text: &str) -> Result<Box2i> {
    let parts = text
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("invalid value for --crop: {text} ({e})"))?;
    let [x0, y0, x1, y1] = parts[..] else {
        return Err(anyhow!("invalid value for --crop: {text} (expected x0,y0,x1,y1)"));
    };
    let crop = Box2i::new(IVec2::new(x0, y0), IVec2::new(x1, y1)).sanitized();
    if !crop.is_valid() {
        return Err(anyhow!("invalid value for --crop: {text} (empty box)"));
    }
    Ok(crop)
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--normalize" => {
                cli.normalize = true;
                i += 1;
            }
            "--find-max" => {
                cli.find_max = true;
                i += 1;
            }
            "--find-min" => {
                cli.find_min = true;
                i += 1;
            }
            "--stats" => {
                cli.stats = true;
                i += 1;
            }
            "--image" => {
                cli.image = Some(PathBuf::from(value(args, i, flag)?));
                i += 2;
            }
            "--reference" => {
                cli.reference = Some(PathBuf::from(value(args, i, flag)?));
                i += 2;
            }
            "--group" => {
                cli.group = Some(value(args, i, flag)?.to_string());
                i += 2;
            }
            "--metric" => {
                cli.metric = Some(value(args, i, flag)?.parse()?);
                i += 2;
            }
            "--tonemap" => {
                cli.tonemap = Some(value(args, i, flag)?.parse()?);
                i += 2;
            }
            "--histogram" => {
                cli.histogram = Some(value(args, i, flag)?.parse()?);
                i += 2;
            }
            "--exposure" => {
                cli.exposure = Some(parse_f32(value(args, i, flag)?, flag)?);
                i += 2;
            }
            "--offset" => {
                cli.offset = Some(parse_f32(value(args, i, flag)?, flag)?);
                i += 2;
            }
            "--gamma" => {
                cli.gamma = Some(parse_f32(value(args, i, flag)?, flag)?);
                i += 2;
            }
            "--crop" => {
                cli.crop = Some(parse_crop(value(args, i, flag)?)?);
                i += 2;
            }
            "--config" => {
                cli.config = Some(PathBuf::from(value(args, i, flag)?));
                i += 2;
            }
            "--output" | "-o" => {
                cli.output = Some(PathBuf::from(value(args, i, flag)?));
                i += 2;
            }
            other => {
                return Err(anyhow!("unknown argument: {other} (supported: {SUPPORTED})"));
            }
        }
    }
    Ok(cli)
}

/// Decode any format the `image` crate reads into an RGBA float image.
fn load_image(path: &Path) -> Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to load image {}", path.display()))?
        .into_rgba32f();
    let size = IVec2::new(decoded.width() as i32, decoded.height() as i32);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Image::from_interleaved(name, size, &["R", "G", "B", "A"], decoded.as_raw())
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => ViewerSettings::load(path)?,
        None => ViewerSettings::default(),
    };
    let image_path = cli
        .image
        .as_ref()
        .ok_or_else(|| anyhow!("--image is required"))?;

    let mut viewer = Viewer::new(settings, Vec2::new(1024.0, 1024.0))?;
    let image = Arc::new(load_image(image_path)?);
    viewer.add_image(Arc::clone(&image), true);
    if let Some(path) = &cli.reference {
        let reference = Arc::new(load_image(path)?);
        viewer.add_image(Arc::clone(&reference), false);
        viewer.select_reference(Some(reference));
    }
    if let Some(group) = &cli.group {
        viewer.select_group(group);
    }
    if let Some(metric) = cli.metric {
        viewer.set_metric(metric);
    }
    if let Some(tonemap) = cli.tonemap {
        viewer.set_tonemap(tonemap);
    }
    if let Some(scale) = cli.histogram {
        viewer.set_histogram_scale(scale);
    }
    if let Some(exposure) = cli.exposure {
        viewer.set_exposure(exposure);
    }
    if let Some(offset) = cli.offset {
        viewer.set_offset(offset);
    }
    if let Some(gamma) = cli.gamma {
        viewer.set_gamma(gamma);
    }
    if cli.normalize {
        viewer.normalize_exposure_and_offset();
    }
    viewer.canvas_mut().set_crop(cli.crop);

    info!(
        "[cli] '{}' group '{}' metric {} tonemap {}",
        image.name(),
        viewer.current_group(),
        viewer.canvas().metric().label(),
        viewer.canvas().tonemap().label()
    );

    if cli.stats {
        let statistics = viewer
            .canvas_mut()
            .canvas_statistics()?
            .ok_or_else(|| anyhow!("no image loaded"))?;
        info!("[stats] {}", statistics.get().summary());
        println!("{}", serde_json::to_string_pretty(statistics.get())?);
    }
    if cli.find_max && viewer.find_max()?.is_some() {
        println!("{}", viewer.locator().status());
    }
    if cli.find_min && viewer.find_min()?.is_some() {
        println!("{}", viewer.locator().status());
    }
    if let Some(output) = &cli.output {
        viewer.canvas().save_image(output)?;
        println!("[export] saved: {}", output.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    run(cli)
}
