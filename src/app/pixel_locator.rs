//! Search for pixels of interest in the displayed channels of the current
//! group, restricted to the crop when one is set.

use anyhow::Result;
use glam::IVec2;
use rayon::prelude::*;

use crate::{app::canvas::Canvas, raster::Box2i, stats::ComparisonContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchKind {
    Maximum,
    Minimum,
    Range,
}

impl SearchKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Maximum => "Maximum",
            Self::Minimum => "Minimum",
            Self::Range => "Range",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocatedPixel {
    pub pixel: IVec2,
    pub value: f32,
    pub channel: usize,
}

/// Comparison context and search region for the current canvas state, with
/// the `(channel, row)` pairs to visit in scan order: channel-major, then
/// row-major.
fn search_rows(canvas: &Canvas) -> Result<Option<(ComparisonContext, Box2i, Vec<(usize, i32)>)>> {
    let Some(image) = canvas.image() else {
        return Ok(None);
    };
    let names = image.channels_in_group(&canvas.resolved_group());
    if names.is_empty() {
        return Ok(None);
    }
    let context = ComparisonContext::new(image, canvas.comparison_reference().map(|r| &**r), names, canvas.metric())?;
    let region = canvas.effective_region();
    let rows = (0..context.len())
        .flat_map(|ci| (region.min.y..region.max.y).map(move |y| (ci, y)))
        .collect();
    Ok(Some((context, region, rows)))
}

/// First pixel holding the largest (or smallest) value.
///
/// Rows are reduced in scan order and only the running best is kept, so ties
/// resolve to the earliest pixel.
pub fn find_extreme(canvas: &Canvas, kind: SearchKind) -> Result<Option<LocatedPixel>> {
    let Some((context, region, rows)) = search_rows(canvas)? else {
        return Ok(None);
    };
    let pick = |best: Option<LocatedPixel>, candidate: Option<LocatedPixel>| match (best, candidate) {
        (Some(best), Some(candidate)) => {
            let better = match kind {
                SearchKind::Minimum => candidate.value < best.value,
                _ => candidate.value > best.value,
            };
            Some(if better { candidate } else { best })
        }
        (best, candidate) => best.or(candidate),
    };
    let found = rows
        .par_iter()
        .map(|&(ci, y)| {
            (region.min.x..region.max.x)
                .map(|x| {
                    let pixel = IVec2::new(x, y);
                    LocatedPixel { pixel, value: context.value_at(ci, pixel), channel: ci }
                })
                .filter(|p| !p.value.is_nan())
                .fold(None, |best, p| pick(best, Some(p)))
        })
        .reduce(|| None, |a, b| pick(a, b));
    Ok(found)
}

/// All pixels with a value in `[min, max]` (bounds swapped if reversed),
/// sorted by value. Only matches are collected.
pub fn find_in_range(canvas: &Canvas, min: f32, max: f32) -> Result<Vec<LocatedPixel>> {
    let (lo, hi) = if min > max { (max, min) } else { (min, max) };
    let Some((context, region, rows)) = search_rows(canvas)? else {
        return Ok(Vec::new());
    };
    let mut found: Vec<LocatedPixel> = rows
        .par_iter()
        .flat_map_iter(|&(ci, y)| {
            let context = &context;
            (region.min.x..region.max.x).filter_map(move |x| {
                let pixel = IVec2::new(x, y);
                let value = context.value_at(ci, pixel);
                (value >= lo && value <= hi).then_some(LocatedPixel { pixel, value, channel: ci })
            })
        })
        .collect();
    found.sort_by(|a, b| a.value.total_cmp(&b.value));
    Ok(found)
}

/// Locator state: the last results, which one is focused, and a status line.
#[derive(Clone, Debug, Default)]
pub struct PixelLocator {
    found: Vec<LocatedPixel>,
    current: Option<usize>,
    primary: Option<IVec2>,
    status: String,
}

impl PixelLocator {
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Pixel to highlight most strongly.
    pub fn primary(&self) -> Option<IVec2> {
        self.primary
    }

    /// Every pixel of the last range search.
    pub fn highlights(&self) -> Vec<IVec2> {
        self.found.iter().map(|p| p.pixel).collect()
    }

    pub fn has_next(&self) -> bool {
        self.current.is_some() && !self.found.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn describe(&mut self, kind: SearchKind, hit: &LocatedPixel, channel: &str, detail: Option<String>) {
        self.status = format!(
            "{} Value Found\nPixel: ({}, {})\nValue: {:.6}\nChannel: {channel}",
            kind.label(),
            hit.pixel.x,
            hit.pixel.y,
            hit.value
        );
        if let Some(detail) = detail {
            self.status.push('\n');
            self.status.push_str(&detail);
        }
        self.primary = Some(hit.pixel);
    }

    fn channel_label(canvas: &Canvas) -> String {
        let group = canvas.resolved_group();
        match canvas.image().map(|i| i.channels_in_group(&group)) {
            Some(names) if names.len() == 1 => names[0].clone(),
            _ => group,
        }
    }

    /// Returns the pixel to focus, if any.
    pub fn find_extreme(&mut self, canvas: &Canvas, kind: SearchKind) -> Result<Option<IVec2>> {
        self.reset();
        let Some(hit) = find_extreme(canvas, kind)? else {
            return Ok(None);
        };
        self.describe(kind, &hit, &Self::channel_label(canvas), None);
        Ok(Some(hit.pixel))
    }

    /// Returns the first match to focus, if any.
    pub fn find_range(&mut self, canvas: &Canvas, min: f32, max: f32) -> Result<Option<IVec2>> {
        self.reset();
        self.found = find_in_range(canvas, min, max)?;
        let Some(first) = self.found.first().cloned() else {
            self.status = "No pixels found in the specified range".to_string();
            return Ok(None);
        };
        self.current = Some(0);
        let detail = format!("1 of {}", self.found.len());
        self.describe(SearchKind::Range, &first, &Self::channel_label(canvas), Some(detail));
        Ok(Some(first.pixel))
    }

    /// Advance to the next range match, wrapping around.
    pub fn find_next(&mut self, canvas: &Canvas) -> Option<IVec2> {
        let current = self.current?;
        if self.found.is_empty() {
            return None;
        }
        let next = (current + 1) % self.found.len();
        self.current = Some(next);
        let hit = self.found[next].clone();
        let detail = format!("{} of {}", next + 1, self.found.len());
        self.describe(SearchKind::Range, &hit, &Self::channel_label(canvas), Some(detail));
        Some(hit.pixel)
    }
}
