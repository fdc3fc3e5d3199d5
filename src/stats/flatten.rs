//! Per-pixel comparison of an image against an optional reference, producing
//! the flattened channels that statistics, exports and readouts are built on.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use glam::IVec2;
use rayon::prelude::*;

use crate::{
    app::types::Metric,
    raster::{Channel, Image, channel_tail, is_alpha_channel},
    renderer::tonemap::{apply_joint_relative_squared_error, apply_metric},
};

/// Fails unless `channels` can be compared with `metric`.
///
/// The joint relative squared error works on RGB triples, so the group must
/// hold exactly three non-alpha channels.
pub fn check_metric_channels<S: AsRef<str>>(channels: &[S], metric: Metric, has_reference: bool) -> Result<()> {
    if !has_reference || metric != Metric::RelativeSquaredError2 {
        return Ok(());
    }
    let colors = channels.iter().filter(|c| !is_alpha_channel(c.as_ref())).count();
    if colors != 3 {
        bail!(
            "{} compares RGB triples, but the channel group has {colors} non-alpha channel(s)",
            Metric::RelativeSquaredError2.label()
        );
    }
    Ok(())
}

/// Snapshots of the channels of a group and their reference counterparts.
///
/// The context owns `Arc` snapshots rather than lock guards, so streamed
/// updates to either image proceed while a flatten is running.
///
/// A reference channel is the one with the same full name as the image
/// channel, not the one at the same position in the group. A reference that
/// lacks the name compares against 0.
///
/// Reference pixels are taken at `pos + (reference_size - image_size) / 2`, so
/// both images are compared centered on each other. Reference samples outside
/// the reference read as 0.
pub struct ComparisonContext {
    names: Vec<String>,
    channels: Vec<Arc<Channel>>,
    references: Vec<Option<Arc<Channel>>>,
    blend_alpha: Vec<bool>,
    colors: Vec<usize>,
    reference_offset: IVec2,
    has_reference: bool,
    metric: Metric,
    size: IVec2,
}

impl ComparisonContext {
    /// Context over the channels of `group`.
    pub fn for_group(image: &Image, reference: Option<&Image>, group: &str, metric: Metric) -> Result<Self> {
        let names = image.channels_in_group(group);
        if names.is_empty() {
            bail!("image '{}' has no channel group '{group}'", image.name());
        }
        Self::new(image, reference, names, metric)
    }

    /// Context over explicit channels of `image`; reference channels are
    /// matched by name.
    pub fn new(image: &Image, reference: Option<&Image>, names: Vec<String>, metric: Metric) -> Result<Self> {
        check_metric_channels(&names, metric, reference.is_some())?;

        let channels = names
            .iter()
            .map(|n| {
                image
                    .channel(n)
                    .ok_or_else(|| anyhow!("image '{}' has no channel '{n}'", image.name()))
            })
            .collect::<Result<Vec<_>>>()?;
        let references = names
            .iter()
            .map(|n| reference.and_then(|r| r.channel(n)))
            .collect();

        let only_alpha = names.iter().all(|n| is_alpha_channel(n));
        let blend_alpha: Vec<bool> = names.iter().map(|n| !only_alpha && is_alpha_channel(n)).collect();
        let colors = (0..names.len()).filter(|&i| !blend_alpha[i]).collect();
        let reference_offset = reference.map_or(IVec2::ZERO, |r| (r.size() - image.size()) / 2);

        Ok(Self {
            names,
            channels,
            references,
            blend_alpha,
            colors,
            reference_offset,
            has_reference: reference.is_some(),
            metric,
            size: image.size(),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether channel `ci` is blended with the reference alpha rather than compared.
    pub fn is_blended_alpha(&self, ci: usize) -> bool {
        self.blend_alpha[ci]
    }

    fn reference_channel(&self, ci: usize) -> Option<&Channel> {
        self.references[ci].as_deref()
    }

    fn reference_value(&self, ci: usize, pos: IVec2) -> f32 {
        self.reference_channel(ci)
            .and_then(|r| r.try_eval(pos))
            .unwrap_or(0.0)
    }

    /// Displayed value of channel `ci` at `pos`, which must lie inside the image.
    pub fn value_at(&self, ci: usize, pos: IVec2) -> f32 {
        let value = self.channels[ci].eval(pos);
        if !self.has_reference {
            return value;
        }

        let reference_pos = pos + self.reference_offset;
        if self.blend_alpha[ci] {
            return match self.reference_channel(ci) {
                Some(r) => 0.5 * (value + r.try_eval(reference_pos).unwrap_or(0.0)),
                None => value,
            };
        }

        if self.metric == Metric::RelativeSquaredError2 {
            let values = [0, 1, 2].map(|k| self.channels[self.colors[k]].eval(pos));
            let references = [0, 1, 2].map(|k| self.reference_value(self.colors[k], reference_pos));
            return apply_joint_relative_squared_error(values, references);
        }

        apply_metric(value, self.reference_value(ci, reference_pos), self.metric)
    }

    pub fn values_at(&self, pos: IVec2) -> Vec<f32> {
        (0..self.len()).map(|ci| self.value_at(ci, pos)).collect()
    }

    /// Whole-image plane of channel `ci`, rows computed in parallel.
    pub fn flatten_channel(&self, ci: usize) -> Vec<f32> {
        let width = self.size.x.max(0) as usize;
        let mut data = vec![0.0; width * self.size.y.max(0) as usize];
        if width == 0 {
            return data;
        }
        data.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = self.value_at(ci, IVec2::new(x as i32, y as i32));
            }
        });
        data
    }
}

/// Flatten a channel group into the channels that are displayed: raw values
/// without a reference, metric values against it otherwise. Result channels
/// are named by the upper-cased tail of the source channel.
pub fn channels_from_images(
    image: &Image,
    reference: Option<&Image>,
    group: &str,
    metric: Metric,
) -> Result<Vec<Channel>> {
    let context = ComparisonContext::for_group(image, reference, group, metric)?;
    let size = context.size();
    (0..context.len())
        .into_par_iter()
        .map(|ci| {
            let name = channel_tail(&context.names()[ci]).to_ascii_uppercase();
            Channel::from_data(name, size, context.flatten_channel(ci))
        })
        .collect()
}
