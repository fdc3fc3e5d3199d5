//! In-memory HDR rasters: named float channels, images built from them, and
//! integer crop rectangles.
//!
//! An [`Image`] is shared between the UI thread and statistics workers as an
//! `Arc<Image>`. Every channel is an `Arc<Channel>` snapshot behind its own
//! `RwLock`, held only long enough to clone or swap the `Arc`. Workers read
//! the snapshot they took; a streamed pixel update copies the channel when a
//! snapshot is still out and never waits for a worker to finish. The image id
//! is a version number: any change to the pixels that should invalidate cached
//! statistics must be followed by [`Image::bump_id`].

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use glam::IVec2;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A single named plane of `f32` samples, stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    name: String,
    size: IVec2,
    data: Vec<f32>,
}

impl Channel {
    /// Zero-filled channel.
    pub fn new(name: impl Into<String>, size: IVec2) -> Self {
        let len = (size.x.max(0) as usize) * (size.y.max(0) as usize);
        Self {
            name: name.into(),
            size,
            data: vec![0.0; len],
        }
    }

    pub fn from_data(name: impl Into<String>, size: IVec2, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        if size.x < 0 || size.y < 0 {
            bail!("channel '{name}' has negative size {}x{}", size.x, size.y);
        }
        let expected = size.x as usize * size.y as usize;
        if data.len() != expected {
            bail!(
                "channel '{name}' expects {expected} samples for {}x{}, got {}",
                size.x,
                size.y,
                data.len()
            );
        }
        Ok(Self { name, size, data })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Sample at integer pixel coordinates. Callers clamp to the channel size.
    pub fn eval(&self, pos: IVec2) -> f32 {
        debug_assert!(
            pos.x >= 0 && pos.y >= 0 && pos.x < self.size.x && pos.y < self.size.y,
            "pixel {pos} outside channel of size {}",
            self.size
        );
        self.data[pos.y as usize * self.size.x as usize + pos.x as usize]
    }

    pub fn eval_index(&self, index: usize) -> f32 {
        self.data[index]
    }

    /// Sample, or `None` when `pos` falls outside the channel.
    pub fn try_eval(&self, pos: IVec2) -> Option<f32> {
        if pos.x < 0 || pos.y < 0 || pos.x >= self.size.x || pos.y >= self.size.y {
            return None;
        }
        Some(self.eval(pos))
    }

    pub fn tail(&self) -> &str {
        channel_tail(&self.name)
    }

    pub fn is_alpha(&self) -> bool {
        is_alpha_channel(&self.name)
    }

    /// Overwrite the `size` rectangle starting at `origin` with row-major `data`.
    pub fn update_region(&mut self, origin: IVec2, size: IVec2, data: &[f32]) -> Result<()> {
        if origin.x < 0
            || origin.y < 0
            || size.x < 0
            || size.y < 0
            || origin.x + size.x > self.size.x
            || origin.y + size.y > self.size.y
        {
            bail!(
                "region {}x{} at ({}, {}) does not fit channel '{}' of size {}x{}",
                size.x,
                size.y,
                origin.x,
                origin.y,
                self.name,
                self.size.x,
                self.size.y
            );
        }
        let width = size.x as usize;
        if data.len() != width * size.y as usize {
            bail!(
                "region {}x{} needs {} samples, got {}",
                size.x,
                size.y,
                width * size.y as usize,
                data.len()
            );
        }
        if width == 0 {
            return Ok(());
        }

        let stride = self.size.x as usize;
        for (row, src) in data.chunks_exact(width).enumerate() {
            let start = (origin.y as usize + row) * stride + origin.x as usize;
            self.data[start..start + width].copy_from_slice(src);
        }
        Ok(())
    }

    /// Copy of the part of this channel inside `region`, clipped to its bounds.
    pub fn cropped(&self, region: Box2i) -> Channel {
        let region = region.intersect(&Box2i::new(IVec2::ZERO, self.size));
        let size = region.size();
        if size.x == 0 || size.y == 0 {
            return Channel::new(self.name.clone(), size);
        }
        let mut data = Vec::with_capacity(size.x as usize * size.y as usize);
        for y in region.min.y..region.min.y + size.y {
            let start = (y * self.size.x + region.min.x) as usize;
            data.extend_from_slice(&self.data[start..start + size.x as usize]);
        }
        Channel {
            name: self.name.clone(),
            size,
            data,
        }
    }

    /// `(min, max, mean)` over all samples; zeros for an empty channel.
    pub fn min_max_mean(&self) -> (f32, f32, f32) {
        if self.data.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &v in &self.data {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        (min, max, (sum / self.data.len() as f64) as f32)
    }
}

/// The part of a channel name after the last `.` (`"diffuse.R"` -> `"R"`).
pub fn channel_tail(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(_, tail)| tail)
}

/// Layer prefix including the trailing dot (`"diffuse.R"` -> `"diffuse."`).
pub fn channel_head(name: &str) -> &str {
    name.rfind('.').map_or("", |i| &name[..=i])
}

pub fn is_alpha_channel(name: &str) -> bool {
    channel_tail(name).eq_ignore_ascii_case("a")
}

/// Display color for a channel's histogram curve and value labels.
pub fn channel_color(name: &str) -> [f32; 4] {
    match channel_tail(name).to_ascii_uppercase().as_str() {
        "R" | "X" => [0.9, 0.3, 0.3, 1.0],
        "G" | "Y" => [0.3, 0.9, 0.3, 1.0],
        "B" | "Z" => [0.2, 0.4, 0.95, 1.0],
        _ => [1.0, 1.0, 1.0, 1.0],
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelGroup {
    pub name: String,
    pub channels: Vec<String>,
}

/// Where each RGBA slot of a display/export pixel comes from, given the
/// channel list of a group. `None` in the color slots means 0, `None` in the
/// alpha slot means 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgbaLayout {
    pub rgb: [Option<usize>; 3],
    pub alpha: Option<usize>,
}

impl RgbaLayout {
    pub fn for_channels<S: AsRef<str>>(names: &[S]) -> Self {
        let only_alpha = !names.is_empty() && names.iter().all(|n| is_alpha_channel(n.as_ref()));
        if only_alpha {
            return Self {
                rgb: [Some(0); 3],
                alpha: None,
            };
        }

        let colors: Vec<usize> = (0..names.len())
            .filter(|&i| !is_alpha_channel(names[i].as_ref()))
            .collect();
        let alpha = (0..names.len()).find(|&i| is_alpha_channel(names[i].as_ref()));
        let rgb = match colors.as_slice() {
            [] => [None; 3],
            [single] => [Some(*single); 3],
            [a, b] => [Some(*a), Some(*b), None],
            [a, b, c, ..] => [Some(*a), Some(*b), Some(*c)],
        };
        Self { rgb, alpha }
    }
}

fn derive_groups(names: &[String]) -> Vec<ChannelGroup> {
    let mut layers: Vec<&str> = Vec::new();
    for name in names {
        let head = channel_head(name);
        if !layers.contains(&head) {
            layers.push(head);
        }
    }

    let mut groups = Vec::new();
    for layer in layers {
        let in_layer: Vec<&String> = names.iter().filter(|n| channel_head(n) == layer).collect();
        let find = |tail: &str| {
            in_layer
                .iter()
                .find(|n| channel_tail(n).eq_ignore_ascii_case(tail))
                .map(|n| (*n).clone())
        };

        let mut grouped: Vec<String> = Vec::new();
        if let (Some(r), Some(g), Some(b)) = (find("R"), find("G"), find("B")) {
            grouped = vec![r, g, b];
            let mut suffix = "RGB";
            if let Some(a) = find("A") {
                grouped.push(a);
                suffix = "RGBA";
            }
            groups.push(ChannelGroup {
                name: format!("{layer}{suffix}"),
                channels: grouped.clone(),
            });
        }

        for name in in_layer {
            if !grouped.contains(name) {
                groups.push(ChannelGroup {
                    name: name.clone(),
                    channels: vec![name.clone()],
                });
            }
        }
    }
    groups
}

/// A named image: equally sized channels plus derived channel groups.
#[derive(Debug)]
pub struct Image {
    name: String,
    size: IVec2,
    key: u64,
    id: AtomicU64,
    channels: Vec<RwLock<Arc<Channel>>>,
    names: Vec<String>,
    index: HashMap<String, usize>,
    groups: Vec<ChannelGroup>,
}

impl Image {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Result<Self> {
        let name = name.into();
        let Some(first) = channels.first() else {
            bail!("image '{name}' has no channels");
        };
        let size = first.size();

        let mut index = HashMap::new();
        let mut names = Vec::with_capacity(channels.len());
        for (i, channel) in channels.iter().enumerate() {
            if channel.size() != size {
                bail!(
                    "channel '{}' of image '{name}' is {}x{}, expected {}x{}",
                    channel.name(),
                    channel.size().x,
                    channel.size().y,
                    size.x,
                    size.y
                );
            }
            if index.insert(channel.name().to_string(), i).is_some() {
                bail!("image '{name}' has duplicate channel '{}'", channel.name());
            }
            names.push(channel.name().to_string());
        }

        let groups = derive_groups(&names);
        let key = next_id();
        Ok(Self {
            name,
            size,
            key,
            id: AtomicU64::new(key),
            channels: channels.into_iter().map(|c| RwLock::new(Arc::new(c))).collect(),
            names,
            index,
            groups,
        })
    }

    /// Build from interleaved samples with one channel per entry of `channel_names`.
    pub fn from_interleaved<S: AsRef<str>>(
        name: impl Into<String>,
        size: IVec2,
        channel_names: &[S],
        samples: &[f32],
    ) -> Result<Self> {
        let n = channel_names.len();
        if n == 0 {
            bail!("interleaved image needs at least one channel name");
        }
        let pixels = size.x.max(0) as usize * size.y.max(0) as usize;
        if samples.len() != pixels * n {
            bail!(
                "expected {} interleaved samples for {}x{}x{n}, got {}",
                pixels * n,
                size.x,
                size.y,
                samples.len()
            );
        }
        let channels = channel_names
            .iter()
            .enumerate()
            .map(|(c, channel_name)| {
                let data: Vec<f32> = samples.iter().skip(c).step_by(n).copied().collect();
                Channel::from_data(channel_name.as_ref(), size, data)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, channels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn pixel_count(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    /// Stable identity of this image for its whole lifetime.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Version id; changes on every [`Image::bump_id`].
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn bump_id(&self) {
        self.id.store(next_id(), Ordering::Release);
    }

    pub fn channel_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Current snapshot of a channel. Later updates do not change it.
    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        let i = *self.index.get(name)?;
        Some(Arc::clone(&self.channels[i].read().unwrap_or_else(PoisonError::into_inner)))
    }

    pub fn groups(&self) -> &[ChannelGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&ChannelGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Channel names of a group; empty for an unknown group.
    pub fn channels_in_group(&self, group: &str) -> Vec<String> {
        self.group(group)
            .map(|g| g.channels.clone())
            .unwrap_or_default()
    }

    pub fn update_channel(&self, name: &str, origin: IVec2, size: IVec2, data: &[f32]) -> Result<()> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| anyhow!("image '{}' has no channel '{name}'", self.name))?;
        let mut channel = self.channels[i].write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut channel).update_region(origin, size, data)
    }

    /// RGBA interleaved texels for a group, laid out with [`RgbaLayout`].
    pub fn texture_rgba(&self, group: &str) -> Vec<f32> {
        let names = self.channels_in_group(group);
        let layout = RgbaLayout::for_channels(&names);
        let channels: Vec<_> = names.iter().filter_map(|n| self.channel(n)).collect();
        let mut out = vec![0.0; self.pixel_count() * 4];
        if channels.len() != names.len() {
            return out;
        }
        for (i, px) in out.chunks_exact_mut(4).enumerate() {
            for (slot, source) in layout.rgb.iter().enumerate() {
                px[slot] = source.map_or(0.0, |c| channels[c].eval_index(i));
            }
            px[3] = layout.alpha.map_or(1.0, |c| channels[c].eval_index(i));
        }
        out
    }

    /// [`Image::texture_rgba`] packed as half floats for an `Rgba16Float` upload.
    pub fn texture_rgba16f(&self, group: &str) -> Vec<half::f16> {
        self.texture_rgba(group)
            .into_iter()
            .map(half::f16::from_f32)
            .collect()
    }
}

/// Half-open integer rectangle `[min, max)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Box2i {
    pub min: IVec2,
    pub max: IVec2,
}

impl Box2i {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    /// Per-axis ordered copy.
    pub fn sanitized(self) -> Self {
        Self {
            min: self.min.min(self.max),
            max: self.min.max(self.max),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.x < self.max.x && self.min.y < self.max.y
    }

    pub fn size(&self) -> IVec2 {
        (self.max - self.min).max(IVec2::ZERO)
    }

    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }

    pub fn intersect(&self, other: &Box2i) -> Box2i {
        Box2i {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }
}
