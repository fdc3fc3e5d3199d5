//! Viewer state around the canvas: the image list, selection, per-image
//! tonemap values, streamed updates and the work that has to happen on the UI
//! thread once per frame.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::{IVec2, Vec2};
use tracing::{debug, info, warn};

use crate::{
    app::{
        canvas::Canvas,
        file_dialog::{DialogResult, FileDialogThread},
        pixel_locator::{PixelLocator, SearchKind},
        types::{Direction, HistogramScale, Metric, Tonemap, TonemapSettings},
    },
    config::ViewerSettings,
    export,
    raster::{Box2i, Image},
    stats::build_worker_pool,
    ui::histogram::HistogramView,
};

/// A shown image that received pixel updates gets a new id only once its
/// current statistics have been ready for this long.
pub const BUMP_DELAY: Duration = Duration::from_millis(200);

pub type UiTask = Box<dyn FnOnce(&mut Viewer) + Send>;

fn round_to(value: f32, decimals: i32) -> f32 {
    let scale = 10f32.powi(decimals);
    (value * scale).round() / scale
}

pub struct Viewer {
    settings: ViewerSettings,
    canvas: Canvas,
    images: Vec<Arc<Image>>,
    current: Option<Arc<Image>>,
    reference: Option<Arc<Image>>,
    current_group: String,
    tonemaps: HashMap<u64, TonemapSettings>,
    sync_tonemapping: bool,
    to_bump: Vec<Arc<Image>>,
    locator: PixelLocator,
    histogram: HistogramView,
    tasks_tx: Sender<UiTask>,
    tasks_rx: Receiver<UiTask>,
    dialogs: FileDialogThread,
    opened_paths: Vec<PathBuf>,
    errors: Vec<String>,
}

impl Viewer {
    pub fn new(settings: ViewerSettings, canvas_size: Vec2) -> Result<Self> {
        let pool = build_worker_pool(settings.worker_threads)?;
        let canvas = Canvas::from_settings(canvas_size, &settings, pool);
        let (tasks_tx, tasks_rx) = unbounded();
        Ok(Self {
            histogram: HistogramView::empty(settings.histogram_scale),
            sync_tonemapping: settings.sync_tonemapping,
            settings,
            canvas,
            images: Vec::new(),
            current: None,
            reference: None,
            current_group: String::new(),
            tonemaps: HashMap::new(),
            to_bump: Vec::new(),
            locator: PixelLocator::default(),
            tasks_tx,
            tasks_rx,
            dialogs: FileDialogThread::new(),
            opened_paths: Vec::new(),
            errors: Vec::new(),
        })
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn current_image(&self) -> Option<&Arc<Image>> {
        self.current.as_ref()
    }

    pub fn current_reference(&self) -> Option<&Arc<Image>> {
        self.reference.as_ref()
    }

    pub fn current_group(&self) -> &str {
        &self.current_group
    }

    pub fn locator(&self) -> &PixelLocator {
        &self.locator
    }

    pub fn histogram(&self) -> &HistogramView {
        &self.histogram
    }

    pub fn image_by_name(&self, name: &str) -> Option<Arc<Image>> {
        self.images.iter().find(|i| i.name() == name).cloned()
    }

    fn index_of(&self, image: &Arc<Image>) -> Option<usize> {
        self.images.iter().position(|i| Arc::ptr_eq(i, image))
    }

    /// Append an image. The first image is always selected.
    pub fn add_image(&mut self, image: Arc<Image>, select: bool) {
        info!("[viewer] added '{}' ({}x{})", image.name(), image.size().x, image.size().y);
        self.images.push(Arc::clone(&image));
        if select || self.images.len() == 1 {
            self.select_image(Some(image));
        }
    }

    /// Remove an image; a removed selection moves to the next image, or the
    /// previous one when the removed image was last.
    pub fn remove_image(&mut self, image: &Arc<Image>) {
        let Some(index) = self.index_of(image) else {
            return;
        };
        self.images.remove(index);
        self.tonemaps.remove(&image.key());
        self.to_bump.retain(|i| !Arc::ptr_eq(i, image));

        if self.images.is_empty() {
            self.select_image(None);
            self.select_reference(None);
            return;
        }
        let next = self
            .images
            .get(index)
            .or_else(|| self.images.get(index.saturating_sub(1)))
            .cloned();
        if self.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, image)) {
            self.select_image(next.clone());
        }
        if self.reference.as_ref().is_some_and(|r| Arc::ptr_eq(r, image)) {
            self.select_reference(next);
        }
    }

    pub fn remove_all_images(&mut self) {
        self.images.clear();
        self.tonemaps.clear();
        self.to_bump.clear();
        self.select_image(None);
        self.select_reference(None);
    }

    /// Put `replacement` at the list position of `image`. A replaced current
    /// image or reference is re-selected as its replacement, and stored tonemap
    /// values carry over. An `image` that is not in the list is appended.
    pub fn replace_image(&mut self, image: &Arc<Image>, replacement: Arc<Image>, select: bool) {
        let Some(index) = self.index_of(image) else {
            self.add_image(replacement, select);
            return;
        };
        info!("[viewer] replaced '{}' with '{}'", image.name(), replacement.name());
        self.images[index] = Arc::clone(&replacement);
        if let Some(stored) = self.tonemaps.remove(&image.key()) {
            self.tonemaps.insert(replacement.key(), stored);
        }
        self.to_bump.retain(|i| !Arc::ptr_eq(i, image));

        let was_current = self.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, image));
        let was_reference = self.reference.as_ref().is_some_and(|r| Arc::ptr_eq(r, image));
        if was_reference {
            self.select_reference(Some(Arc::clone(&replacement)));
        }
        if select || was_current {
            self.select_image(Some(replacement));
        }
    }

    /// Replace the listed image of the same name, or append when none matches.
    /// Loaders re-delivering a file go through here.
    pub fn add_or_replace_image(&mut self, image: Arc<Image>, select: bool) {
        match self.image_by_name(image.name()) {
            Some(existing) => self.replace_image(&existing, image, select),
            None => self.add_image(image, select),
        }
    }

    /// Move the image at `from` so that it ends up at index `to`.
    pub fn move_image_in_list(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.images.len();
        if from >= len || to >= len {
            bail!("cannot move image {from} to {to} in a list of {len}");
        }
        let image = self.images.remove(from);
        self.images.insert(to, image);
        Ok(())
    }

    /// The neighbor of `image` in `direction`, wrapping around. Unknown or
    /// missing images count from the first one.
    pub fn next_image(&self, image: Option<&Arc<Image>>, direction: Direction) -> Option<Arc<Image>> {
        let len = self.images.len();
        if len == 0 {
            return None;
        }
        let start = image.and_then(|i| self.index_of(i)).unwrap_or(0);
        let next = match direction {
            Direction::Forward => (start + 1) % len,
            Direction::Backward => (start + len - 1) % len,
        };
        self.images.get(next).cloned()
    }

    pub fn select_next_image(&mut self, direction: Direction) {
        let next = self.next_image(self.current.as_ref(), direction);
        self.select_image(next);
    }

    pub fn select_next_reference(&mut self, direction: Direction) {
        let next = self.next_image(self.reference.as_ref(), direction);
        self.select_reference(next);
    }

    /// The channel group of the current image next to `group`, wrapping
    /// around. An unknown group counts from the first one.
    pub fn next_group(&self, group: &str, direction: Direction) -> String {
        let Some(image) = &self.current else {
            return self.current_group.clone();
        };
        let groups = image.groups();
        if groups.is_empty() {
            return self.current_group.clone();
        }
        let len = groups.len();
        let start = groups.iter().position(|g| g.name == group).unwrap_or(0);
        let next = match direction {
            Direction::Forward => (start + 1) % len,
            Direction::Backward => (start + len - 1) % len,
        };
        groups[next].name.clone()
    }

    pub fn select_next_group(&mut self, direction: Direction) {
        let next = self.next_group(&self.current_group, direction);
        self.select_group(&next);
    }

    /// Show `image` with the tonemap values stored for it.
    pub fn select_image(&mut self, image: Option<Arc<Image>>) {
        self.locator.reset();
        self.current = image.clone();
        self.canvas.set_image(image.clone());
        let Some(image) = image else {
            return;
        };
        self.select_group(&self.current_group.clone());

        let stored = self
            .tonemaps
            .get(&image.key())
            .copied()
            .unwrap_or(self.settings.default_tonemap);
        self.set_exposure(stored.exposure);
        self.set_offset(stored.offset);
        self.set_gamma(stored.gamma);
    }

    /// Select a channel group of the current image, falling back to its
    /// first group when it has no group of that name.
    pub fn select_group(&mut self, group: &str) {
        let Some(image) = &self.current else {
            self.current_group = group.to_string();
            return;
        };
        self.current_group = match image.group(group) {
            Some(g) => g.name.clone(),
            None => image.groups().first().map(|g| g.name.clone()).unwrap_or_default(),
        };
        self.canvas.set_requested_group(self.current_group.clone());
    }

    pub fn select_reference(&mut self, reference: Option<Arc<Image>>) {
        self.reference = reference.clone();
        self.canvas.set_reference(reference);
    }

    pub fn sync_tonemapping(&self) -> bool {
        self.sync_tonemapping
    }

    pub fn set_sync_tonemapping(&mut self, sync: bool) {
        self.sync_tonemapping = sync;
    }

    /// Stored tonemap values of an image, if any were set.
    pub fn tonemap_for(&self, image: &Image) -> Option<TonemapSettings> {
        self.tonemaps.get(&image.key()).copied()
    }

    fn store_tonemap(&mut self, update: impl Fn(&mut TonemapSettings)) {
        let defaults = self.settings.default_tonemap;
        let targets: Vec<u64> = if self.sync_tonemapping {
            self.images.iter().chain(self.current.iter()).map(|i| i.key()).collect()
        } else {
            self.current.iter().map(|i| i.key()).collect()
        };
        for key in targets {
            update(self.tonemaps.entry(key).or_insert(defaults));
        }
    }

    /// Rounded to one decimal.
    pub fn set_exposure(&mut self, exposure: f32) {
        let exposure = round_to(exposure, 1);
        self.store_tonemap(|t| t.exposure = exposure);
        self.canvas.set_exposure(exposure);
    }

    /// Rounded to two decimals.
    pub fn set_offset(&mut self, offset: f32) {
        let offset = round_to(offset, 2);
        self.store_tonemap(|t| t.offset = offset);
        self.canvas.set_offset(offset);
    }

    /// Rounded to two decimals.
    pub fn set_gamma(&mut self, gamma: f32) {
        let gamma = round_to(gamma, 2);
        self.store_tonemap(|t| t.gamma = gamma);
        self.canvas.set_gamma(gamma);
    }

    pub fn set_tonemap(&mut self, tonemap: Tonemap) {
        self.canvas.set_tonemap(tonemap);
    }

    pub fn set_metric(&mut self, metric: Metric) {
        self.canvas.set_metric(metric);
    }

    pub fn set_histogram_scale(&mut self, scale: HistogramScale) {
        self.canvas.set_histogram_scale(scale);
    }

    /// Map the value range of the current group onto `[0, 1]`.
    pub fn normalize_exposure_and_offset(&mut self) {
        let Some(image) = self.current.clone() else {
            return;
        };
        let mut minimum = f32::INFINITY;
        let mut maximum = f32::NEG_INFINITY;
        for name in image.channels_in_group(&self.current_group) {
            if let Some(channel) = image.channel(&name) {
                let (min, max, _) = channel.min_max_mean();
                minimum = minimum.min(min);
                maximum = maximum.max(max);
            }
        }
        if !(maximum > minimum) || !(maximum - minimum).is_finite() {
            debug!("[viewer] nothing to normalize in '{}'", image.name());
            return;
        }
        let factor = 1.0 / (maximum - minimum);
        self.set_exposure(factor.log2());
        self.set_offset(-minimum * factor);
    }

    /// Back to default tonemap values; with sync on, every stored value is
    /// forgotten first.
    pub fn reset_image(&mut self, reset_view: bool) {
        if self.sync_tonemapping {
            self.tonemaps.clear();
        }
        let defaults = self.settings.default_tonemap;
        self.set_exposure(defaults.exposure);
        self.set_offset(defaults.offset);
        self.set_gamma(defaults.gamma);
        if reset_view {
            self.canvas.transform_mut().reset();
        }
    }

    fn is_shown(&self, image: &Arc<Image>) -> bool {
        [&self.current, &self.reference]
            .into_iter()
            .flatten()
            .any(|shown| Arc::ptr_eq(shown, image))
    }

    /// Write streamed pixels into a channel. Hidden images get a new id right
    /// away; shown ones are bumped from [`Self::draw_contents`] so statistics
    /// are not recomputed on every partial update.
    pub fn update_image(
        &mut self,
        name: &str,
        select: bool,
        channel: &str,
        origin: IVec2,
        size: IVec2,
        data: &[f32],
    ) -> Result<()> {
        let Some(image) = self.image_by_name(name) else {
            warn!("[viewer] image '{name}' could not be updated because it does not exist");
            return Ok(());
        };
        image.update_channel(channel, origin, size, data)?;
        if select {
            self.select_image(Some(Arc::clone(&image)));
        }
        if !self.is_shown(&image) {
            image.bump_id();
        } else if !self.to_bump.iter().any(|i| Arc::ptr_eq(i, &image)) {
            self.to_bump.push(image);
        }
        Ok(())
    }

    pub fn pending_bumps(&self) -> usize {
        self.to_bump.len()
    }

    /// Handle for other threads to queue work on the UI thread.
    pub fn task_sender(&self) -> Sender<UiTask> {
        self.tasks_tx.clone()
    }

    pub fn schedule_to_ui_thread(&self, task: impl FnOnce(&mut Viewer) + Send + 'static) {
        let _ = self.tasks_tx.send(Box::new(task));
    }

    fn flush_bumps(&mut self, now: Instant) {
        let statistics_ready_at = self
            .canvas
            .canvas_statistics()
            .ok()
            .flatten()
            .and_then(|s| s.became_ready_at());
        let settled = statistics_ready_at.is_some_and(|t| now.saturating_duration_since(t) > BUMP_DELAY);

        let pending = std::mem::take(&mut self.to_bump);
        for image in pending {
            if !self.is_shown(&image) || settled {
                image.bump_id();
            } else {
                self.to_bump.push(image);
            }
        }
    }

    fn refresh_histogram(&mut self) {
        let scale = self.canvas.histogram_scale();
        self.histogram = match self.canvas.canvas_statistics() {
            Ok(Some(statistics)) if statistics.is_ready() => HistogramView::from_statistics(statistics.get(), scale),
            Ok(Some(_)) => return,
            Ok(None) => HistogramView::empty(scale),
            Err(e) => {
                debug!("[viewer] no statistics: {e:#}");
                HistogramView::empty(scale)
            }
        };
    }

    /// Per-frame UI thread work: queued tasks, dialog results, deferred id
    /// bumps and the histogram.
    pub fn draw_contents(&mut self, now: Instant) {
        while let Ok(task) = self.tasks_rx.try_recv() {
            task(self);
        }
        while let Some(result) = self.dialogs.try_recv() {
            match result {
                DialogResult::Open(paths) => self.opened_paths.extend(paths),
                DialogResult::Save(path) => {
                    if let Err(e) = self.canvas.save_image(&path) {
                        self.report_error(format!("Failed to save image: {e:#}"));
                    }
                }
                DialogResult::Cancelled => {}
            }
        }
        self.flush_bumps(now);
        self.refresh_histogram();
    }

    pub fn open_image_dialog(&mut self) -> bool {
        self.dialogs.open_images()
    }

    pub fn save_image_dialog(&mut self) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.dialogs.save_image()
    }

    /// Paths chosen in open dialogs, for the image loader.
    pub fn take_opened_paths(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.opened_paths)
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[viewer] {message}");
        self.errors.push(message);
    }

    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// Center the current image on `pixel` at the current zoom.
    pub fn focus_pixel(&mut self, pixel: IVec2) {
        let Some(image) = &self.current else {
            return;
        };
        let size = image.size();
        self.canvas.transform_mut().focus_pixel(pixel, size);
    }

    fn focus_found(&mut self, found: Option<IVec2>) -> Option<IVec2> {
        if let Some(pixel) = found {
            self.focus_pixel(pixel);
        }
        found
    }

    pub fn find_max(&mut self) -> Result<Option<IVec2>> {
        let found = self.locator.find_extreme(&self.canvas, SearchKind::Maximum)?;
        Ok(self.focus_found(found))
    }

    pub fn find_min(&mut self) -> Result<Option<IVec2>> {
        let found = self.locator.find_extreme(&self.canvas, SearchKind::Minimum)?;
        Ok(self.focus_found(found))
    }

    pub fn find_range(&mut self, min: f32, max: f32) -> Result<Option<IVec2>> {
        let found = self.locator.find_range(&self.canvas, min, max)?;
        Ok(self.focus_found(found))
    }

    pub fn find_next(&mut self) -> Option<IVec2> {
        let found = self.locator.find_next(&self.canvas);
        self.focus_found(found)
    }

    /// Set the crop from four integer fields; rejects unparsable text and
    /// empty boxes.
    pub fn set_crop_from_text(&mut self, min_x: &str, min_y: &str, max_x: &str, max_y: &str) -> bool {
        let parsed: Option<Vec<i32>> = [min_x, min_y, max_x, max_y]
            .iter()
            .map(|s| s.trim().parse().ok())
            .collect();
        let Some([x0, y0, x1, y1]) = parsed.as_deref().and_then(|v| <[i32; 4]>::try_from(v).ok()) else {
            return false;
        };
        if x0 >= x1 || y0 >= y1 {
            return false;
        }
        self.canvas.set_crop(Some(Box2i::new(IVec2::new(x0, y0), IVec2::new(x1, y1))));
        true
    }

    /// Copy what the canvas shows (crop applied, resized by the configured
    /// ratios) to the clipboard. The clipboard write runs on its own thread;
    /// failures come back through the task queue.
    pub fn copy_to_clipboard(&self) -> Result<()> {
        if self.current.is_none() {
            bail!("no image selected for copy");
        }
        let size = self.canvas.export_size();
        if size.x == 0 || size.y == 0 {
            bail!("image canvas has no image data to copy to clipboard");
        }
        let hdr = self.canvas.hdr_image_data(true)?;
        let ratio = Vec2::from(self.settings.copy_resize);
        let (resized, resized_size) = export::resize_rgba(&hdr, size, ratio, self.settings.copy_resize_mode)?;
        let ldr = export::ldr_from_hdr(&resized, self.canvas.tonemap_settings(), self.canvas.tonemap());

        let tasks = self.task_sender();
        std::thread::Builder::new()
            .name("clipboard".to_string())
            .spawn(move || {
                if let Err(e) = export::copy_to_clipboard(ldr, resized_size) {
                    let message = format!("Failed to copy image to clipboard: {e:#}");
                    let _ = tasks.send(Box::new(move |viewer: &mut Viewer| viewer.report_error(message)));
                }
            })?;
        Ok(())
    }
}
