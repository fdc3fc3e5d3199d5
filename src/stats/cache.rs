use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::Result;
use rayon::ThreadPool;
use tracing::{debug, warn};

use crate::{
    app::types::{HistogramScale, Metric},
    raster::Image,
    stats::{CanvasStatistics, Lazy, check_metric_channels, compute_canvas_statistics},
};

/// Identifies one statistics computation. Image ids are versions, so a bumped
/// image never hits an old entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatisticsKey {
    pub image_id: u64,
    pub channels: String,
    pub reference: Option<(u64, Metric)>,
    pub histogram_scale: HistogramScale,
}

impl StatisticsKey {
    pub fn new(
        image: &Image,
        reference: Option<&Image>,
        channels: &[String],
        metric: Metric,
        histogram_scale: HistogramScale,
    ) -> Self {
        Self {
            image_id: image.id(),
            channels: channels.join(","),
            reference: reference.map(|r| (r.id(), metric)),
            histogram_scale,
        }
    }
}

impl fmt::Display for StatisticsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.image_id, self.channels)?;
        if let Some((reference_id, metric)) = self.reference {
            write!(f, "-{reference_id}-{}", metric.label())?;
        }
        write!(f, "-{}", self.histogram_scale.label())
    }
}

struct Entry {
    image_key: u64,
    statistics: Arc<Lazy<CanvasStatistics>>,
}

pub struct StatisticsCache {
    entries: HashMap<StatisticsKey, Entry>,
    pool: Arc<ThreadPool>,
}

impl StatisticsCache {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self {
            entries: HashMap::new(),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached statistics for the current versions of `image` and `reference`,
    /// scheduling a computation on the worker pool on a miss. Entries of
    /// older versions of `image` are dropped.
    pub fn get_or_request(
        &mut self,
        image: &Arc<Image>,
        reference: Option<&Arc<Image>>,
        group: &str,
        metric: Metric,
        histogram_scale: HistogramScale,
    ) -> Result<Arc<Lazy<CanvasStatistics>>> {
        let channels = image.channels_in_group(group);
        check_metric_channels(&channels, metric, reference.is_some())?;

        let key = StatisticsKey::new(image, reference.map(Arc::as_ref), &channels, metric, histogram_scale);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(&entry.statistics));
        }

        let current_id = image.id();
        let image_key = image.key();
        self.entries
            .retain(|k, e| e.image_key != image_key || k.image_id == current_id);

        debug!("[stats] scheduling {key}");
        let job_image = Arc::clone(image);
        let job_reference = reference.map(Arc::clone);
        let job_group = group.to_string();
        let job_key = key.to_string();
        let statistics = Arc::new(Lazy::new(move || {
            compute_canvas_statistics(&job_image, job_reference.as_deref(), &job_group, metric, histogram_scale)
                .unwrap_or_else(|e| {
                    warn!("[stats] {job_key} failed: {e:#}");
                    CanvasStatistics::default()
                })
        }));
        statistics.compute_async(&self.pool);

        self.entries.insert(
            key,
            Entry {
                image_key,
                statistics: Arc::clone(&statistics),
            },
        );
        Ok(statistics)
    }
}

#[cfg(test)]
mod tests {
    use glam::IVec2;

    use super::*;
    use crate::{raster::Channel, stats::build_worker_pool};

    fn gray(name: &str, v: f32) -> Arc<Image> {
        let size = IVec2::new(4, 4);
        Arc::new(Image::new(name, vec![Channel::from_data("Y", size, vec![v; 16]).unwrap()]).unwrap())
    }

    #[test]
    fn key_text_matches_layout() {
        let image = gray("a", 1.0);
        let reference = gray("b", 1.0);
        let channels = vec!["Y".to_string()];
        let with_ref = StatisticsKey::new(&image, Some(&*reference), &channels, Metric::SquaredError, HistogramScale::Log);
        assert_eq!(with_ref.to_string(), format!("{}-Y-{}-SE-Log", image.id(), reference.id()));
        let without = StatisticsKey::new(&image, None, &channels, Metric::SquaredError, HistogramScale::Log);
        assert_eq!(without.to_string(), format!("{}-Y-Log", image.id()));
    }

    #[test]
    fn same_key_returns_same_handle_until_bumped() {
        let mut cache = StatisticsCache::new(build_worker_pool(Some(2)).unwrap());
        let image = gray("a", 0.5);
        let first = cache.get_or_request(&image, None, "Y", Metric::Error, HistogramScale::Linear).unwrap();
        let second = cache.get_or_request(&image, None, "Y", Metric::Error, HistogramScale::Linear).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get().mean, 0.5);

        image.bump_id();
        let third = cache.get_or_request(&image, None, "Y", Metric::Error, HistogramScale::Linear).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reference_less_key_ignores_metric() {
        let mut cache = StatisticsCache::new(build_worker_pool(Some(1)).unwrap());
        let image = gray("a", 0.5);
        let a = cache.get_or_request(&image, None, "Y", Metric::Error, HistogramScale::Log).unwrap();
        let b = cache.get_or_request(&image, None, "Y", Metric::SquaredError, HistogramScale::Log).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn joint_rse_precondition_is_checked_before_scheduling() {
        let mut cache = StatisticsCache::new(build_worker_pool(Some(1)).unwrap());
        let image = gray("a", 0.5);
        let reference = gray("b", 0.5);
        let result = cache.get_or_request(&image, Some(&reference), "Y", Metric::RelativeSquaredError2, HistogramScale::Log);
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
