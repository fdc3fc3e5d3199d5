use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Shared pool for statistics work. `threads = None` uses one thread per core.
pub fn build_worker_pool(threads: Option<usize>) -> Result<Arc<ThreadPool>> {
    let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("stats-worker-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    let pool = builder.build().context("failed to build statistics worker pool")?;
    tracing::debug!("[stats] worker pool with {} threads", pool.current_num_threads());
    Ok(Arc::new(pool))
}
