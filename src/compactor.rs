use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::repository::DurableStore;

const COMPACT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<DurableStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Compact when at least `threshold` events were appended since the last
/// compaction. Returns whether a compaction ran and succeeded.
pub async fn compact_if_needed(store: &DurableStore, threshold: u64) -> bool {
    let appended = store.appends_since_compact().await;
    if appended < threshold {
        debug!("compaction skipped: {appended}/{threshold} appends");
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            error!("compaction failed: {e}");
            false
        }
    }
}
