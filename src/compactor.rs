use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::MemoryStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once it has grown by
/// `threshold` appends since the last compaction.
pub async fn run_compactor(store: Arc<MemoryStore>, notify: Arc<crate::notify::NotifyHub>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
        let pruned = notify.prune();
        if pruned > 0 {
            debug!("pruned {pruned} idle change-feed channels");
        }
    }
}

/// One compaction check. Returns whether the log was rewritten.
pub async fn compact_if_needed(store: &MemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed after {appends} appends: {e}");
            false
        }
    }
}
