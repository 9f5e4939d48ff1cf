use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, now_ms};
use crate::model::Ms;
use crate::observability::STALE_LOCKS_RELEASED_TOTAL;

/// One sweep: release every advisory lock older than its TTL. Returns how many were released.
pub async fn reap_stale_locks(engine: &Engine, now: Ms) -> usize {
    let mut released = 0;
    for payment_id in engine.collect_stale_locks(now) {
        match engine.release_stale_lock(payment_id, now).await {
            Ok(true) => {
                warn!(%payment_id, "released stale payment lock");
                metrics::counter!(STALE_LOCKS_RELEASED_TOTAL).increment(1);
                released += 1;
            }
            // Finished or taken over between collect and release
            Ok(false) => {}
            Err(e) => debug!(%payment_id, "reaper skip: {e}"),
        }
    }
    released
}

/// Background task that periodically clears advisory locks left by crashed webhook workers.
pub async fn run_reaper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        reap_stale_locks(&engine, now_ms()).await;
    }
}

/// Background task that rewrites the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
