use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::identity::Caller;
use crate::model::Ms;

/// Complete every confirmed booking whose window ended by `now`.
/// Returns how many were completed.
pub async fn complete_elapsed(engine: &Engine, now: Ms) -> usize {
    let caller = Caller::system();
    let mut completed = 0;
    for id in engine.due_for_completion(now) {
        match engine.complete_booking(&caller, id).await {
            Ok(_) => completed += 1,
            // May have been cancelled since the scan.
            Err(e) => debug!("completion skip {id}: {e}"),
        }
    }
    completed
}

/// Background task that periodically completes elapsed bookings.
pub async fn run_completer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let n = complete_elapsed(&engine, engine.now_ms()).await;
        if n > 0 {
            info!("completed {n} elapsed bookings");
        }
    }
}

/// Background task that compacts the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction failed: {e}");
        }
        engine.notify.prune();
    }
}
