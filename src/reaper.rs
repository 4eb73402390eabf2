use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::observability::COMPACTIONS_TOTAL;
use crate::reconcile::ReconciliationQueue;
use crate::store::Store;

/// Periodically releases expired slot locks and drops stale rate-limit windows.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep(&engine).await;
    }
}

/// One reaper pass. Returns the number of locks released.
pub async fn sweep(engine: &Engine) -> usize {
    let reaped = engine.reap_expired_locks().await;
    let swept = engine.store().limiter().sweep(engine.clock().now());
    if swept > 0 {
        debug!(swept, "rate-limit windows expired");
    }
    reaped
}

/// Drains the reconciliation queue on a fixed period.
pub async fn run_queue_worker(queue: Arc<ReconciliationQueue>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = queue.drain().await {
            error!("queue drain failed: {e}");
        }
    }
}

/// Rewrites the journal once enough appends have piled up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &Store, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(events) => {
            metrics::counter!(COMPACTIONS_TOTAL).increment(1);
            info!(appends, events, "journal compacted");
            true
        }
        Err(e) => {
            error!("journal compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::engine::{EngineSettings, LockOutcome, LockRequest, Throttled};
    use crate::model::*;
    use crate::testkit::*;

    const START: Ms = 1_790_000_000_000;

    #[tokio::test]
    async fn sweep_releases_expired_locks() {
        let store = Arc::new(Store::open(&temp_journal("reaper_sweep")).unwrap());
        let fx = seed_venue(&store, &[2, 4]).await;
        let clock = Clock::manual(START);
        let engine = Engine::new(store.clone(), clock.clone(), EngineSettings::default());

        let req = LockRequest {
            venue_slug: fx.venue.slug.clone(),
            service_id: fx.service.id,
            date: tuesday(),
            time: t(19, 0),
            party_size: 2,
        };
        let LockOutcome::Granted(grant) = engine.acquire_lock(&req).await.unwrap() else {
            panic!("lock refused");
        };

        assert_eq!(sweep(&engine).await, 0);
        clock.advance(engine.settings().lock_ttl_ms + 1);
        assert_eq!(sweep(&engine).await, 1);
        assert_eq!(sweep(&engine).await, 0);

        let lock = store.lock(&grant.token).await.unwrap();
        assert_eq!(lock.reason, Some(LockReason::Expired));
    }

    #[tokio::test]
    async fn sweep_resets_rate_windows() {
        let store = Arc::new(Store::open(&temp_journal("reaper_rate")).unwrap());
        let clock = Clock::manual(START);
        let settings = EngineSettings {
            commit_rate_per_min: 1,
            ..EngineSettings::default()
        };
        let engine = Engine::new(store, clock.clone(), settings);

        engine.admit("10.0.0.7", Throttled::CommitBooking).unwrap();
        assert!(engine.admit("10.0.0.7", Throttled::CommitBooking).is_err());
        clock.advance(60_000);
        sweep(&engine).await;
        engine.admit("10.0.0.7", Throttled::CommitBooking).unwrap();
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let path = temp_journal("reaper_compact");
        let store = Store::open(&path).unwrap();
        seed_venue(&store, &[2, 4, 6]).await;
        let appends = store.appends_since_compact().await;
        assert!(appends > 0);

        assert!(!compact_if_due(&store, appends + 1).await);
        assert!(compact_if_due(&store, appends).await);
        assert_eq!(store.appends_since_compact().await, 0);

        drop(store);
        let reopened = Store::open(&path).unwrap();
        assert!(reopened.venue_id_by_slug("bistro").is_some());
    }
}
