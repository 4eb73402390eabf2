use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, outcome.
pub const REQUESTS_TOTAL: &str = "tablehold_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "tablehold_request_duration_seconds";

/// Counter: requests refused by the per-client rate limiter. Labels: op.
pub const RATE_LIMITED_TOTAL: &str = "tablehold_rate_limited_total";

// ── Booking path ────────────────────────────────────────────────

/// Counter: slot locks granted.
pub const LOCKS_ISSUED_TOTAL: &str = "tablehold_locks_issued_total";

/// Counter: lock requests refused (slot unavailable or already held).
pub const LOCKS_REFUSED_TOTAL: &str = "tablehold_locks_refused_total";

/// Counter: slot locks released. Labels: reason.
pub const LOCKS_RELEASED_TOTAL: &str = "tablehold_locks_released_total";

/// Counter: bookings committed. Labels: status.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "tablehold_bookings_committed_total";

/// Counter: commits that failed. Labels: code.
pub const BOOKINGS_FAILED_TOTAL: &str = "tablehold_bookings_failed_total";

/// Counter: inserts rejected by the exclusion constraint.
pub const EXCLUSION_VIOLATIONS_TOTAL: &str = "tablehold_exclusion_violations_total";

// ── Availability cache ──────────────────────────────────────────

pub const CACHE_HITS_TOTAL: &str = "tablehold_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "tablehold_cache_misses_total";
pub const CACHE_INVALIDATIONS_TOTAL: &str = "tablehold_cache_invalidations_total";

// ── Reconciliation queue ────────────────────────────────────────

/// Counter: inbound point-of-sale events accepted (duplicates excluded).
pub const QUEUE_RECEIVED_TOTAL: &str = "tablehold_queue_received_total";

/// Counter: events linked or turned into walk-ins. Labels: outcome.
pub const QUEUE_PROCESSED_TOTAL: &str = "tablehold_queue_processed_total";

/// Counter: failed attempts that were scheduled for retry.
pub const QUEUE_RETRIES_TOTAL: &str = "tablehold_queue_retries_total";

/// Counter: events moved to manual review.
pub const QUEUE_ESCALATED_TOTAL: &str = "tablehold_queue_escalated_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablehold_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablehold_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablehold_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "tablehold_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "tablehold_journal_flush_batch_size";

/// Counter: journal compactions.
pub const COMPACTIONS_TOTAL: &str = "tablehold_compactions_total";

/// Install the fmt subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
