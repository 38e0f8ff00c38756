use std::net::SocketAddr;

use crate::engine::GuardError;
use crate::model::Outcome;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reserve requests. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "innkeep_reservations_total";

/// Histogram: reserve latency in seconds.
pub const RESERVE_DURATION_SECONDS: &str = "innkeep_reserve_duration_seconds";

/// Counter: availability checks. Labels: status.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "innkeep_availability_checks_total";

/// Histogram: availability check latency in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "innkeep_availability_duration_seconds";

// ── Cache tier ──────────────────────────────────────────────────

/// Counter: cache hits. Labels: kind (capacity | night).
pub const CACHE_HITS_TOTAL: &str = "innkeep_cache_hits_total";

/// Counter: cache misses. Labels: kind (capacity | night).
pub const CACHE_MISSES_TOTAL: &str = "innkeep_cache_misses_total";

/// Counter: cached values that did not parse as a count.
pub const CACHE_UNPARSABLE_TOTAL: &str = "innkeep_cache_unparsable_total";

/// Counter: fire-and-forget writes dropped because the queue was full or closed.
pub const CACHE_WRITES_DROPPED_TOTAL: &str = "innkeep_cache_writes_dropped_total";

/// Counter: fire-and-forget writes the cache rejected.
pub const CACHE_WRITES_FAILED_TOTAL: &str = "innkeep_cache_writes_failed_total";

/// Histogram: writes applied per write-behind batch.
pub const CACHE_WRITE_BATCH_SIZE: &str = "innkeep_cache_write_batch_size";

// ── Durable stores ──────────────────────────────────────────────

/// Counter: ledger count queries issued.
pub const LEDGER_QUERIES_TOTAL: &str = "innkeep_ledger_queries_total";

/// Counter: batched capacity queries issued.
pub const CAPACITY_QUERIES_TOTAL: &str = "innkeep_capacity_queries_total";

/// Counter: fan-out workers spawned.
pub const FANOUT_WORKERS_TOTAL: &str = "innkeep_fanout_workers_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "innkeep_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "innkeep_journal_flush_batch_size";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a reserve result to a short label for metrics.
pub fn outcome_label(result: &Result<Outcome, GuardError>) -> &'static str {
    match result {
        Ok(outcome) if outcome.accepted => "accepted",
        Ok(_) => "rejected",
        Err(GuardError::Validation(_)) => "invalid",
        Err(GuardError::UnknownHotel(_)) => "unknown_hotel",
        Err(GuardError::Storage(_)) => "storage_error",
        Err(GuardError::Cancelled) | Err(GuardError::DeadlineExceeded) => "cancelled",
        Err(GuardError::Internal(_)) => "internal_error",
    }
}

/// Status label for results that carry no accept/reject decision.
pub fn status_label<T>(result: &Result<T, GuardError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(GuardError::Validation(_)) => "invalid",
        Err(GuardError::UnknownHotel(_)) => "unknown_hotel",
        Err(GuardError::Storage(_)) => "storage_error",
        Err(GuardError::Cancelled) | Err(GuardError::DeadlineExceeded) => "cancelled",
        Err(GuardError::Internal(_)) => "internal_error",
    }
}
