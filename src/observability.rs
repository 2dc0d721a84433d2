use std::net::SocketAddr;

// ── Booking traffic ─────────────────────────────────────────────

/// Counter: bookings committed, series occurrences included.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotd_bookings_created_total";

/// Counter: recurring series committed.
pub const SERIES_CREATED_TOTAL: &str = "slotd_series_created_total";

/// Counter: requests rejected by the conflict check. Labels: operation.
pub const CONFLICTS_TOTAL: &str = "slotd_conflicts_total";

/// Counter: status changes applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "slotd_transitions_total";

/// Counter: series members cancelled by a tail cancellation.
pub const SERIES_CANCELLED_TOTAL: &str = "slotd_series_cancelled_total";

/// Histogram: scheduler operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "slotd_operation_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "slotd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Counter: WAL rewrites.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotd_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record the latency of one scheduler operation.
pub fn record_duration(operation: &'static str, start: std::time::Instant) {
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_conflict(operation: &'static str) {
    metrics::counter!(CONFLICTS_TOTAL, "operation" => operation).increment(1);
}
