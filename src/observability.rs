use std::net::SocketAddr;

use crate::wire::Request;

// ── Lifecycle metrics ───────────────────────────────────────────

/// Counter: bookings created. Labels: resource_type.
pub const BOOKINGS_CREATED_TOTAL: &str = "tripbook_bookings_created_total";

/// Counter: create attempts refused inside the critical section. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "tripbook_bookings_rejected_total";

/// Counter: status transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "tripbook_booking_transitions_total";

/// Counter: ledger reservations undone after a storage failure.
pub const STORAGE_ROLLBACKS_TOTAL: &str = "tripbook_storage_rollbacks_total";

/// Histogram: time spent holding a resource lock, in seconds.
pub const CRITICAL_SECTION_SECONDS: &str = "tripbook_critical_section_seconds";

// ── Request metrics ─────────────────────────────────────────────

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "tripbook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "tripbook_request_duration_seconds";

// ── Resource utilization ────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tripbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tripbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tripbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tripbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tripbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a request, for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::Create { .. } => "create",
        Request::Cancel { .. } => "cancel",
        Request::Confirm { .. } => "confirm",
        Request::Complete { .. } => "complete",
        Request::Get { .. } => "get",
        Request::List { .. } => "list",
        Request::Availability { .. } => "availability",
        Request::Watch { .. } => "watch",
    }
}
