use std::net::SocketAddr;

use crate::sql::Command;

// ── Decision metrics ────────────────────────────────────────────

/// Counter: reservation attempts by outcome. Labels: outcome
/// (`accepted`, `validation`, `conflict`, `unavailable`, `transient_dependency`, ...).
pub const RESERVATION_DECISIONS_TOTAL: &str = "slotbook_reservation_decisions_total";

/// Histogram: end-to-end decision latency in seconds, catalog call included.
pub const RESERVATION_DECISION_DURATION_SECONDS: &str =
    "slotbook_reservation_decision_duration_seconds";

/// Histogram: catalog lookup latency in seconds.
pub const CATALOG_LOOKUP_DURATION_SECONDS: &str = "slotbook_catalog_lookup_duration_seconds";

/// Counter: catalog lookups that ended fail-closed. Labels: cause.
pub const CATALOG_LOOKUP_FAILURES_TOTAL: &str = "slotbook_catalog_lookup_failures_total";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged; the server runs on without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::DeleteReservation { .. } => "delete_reservation",
    }
}
