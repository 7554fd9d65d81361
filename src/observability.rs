use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "chairbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "chairbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "chairbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "chairbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "chairbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairbook_wal_flush_batch_size";

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: appointment rows committed (one per billable block).
pub const APPOINTMENTS_COMMITTED_TOTAL: &str = "chairbook_appointments_committed_total";

/// Counter: booking attempts rejected by the overlap check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "chairbook_booking_conflicts_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCustomer { .. } => "insert_customer",
        Command::UpdateCustomer { .. } => "update_customer",
        Command::DeleteCustomer { .. } => "delete_customer",
        Command::SelectCustomers => "select_customers",
        Command::InsertServiceAppointment { .. } => "book_service",
        Command::InsertDirectAppointment { .. } => "book_direct",
        Command::UpdateAppointment { .. } => "reschedule",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectServices => "select_services",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
