use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "appointd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "appointd_query_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: appointments successfully booked.
pub const APPOINTMENTS_CREATED_TOTAL: &str = "appointd_appointments_created_total";

/// Counter: bookings rejected because the provider was occupied.
pub const BOOKING_CONFLICTS_TOTAL: &str = "appointd_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "appointd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "appointd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "appointd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "appointd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "appointd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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
        Command::InsertUser { .. } => "insert_user",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectUser { .. } => "select_user",
        Command::UpdateAppointment { .. } => "update_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn labels_are_distinct_and_prefixed() {
        let id = Ulid::new();
        let commands = [
            Command::SelectAppointment { id },
            Command::SelectAppointments { page: Default::default() },
            Command::SelectUser { id },
            Command::DeleteAppointment { id },
            Command::UpdateAppointment {
                id,
                update: Default::default(),
            },
        ];
        let mut labels: Vec<_> = commands.iter().map(command_label).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), commands.len());
        assert!(QUERIES_TOTAL.starts_with("appointd_"));
    }
}
