use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reservd_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reservd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reservd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reservd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reservd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "reservd_tenants_active";

/// Counter: failed LOGIN/AUTH attempts.
pub const AUTH_FAILURES_TOTAL: &str = "reservd_auth_failures_total";

/// Counter: bookings rejected with an overlap conflict.
pub const BOOKING_CONFLICTS_TOTAL: &str = "reservd_booking_conflicts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterUser { .. } => "register_user",
        Command::Login { .. } => "login",
        Command::Authenticate { .. } => "auth",
        Command::WhoAmI => "whoami",
        Command::UpdateUser { .. } => "update_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::SelectUsers { .. } => "select_users",
        Command::InsertCategory { .. } => "insert_category",
        Command::UpdateCategory { .. } => "update_category",
        Command::DeleteCategory { .. } => "delete_category",
        Command::SelectCategories { .. } => "select_categories",
        Command::InsertResource { .. } => "insert_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::SelectResources { .. } => "select_resources",
        Command::InsertField { .. } => "insert_field",
        Command::DeleteField { .. } => "delete_field",
        Command::SelectFields { .. } => "select_fields",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
    }
}
