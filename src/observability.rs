use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "courtside_http_requests_total";

/// Histogram: HTTP handler latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "courtside_http_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "courtside_reservations_created_total";

/// Counter: reservations cancelled. Labels: actor.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "courtside_reservations_cancelled_total";

/// Counter: booking attempts rejected because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "courtside_booking_conflicts_total";

/// Counter: gateway webhook events. Labels: type, outcome.
pub const WEBHOOK_EVENTS_TOTAL: &str = "courtside_webhook_events_total";

/// Counter: webhook deliveries rejected by signature verification.
pub const WEBHOOK_SIGNATURE_FAILURES_TOTAL: &str = "courtside_webhook_signature_failures_total";

/// Counter: payments that succeeded without the reservation reaching `confirmed`.
pub const INTEGRITY_FAILURES_TOTAL: &str = "courtside_integrity_failures_total";

/// Counter: stale advisory locks released by the reaper.
pub const STALE_LOCKS_RELEASED_TOTAL: &str = "courtside_stale_locks_released_total";

/// Histogram: gateway create-payment latency in seconds.
pub const GATEWAY_REQUEST_DURATION_SECONDS: &str = "courtside_gateway_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtside_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtside_wal_flush_batch_size";

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

/// Collapse a request path to its route template so ids don't explode label cardinality.
pub fn route_label(path: &str) -> &'static str {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        ["health"] => "health",
        ["venues"] => "venues",
        ["courts"] => "courts",
        ["courts", _] => "court",
        ["courts", _, "slots"] => "slots",
        ["reservations"] => "reservations",
        ["reservations", _] => "reservation",
        ["reservations", _, "cancel"] => "cancel_reservation",
        ["reservations", _, "payments"] => "create_payment",
        ["reservations", _, "cash"] => "confirm_cash",
        ["reservations", _, "attendance"] => "attendance",
        ["webhooks", "payment"] => "webhook",
        ["queue-sessions"] => "queue_sessions",
        ["queue", _] => "queue_standings",
        ["queue", _, action] => match *action {
            "join" => "queue_join",
            "leave" => "queue_leave",
            "status" => "queue_status",
            "games" => "queue_games",
            "settle" => "queue_settle",
            _ => "other",
        },
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_labels_strip_ids() {
        assert_eq!(route_label("/courts/01HZX/slots"), "slots");
        assert_eq!(route_label("/reservations/01HZX/cancel"), "cancel_reservation");
        assert_eq!(route_label("/queue/01HZX"), "queue_standings");
        assert_eq!(route_label("/queue/01HZX/join"), "queue_join");
        assert_eq!(route_label("/nope/a/b/c"), "other");
    }
}
