use std::net::SocketAddr;

// ── Desk locks ──────────────────────────────────────────────────

/// Counter: locks granted to this client.
pub const LOCKS_GRANTED_TOTAL: &str = "deskgrid_locks_granted_total";

/// Counter: lock requests denied because another user holds the desk.
pub const LOCK_CONFLICTS_TOTAL: &str = "deskgrid_lock_conflicts_total";

/// Counter: successful heartbeat refreshes.
pub const LOCK_HEARTBEATS_TOTAL: &str = "deskgrid_lock_heartbeats_total";

/// Counter: leases the server stopped honouring mid-session.
pub const LOCKS_LOST_TOTAL: &str = "deskgrid_locks_lost_total";

/// Counter: server-side locks purged after their TTL lapsed.
pub const LOCKS_EXPIRED_TOTAL: &str = "deskgrid_locks_expired_total";

// ── Sync channel ────────────────────────────────────────────────

/// Gauge: open sync connections.
pub const SYNC_CONNECTIONS_ACTIVE: &str = "deskgrid_sync_connections_active";

/// Counter: reconnect attempts after abnormal closes.
pub const SYNC_RECONNECTS_TOTAL: &str = "deskgrid_sync_reconnects_total";

/// Counter: deltas delivered to subscribers.
pub const SYNC_DELTAS_TOTAL: &str = "deskgrid_sync_deltas_total";

// ── Bookings ────────────────────────────────────────────────────

/// Counter: bookings created or updated through the orchestrator.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "deskgrid_bookings_committed_total";

/// Counter: booking submissions refused for contention.
pub const BOOKING_CONFLICTS_TOTAL: &str = "deskgrid_booking_conflicts_total";

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
