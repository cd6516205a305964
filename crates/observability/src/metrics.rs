//! Prometheus metrics infrastructure
//!
//! Initializes the Prometheus exporter and provides the per-server metric set
//! used by the driver socket server.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP listener on `port` that serves `/metrics`.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Server-specific metrics
///
/// # Metrics
///
/// * `server_connections_total` - Accepted connections
/// * `server_active_connections` - Currently open connections
/// * `server_rejected_handshakes_total` - Upgrades refused (unknown path, bad handshake)
/// * `server_messages_total{direction}` - Frames read and written
/// * `server_connection_duration_seconds` - Lifetime of closed connections
#[derive(Clone)]
pub struct ServerMetrics {
    connections_total: Counter,
    active_connections: Gauge,
    rejected_handshakes: Counter,
    messages_in: Counter,
    messages_out: Counter,
    connection_duration: Histogram,
    server_name: String,
}

impl ServerMetrics {
    /// Create metrics for a specific server (e.g. "websocket")
    pub fn new(server_name: &str) -> Self {
        let name = server_name.to_string();

        Self {
            connections_total: counter!("server_connections_total", "server" => name.clone()),
            active_connections: gauge!("server_active_connections", "server" => name.clone()),
            rejected_handshakes: counter!("server_rejected_handshakes_total", "server" => name.clone()),
            messages_in: counter!("server_messages_total", "server" => name.clone(), "direction" => "in"),
            messages_out: counter!("server_messages_total", "server" => name.clone(), "direction" => "out"),
            connection_duration: histogram!("server_connection_duration_seconds", "server" => name.clone()),
            server_name: name,
        }
    }

    /// Call when a connection is accepted
    pub fn connection_opened(&self) {
        self.connections_total.increment(1);
        self.active_connections.increment(1.0);
    }

    /// Call when a connection is closed
    pub fn connection_closed(&self, lifetime: Duration) {
        self.active_connections.decrement(1.0);
        self.connection_duration.record(lifetime.as_secs_f64());
    }

    pub fn handshake_rejected(&self) {
        self.rejected_handshakes.increment(1);
    }

    pub fn message_received(&self) {
        self.messages_in.increment(1);
    }

    pub fn message_sent(&self) {
        self.messages_out.increment(1);
    }

    /// Get the server name
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_metrics_without_recorder() {
        // No recorder installed: handles are no-ops and must not panic
        let metrics = ServerMetrics::new("websocket");
        metrics.connection_opened();
        metrics.message_received();
        metrics.message_sent();
        metrics.handshake_rejected();
        metrics.connection_closed(Duration::from_millis(250));
        assert_eq!(metrics.server_name(), "websocket");
    }
}
