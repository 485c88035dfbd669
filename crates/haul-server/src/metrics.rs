//! Metrics collection and export for Haul.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use haul_core::{BroadcastObserver, BroadcastReport, BuildListener, BuildStats, ListenerError};
use haul_transport::{Connection, ConnectionId, Outbox, TransportError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "haul_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "haul_connections_active";
    pub const MESSAGES_TOTAL: &str = "haul_messages_total";
    pub const MESSAGES_BYTES: &str = "haul_messages_bytes";
    pub const BUILDS_TOTAL: &str = "haul_builds_total";
    pub const NOTIFICATIONS_TOTAL: &str = "haul_notifications_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of channel connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open channel connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of inbound channel messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of inbound channel messages");
    metrics::describe_counter!(names::BUILDS_TOTAL, "Completed builds by status");
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Build notifications pushed to live-update clients"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection on a channel.
pub fn record_connection(channel: &str) {
    counter!(names::CONNECTIONS_TOTAL, "channel" => channel.to_string()).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "channel" => channel.to_string()).increment(1.0);
}

/// Record a disconnection from a channel.
pub fn record_disconnection(channel: &str) {
    gauge!(names::CONNECTIONS_ACTIVE, "channel" => channel.to_string()).decrement(1.0);
}

/// Record an inbound message.
pub fn record_message(channel: &str, bytes: usize) {
    counter!(names::MESSAGES_TOTAL, "channel" => channel.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "channel" => channel.to_string()).increment(bytes as u64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    channel: String,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        let channel = channel.into();
        record_connection(&channel);
        Self { channel }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(&self.channel);
    }
}

/// Wraps a connection and counts what it receives.
pub struct MeteredConnection {
    inner: Box<dyn Connection>,
    guard: ConnectionMetricsGuard,
}

impl MeteredConnection {
    #[must_use]
    pub fn new(inner: Box<dyn Connection>, channel: impl Into<String>) -> Self {
        Self {
            inner,
            guard: ConnectionMetricsGuard::new(channel),
        }
    }
}

#[async_trait]
impl Connection for MeteredConnection {
    fn id(&self) -> &ConnectionId {
        self.inner.id()
    }

    fn outbox(&self) -> Outbox {
        self.inner.outbox()
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        let message = self.inner.recv().await?;
        if let Some(text) = &message {
            record_message(&self.guard.channel, text.len());
        }
        Ok(message)
    }
}

/// Counts completed builds per status.
#[derive(Default)]
pub struct MetricsReporter;

impl MetricsReporter {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl BuildListener for MetricsReporter {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_compile(&self, stats: &Arc<BuildStats>) -> Result<(), ListenerError> {
        counter!(names::BUILDS_TOTAL, "status" => stats.status().as_str()).increment(1);
        Ok(())
    }
}

/// Counts live-update notifications actually delivered, per channel and kind.
#[derive(Default)]
pub struct NotificationMetrics;

impl NotificationMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl BroadcastObserver for NotificationMetrics {
    fn on_broadcast(&self, channel: &str, kind: &'static str, report: BroadcastReport) {
        counter!(
            names::NOTIFICATIONS_TOTAL,
            "channel" => channel.to_string(),
            "kind" => kind
        )
        .increment(report.delivered as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_transport::memory;

    #[test]
    fn test_metrics_guard() {
        // Recording without an installed recorder is a no-op.
        let _guard = ConnectionMetricsGuard::new("hot");
    }

    #[tokio::test]
    async fn test_metered_connection_passes_messages_through() {
        let (conn, mut peer) = memory::pair();
        let mut metered = MeteredConnection::new(Box::new(conn), "hot");
        assert_eq!(metered.id(), peer.id());

        peer.send("hello");
        assert_eq!(metered.recv().await.unwrap().as_deref(), Some("hello"));

        metered.outbox().send_text("back").unwrap();
        assert_eq!(peer.try_recv_text().as_deref(), Some("back"));

        peer.hang_up();
        assert_eq!(metered.recv().await.unwrap(), None);
    }

    #[test]
    fn test_reporter_accepts_every_build() {
        let reporter = MetricsReporter::new();
        assert!(reporter.on_invalid(true).is_ok());
        assert!(reporter.on_compile(&Arc::new(BuildStats::new("a").with_error("e"))).is_ok());
    }

    #[test]
    fn test_notifications_follow_channel_broadcasts() {
        use haul_core::LiveUpdateChannel;
        use haul_protocol::LiveUpdateMessage;

        let channel = LiveUpdateChannel::new("hot").with_observer(NotificationMetrics::new());
        let (conn, mut peer) = memory::pair();
        channel.add(conn.outbox());

        let report = channel.broadcast(&LiveUpdateMessage::building(false)).unwrap();
        assert_eq!(report.delivered, 1);
        assert!(peer.try_recv_text().is_some());
    }
}
