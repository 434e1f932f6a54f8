//! Metric names and the Prometheus exporter.
//!
//! Recording goes through the `metrics` facade everywhere; without an
//! installed recorder every macro is a no-op, which is what tests rely on.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const BUS_PUBLISHED: &str = "fleet_bus_published_total";
pub const BUS_PUBLISH_FAILURES: &str = "fleet_bus_publish_failures_total";
pub const BUS_RECONNECT_ATTEMPTS: &str = "fleet_bus_reconnect_attempts_total";
pub const BUS_DELIVERIES: &str = "fleet_bus_deliveries_total";
pub const CACHE_HITS: &str = "fleet_cache_hits_total";
pub const CACHE_MISSES: &str = "fleet_cache_misses_total";
/// Wall time of one orchestrator phase, labelled by `phase`.
pub const PHASE_DURATION: &str = "fleet_phase_duration_seconds";

fn describe() {
    describe_counter!(BUS_PUBLISHED, "Messages accepted by the bus");
    describe_counter!(BUS_PUBLISH_FAILURES, "Publish attempts that failed");
    describe_counter!(BUS_RECONNECT_ATTEMPTS, "Publisher reconnect attempts");
    describe_counter!(BUS_DELIVERIES, "Messages delivered to subscription handlers");
    describe_counter!(CACHE_HITS, "Cache lookups served from the store");
    describe_counter!(CACHE_MISSES, "Cache lookups that fell through");
    describe_histogram!(PHASE_DURATION, "Duration of configure and init phases in seconds");
}

/// Installs the global recorder and serves `/metrics` on `addr`.
///
/// # Errors
///
/// Returns an error when a recorder is already installed or the listener
/// cannot be started.
pub fn install_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
