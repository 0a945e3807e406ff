//! Prometheus Metrics
//!
//! Defines and initializes all Prometheus metrics for a jumpshard node.
//!
//! Metrics tracked:
//! - `jumpshard_events_total` - counter of inbound events by outcome
//!   (`owned`, `discarded`, `ignored`, `error`)
//! - `jumpshard_snapshot_refresh_total` - counter of snapshot refreshes by result
//!   (`fresh`, `stale`, `unavailable`)
//! - `jumpshard_cluster_size` - gauge of the cluster size in the current snapshot
//! - `jumpshard_dispatch_total` - counter of finished work units by result
//!   (`succeeded`, `failed`, `panicked`)
//! - `jumpshard_dispatch_in_flight` - gauge of running work units
//! - `jumpshard_work_duration_seconds` - histogram of work unit durations
//! - `jumpshard_bus_lagged_total` - counter of bus messages dropped by lag

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Initialize Prometheus metrics and return the handle for exporting.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

/// Register descriptions for all metrics
fn register_metric_descriptions() {
    describe_counter!(
        "jumpshard_events_total",
        "Inbound bus events by ownership outcome"
    );

    describe_counter!(
        "jumpshard_snapshot_refresh_total",
        "Cluster snapshot refresh attempts by result"
    );
    describe_gauge!(
        "jumpshard_cluster_size",
        "Number of nodes in the current cluster snapshot"
    );

    describe_counter!(
        "jumpshard_dispatch_total",
        "Finished work units by result"
    );
    describe_gauge!(
        "jumpshard_dispatch_in_flight",
        "Work units currently running"
    );
    describe_histogram!(
        "jumpshard_work_duration_seconds",
        "Duration of owned work units in seconds"
    );

    describe_counter!(
        "jumpshard_bus_lagged_total",
        "Bus messages skipped because the subscriber lagged"
    );
}

/// Record the ownership outcome of one inbound event
pub fn record_event(outcome: &'static str) {
    counter!("jumpshard_events_total", "outcome" => outcome).increment(1);
}

/// Record a snapshot refresh attempt
pub fn record_snapshot_refresh(result: &'static str) {
    counter!("jumpshard_snapshot_refresh_total", "result" => result).increment(1);
}

/// Update the cluster size gauge
pub fn set_cluster_size(size: u32) {
    gauge!("jumpshard_cluster_size").set(f64::from(size));
}

/// Record a work unit starting
pub fn record_dispatch_started() {
    gauge!("jumpshard_dispatch_in_flight").increment(1.0);
}

/// Record a work unit finishing
pub fn record_dispatch_finished(result: &'static str, duration: Duration) {
    gauge!("jumpshard_dispatch_in_flight").decrement(1.0);
    counter!("jumpshard_dispatch_total", "result" => result).increment(1);
    histogram!("jumpshard_work_duration_seconds", "result" => result)
        .record(duration.as_secs_f64());
}

/// Record messages lost to bus lag
pub fn record_bus_lagged(skipped: u64) {
    counter!("jumpshard_bus_lagged_total").increment(skipped);
}
