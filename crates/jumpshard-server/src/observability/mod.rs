//! Observability Module
//!
//! Logging and metrics for a jumpshard node:
//! - `metrics`: Prometheus metrics for events, snapshots, and dispatch
//! - `events`: Structured event logging with consistent fields
//! - `tracing`: Global subscriber setup (text or JSON)

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, TracingConfig};
