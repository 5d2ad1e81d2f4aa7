//! Prometheus metrics exporter for camera controllers.
//!
//! Metrics are pulled from controller status snapshots and, with the
//! `metrics` feature, served over HTTP.
//!
//! # Metrics Exposed
//!
//! All metrics carry a `facing` label (`back` or `front`).
//!
//! ## Lifecycle
//! - `dual_camera_controller_state` - State code (-1 failed, 0 closed, 4 streaming)
//! - `dual_camera_device_live` - Device connection held
//! - `dual_camera_session_live` - Capture session held
//!
//! ## Counters
//! - `dual_camera_opens_total`, `dual_camera_open_failures_total`
//! - `dual_camera_configure_failures_total`
//! - `dual_camera_disconnects_total`
//! - `dual_camera_stills_captured_total`, `dual_camera_still_failures_total`
//! - `dual_camera_sink_failures_total`
//!
//! # Example
//!
//! ```no_run
//! use dual_camera::metrics::{MetricsRegistry, MetricsSnapshot};
//! # fn demo(coordinator: &dual_camera::CaptureCoordinator) {
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&MetricsSnapshot::from_coordinator(coordinator));
//! println!("{}", registry.encode().unwrap_or_default());
//! # }
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
