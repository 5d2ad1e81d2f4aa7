//! Metrics collection and registry.

use crate::controller::ControllerStatus;
use crate::coordinator::CaptureCoordinator;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of controller status for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// One entry per controller.
    pub controllers: Vec<ControllerStatus>,
}

/// Prometheus metrics registry for camera controllers.
///
/// Every metric carries a `facing` label.
pub struct MetricsRegistry {
    registry: Registry,

    // Lifecycle gauges
    state: IntGaugeVec,
    device_live: IntGaugeVec,
    session_live: IntGaugeVec,

    // Counters
    opens: IntCounterVec,
    open_failures: IntCounterVec,
    configure_failures: IntCounterVec,
    disconnects: IntCounterVec,
    stills_captured: IntCounterVec,
    still_failures: IntCounterVec,
    sink_failures: IntCounterVec,
}

fn gauge(name: &str, help: &str) -> Result<IntGaugeVec, prometheus::Error> {
    IntGaugeVec::new(Opts::new(name, help), &["facing"])
}

fn counter(name: &str, help: &str) -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(Opts::new(name, help), &["facing"])
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all controller metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let state = gauge(
            "dual_camera_controller_state",
            "Controller state code (0=closed, 4=streaming, 5=capturing, -1=failed)",
        )?;
        let device_live = gauge(
            "dual_camera_device_live",
            "Whether the controller holds an open device (1=yes, 0=no)",
        )?;
        let session_live = gauge(
            "dual_camera_session_live",
            "Whether the controller holds a configured session (1=yes, 0=no)",
        )?;

        let opens = counter("dual_camera_opens_total", "Device open attempts")?;
        let open_failures = counter("dual_camera_open_failures_total", "Failed device opens")?;
        let configure_failures = counter(
            "dual_camera_configure_failures_total",
            "Rejected session configurations",
        )?;
        let disconnects = counter(
            "dual_camera_disconnects_total",
            "Unsolicited device losses",
        )?;
        let stills_captured = counter(
            "dual_camera_stills_captured_total",
            "Still frames returned by the device",
        )?;
        let still_failures = counter(
            "dual_camera_still_failures_total",
            "Still capture requests that failed",
        )?;
        let sink_failures = counter(
            "dual_camera_sink_failures_total",
            "Captured images the sink rejected",
        )?;

        registry.register(Box::new(state.clone()))?;
        registry.register(Box::new(device_live.clone()))?;
        registry.register(Box::new(session_live.clone()))?;
        registry.register(Box::new(opens.clone()))?;
        registry.register(Box::new(open_failures.clone()))?;
        registry.register(Box::new(configure_failures.clone()))?;
        registry.register(Box::new(disconnects.clone()))?;
        registry.register(Box::new(stills_captured.clone()))?;
        registry.register(Box::new(still_failures.clone()))?;
        registry.register(Box::new(sink_failures.clone()))?;

        Ok(Self {
            registry,
            state,
            device_live,
            session_live,
            opens,
            open_failures,
            configure_failures,
            disconnects,
            stills_captured,
            still_failures,
            sink_failures,
        })
    }

    /// Updates all metrics from a snapshot of controller status.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        for status in &snapshot.controllers {
            let labels = [status.facing.as_str()];

            self.state.with_label_values(&labels).set(status.state.code());
            self.device_live
                .with_label_values(&labels)
                .set(i64::from(status.device_live));
            self.session_live
                .with_label_values(&labels)
                .set(i64::from(status.session_live));

            let stats = &status.stats;
            // Counters only move forward, so advance them by the difference
            for (counter, total) in [
                (&self.opens, stats.opens),
                (&self.open_failures, stats.open_failures),
                (&self.configure_failures, stats.configure_failures),
                (&self.disconnects, stats.disconnects),
                (&self.stills_captured, stats.stills_captured),
                (&self.still_failures, stats.still_failures),
                (&self.sink_failures, stats.sink_failures),
            ] {
                let counter = counter.with_label_values(&labels);
                let current = counter.get();
                if total > current {
                    counter.inc_by(total - current);
                }
            }
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsSnapshot {
    /// Captures the current status of both controllers.
    pub fn from_coordinator(coordinator: &CaptureCoordinator) -> Self {
        Self {
            controllers: coordinator.statuses().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerState, ControllerStats};
    use crate::device::Facing;

    fn status(facing: Facing, state: ControllerState, stills: u64) -> ControllerStatus {
        ControllerStatus {
            state,
            device_live: state.has_device(),
            session_live: state == ControllerState::Streaming,
            stats: ControllerStats {
                opens: 1,
                stills_captured: stills,
                ..ControllerStats::default()
            },
            ..ControllerStatus::new(facing)
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            controllers: vec![
                status(Facing::Back, ControllerState::Streaming, 3),
                status(Facing::Front, ControllerState::Closed, 0),
            ],
        };
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains(r#"dual_camera_controller_state{facing="back"} 4"#));
        assert!(output.contains(r#"dual_camera_controller_state{facing="front"} 0"#));
        assert!(output.contains(r#"dual_camera_device_live{facing="back"} 1"#));
        assert!(output.contains(r#"dual_camera_stills_captured_total{facing="back"} 3"#));
    }

    #[test]
    fn test_counters_never_go_backwards() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot {
            controllers: vec![status(Facing::Back, ControllerState::Streaming, 5)],
        });
        registry.update(&MetricsSnapshot {
            controllers: vec![status(Facing::Back, ControllerState::Streaming, 2)],
        });

        let output = registry.encode().unwrap();
        assert!(output.contains(r#"dual_camera_stills_captured_total{facing="back"} 5"#));
    }

    #[test]
    fn test_snapshot_from_coordinator() {
        use crate::config::FileConfig;
        use crate::coordinator::Collaborators;
        use crate::hardware::{ResponseMode, SimulatedHardware};
        use crate::sink::MemorySink;
        use std::sync::Arc;

        let hw = Arc::new(SimulatedHardware::dual(ResponseMode::Immediate));
        let coordinator = CaptureCoordinator::new(
            &FileConfig::default(),
            Collaborators {
                hardware: hw.clone(),
                enumerator: hw,
                sink: Arc::new(MemorySink::new()),
            },
        )
        .unwrap();

        let snapshot = MetricsSnapshot::from_coordinator(&coordinator);
        let facings: Vec<Facing> = snapshot.controllers.iter().map(|s| s.facing).collect();
        assert_eq!(facings, vec![Facing::Back, Facing::Front]);
    }
}
