//! Top-level orchestration of the front and back controllers.
//!
//! The coordinator routes commands to the addressed controller and never
//! waits on either of them, except in [`CaptureCoordinator::shutdown_all`].
//! The two controllers share only immutable setup data.

use crate::config::FileConfig;
use crate::controller::{
    ControllerReport, ControllerSetup, ControllerState, ControllerStatus, SessionController,
};
use crate::device::{first_facing, Capability, ConcurrencySupport, DeviceEnumerator, DeviceInfo, Facing};
use crate::error::CaptureError;
use crate::hardware::CameraHardware;
use crate::session::PreviewTarget;
use crate::sink::ImageSink;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// External collaborators the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub hardware: Arc<dyn CameraHardware>,
    pub enumerator: Arc<dyn DeviceEnumerator>,
    pub sink: Arc<dyn ImageSink>,
}

/// Owns one [`SessionController`] per facing.
pub struct CaptureCoordinator {
    back: SessionController,
    front: SessionController,
    enumerator: Arc<dyn DeviceEnumerator>,
    devices: Vec<DeviceInfo>,
    reports: Mutex<Option<Receiver<ControllerReport>>>,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

impl CaptureCoordinator {
    /// Enumerates devices once and spawns both controllers in `Closed`.
    ///
    /// Only the back controller is provisioned with a still target.
    pub fn new(config: &FileConfig, collaborators: Collaborators) -> Result<Self, CaptureError> {
        config.validate()?;

        let devices = collaborators
            .enumerator
            .devices()
            .map_err(|e| CaptureError::EnumerationFailed(e.to_string()))?;
        tracing::info!(count = devices.len(), "Enumerated camera devices");

        let support = ConcurrencySupport::from_devices(&devices);
        if !support.is_supported() {
            tracing::warn!(
                "No device advertises {:?}; concurrent streaming may be refused",
                Capability::LogicalMultiCamera
            );
        }

        let (reports_tx, reports) = crossbeam_channel::unbounded();
        let setup = |facing: Facing| {
            let device = first_facing(&devices, facing);
            if device.is_none() {
                tracing::warn!(%facing, "No camera with this facing");
            }
            ControllerSetup {
                facing,
                device,
                preview: config.preview_target(facing),
                still: (facing == Facing::Back).then(|| config.still_target()),
                autofocus: config.still.autofocus,
                hardware: Arc::clone(&collaborators.hardware),
                sink: Arc::clone(&collaborators.sink),
            }
        };

        let back = SessionController::spawn(setup(Facing::Back), reports_tx.clone())?;
        let front = SessionController::spawn(setup(Facing::Front), reports_tx)?;

        Ok(Self {
            back,
            front,
            enumerator: collaborators.enumerator,
            devices,
            reports: Mutex::new(Some(reports)),
            shutdown_timeout: config.coordinator.shutdown_timeout(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Takes the report stream. Returns `None` after the first call.
    pub fn take_reports(&self) -> Option<Receiver<ControllerReport>> {
        self.reports.lock().take()
    }

    pub fn controller(&self, facing: Facing) -> &SessionController {
        match facing {
            Facing::Back => &self.back,
            Facing::Front => &self.front,
        }
    }

    pub fn start(&self, facing: Facing) -> Result<(), CaptureError> {
        self.controller(facing).start().map_err(log_rejection)
    }

    /// Releases the camera. Idempotent.
    pub fn stop(&self, facing: Facing) -> Result<(), CaptureError> {
        self.controller(facing).stop().map_err(log_rejection)
    }

    /// Captures a still on the back camera.
    pub fn capture_still(&self) -> Result<(), CaptureError> {
        self.capture_still_on(Facing::Back)
    }

    /// Captures a still on `facing`; only the back camera has a still target.
    pub fn capture_still_on(&self, facing: Facing) -> Result<(), CaptureError> {
        self.controller(facing).capture_still().map_err(log_rejection)
    }

    /// Rebinds `facing`'s preview output.
    pub fn configure(&self, facing: Facing, preview: PreviewTarget) -> Result<(), CaptureError> {
        self.controller(facing).configure(preview).map_err(log_rejection)
    }

    /// The preview surface for `facing` went away.
    pub fn surface_invalidated(&self, facing: Facing) -> Result<(), CaptureError> {
        tracing::info!(%facing, "Preview surface invalidated");
        self.stop(facing)
    }

    /// Re-enumerates devices and reports whether any advertises
    /// multi-camera support. Advisory; `start` never consults it.
    pub fn query_concurrency_support(&self) -> Result<ConcurrencySupport, CaptureError> {
        let devices = self
            .enumerator
            .devices()
            .map_err(|e| CaptureError::EnumerationFailed(e.to_string()))?;
        let support = ConcurrencySupport::from_devices(&devices);
        if !support.is_supported() {
            tracing::warn!("Concurrent front and back streaming is not advertised");
        }
        Ok(support)
    }

    /// Devices seen at construction.
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn state(&self, facing: Facing) -> ControllerState {
        self.controller(facing).state()
    }

    pub fn status(&self, facing: Facing) -> ControllerStatus {
        self.controller(facing).status()
    }

    /// Status of both controllers, back first.
    pub fn statuses(&self) -> [ControllerStatus; 2] {
        [self.back.status(), self.front.status()]
    }

    /// Blocks until `facing` reaches `state` or `timeout` elapses.
    pub fn wait_for_state(&self, facing: Facing, state: ControllerState, timeout: Duration) -> bool {
        self.controller(facing)
            .wait_for(|s| s.state == state, timeout)
            .is_some()
    }

    /// Stops both controllers, waits for them to go quiet, then ends their
    /// workers.
    ///
    /// Bounded by the configured shutdown timeout. Workers always release
    /// what they hold before exiting, so on `ShutdownTimeout` nothing is
    /// left open either. Later calls return `Ok(())`.
    pub fn shutdown_all(&self) -> Result<(), CaptureError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Shutting down cameras");

        for controller in [&self.back, &self.front] {
            if let Err(e) = controller.stop() {
                tracing::warn!(facing = %controller.facing(), error = %e, "Stop during shutdown failed");
            }
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let stuck: Vec<Facing> = [&self.back, &self.front]
            .into_iter()
            .filter(|c| !c.wait_quiescent(deadline.saturating_duration_since(Instant::now())))
            .map(SessionController::facing)
            .collect();

        self.back.join();
        self.front.join();

        if stuck.is_empty() {
            tracing::info!("Cameras shut down");
            Ok(())
        } else {
            tracing::warn!(?stuck, "Shutdown timed out; workers released their devices on exit");
            Err(CaptureError::ShutdownTimeout(stuck))
        }
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_all() {
            tracing::warn!(error = %e, "Shutdown on drop incomplete");
        }
    }
}

impl std::fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("back", &self.back)
            .field("front", &self.front)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

fn log_rejection(error: CaptureError) -> CaptureError {
    tracing::warn!(%error, "Command rejected");
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Failure, ReportEvent};
    use crate::device::{DeviceId, StaticEnumerator};
    use crate::hardware::{OpenFault, ResponseMode, SimulatedHardware};
    use crate::sink::MemorySink;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        coordinator: CaptureCoordinator,
        hw: Arc<SimulatedHardware>,
        sink: Arc<MemorySink>,
    }

    fn fixture(mode: ResponseMode) -> Fixture {
        let hw = Arc::new(SimulatedHardware::dual(mode));
        let sink = Arc::new(MemorySink::new());
        let collaborators = Collaborators {
            hardware: hw.clone(),
            enumerator: hw.clone(),
            sink: sink.clone(),
        };
        let coordinator = CaptureCoordinator::new(&FileConfig::default(), collaborators).unwrap();
        Fixture {
            coordinator,
            hw,
            sink,
        }
    }

    fn delayed() -> ResponseMode {
        ResponseMode::Delayed(Duration::from_millis(5))
    }

    #[test]
    fn test_scenario_back_still_capture() {
        let f = fixture(delayed());
        let c = &f.coordinator;
        c.start(Facing::Back).unwrap();
        assert!(c.wait_for_state(Facing::Back, ControllerState::Streaming, WAIT));

        c.capture_still().unwrap();
        let status = c
            .controller(Facing::Back)
            .wait_for(|s| s.stats.stills_captured == 1 && s.state == ControllerState::Streaming, WAIT)
            .unwrap();
        assert_eq!(status.state, ControllerState::Streaming);
        assert_eq!(f.sink.len(), 1);
    }

    #[test]
    fn test_scenario_front_cannot_capture() {
        let f = fixture(delayed());
        let c = &f.coordinator;
        c.start(Facing::Front).unwrap();
        assert!(c.wait_for_state(Facing::Front, ControllerState::Streaming, WAIT));

        for result in [c.capture_still(), c.capture_still_on(Facing::Front)] {
            assert!(matches!(result, Err(CaptureError::CaptureNotSupported { .. })));
        }
        assert_eq!(c.state(Facing::Front), ControllerState::Streaming);
        assert_eq!(f.hw.stats().capture_calls, 0);
    }

    #[test]
    fn test_scenario_start_while_streaming() {
        let f = fixture(delayed());
        let c = &f.coordinator;
        c.start(Facing::Back).unwrap();
        assert!(c.wait_for_state(Facing::Back, ControllerState::Streaming, WAIT));

        assert!(matches!(
            c.start(Facing::Back),
            Err(CaptureError::AlreadyActive { .. })
        ));
        assert_eq!(f.hw.stats().open_calls, 1);
    }

    #[test]
    fn test_scenario_disconnect_then_restart() {
        let f = fixture(delayed());
        let c = &f.coordinator;
        let reports = c.take_reports().unwrap();
        assert!(c.take_reports().is_none());

        c.start(Facing::Back).unwrap();
        assert!(c.wait_for_state(Facing::Back, ControllerState::Streaming, WAIT));

        assert!(f.hw.disconnect(Facing::Back));
        assert!(c.wait_for_state(
            Facing::Back,
            ControllerState::Failed(Failure::Disconnected),
            WAIT
        ));
        assert_eq!(f.hw.live_connections_for(Facing::Back), 0);
        assert_eq!(f.hw.live_sessions(), 0);
        assert!(reports.try_iter().any(|r| matches!(
            r.event,
            ReportEvent::Error(CaptureError::HardwareDisconnected { .. })
        )));

        c.start(Facing::Back).unwrap();
        assert!(c.wait_for_state(Facing::Back, ControllerState::Streaming, WAIT));
        assert_eq!(f.hw.live_connections_for(Facing::Back), 1);
    }

    #[test]
    fn test_concurrent_start_stop_in_either_order() {
        for back_first in [true, false] {
            let f = fixture(delayed());
            let c = &f.coordinator;

            thread::scope(|s| {
                s.spawn(|| c.start(Facing::Back).unwrap());
                s.spawn(|| c.start(Facing::Front).unwrap());
            });
            for facing in Facing::ALL {
                assert!(c.wait_for_state(facing, ControllerState::Streaming, WAIT));
            }

            let order = if back_first {
                [Facing::Back, Facing::Front]
            } else {
                [Facing::Front, Facing::Back]
            };
            for facing in order {
                c.stop(facing).unwrap();
            }
            for facing in Facing::ALL {
                assert!(c.wait_for_state(facing, ControllerState::Closed, WAIT));
            }
            assert_eq!(f.hw.live_connections(), 0);
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let f = fixture(ResponseMode::Immediate);
        let c = &f.coordinator;
        c.stop(Facing::Front).unwrap();
        c.stop(Facing::Front).unwrap();
        c.surface_invalidated(Facing::Front).unwrap();
        assert_eq!(c.state(Facing::Front), ControllerState::Closed);
    }

    #[test]
    fn test_shutdown_all_leaves_nothing_open() {
        let f = fixture(delayed());
        let c = &f.coordinator;
        c.start(Facing::Back).unwrap();
        c.start(Facing::Front).unwrap();
        assert!(c.wait_for_state(Facing::Back, ControllerState::Streaming, WAIT));
        c.capture_still().unwrap();

        c.shutdown_all().unwrap();
        assert_eq!(f.hw.live_connections(), 0);
        assert_eq!(f.hw.live_sessions(), 0);
        for facing in Facing::ALL {
            assert!(c.state(facing).is_quiescent());
        }

        c.shutdown_all().unwrap();
        assert_eq!(
            c.start(Facing::Back),
            Err(CaptureError::WorkerUnavailable(Facing::Back))
        );
    }

    #[test]
    fn test_shutdown_mid_open() {
        let f = fixture(ResponseMode::Delayed(Duration::from_millis(20)));
        let c = &f.coordinator;
        c.start(Facing::Back).unwrap();
        c.start(Facing::Front).unwrap();

        c.shutdown_all().unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(f.hw.live_connections(), 0);
    }

    #[test]
    fn test_shutdown_timeout_is_reported() {
        for fault in [None, Some(OpenFault::Error(3)), Some(OpenFault::Disconnect)] {
            let f = fixture(ResponseMode::Manual);
            let mut config = FileConfig::default();
            config.coordinator.shutdown_timeout_ms = 20;
            let hw = f.hw.clone();
            let collaborators = Collaborators {
                hardware: hw.clone(),
                enumerator: hw.clone(),
                sink: f.sink.clone(),
            };
            drop(f.coordinator);
            let c = CaptureCoordinator::new(&config, collaborators).unwrap();
            if let Some(fault) = fault {
                hw.fail_next_open(fault);
            }

            // The open callback is held, so the stop can never be applied.
            c.start(Facing::Back).unwrap();
            assert_eq!(
                c.shutdown_all(),
                Err(CaptureError::ShutdownTimeout(vec![Facing::Back])),
                "{fault:?}"
            );
            // The worker exited; the held callback is reclaimed on delivery.
            hw.release_all();
            assert_eq!(hw.live_connections(), 0, "{fault:?}");
        }
    }

    #[test]
    fn test_concurrency_query() {
        let f = fixture(ResponseMode::Immediate);
        assert!(f.coordinator.query_concurrency_support().unwrap().is_supported());
        assert_eq!(f.coordinator.devices().len(), 2);

        let enumerator = Arc::new(StaticEnumerator::new(vec![DeviceInfo::new(
            DeviceId::new("7", Facing::Front),
            vec![Capability::BackwardCompatible],
        )]));
        let coordinator = CaptureCoordinator::new(
            &FileConfig::default(),
            Collaborators {
                hardware: f.hw.clone(),
                enumerator,
                sink: f.sink.clone(),
            },
        )
        .unwrap();
        assert!(!coordinator.query_concurrency_support().unwrap().is_supported());

        // No back camera enumerated: start is rejected by the worker.
        let reports = coordinator.take_reports().unwrap();
        coordinator.start(Facing::Back).unwrap();
        let report = reports.recv_timeout(WAIT).unwrap();
        assert!(matches!(
            report.error(),
            Some(CaptureError::DeviceOpenFailed { .. })
        ));
        assert_eq!(coordinator.state(Facing::Back), ControllerState::Closed);
    }
}
