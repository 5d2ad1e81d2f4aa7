//! Per-device session controllers.
//!
//! Each [`SessionController`] owns one camera's lifecycle on a dedicated
//! worker thread:
//!
//! ```text
//!  Closed -> Opening -> Open -> Configuring -> Streaming <-> Capturing
//!    ^                                            |
//!    +---------------- Closing <------------------+
//! ```
//!
//! Any step may land in `Failed`. Callers talk to the controller through
//! non-blocking methods that enqueue a command; the outcome is observed via
//! [`SessionController::status`], [`SessionController::wait_for`] or the
//! report channel handed to [`SessionController::spawn`].

mod machine;
mod report;
mod state;
mod status;
mod worker;

pub(crate) use machine::ControllerSetup;
pub use report::{ControllerReport, ReportEvent};
pub use state::{ControllerState, Failure};
pub use status::{ControllerStats, ControllerStatus};

use crate::device::Facing;
use crate::error::CaptureError;
use crate::session::PreviewTarget;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use status::StatusCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use worker::{Command, WorkerMessage};

/// Handle to one camera's worker.
pub struct SessionController {
    facing: Facing,
    provisions_still: bool,
    tx: Sender<WorkerMessage>,
    status: Arc<StatusCell>,
    /// Commands enqueued so far; compared against the worker's applied count.
    sent: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Starts a controller in `Closed`.
    pub(crate) fn spawn(
        setup: ControllerSetup,
        reports: Sender<ControllerReport>,
    ) -> Result<Self, CaptureError> {
        let facing = setup.facing;
        let provisions_still = setup.still.is_some();
        let status = Arc::new(StatusCell::new(facing));
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = worker::spawn(setup, tx.clone(), rx, reports, Arc::clone(&status))
            .map_err(|e| {
                tracing::error!(%facing, error = %e, "Failed to spawn controller worker");
                CaptureError::WorkerUnavailable(facing)
            })?;

        Ok(Self {
            facing,
            provisions_still,
            tx,
            status,
            sent: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Latest published status.
    pub fn status(&self) -> ControllerStatus {
        self.status.snapshot()
    }

    pub fn state(&self) -> ControllerState {
        self.status.snapshot().state
    }

    /// Whether this controller was provisioned with a still target.
    pub fn supports_still_capture(&self) -> bool {
        self.provisions_still
    }

    /// Requests the device be opened and streamed.
    ///
    /// Rejected with `AlreadyActive` unless the controller is closed or
    /// failed. The published state is only trusted once the worker has
    /// applied every earlier command; otherwise the start is queued behind
    /// them and the worker reports any rejection.
    pub fn start(&self) -> Result<(), CaptureError> {
        if let Some(status) = self.drained_status() {
            if !status.state.can_start() || status.stop_pending {
                return Err(CaptureError::AlreadyActive {
                    facing: self.facing,
                    state: status.state,
                });
            }
        }
        self.send(Command::Start)
    }

    /// Requests the device be released. Safe in any state.
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.send(Command::Stop)
    }

    /// Rebinds the preview output, recreating the session if one is live.
    pub fn configure(&self, preview: PreviewTarget) -> Result<(), CaptureError> {
        self.send(Command::Configure(preview))
    }

    /// Requests a single still frame.
    ///
    /// Like [`start`](Self::start), the state check only applies when no
    /// earlier command is still queued.
    pub fn capture_still(&self) -> Result<(), CaptureError> {
        let rejected = match self.drained_status() {
            _ if !self.provisions_still => Some(self.state()),
            Some(status) if !status.state.accepts_still() => Some(status.state),
            _ => None,
        };
        if let Some(state) = rejected {
            return Err(CaptureError::CaptureNotSupported {
                facing: self.facing,
                state,
            });
        }
        self.send(Command::CaptureStill)
    }

    /// Blocks until `predicate` holds for the published status or `timeout`
    /// elapses.
    pub fn wait_for(
        &self,
        predicate: impl Fn(&ControllerStatus) -> bool,
        timeout: Duration,
    ) -> Option<ControllerStatus> {
        self.status.wait_until(predicate, timeout)
    }

    /// Waits until every command sent so far has been applied and the
    /// controller holds nothing in flight.
    pub(crate) fn wait_quiescent(&self, timeout: Duration) -> bool {
        let sent = self.sent.load(Ordering::SeqCst);
        self.status
            .wait_until(
                |s| s.commands_applied >= sent && s.state.is_quiescent() && !s.device_live,
                timeout,
            )
            .is_some()
    }

    /// Stops the worker and joins it. The worker releases anything still
    /// held before exiting. Idempotent.
    pub(crate) fn join(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        // A closed queue means the worker already exited.
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if worker.join().is_err() {
            tracing::error!(facing = %self.facing, "Controller worker panicked");
        }
    }

    /// The published status, if it already reflects every command sent.
    fn drained_status(&self) -> Option<ControllerStatus> {
        let sent = self.sent.load(Ordering::SeqCst);
        let status = self.status.snapshot();
        (status.commands_applied >= sent).then_some(status)
    }

    fn send(&self, command: Command) -> Result<(), CaptureError> {
        // Counted before enqueueing so the applied count never overtakes it.
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(WorkerMessage::Command(command)).is_err() {
            self.sent.fetch_sub(1, Ordering::SeqCst);
            return Err(CaptureError::WorkerUnavailable(self.facing));
        }
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("facing", &self.facing)
            .field("provisions_still", &self.provisions_still)
            .field("sent", &self.sent.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::hardware::{ResponseMode, SimulatedHardware};
    use crate::session::{AutofocusMode, ImageFormat, Resolution, StillTarget, SurfaceId};
    use crate::sink::MemorySink;
    use crossbeam_channel::{unbounded, Receiver};

    const WAIT: Duration = Duration::from_secs(5);

    fn controller(
        facing: Facing,
        mode: ResponseMode,
    ) -> (SessionController, Arc<SimulatedHardware>, Receiver<ControllerReport>) {
        let hw = Arc::new(SimulatedHardware::dual(mode));
        let (reports_tx, reports) = unbounded();
        let setup = ControllerSetup {
            facing,
            device: Some(DeviceId::new(
                if facing == Facing::Back { "0" } else { "1" },
                facing,
            )),
            preview: PreviewTarget::new(SurfaceId::new(1), Resolution::new(64, 48)),
            still: (facing == Facing::Back).then_some(StillTarget {
                size: Resolution::new(128, 96),
                format: ImageFormat::Jpeg,
                max_images: 2,
            }),
            autofocus: AutofocusMode::default(),
            hardware: hw.clone(),
            sink: Arc::new(MemorySink::new()),
        };
        let controller = SessionController::spawn(setup, reports_tx).unwrap();
        (controller, hw, reports)
    }

    fn streaming(s: &ControllerStatus) -> bool {
        s.state == ControllerState::Streaming
    }

    #[test]
    fn test_worker_thread_drives_to_streaming() {
        let (c, hw, _reports) = controller(Facing::Back, ResponseMode::Delayed(Duration::from_millis(5)));
        assert_eq!(c.state(), ControllerState::Closed);

        c.start().unwrap();
        let status = c.wait_for(streaming, WAIT).unwrap();
        assert!(status.session_live);
        assert_eq!(hw.repeating_sessions(), 1);

        c.stop().unwrap();
        assert!(c.wait_quiescent(WAIT));
        assert_eq!(hw.live_connections(), 0);
    }

    #[test]
    fn test_start_rejected_from_published_state() {
        let (c, _hw, _reports) = controller(Facing::Front, ResponseMode::Immediate);
        c.start().unwrap();
        c.wait_for(streaming, WAIT).unwrap();

        assert!(matches!(
            c.start(),
            Err(CaptureError::AlreadyActive { .. })
        ));
    }

    #[test]
    fn test_stop_then_start_is_applied_in_order() {
        let (c, hw, reports) = controller(Facing::Back, ResponseMode::Immediate);
        for _ in 0..50 {
            c.start().unwrap();
            c.wait_for(streaming, WAIT).unwrap();

            // Neither call may be judged against the Streaming state above.
            c.stop().unwrap();
            c.start().unwrap();
            c.wait_for(streaming, WAIT).unwrap();
            c.stop().unwrap();
            assert!(c.wait_quiescent(WAIT));
        }
        assert_eq!(hw.live_connections(), 0);
        assert_eq!(hw.stats().open_calls, 100);
        assert!(!reports
            .try_iter()
            .any(|r| matches!(r.event, ReportEvent::Error(CaptureError::AlreadyActive { .. }))));
    }

    #[test]
    fn test_capture_precheck() {
        let (front, _hw, _r) = controller(Facing::Front, ResponseMode::Immediate);
        assert!(!front.supports_still_capture());
        assert!(matches!(
            front.capture_still(),
            Err(CaptureError::CaptureNotSupported { .. })
        ));

        let (back, _hw, reports) = controller(Facing::Back, ResponseMode::Immediate);
        assert!(matches!(
            back.capture_still(),
            Err(CaptureError::CaptureNotSupported {
                state: ControllerState::Closed,
                ..
            })
        ));

        back.start().unwrap();
        back.wait_for(streaming, WAIT).unwrap();
        back.capture_still().unwrap();
        back.wait_for(|s| s.stats.stills_captured == 1 && streaming(s), WAIT)
            .unwrap();
        assert!(reports
            .try_iter()
            .any(|r| matches!(r.event, ReportEvent::ImageStored(_))));
    }

    #[test]
    fn test_stop_right_after_start_ends_closed() {
        let (c, hw, _reports) = controller(Facing::Back, ResponseMode::Delayed(Duration::from_millis(10)));
        c.start().unwrap();
        c.stop().unwrap();

        assert!(c.wait_quiescent(WAIT));
        // Let any late callback land; it must not resurrect the device.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(c.state(), ControllerState::Closed);
        assert_eq!(hw.live_connections(), 0);
    }

    #[test]
    fn test_drop_joins_and_releases() {
        let (c, hw, _reports) = controller(Facing::Back, ResponseMode::Immediate);
        c.start().unwrap();
        c.wait_for(streaming, WAIT).unwrap();

        drop(c);
        assert_eq!(hw.live_connections(), 0);
        assert_eq!(hw.live_sessions(), 0);
    }

    #[test]
    fn test_commands_after_join_report_unavailable() {
        let (c, _hw, _reports) = controller(Facing::Front, ResponseMode::Immediate);
        c.join();
        c.join();
        assert_eq!(c.stop(), Err(CaptureError::WorkerUnavailable(Facing::Front)));
    }
}
