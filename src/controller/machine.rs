//! Per-device session state machine.
//!
//! Runs only on its controller's worker. Commands and hardware callbacks
//! arrive through the same ordered queue and are applied one at a time, so
//! the device handle and session need no locking.

use super::report::{ControllerReport, ReportEvent};
use super::status::{ControllerStats, ControllerStatus, StatusCell};
use super::worker::{Command, WorkerMessage};
use super::{ControllerState, Failure};
use crate::device::{DeviceId, Facing};
use crate::error::CaptureError;
use crate::hardware::{
    CameraHardware, ConnectionId, HardwareCallback, HardwareEvent, RequestId, SessionId,
    StillFrame,
};
use crate::session::{
    AutofocusMode, CaptureRequest, CaptureSession, DeviceHandle, OutputTarget, PreviewTarget,
    StillTarget,
};
use crate::sink::{CapturedImage, ImageSink};
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Everything a controller needs, fixed at construction.
#[derive(Clone)]
pub(crate) struct ControllerSetup {
    pub facing: Facing,
    /// First enumerated device with this facing, if any.
    pub device: Option<DeviceId>,
    pub preview: PreviewTarget,
    /// Present only on the controller that provisions still capture.
    pub still: Option<StillTarget>,
    pub autofocus: AutofocusMode,
    pub hardware: Arc<dyn CameraHardware>,
    pub sink: Arc<dyn ImageSink>,
}

pub(crate) struct StateMachine {
    facing: Facing,
    device: Option<DeviceId>,
    hardware: Arc<dyn CameraHardware>,
    callback: HardwareCallback,
    sink: Arc<dyn ImageSink>,
    reports: Sender<ControllerReport>,
    status: Arc<StatusCell>,

    preview: PreviewTarget,
    still: Option<StillTarget>,
    autofocus: AutofocusMode,

    state: ControllerState,
    handle: Option<DeviceHandle>,
    pending_open: Option<ConnectionId>,
    pending_session: Option<SessionId>,
    in_flight: Option<RequestId>,
    queued_stills: usize,
    stop_pending: bool,
    reconfigure_pending: bool,

    commands_applied: u64,
    still_sequence: u64,
    stats: ControllerStats,
}

impl StateMachine {
    pub(crate) fn new(
        setup: ControllerSetup,
        callback: HardwareCallback,
        reports: Sender<ControllerReport>,
        status: Arc<StatusCell>,
    ) -> Self {
        Self {
            facing: setup.facing,
            device: setup.device,
            hardware: setup.hardware,
            callback,
            sink: setup.sink,
            reports,
            status,
            preview: setup.preview,
            still: setup.still,
            autofocus: setup.autofocus,
            state: ControllerState::Closed,
            handle: None,
            pending_open: None,
            pending_session: None,
            in_flight: None,
            queued_stills: 0,
            stop_pending: false,
            reconfigure_pending: false,
            commands_applied: 0,
            still_sequence: 0,
            stats: ControllerStats::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ControllerState {
        self.state
    }

    /// Applies one message. Returns false once the worker should exit.
    pub(crate) fn handle(&mut self, message: WorkerMessage) -> bool {
        let keep_running = match message {
            WorkerMessage::Command(command) => {
                self.apply_command(command);
                self.commands_applied += 1;
                true
            }
            WorkerMessage::Hardware(event) => {
                self.apply_event(event);
                true
            }
            WorkerMessage::Shutdown => {
                self.shutdown();
                false
            }
        };
        self.publish();
        keep_running
    }

    fn apply_command(&mut self, command: Command) {
        tracing::trace!(facing = %self.facing, ?command, state = %self.state, "Applying command");
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Configure(preview) => self.configure(preview),
            Command::CaptureStill => self.capture_still(),
        }
    }

    fn apply_event(&mut self, event: HardwareEvent) {
        tracing::trace!(facing = %self.facing, ?event, state = %self.state, "Hardware callback");
        match event {
            HardwareEvent::Opened { connection } => self.on_opened(connection),
            HardwareEvent::Disconnected { connection } => {
                self.on_device_lost(connection, "device disconnected".to_string())
            }
            HardwareEvent::Error { connection, code } => {
                self.on_device_lost(connection, format!("device reported error {code}"))
            }
            HardwareEvent::SessionConfigured { session } => self.on_configured(session),
            HardwareEvent::SessionConfigureFailed { session } => self.on_configure_failed(session),
            HardwareEvent::CaptureCompleted { request, frame, .. } => {
                self.on_capture_completed(request, frame)
            }
            HardwareEvent::CaptureFailed { request, code, .. } => {
                self.on_capture_failed(request, code)
            }
        }
    }

    // Commands

    fn start(&mut self) {
        if !self.state.can_start() || self.stop_pending {
            self.report_error(CaptureError::AlreadyActive {
                facing: self.facing,
                state: self.state,
            });
            return;
        }
        let Some(device) = self.device.clone() else {
            self.report_error(CaptureError::DeviceOpenFailed {
                facing: self.facing,
                reason: format!("no {}-facing device", self.facing),
            });
            return;
        };

        // A failed instance may still hold a device after a rejected session.
        self.release_resources();

        self.stats.opens += 1;
        self.transition(ControllerState::Opening);
        match self.hardware.open(&device, self.callback.clone()) {
            Ok(connection) => {
                tracing::debug!(facing = %self.facing, %device, %connection, "Open requested");
                self.pending_open = Some(connection);
            }
            Err(e) => {
                self.stats.open_failures += 1;
                self.settle_failure(
                    Failure::DeviceOpen,
                    CaptureError::DeviceOpenFailed {
                        facing: self.facing,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn stop(&mut self) {
        self.queued_stills = 0;
        match self.state {
            ControllerState::Closed => {
                tracing::trace!(facing = %self.facing, "Stop on closed controller");
            }
            ControllerState::Opening
            | ControllerState::Configuring
            | ControllerState::Capturing => {
                if !self.stop_pending {
                    tracing::debug!(
                        facing = %self.facing,
                        state = %self.state,
                        "Stop queued behind in-flight request"
                    );
                }
                self.stop_pending = true;
                self.reconfigure_pending = false;
            }
            ControllerState::Open
            | ControllerState::Streaming
            | ControllerState::Closing
            | ControllerState::Failed(_) => self.close(),
        }
    }

    fn configure(&mut self, preview: PreviewTarget) {
        self.preview = preview;
        match self.state {
            ControllerState::Open | ControllerState::Failed(Failure::SessionConfiguration) => {
                self.begin_configure()
            }
            ControllerState::Streaming => self.reconfigure_live(),
            ControllerState::Configuring | ControllerState::Capturing => {
                if !self.stop_pending {
                    self.reconfigure_pending = true;
                }
            }
            // Picked up by the next configuration.
            ControllerState::Closed
            | ControllerState::Opening
            | ControllerState::Closing
            | ControllerState::Failed(_) => {}
        }
    }

    fn capture_still(&mut self) {
        let Some(still) = self.still else {
            self.report_error(CaptureError::CaptureNotSupported {
                facing: self.facing,
                state: self.state,
            });
            return;
        };
        if self.stop_pending || !self.state.accepts_still() {
            self.report_error(CaptureError::CaptureNotSupported {
                facing: self.facing,
                state: self.state,
            });
            return;
        }

        if self.state == ControllerState::Streaming {
            self.begin_still(&still);
            return;
        }

        let outstanding = 1 + self.queued_stills;
        if outstanding < still.max_images {
            self.queued_stills += 1;
            tracing::debug!(facing = %self.facing, queued = self.queued_stills, "Still capture queued");
        } else {
            self.report_error(CaptureError::CaptureBusy {
                facing: self.facing,
                outstanding,
            });
        }
    }

    // Hardware callbacks

    fn on_opened(&mut self, connection: ConnectionId) {
        if self.pending_open != Some(connection) || self.state != ControllerState::Opening {
            tracing::debug!(facing = %self.facing, %connection, "Closing stale connection");
            if let Err(e) = self.hardware.close_device(connection) {
                tracing::debug!(facing = %self.facing, %connection, error = %e, "Stale close failed");
            }
            return;
        }
        self.pending_open = None;

        let Some(device) = self.device.clone() else {
            return;
        };
        self.handle = Some(DeviceHandle::new(connection, device, Arc::clone(&self.hardware)));
        self.transition(ControllerState::Open);

        if self.stop_pending {
            self.close();
        } else {
            self.begin_configure();
        }
    }

    fn on_device_lost(&mut self, connection: ConnectionId, reason: String) {
        if self.state == ControllerState::Opening && self.pending_open == Some(connection) {
            self.pending_open = None;
            if let Err(e) = self.hardware.close_device(connection) {
                tracing::debug!(facing = %self.facing, %connection, error = %e, "Partial open release failed");
            }
            self.stats.open_failures += 1;
            self.settle_failure(
                Failure::DeviceOpen,
                CaptureError::DeviceOpenFailed {
                    facing: self.facing,
                    reason,
                },
            );
            return;
        }

        let owns = self.handle.as_ref().map(DeviceHandle::connection) == Some(connection);
        if !owns {
            tracing::debug!(facing = %self.facing, %connection, %reason, "Ignoring loss of untracked connection");
            return;
        }

        self.stats.disconnects += 1;
        self.release_resources();
        self.settle_failure(
            Failure::Disconnected,
            CaptureError::HardwareDisconnected {
                facing: self.facing,
                reason,
            },
        );
    }

    fn on_configured(&mut self, session: SessionId) {
        if self.pending_session != Some(session) || self.state != ControllerState::Configuring {
            tracing::debug!(facing = %self.facing, %session, "Closing stale session");
            if let Err(e) = self.hardware.close_session(session) {
                tracing::debug!(facing = %self.facing, %session, error = %e, "Stale close failed");
            }
            return;
        }
        self.pending_session = None;

        let mut capture_session =
            CaptureSession::new(session, self.targets(), Arc::clone(&self.hardware));
        if self.stop_pending {
            if let Some(handle) = self.handle.as_mut() {
                handle.attach_session(capture_session);
            }
            self.close();
            return;
        }

        // A configured session always starts its repeating preview request.
        let request = CaptureRequest::preview(&self.preview, self.autofocus);
        if let Err(e) = capture_session.start_repeating(&request) {
            if let Err(close_err) = capture_session.close() {
                tracing::warn!(facing = %self.facing, error = %close_err, "Failed to close idle session");
            }
            self.configuration_failed(format!("failed to start preview: {e}"));
            return;
        }

        tracing::debug!(
            facing = %self.facing,
            %session,
            outputs = capture_session.targets().len(),
            repeating = capture_session.is_repeating(),
            "Session streaming"
        );
        match self.handle.as_mut() {
            Some(handle) => handle.attach_session(capture_session),
            None => return,
        }
        self.transition(ControllerState::Streaming);

        if self.reconfigure_pending {
            self.reconfigure_pending = false;
            self.reconfigure_live();
        }
    }

    fn on_configure_failed(&mut self, session: SessionId) {
        if self.pending_session != Some(session) {
            tracing::debug!(facing = %self.facing, %session, "Ignoring stale configuration failure");
            return;
        }
        self.pending_session = None;
        self.configuration_failed("session configuration rejected by device".to_string());
    }

    fn on_capture_completed(&mut self, request: RequestId, frame: StillFrame) {
        if self.in_flight != Some(request) {
            tracing::debug!(facing = %self.facing, %request, "Ignoring stale capture result");
            return;
        }
        self.in_flight = None;
        self.stats.stills_captured += 1;
        self.still_sequence += 1;

        let image = CapturedImage::new(frame, self.facing, self.still_sequence);
        match self.sink.accept(image) {
            Ok(location) => {
                tracing::info!(
                    facing = %self.facing,
                    path = %location.path.display(),
                    bytes = location.bytes,
                    "Still image stored"
                );
                self.report(ReportEvent::ImageStored(location));
            }
            Err(e) => {
                self.stats.sink_failures += 1;
                self.report_error(CaptureError::SinkWriteFailed {
                    facing: self.facing,
                    reason: e.to_string(),
                });
            }
        }
        self.finish_still();
    }

    fn on_capture_failed(&mut self, request: RequestId, code: i32) {
        if self.in_flight != Some(request) {
            tracing::debug!(facing = %self.facing, %request, "Ignoring stale capture failure");
            return;
        }
        self.in_flight = None;
        self.stats.still_failures += 1;
        self.report_error(CaptureError::StillCaptureFailed {
            facing: self.facing,
            reason: format!("device reported error {code}"),
        });
        self.finish_still();
    }

    // Steps

    fn targets(&self) -> Vec<OutputTarget> {
        let mut targets = vec![OutputTarget::Preview(self.preview)];
        targets.extend(self.still.map(OutputTarget::Still));
        targets
    }

    fn begin_configure(&mut self) {
        let Some(connection) = self.handle.as_ref().map(DeviceHandle::connection) else {
            return;
        };
        self.transition(ControllerState::Configuring);
        match self.hardware.create_session(connection, &self.targets()) {
            Ok(session) => {
                tracing::debug!(facing = %self.facing, %session, "Session configuration requested");
                self.pending_session = Some(session);
            }
            Err(e) => self.configuration_failed(e.to_string()),
        }
    }

    /// Replaces the live session with one bound to the current targets.
    fn reconfigure_live(&mut self) {
        if let Some(Err(e)) = self.handle.as_mut().and_then(DeviceHandle::close_session) {
            tracing::warn!(facing = %self.facing, error = %e, "Failed to close session for reconfiguration");
        }
        self.begin_configure();
    }

    fn configuration_failed(&mut self, reason: String) {
        self.stats.configure_failures += 1;
        self.reconfigure_pending = false;
        self.settle_failure(
            Failure::SessionConfiguration,
            CaptureError::SessionConfigurationFailed {
                facing: self.facing,
                reason,
            },
        );
    }

    fn begin_still(&mut self, still: &StillTarget) {
        let request = CaptureRequest::still(still, self.autofocus);
        let issued = match self.handle.as_ref().and_then(DeviceHandle::session) {
            Some(session) if !session.has_still_target() => {
                self.report_error(CaptureError::CaptureNotSupported {
                    facing: self.facing,
                    state: self.state,
                });
                return;
            }
            Some(session) => session.capture(&request),
            None => return,
        };
        match issued {
            Ok(request_id) => {
                self.in_flight = Some(request_id);
                self.transition(ControllerState::Capturing);
            }
            Err(e) => {
                self.stats.still_failures += 1;
                self.report_error(CaptureError::StillCaptureFailed {
                    facing: self.facing,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Returns to streaming, then runs whatever was waiting on the capture:
    /// a stop first, then queued stills, then a reconfiguration.
    fn finish_still(&mut self) {
        self.transition(ControllerState::Streaming);
        if self.stop_pending {
            self.close();
            return;
        }

        while self.state == ControllerState::Streaming && self.queued_stills > 0 {
            self.queued_stills -= 1;
            if let Some(still) = self.still {
                self.begin_still(&still);
            }
        }

        if self.state == ControllerState::Streaming && self.reconfigure_pending {
            self.reconfigure_pending = false;
            self.reconfigure_live();
        }
    }

    /// Lands a failed step: `Closed` if a stop was waiting on it, otherwise
    /// `Failed(failure)`. Resources are released only for failures that
    /// leave nothing worth keeping.
    fn settle_failure(&mut self, failure: Failure, error: CaptureError) {
        self.report_error(error);
        if self.stop_pending {
            self.close();
            return;
        }
        if failure != Failure::SessionConfiguration {
            self.release_resources();
        }
        self.queued_stills = 0;
        self.transition(ControllerState::Failed(failure));
    }

    fn close(&mut self) {
        self.transition(ControllerState::Closing);
        self.release_resources();
        self.stop_pending = false;
        self.reconfigure_pending = false;
        self.transition(ControllerState::Closed);
    }

    /// The single cleanup path: session first, then device, best effort.
    fn release_resources(&mut self) {
        self.pending_session = None;
        self.in_flight = None;
        self.queued_stills = 0;
        if let Some(connection) = self.pending_open.take() {
            tracing::debug!(facing = %self.facing, %connection, "Abandoning in-flight open");
        }

        if let Some(handle) = self.handle.take() {
            let device = handle.device().clone();
            let outcome = handle.close();
            if outcome.is_clean() {
                tracing::debug!(facing = %self.facing, %device, "Device released");
            } else {
                tracing::warn!(facing = %self.facing, %device, ?outcome, "Device released with errors");
            }
        }
    }

    fn shutdown(&mut self) {
        if self.state != ControllerState::Closed || self.handle.is_some() {
            self.close();
        }
        tracing::debug!(facing = %self.facing, "Controller shut down");
    }

    // Reporting

    fn transition(&mut self, to: ControllerState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!(facing = %self.facing, %from, %to, "Controller state changed");
        self.report(ReportEvent::StateChanged { from, to });
    }

    fn report_error(&mut self, error: CaptureError) {
        tracing::warn!(facing = %self.facing, %error, "Controller error");
        self.report(ReportEvent::Error(error));
    }

    fn report(&self, event: ReportEvent) {
        // The log line above is the record if nobody listens.
        let _ = self.reports.send(ControllerReport {
            facing: self.facing,
            event,
        });
    }

    fn publish(&self) {
        let session_live = self
            .handle
            .as_ref()
            .map(|h| h.session().is_some())
            .unwrap_or(false);
        self.status.publish(ControllerStatus {
            facing: self.facing,
            state: self.state,
            device_live: self.handle.is_some(),
            session_live,
            stop_pending: self.stop_pending,
            commands_applied: self.commands_applied,
            stats: self.stats.clone(),
        });
    }
}
