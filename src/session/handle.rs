//! Scoped device and session resources.
//!
//! Both wrappers release their hardware resource exactly once: either
//! through an explicit `close`, or on drop if nobody closed them.

use super::{CaptureRequest, OutputTarget};
use crate::device::DeviceId;
use crate::hardware::{CameraHardware, ConnectionId, HardwareError, RequestId, SessionId};
use std::fmt;
use std::sync::Arc;

/// A configured, running pipeline bound to one device connection.
pub struct CaptureSession {
    id: SessionId,
    targets: Vec<OutputTarget>,
    repeating: bool,
    hardware: Arc<dyn CameraHardware>,
    released: bool,
}

impl CaptureSession {
    /// Adopts a session the hardware reported as configured.
    pub fn new(id: SessionId, targets: Vec<OutputTarget>, hardware: Arc<dyn CameraHardware>) -> Self {
        Self {
            id,
            targets,
            repeating: false,
            hardware,
            released: false,
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }

    pub fn has_still_target(&self) -> bool {
        self.targets.iter().any(OutputTarget::is_still)
    }

    #[inline]
    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Starts (or replaces) the repeating request.
    pub fn start_repeating(&mut self, request: &CaptureRequest) -> Result<(), HardwareError> {
        self.hardware.set_repeating_request(self.id, request)?;
        self.repeating = true;
        Ok(())
    }

    /// Issues a single-shot request alongside the repeating one.
    pub fn capture(&self, request: &CaptureRequest) -> Result<RequestId, HardwareError> {
        self.hardware.capture(self.id, request)
    }

    /// Stops the repeating request and closes the session.
    pub fn close(mut self) -> Result<(), HardwareError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if self.repeating {
            self.repeating = false;
            if let Err(e) = self.hardware.stop_repeating(self.id) {
                tracing::debug!(session = %self.id, error = %e, "Failed to stop repeating request");
            }
        }
        self.hardware.close_session(self.id)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(session = %self.id, error = %e, "Failed to close capture session");
        }
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("targets", &self.targets)
            .field("repeating", &self.repeating)
            .finish()
    }
}

/// Result of releasing a device handle.
#[derive(Debug)]
pub struct ReleaseOutcome {
    /// Session close result, if a session was attached.
    pub session: Option<Result<(), HardwareError>>,
    pub device: Result<(), HardwareError>,
}

impl ReleaseOutcome {
    /// True if every release call succeeded.
    pub fn is_clean(&self) -> bool {
        self.device.is_ok() && !matches!(self.session, Some(Err(_)))
    }
}

/// One live hardware device connection and the session bound to it.
pub struct DeviceHandle {
    connection: ConnectionId,
    device: DeviceId,
    hardware: Arc<dyn CameraHardware>,
    session: Option<CaptureSession>,
    released: bool,
}

impl DeviceHandle {
    /// Adopts a connection the hardware reported as opened.
    pub fn new(connection: ConnectionId, device: DeviceId, hardware: Arc<dyn CameraHardware>) -> Self {
        Self {
            connection,
            device,
            hardware,
            session: None,
            released: false,
        }
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// Binds a session to this device, closing any previous one first.
    pub fn attach_session(&mut self, session: CaptureSession) {
        if let Some(Err(e)) = self.close_session() {
            tracing::warn!(device = %self.device, error = %e, "Failed to close replaced session");
        }
        self.session = Some(session);
    }

    /// Closes the attached session, leaving the device open.
    pub fn close_session(&mut self) -> Option<Result<(), HardwareError>> {
        self.session.take().map(CaptureSession::close)
    }

    /// Closes the session (if any) and then the device.
    ///
    /// The device close is attempted even when closing the session fails.
    pub fn close(mut self) -> ReleaseOutcome {
        self.release()
    }

    fn release(&mut self) -> ReleaseOutcome {
        let session = self.close_session();
        let device = if self.released {
            Ok(())
        } else {
            self.released = true;
            self.hardware.close_device(self.connection)
        };
        ReleaseOutcome { session, device }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let outcome = self.release();
        if !outcome.is_clean() {
            tracing::warn!(device = %self.device, ?outcome, "Device released with errors");
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("connection", &self.connection)
            .field("device", &self.device)
            .field("session", &self.session)
            .finish()
    }
}
