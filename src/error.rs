//! Errors surfaced by controllers and the coordinator.
//!
//! Raw hardware errors are converted into these kinds inside the owning
//! session controller; callers never see platform error codes directly.

use crate::config::ConfigError;
use crate::controller::ControllerState;
use crate::device::Facing;
use thiserror::Error;

/// Errors observable by callers of the capture API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The hardware refused or failed to open the device.
    #[error("{facing} camera failed to open: {reason}")]
    DeviceOpenFailed { facing: Facing, reason: String },

    /// The device opened but the pipeline configuration was rejected.
    /// The device stays open and configuration may be retried.
    #[error("{facing} camera session configuration failed: {reason}")]
    SessionConfigurationFailed { facing: Facing, reason: String },

    /// Still capture requested without a still target or outside streaming.
    #[error("{facing} camera cannot capture a still image while {state}")]
    CaptureNotSupported {
        facing: Facing,
        state: ControllerState,
    },

    /// `start` requested on a controller that is not closed.
    #[error("{facing} camera is already active ({state})")]
    AlreadyActive {
        facing: Facing,
        state: ControllerState,
    },

    /// The device was lost without being asked to close.
    #[error("{facing} camera disconnected: {reason}")]
    HardwareDisconnected { facing: Facing, reason: String },

    /// The image sink rejected a captured buffer.
    #[error("image sink rejected {facing} capture: {reason}")]
    SinkWriteFailed { facing: Facing, reason: String },

    /// A single-shot request failed on the device.
    #[error("{facing} still capture failed: {reason}")]
    StillCaptureFailed { facing: Facing, reason: String },

    /// The still target has no free buffers for another capture.
    #[error("{facing} camera already has {outstanding} still captures outstanding")]
    CaptureBusy { facing: Facing, outstanding: usize },

    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),

    /// The controller's worker has exited or could not be started.
    #[error("{0} camera worker is not running")]
    WorkerUnavailable(Facing),

    #[error("shutdown timed out waiting for {0:?} camera")]
    ShutdownTimeout(Vec<Facing>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CaptureError {
    /// The controller the error originated from, if any.
    pub fn facing(&self) -> Option<Facing> {
        match self {
            CaptureError::DeviceOpenFailed { facing, .. }
            | CaptureError::SessionConfigurationFailed { facing, .. }
            | CaptureError::CaptureNotSupported { facing, .. }
            | CaptureError::AlreadyActive { facing, .. }
            | CaptureError::HardwareDisconnected { facing, .. }
            | CaptureError::SinkWriteFailed { facing, .. }
            | CaptureError::StillCaptureFailed { facing, .. }
            | CaptureError::CaptureBusy { facing, .. } => Some(*facing),
            CaptureError::WorkerUnavailable(facing) => Some(*facing),
            CaptureError::EnumerationFailed(_)
            | CaptureError::ShutdownTimeout(_)
            | CaptureError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CaptureError::CaptureNotSupported {
            facing: Facing::Front,
            state: ControllerState::Streaming,
        };
        assert_eq!(
            err.to_string(),
            "front camera cannot capture a still image while streaming"
        );
        assert_eq!(err.facing(), Some(Facing::Front));
        assert_eq!(CaptureError::EnumerationFailed("x".into()).facing(), None);
    }
}
