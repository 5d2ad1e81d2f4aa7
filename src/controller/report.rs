//! Reports emitted by controllers for the coordinator's caller.

use super::ControllerState;
use crate::device::Facing;
use crate::error::CaptureError;
use crate::sink::StoredLocation;

/// Something a controller wants its owner to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    ImageStored(StoredLocation),
    Error(CaptureError),
}

/// A report tagged with the controller it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerReport {
    pub facing: Facing,
    pub event: ReportEvent,
}

impl ControllerReport {
    /// The error carried by this report, if any.
    pub fn error(&self) -> Option<&CaptureError> {
        match &self.event {
            ReportEvent::Error(e) => Some(e),
            _ => None,
        }
    }
}
