//! Controller lifecycle states.

use serde::Serialize;
use std::fmt;

/// Why a controller entered [`ControllerState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Failure {
    /// The device never opened. Nothing is retained.
    DeviceOpen,
    /// The session was rejected. The device is retained for a retry.
    SessionConfiguration,
    /// The device was lost. Nothing is retained.
    Disconnected,
}

/// Lifecycle state of one session controller.
///
/// `Closed -> Opening -> Open -> Configuring -> Streaming <-> Capturing`,
/// then `Closing -> Closed`, with `Failed` reachable from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerState {
    Closed,
    Opening,
    Open,
    Configuring,
    Streaming,
    Capturing,
    Closing,
    Failed(Failure),
}

impl ControllerState {
    /// Closed or failed: nothing is in flight.
    pub fn is_quiescent(&self) -> bool {
        matches!(self, ControllerState::Closed | ControllerState::Failed(_))
    }

    /// States from which `start` is accepted.
    pub fn can_start(&self) -> bool {
        self.is_quiescent()
    }

    /// States in which a still capture is accepted (possibly queued).
    pub fn accepts_still(&self) -> bool {
        matches!(self, ControllerState::Streaming | ControllerState::Capturing)
    }

    /// States that imply a live device connection.
    pub fn has_device(&self) -> bool {
        matches!(
            self,
            ControllerState::Open
                | ControllerState::Configuring
                | ControllerState::Streaming
                | ControllerState::Capturing
                | ControllerState::Failed(Failure::SessionConfiguration)
        )
    }

    /// Numeric code exported as a metric.
    pub fn code(&self) -> i64 {
        match self {
            ControllerState::Closed => 0,
            ControllerState::Opening => 1,
            ControllerState::Open => 2,
            ControllerState::Configuring => 3,
            ControllerState::Streaming => 4,
            ControllerState::Capturing => 5,
            ControllerState::Closing => 6,
            ControllerState::Failed(_) => -1,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Closed => f.write_str("closed"),
            ControllerState::Opening => f.write_str("opening"),
            ControllerState::Open => f.write_str("open"),
            ControllerState::Configuring => f.write_str("configuring"),
            ControllerState::Streaming => f.write_str("streaming"),
            ControllerState::Capturing => f.write_str("capturing"),
            ControllerState::Closing => f.write_str("closing"),
            ControllerState::Failed(Failure::DeviceOpen) => f.write_str("failed (open)"),
            ControllerState::Failed(Failure::SessionConfiguration) => {
                f.write_str("failed (configuration)")
            }
            ControllerState::Failed(Failure::Disconnected) => f.write_str("failed (disconnected)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ControllerState::Closed.can_start());
        assert!(ControllerState::Failed(Failure::Disconnected).can_start());
        assert!(!ControllerState::Streaming.can_start());

        assert!(ControllerState::Capturing.accepts_still());
        assert!(!ControllerState::Open.accepts_still());

        assert!(ControllerState::Failed(Failure::SessionConfiguration).has_device());
        assert!(!ControllerState::Failed(Failure::DeviceOpen).has_device());
    }
}
