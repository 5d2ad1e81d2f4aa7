//! Asynchronous camera hardware boundary.
//!
//! Every request is fire-and-forget: the call returns once the request has
//! been issued, and the outcome arrives later as a [`HardwareEvent`] through
//! the [`HardwareCallback`] supplied when the device was opened. Events for
//! one connection (and the sessions created on it) are delivered in the
//! order the hardware produced them.

#[cfg(feature = "camera")]
mod native;
mod simulated;

#[cfg(feature = "camera")]
pub use native::NativeHardware;
pub use simulated::{HardwareStats, OpenFault, ResponseMode, SimulatedHardware};

use crate::device::DeviceId;
use crate::session::{CaptureRequest, ImageFormat, OutputTarget, Resolution};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Raw errors reported synchronously by the hardware layer.
///
/// These never leave a session controller; they are mapped into
/// [`crate::CaptureError`] kinds first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera access denied: {0}")]
    AccessDenied(String),
    #[error("device busy: {0}")]
    Busy(String),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("platform error {code}: {message}")]
    Platform { code: i32, message: String },
}

macro_rules! raw_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

raw_id!(
    /// Hardware-assigned identifier of one device connection.
    ConnectionId,
    "conn"
);
raw_id!(
    /// Hardware-assigned identifier of one capture session.
    SessionId,
    "session"
);
raw_id!(
    /// Hardware-assigned identifier of one single-shot request.
    RequestId,
    "request"
);

/// A frame produced by a single-shot still request.
#[derive(Clone)]
pub struct StillFrame {
    pub bytes: Vec<u8>,
    pub size: Resolution,
    pub format: ImageFormat,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Debug for StillFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillFrame")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Callback events emitted by the hardware.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
    /// The device finished opening and `connection` is now live.
    Opened { connection: ConnectionId },
    /// The device went away. The connection still has to be closed.
    Disconnected { connection: ConnectionId },
    /// The device reported a fatal error. The connection still has to be closed.
    Error { connection: ConnectionId, code: i32 },
    /// The session finished configuration and accepts requests.
    SessionConfigured { session: SessionId },
    /// The session could not be configured and is unusable.
    SessionConfigureFailed { session: SessionId },
    CaptureCompleted {
        session: SessionId,
        request: RequestId,
        frame: StillFrame,
    },
    CaptureFailed {
        session: SessionId,
        request: RequestId,
        code: i32,
    },
}

/// A resource handed over by an event, which the receiver becomes
/// responsible for releasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferredResource {
    Connection(ConnectionId),
    Session(SessionId),
}

impl HardwareEvent {
    /// The resource ownership this event transfers, if any.
    ///
    /// A disconnect or error still leaves the connection for the receiver
    /// to close. When delivery of such an event fails the hardware must
    /// release the resource itself.
    pub fn transferred_resource(&self) -> Option<TransferredResource> {
        match self {
            HardwareEvent::Opened { connection }
            | HardwareEvent::Disconnected { connection }
            | HardwareEvent::Error { connection, .. } => {
                Some(TransferredResource::Connection(*connection))
            }
            HardwareEvent::SessionConfigured { session } => {
                Some(TransferredResource::Session(*session))
            }
            _ => None,
        }
    }
}

/// Delivery endpoint for hardware events.
///
/// Cloning is cheap; every clone feeds the same ordered queue.
#[derive(Clone)]
pub struct HardwareCallback {
    deliver: Arc<dyn Fn(HardwareEvent) -> bool + Send + Sync>,
}

impl HardwareCallback {
    /// Wraps a delivery function returning `false` once the receiver is gone.
    pub fn new(deliver: impl Fn(HardwareEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Delivers an event. Returns `false` if nobody is listening anymore.
    pub fn deliver(&self, event: HardwareEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for HardwareCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareCallback").finish_non_exhaustive()
    }
}

/// Trait for camera hardware implementations.
///
/// Implementations must never block on device I/O inside these calls and
/// must never invoke the callback re-entrantly from within a call in a way
/// that requires the caller to make progress first.
pub trait CameraHardware: Send + Sync {
    /// Requests that `device` be opened. Completion arrives as
    /// [`HardwareEvent::Opened`], failure as `Error` or `Disconnected`.
    fn open(
        &self,
        device: &DeviceId,
        callback: HardwareCallback,
    ) -> Result<ConnectionId, HardwareError>;

    /// Requests a capture session bound to `targets`. Completion arrives as
    /// `SessionConfigured` or `SessionConfigureFailed`.
    fn create_session(
        &self,
        connection: ConnectionId,
        targets: &[OutputTarget],
    ) -> Result<SessionId, HardwareError>;

    /// Replaces the session's repeating request.
    fn set_repeating_request(
        &self,
        session: SessionId,
        request: &CaptureRequest,
    ) -> Result<(), HardwareError>;

    /// Stops the session's repeating request, if any.
    fn stop_repeating(&self, session: SessionId) -> Result<(), HardwareError>;

    /// Issues a single-shot request. Completion arrives as
    /// `CaptureCompleted` or `CaptureFailed`.
    fn capture(
        &self,
        session: SessionId,
        request: &CaptureRequest,
    ) -> Result<RequestId, HardwareError>;

    fn close_session(&self, session: SessionId) -> Result<(), HardwareError>;

    /// Closes the connection. Any sessions still bound to it are invalidated.
    fn close_device(&self, connection: ConnectionId) -> Result<(), HardwareError>;
}
