//! Output targets, capture requests, and the scoped device/session
//! resources a controller owns.
//!
//! A [`CaptureSession`] is always owned by the [`DeviceHandle`] it was
//! created on, so the session can never outlive the device and is always
//! closed first.

mod handle;
mod request;
mod target;

pub use handle::{CaptureSession, DeviceHandle, ReleaseOutcome};
pub use request::{AutofocusMode, CaptureRequest, RequestTemplate};
pub use target::{ImageFormat, OutputTarget, PreviewTarget, Resolution, StillTarget, SurfaceId};
