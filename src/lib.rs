//! Dual Camera Session Library
//!
//! Drives a front and a back camera concurrently: each camera streams a
//! continuous preview, and the back camera can additionally take still
//! images that are handed to an image sink.
//!
//! # Architecture
//!
//! ```text
//!                  CaptureCoordinator
//!                  /                \
//!     SessionController        SessionController
//!        (back worker)            (front worker)
//!             |                        |
//!     DeviceHandle + Session   DeviceHandle + Session
//!              \                      /
//!               CameraHardware (callbacks)
//! ```
//!
//! Every controller runs on its own worker thread. Commands and hardware
//! callbacks for a controller go through one ordered queue, so a device
//! and its session are only ever touched from that thread.
//!
//! # Design Principles
//!
//! - **Fire-and-forget hardware**: open, configure and capture never block
//!   the caller; completions re-enter the owning worker as events
//! - **Scoped resources**: sessions close before their device, exactly once,
//!   even when one release fails
//! - **Independent controllers**: the two cameras share nothing mutable;
//!   `shutdown_all` is the only point where they are waited on together
//!
//! # Example
//!
//! ```no_run
//! use dual_camera::{
//!     CaptureCoordinator, Collaborators, ControllerState, Facing, FileConfig, FileSink,
//!     ResponseMode, SimulatedHardware,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let hardware = Arc::new(SimulatedHardware::dual(ResponseMode::Immediate));
//! let coordinator = CaptureCoordinator::new(
//!     &FileConfig::default(),
//!     Collaborators {
//!         hardware: hardware.clone(),
//!         enumerator: hardware,
//!         sink: Arc::new(FileSink::new("captures")),
//!     },
//! )
//! .unwrap();
//!
//! coordinator.start(Facing::Back).unwrap();
//! coordinator.start(Facing::Front).unwrap();
//! coordinator.wait_for_state(Facing::Back, ControllerState::Streaming, Duration::from_secs(2));
//!
//! coordinator.capture_still().unwrap();
//! coordinator.shutdown_all().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod hardware;
pub mod metrics;
pub mod session;
pub mod sink;

// Re-export commonly used types at crate root
pub use config::{ConfigError, FileConfig};
pub use controller::{
    ControllerReport, ControllerState, ControllerStatus, Failure, ReportEvent, SessionController,
};
pub use coordinator::{CaptureCoordinator, Collaborators};
pub use device::{DeviceEnumerator, DeviceId, DeviceInfo, Facing};
pub use error::CaptureError;
#[cfg(feature = "camera")]
pub use hardware::NativeHardware;
pub use hardware::{CameraHardware, ResponseMode, SimulatedHardware};
pub use sink::{CapturedImage, FileSink, ImageSink, MemorySink, StoredLocation};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
