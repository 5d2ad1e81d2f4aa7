//! Physical camera identity and enumeration.
//!
//! Devices are discovered once by an external enumerator and are
//! immutable afterwards. Controllers only ever see a [`DeviceId`].

mod enumerate;
mod id;

pub(crate) use enumerate::first_facing;
pub use enumerate::{ConcurrencySupport, DeviceEnumerator, StaticEnumerator};
pub use id::{Capability, DeviceId, DeviceInfo, Facing};
