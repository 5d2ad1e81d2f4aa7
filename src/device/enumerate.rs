//! Device enumeration boundary.

use super::{Capability, DeviceId, DeviceInfo, Facing};
use crate::hardware::HardwareError;

/// Source of the ordered list of cameras present on the platform.
pub trait DeviceEnumerator: Send + Sync {
    /// Returns every device in platform order.
    fn devices(&self) -> Result<Vec<DeviceInfo>, HardwareError>;
}

/// Enumerator over a fixed device list.
#[derive(Debug, Clone, Default)]
pub struct StaticEnumerator {
    devices: Vec<DeviceInfo>,
}

impl StaticEnumerator {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }
}

impl DeviceEnumerator for StaticEnumerator {
    fn devices(&self) -> Result<Vec<DeviceInfo>, HardwareError> {
        Ok(self.devices.clone())
    }
}

/// Advisory result of inspecting device capabilities.
///
/// A negative result never blocks `start`; it is only surfaced as a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencySupport {
    /// Devices that advertise logical multi-camera support.
    pub capable_devices: Vec<DeviceId>,
}

impl ConcurrencySupport {
    pub fn from_devices(devices: &[DeviceInfo]) -> Self {
        Self {
            capable_devices: devices
                .iter()
                .filter(|d| d.has_capability(Capability::LogicalMultiCamera))
                .map(|d| d.id.clone())
                .collect(),
        }
    }

    /// True if at least one device advertises multi-camera capability.
    pub fn is_supported(&self) -> bool {
        !self.capable_devices.is_empty()
    }
}

/// First device in enumeration order facing `facing`.
pub(crate) fn first_facing(devices: &[DeviceInfo], facing: Facing) -> Option<DeviceId> {
    devices
        .iter()
        .find(|d| d.facing() == facing)
        .map(|d| d.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo::new(DeviceId::new("0", Facing::Back), vec![]),
            DeviceInfo::new(DeviceId::new("1", Facing::Front), vec![]),
            DeviceInfo::new(
                DeviceId::new("2", Facing::Back),
                vec![Capability::LogicalMultiCamera],
            ),
        ]
    }

    #[test]
    fn test_first_facing_respects_order() {
        let list = devices();
        assert_eq!(first_facing(&list, Facing::Back).unwrap().as_str(), "0");
        assert_eq!(first_facing(&list, Facing::Front).unwrap().as_str(), "1");
        assert!(first_facing(&list[..1], Facing::Front).is_none());
    }

    #[test]
    fn test_concurrency_support() {
        let support = ConcurrencySupport::from_devices(&devices());
        assert!(support.is_supported());
        assert_eq!(support.capable_devices.len(), 1);

        let none = ConcurrencySupport::from_devices(&devices()[..2]);
        assert!(!none.is_supported());
    }

    #[test]
    fn test_static_enumerator() {
        let enumerator = StaticEnumerator::new(devices());
        assert_eq!(enumerator.devices().unwrap().len(), 3);
    }
}
