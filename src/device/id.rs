//! Device identifiers and capability attributes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction a camera sensor faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    /// Both facings, back first.
    pub const ALL: [Facing; 2] = [Facing::Back, Facing::Front];

    /// Lowercase label used in logs, metrics and thread names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a physical camera plus the way it faces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    id: String,
    facing: Facing,
}

impl DeviceId {
    pub fn new(id: impl Into<String>, facing: Facing) -> Self {
        Self {
            id: id.into(),
            facing,
        }
    }

    /// Platform identifier of the device.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn facing(&self) -> Facing {
        self.facing
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.facing)
    }
}

/// Capabilities a device may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    BackwardCompatible,
    ManualSensor,
    Raw,
    /// The device can stream from multiple physical sensors at once.
    LogicalMultiCamera,
}

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl DeviceInfo {
    pub fn new(id: DeviceId, capabilities: Vec<Capability>) -> Self {
        Self { id, capabilities }
    }

    #[inline]
    pub fn facing(&self) -> Facing {
        self.id.facing()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("0", Facing::Back);
        assert_eq!(id.to_string(), "0 (back)");
        assert_eq!(id.facing(), Facing::Back);
    }

    #[test]
    fn test_capability_lookup() {
        let info = DeviceInfo::new(
            DeviceId::new("1", Facing::Front),
            vec![Capability::BackwardCompatible],
        );
        assert!(info.has_capability(Capability::BackwardCompatible));
        assert!(!info.has_capability(Capability::LogicalMultiCamera));
    }
}
