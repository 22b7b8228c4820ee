//! Identity of a connected synthesizer, as reported by a device inquiry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Manufacturer {
    Waldorf,
    Other(u8),
}

impl Manufacturer {
    pub fn from_id(id: u8) -> Self {
        match id {
            0x3E => Manufacturer::Waldorf,
            other => Manufacturer::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    Blofeld,
    Other([u8; 2]),
}

impl Model {
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        match bytes {
            [0x13, 0x00] => Model::Blofeld,
            other => Model::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    Desktop,
    Keyboard,
    Other([u8; 2]),
}

impl Variant {
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        match bytes {
            [0x00, 0x00] => Variant::Desktop,
            [0x01, 0x00] => Variant::Keyboard,
            other => Variant::Other(other),
        }
    }
}

impl std::fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Manufacturer::Waldorf => f.write_str("Waldorf"),
            Manufacturer::Other(id) => write!(f, "Unknown ({:02X})", id),
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Blofeld => f.write_str("Blofeld"),
            Model::Other([a, b]) => write!(f, "Unknown ({:02X} {:02X})", a, b),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Desktop => f.write_str("Desktop"),
            Variant::Keyboard => f.write_str("Keyboard"),
            Variant::Other([a, b]) => write!(f, "Unknown ({:02X} {:02X})", a, b),
        }
    }
}

/// Decoded device inquiry reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// SysEx device id the unit answered with
    pub device_id: u8,
    pub manufacturer: Manufacturer,
    pub model: Model,
    pub variant: Variant,
    /// Four-character firmware version, e.g. "1.04"
    pub firmware: String,
}

impl DeviceInfo {
    pub fn is_blofeld(&self) -> bool {
        self.manufacturer == Manufacturer::Waldorf && self.model == Model::Blofeld
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} (firmware {})",
            self.manufacturer, self.model, self.variant, self.firmware
        )
    }
}
