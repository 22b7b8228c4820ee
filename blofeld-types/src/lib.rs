//! # blofeld-types
//!
//! Shared type definitions for the Blofeld librarian.
//! Data structures used by blofeld-core and the command-line front end: sound
//! records with their status flags, the category table, device identity, and
//! the slot address constants.

mod category;
mod device;
mod record;

pub use category::Category;
pub use device::{DeviceInfo, Manufacturer, Model, Variant};
pub use record::{RecordStatus, SoundRecord, SoundSummary, Source};

use std::sync::atomic::{AtomicU64, Ordering};

/// Programs per bank.
pub const PROGRAMS_PER_BANK: usize = 128;

/// Banks addressable on the hardware (A..H).
pub const DEVICE_BANKS: usize = 8;

/// Banks held by the library, including the extended address space above the
/// device banks.
pub const LIBRARY_BANKS: usize = 26;

/// Slots on the hardware (8 x 128).
pub const DEVICE_SLOTS: usize = DEVICE_BANKS * PROGRAMS_PER_BANK;

/// Length of the parameter block carried by a sound dump.
pub const PARAMETER_LEN: usize = 381;

/// Offset of the 16-character sound name inside the parameter block.
pub const NAME_OFFSET: usize = 363;

/// Length of the sound name.
pub const NAME_LEN: usize = 16;

/// Offset of the category byte inside the parameter block.
pub const CATEGORY_OFFSET: usize = 379;

/// Global slot index: `bank * 128 + program`.
pub fn slot_index(bank: u8, program: u8) -> usize {
    bank as usize * PROGRAMS_PER_BANK + program as usize
}

/// Human bank letter (A..Z) for a bank index.
pub fn bank_letter(bank: u8) -> char {
    if (bank as usize) < LIBRARY_BANKS {
        (b'A' + bank) as char
    } else {
        '?'
    }
}

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a sound record.
///
/// Clones of a record keep the same id, which is what lets the library treat a
/// re-inserted record as the same sound.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_is_bank_major() {
        assert_eq!(slot_index(0, 0), 0);
        assert_eq!(slot_index(0, 127), 127);
        assert_eq!(slot_index(1, 0), 128);
        assert_eq!(slot_index(7, 127), DEVICE_SLOTS - 1);
    }

    #[test]
    fn bank_letters() {
        assert_eq!(bank_letter(0), 'A');
        assert_eq!(bank_letter(7), 'H');
        assert_eq!(bank_letter(25), 'Z');
        assert_eq!(bank_letter(26), '?');
    }

    #[test]
    fn record_ids_are_unique() {
        let a = RecordId::next();
        let b = RecordId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
