//! Sound records: one decoded dump with its address and status.

use serde::{Deserialize, Serialize};

use crate::{
    slot_index, Category, RecordId, CATEGORY_OFFSET, LIBRARY_BANKS, NAME_LEN, NAME_OFFSET,
    PARAMETER_LEN, PROGRAMS_PER_BANK,
};

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Library,
    Device,
}

/// Status flags packed with the source bit.
///
/// Bit 0 is the source (set = device). The remaining bits only accumulate
/// until [`RecordStatus::persisted`] clears the dirty ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordStatus(u8);

impl RecordStatus {
    pub const DEVICE: u8 = 0x01;
    pub const STORED: u8 = 0x02;
    pub const EDITED: u8 = 0x04;
    pub const MOVED: u8 = 0x08;
    pub const DUMPED: u8 = 0x10;

    /// Status of a freshly received device dump.
    pub fn received() -> Self {
        Self(Self::STORED | Self::DEVICE)
    }

    /// Status of a record loaded from the on-disk library.
    pub fn loaded() -> Self {
        Self(Self::STORED)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn source(self) -> Source {
        if self.0 & Self::DEVICE != 0 {
            Source::Device
        } else {
            Source::Library
        }
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn is_stored(self) -> bool {
        self.contains(Self::STORED)
    }

    pub fn is_edited(self) -> bool {
        self.contains(Self::EDITED)
    }

    pub fn is_moved(self) -> bool {
        self.contains(Self::MOVED)
    }

    pub fn is_dumped(self) -> bool {
        self.contains(Self::DUMPED)
    }

    /// Edited or moved since it was last stored.
    pub fn is_dirty(self) -> bool {
        self.0 & (Self::EDITED | Self::MOVED) != 0
    }

    fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    fn persisted(self) -> Self {
        Self((self.0 & !(Self::EDITED | Self::MOVED)) | Self::STORED)
    }
}

/// One sound: its slot address, raw parameter block and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundRecord {
    id: RecordId,
    bank: u8,
    program: u8,
    parameters: Box<[u8; PARAMETER_LEN]>,
    status: RecordStatus,
}

impl SoundRecord {
    /// Build a record with a fresh identity.
    ///
    /// Panics if `bank` or `program` is outside the library grid; callers
    /// validate addresses coming off the wire before constructing records.
    pub fn new(
        bank: u8,
        program: u8,
        parameters: [u8; PARAMETER_LEN],
        status: RecordStatus,
    ) -> Self {
        assert!(
            (bank as usize) < LIBRARY_BANKS && (program as usize) < PROGRAMS_PER_BANK,
            "slot {}/{} outside the library grid",
            bank,
            program
        );
        Self {
            id: RecordId::next(),
            bank,
            program,
            parameters: Box::new(parameters),
            status,
        }
    }

    /// A record freshly received from the device.
    pub fn from_device(bank: u8, program: u8, parameters: [u8; PARAMETER_LEN]) -> Self {
        Self::new(bank, program, parameters, RecordStatus::received())
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn bank(&self) -> u8 {
        self.bank
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn location(&self) -> (u8, u8) {
        (self.bank, self.program)
    }

    /// Global slot index, also the library sort key.
    pub fn index(&self) -> usize {
        slot_index(self.bank, self.program)
    }

    pub fn parameters(&self) -> &[u8; PARAMETER_LEN] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> Option<u8> {
        self.parameters.get(index).copied()
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn source(&self) -> Source {
        self.status.source()
    }

    /// Sound name from the name field; non-printable bytes read as spaces.
    pub fn name(&self) -> String {
        let raw = &self.parameters[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        let name: String = raw
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { ' ' })
            .collect();
        name.trim().to_string()
    }

    pub fn category_byte(&self) -> u8 {
        self.parameters[CATEGORY_OFFSET]
    }

    pub fn category(&self) -> Category {
        Category::from_byte(self.category_byte())
    }

    /// Reassign the slot (drag-reorder in the editor).
    pub fn set_location(&mut self, bank: u8, program: u8) {
        assert!((bank as usize) < LIBRARY_BANKS && (program as usize) < PROGRAMS_PER_BANK);
        if (bank, program) != (self.bank, self.program) {
            self.bank = bank;
            self.program = program;
            self.status = self.status.with(RecordStatus::MOVED);
        }
    }

    /// Change one parameter byte. Returns false for an out-of-range index.
    pub fn set_parameter(&mut self, index: usize, value: u8) -> bool {
        match self.parameters.get_mut(index) {
            Some(slot) => {
                let value = value & 0x7F;
                if *slot != value {
                    *slot = value;
                    self.status = self.status.with(RecordStatus::EDITED);
                }
                true
            }
            None => false,
        }
    }

    /// Overwrite the name field, padding with spaces.
    pub fn set_name(&mut self, name: &str) {
        let mut field = [b' '; NAME_LEN];
        for (dst, src) in field
            .iter_mut()
            .zip(name.bytes().filter(|b| (0x20..0x7F).contains(b)))
        {
            *dst = src;
        }
        for (i, byte) in field.into_iter().enumerate() {
            self.set_parameter(NAME_OFFSET + i, byte);
        }
    }

    pub fn set_category(&mut self, category: Category) {
        self.set_parameter(CATEGORY_OFFSET, category.to_byte());
    }

    /// The record was sent to the device.
    pub fn mark_dumped(&mut self) {
        self.status = self.status.with(RecordStatus::DUMPED);
    }

    /// The record was written to the on-disk library.
    pub fn mark_persisted(&mut self) {
        self.status = self.status.persisted();
    }

    pub fn summary(&self) -> SoundSummary {
        SoundSummary {
            bank: self.bank,
            program: self.program,
            index: self.index(),
            name: self.name(),
            category: self.category().to_string(),
            source: self.source(),
            status: self.status,
        }
    }
}

/// Serializable listing entry for a record (no parameter block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundSummary {
    pub bank: u8,
    pub program: u8,
    pub index: usize,
    pub name: String,
    pub category: String,
    pub source: Source,
    pub status: RecordStatus,
}
