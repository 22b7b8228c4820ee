//! LibraryStore: the canonical grid of known sounds.
//!
//! Cloning the store clones a handle; all clones see the same grid. Writes
//! may come from any thread while others read.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use blofeld_types::{
    slot_index, RecordId, SoundRecord, LIBRARY_BANKS, PROGRAMS_PER_BANK,
};

const SLOT_COUNT: usize = LIBRARY_BANKS * PROGRAMS_PER_BANK;

struct LibraryGrid {
    slots: Vec<Option<SoundRecord>>,
    /// Reverse lookup: record identity to its slot
    locations: HashMap<RecordId, (u8, u8)>,
}

impl LibraryGrid {
    fn new() -> Self {
        Self {
            slots: vec![None; SLOT_COUNT],
            locations: HashMap::new(),
        }
    }
}

#[derive(Clone)]
pub struct LibraryStore {
    grid: Arc<RwLock<LibraryGrid>>,
}

impl Default for LibraryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryStore {
    pub fn new() -> Self {
        Self {
            grid: Arc::new(RwLock::new(LibraryGrid::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LibraryGrid> {
        self.grid.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LibraryGrid> {
        self.grid.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put `record` at its own bank/program, replacing whatever was there.
    ///
    /// The only way to change the library: an edited record is re-added
    /// whole. Re-adding a record that already sits at another slot moves it.
    pub fn add(&self, record: SoundRecord) {
        let (bank, program) = record.location();
        let slot = slot_index(bank, program);
        let id = record.id();
        let mut guard = self.write();
        let grid = &mut *guard;

        if let Some((old_bank, old_program)) = grid.locations.get(&id).copied() {
            if (old_bank, old_program) != (bank, program) {
                let old_slot = slot_index(old_bank, old_program);
                if grid.slots[old_slot].as_ref().map(|r| r.id()) == Some(id) {
                    grid.slots[old_slot] = None;
                }
                log::debug!(
                    target: "library",
                    "record {} moved {}/{} -> {}/{}",
                    id, old_bank, old_program, bank, program
                );
            }
        }

        if let Some(previous) = grid.slots[slot].take() {
            grid.locations.remove(&previous.id());
            if previous.id() != id {
                log::debug!(
                    target: "library",
                    "slot {}/{} replaced ('{}' -> '{}')",
                    bank, program, previous.name(), record.name()
                );
            }
        }

        grid.locations.insert(id, (bank, program));
        grid.slots[slot] = Some(record);
    }

    pub fn get(&self, bank: u8, program: u8) -> Option<SoundRecord> {
        if bank as usize >= LIBRARY_BANKS || program as usize >= PROGRAMS_PER_BANK {
            return None;
        }
        self.get_index(slot_index(bank, program))
    }

    /// Lookup by global index (`bank * 128 + program`).
    pub fn get_index(&self, index: usize) -> Option<SoundRecord> {
        self.read().slots.get(index).cloned().flatten()
    }

    /// Borrow a record without cloning it.
    pub fn with_record<R>(&self, bank: u8, program: u8, f: impl FnOnce(&SoundRecord) -> R) -> Option<R> {
        if bank as usize >= LIBRARY_BANKS || program as usize >= PROGRAMS_PER_BANK {
            return None;
        }
        self.read().slots[slot_index(bank, program)].as_ref().map(f)
    }

    /// Slot currently holding the record with this identity.
    pub fn locate(&self, id: RecordId) -> Option<(u8, u8)> {
        self.read().locations.get(&id).copied()
    }

    pub fn contains(&self, bank: u8, program: u8) -> bool {
        self.with_record(bank, program, |_| ()).is_some()
    }

    /// Snapshot of every record in (bank, program) order.
    pub fn records(&self) -> Vec<SoundRecord> {
        self.read().slots.iter().flatten().cloned().collect()
    }

    /// Snapshot of one bank in program order.
    pub fn bank_records(&self, bank: u8) -> Vec<SoundRecord> {
        if bank as usize >= LIBRARY_BANKS {
            return Vec::new();
        }
        let start = slot_index(bank, 0);
        self.read().slots[start..start + PROGRAMS_PER_BANK]
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Occupied slots in one bank.
    pub fn occupied(&self, bank: u8) -> usize {
        if bank as usize >= LIBRARY_BANKS {
            return 0;
        }
        let start = slot_index(bank, 0);
        self.read().slots[start..start + PROGRAMS_PER_BANK]
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
