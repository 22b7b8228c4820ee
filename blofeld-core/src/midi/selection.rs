//! Tracks which bank/program the device has selected.

use blofeld_types::{DEVICE_BANKS, PROGRAMS_PER_BANK};

use super::MidiEventKind;
use crate::sysex::ProgramSelection;

/// Bank select controller.
const BANK_SELECT: u8 = 0;

/// Follows bank-select and program-change traffic so edit-buffer dumps can be
/// placed at the slot the device is on.
#[derive(Debug, Clone, Default)]
pub struct SelectionTracker {
    /// Only follow this channel; None = any channel
    channel: Option<u8>,
    bank: Option<u8>,
    program: Option<u8>,
}

impl SelectionTracker {
    pub fn new(channel: Option<u8>) -> Self {
        Self {
            channel,
            bank: None,
            program: None,
        }
    }

    pub fn observe(&mut self, event: &MidiEventKind) {
        match *event {
            MidiEventKind::ControlChange {
                channel,
                controller: BANK_SELECT,
                value,
            } if self.accepts(channel) => {
                if (value as usize) < DEVICE_BANKS {
                    self.bank = Some(value);
                } else {
                    log::debug!(target: "midi", "bank select {} is not a device bank", value);
                    self.bank = None;
                }
            }
            MidiEventKind::ProgramChange { channel, program } if self.accepts(channel) => {
                if (program as usize) < PROGRAMS_PER_BANK {
                    self.program = Some(program);
                }
            }
            _ => {}
        }
    }

    /// Last full selection, if both bank and program have been seen.
    pub fn current(&self) -> Option<ProgramSelection> {
        Some(ProgramSelection {
            bank: self.bank?,
            program: self.program?,
        })
    }

    pub fn clear(&mut self) {
        self.bank = None;
        self.program = None;
    }

    fn accepts(&self, channel: u8) -> bool {
        self.channel.map_or(true, |c| c == channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(channel: u8, controller: u8, value: u8) -> MidiEventKind {
        MidiEventKind::ControlChange {
            channel,
            controller,
            value,
        }
    }

    fn pc(channel: u8, program: u8) -> MidiEventKind {
        MidiEventKind::ProgramChange { channel, program }
    }

    #[test]
    fn needs_bank_and_program() {
        let mut tracker = SelectionTracker::new(None);
        assert!(tracker.current().is_none());
        tracker.observe(&pc(0, 12));
        assert!(tracker.current().is_none());
        tracker.observe(&cc(0, 0, 3));
        assert_eq!(
            tracker.current(),
            Some(ProgramSelection { bank: 3, program: 12 })
        );
    }

    #[test]
    fn other_controllers_and_channels_are_ignored() {
        let mut tracker = SelectionTracker::new(Some(1));
        tracker.observe(&cc(0, 0, 2));
        tracker.observe(&pc(0, 5));
        assert!(tracker.current().is_none());

        tracker.observe(&cc(1, 7, 100));
        tracker.observe(&cc(1, 0, 2));
        tracker.observe(&pc(1, 5));
        assert_eq!(
            tracker.current(),
            Some(ProgramSelection { bank: 2, program: 5 })
        );
    }

    #[test]
    fn out_of_range_bank_is_not_a_selection() {
        let mut tracker = SelectionTracker::new(None);
        tracker.observe(&cc(0, 0, 40));
        tracker.observe(&pc(0, 1));
        assert!(tracker.current().is_none());
        tracker.clear();
        assert!(tracker.current().is_none());
    }

    #[test]
    fn out_of_range_bank_forgets_the_previous_bank() {
        let mut tracker = SelectionTracker::new(None);
        tracker.observe(&cc(0, 0, 2));
        tracker.observe(&pc(0, 7));
        assert!(tracker.current().is_some());

        tracker.observe(&cc(0, 0, 12));
        tracker.observe(&pc(0, 8));
        assert!(tracker.current().is_none());

        tracker.observe(&cc(0, 0, 4));
        assert_eq!(
            tracker.current(),
            Some(ProgramSelection { bank: 4, program: 8 })
        );
    }
}
