//! MIDI side of the librarian: typed events, SysEx reassembly, selection
//! tracking, and the sequencer transport with its midir backend.

mod assembler;
pub mod midir_backend;
mod selection;
pub mod transport;

pub use assembler::SysExAssembler;
pub use selection::SelectionTracker;
pub use transport::{
    PortAddress, RawEvent, SequencerSink, SequencerSource, SequencerTransport, TransportError,
    TransportFeedback, TransportOptions, TransportResult, TransportState,
};

use blofeld_types::{DeviceInfo, SoundRecord};

/// A MIDI event with its driver timestamp, decoded once at the transport
/// boundary. Timestamp is in microseconds from a driver-specific epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiEvent {
    pub timestamp_us: u64,
    pub kind: MidiEventKind,
}

impl MidiEvent {
    pub fn new(timestamp_us: u64, kind: MidiEventKind) -> Self {
        Self { timestamp_us, kind }
    }
}

/// The specific type of MIDI event
#[derive(Debug, Clone, PartialEq)]
pub enum MidiEventKind {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    SysEx(SysExEvent),
    Topology(TopologyEvent),
}

/// A complete, decoded SysEx message.
#[derive(Debug, Clone, PartialEq)]
pub enum SysExEvent {
    Identity(DeviceInfo),
    /// Sound dump, already placed at its bank/program.
    Sound(SoundRecord),
    /// Message not addressed to this librarian, raw bytes.
    Foreign(Vec<u8>),
}

/// Port and connection changes on the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    PortAdded { name: String },
    PortRemoved { name: String },
    /// Our input is now connected to this port.
    Subscribed { port: String },
    Unsubscribed { port: String },
}

/// Parse a raw channel-voice message. Anything other than note, control and
/// program messages is ignored.
pub fn parse_channel_message(data: &[u8]) -> Option<MidiEventKind> {
    let (&status, rest) = data.split_first()?;
    let channel = status & 0x0F;

    match status & 0xF0 {
        0x80 => match rest {
            [note, _, ..] => Some(MidiEventKind::NoteOff {
                channel,
                note: *note,
            }),
            _ => None,
        },
        0x90 => match rest {
            // velocity 0 = note off
            [note, 0, ..] => Some(MidiEventKind::NoteOff {
                channel,
                note: *note,
            }),
            [note, velocity, ..] => Some(MidiEventKind::NoteOn {
                channel,
                note: *note,
                velocity: *velocity,
            }),
            _ => None,
        },
        0xB0 => match rest {
            [controller, value, ..] => Some(MidiEventKind::ControlChange {
                channel,
                controller: *controller,
                value: *value,
            }),
            _ => None,
        },
        0xC0 => rest.first().map(|program| MidiEventKind::ProgramChange {
            channel,
            program: *program,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        let event = parse_channel_message(&[0x90, 60, 100]).unwrap();
        assert_eq!(
            event,
            MidiEventKind::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_parse_note_off() {
        let event = parse_channel_message(&[0x83, 60, 0]).unwrap();
        assert_eq!(event, MidiEventKind::NoteOff { channel: 3, note: 60 });
    }

    #[test]
    fn test_parse_note_on_velocity_zero() {
        let event = parse_channel_message(&[0x90, 60, 0]).unwrap();
        assert!(matches!(event, MidiEventKind::NoteOff { .. }));
    }

    #[test]
    fn test_parse_control_and_program_change() {
        assert_eq!(
            parse_channel_message(&[0xB0, 0, 5]).unwrap(),
            MidiEventKind::ControlChange {
                channel: 0,
                controller: 0,
                value: 5
            }
        );
        assert_eq!(
            parse_channel_message(&[0xC2, 17]).unwrap(),
            MidiEventKind::ProgramChange {
                channel: 2,
                program: 17
            }
        );
    }

    #[test]
    fn test_parse_short_and_unknown_messages() {
        assert!(parse_channel_message(&[]).is_none());
        assert!(parse_channel_message(&[0x90, 60]).is_none());
        assert!(parse_channel_message(&[0xB0, 1]).is_none());
        assert!(parse_channel_message(&[0xC0]).is_none());
        assert!(parse_channel_message(&[0xE0, 0x00, 0x40]).is_none());
        assert!(parse_channel_message(&[0xF8]).is_none());
    }
}
