//! Blofeld SysEx codec.
//!
//! Stateless translation between requests/replies and raw bytes. Nothing here
//! touches a port; the transport feeds complete `F0 .. F7` messages in and
//! sends what comes out.
//!
//! Sound dump layout (390 bytes):
//!
//! ```text
//! 0 F0 | 1 3E | 2 13 | 3 device | 4 10 | 5 bank | 6 program |
//! 7..388 parameter block (363 synthesis, 16 name, 1 category, 1 reserved) |
//! 388 checksum | 389 F7
//! ```

use blofeld_types::{
    DeviceInfo, Manufacturer, Model, SoundRecord, Variant, DEVICE_BANKS, PARAMETER_LEN,
    PROGRAMS_PER_BANK,
};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

pub const WALDORF_ID: u8 = 0x3E;
pub const BLOFELD_ID: u8 = 0x13;

/// Universal non-realtime SysEx id.
const NON_REALTIME: u8 = 0x7E;
/// "All devices" in universal messages.
const ALL_DEVICES: u8 = 0x7F;
const GENERAL_INFO: u8 = 0x06;
const IDENTITY_REQUEST: u8 = 0x01;
const IDENTITY_REPLY: u8 = 0x02;

/// Sound request command.
const SNDR: u8 = 0x00;
/// Sound dump command.
const SNDD: u8 = 0x10;

/// Bank byte addressing the edit buffer.
pub const EDIT_BUFFER_BANK: u8 = 0x7F;
/// Checksum value the device treats as "don't check".
pub const CHECKSUM_ANY: u8 = 0x7F;

pub const INQUIRY_REPLY_LEN: usize = 15;
pub const SOUND_DUMP_LEN: usize = 390;

const COMMAND_OFFSET: usize = 4;
const BANK_OFFSET: usize = 5;
const PROGRAM_OFFSET: usize = 6;
const PARAMETERS_OFFSET: usize = 7;
const CHECKSUM_OFFSET: usize = PARAMETERS_OFFSET + PARAMETER_LEN;

/// Error decoding an incoming SysEx message. Local to that one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Reply shape does not match what was expected.
    MalformedResponse(String),
    /// Sound dump of the wrong length.
    TruncatedDump { len: usize },
    /// Not a sound dump (wrong header or command byte).
    UnexpectedCommand { found: Option<u8> },
    /// Edit-buffer dump with no known device selection to place it at.
    UnresolvedDestination,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedResponse(why) => write!(f, "malformed response: {}", why),
            Self::TruncatedDump { len } => write!(
                f,
                "truncated sound dump: {} bytes, expected {}",
                len, SOUND_DUMP_LEN
            ),
            Self::UnexpectedCommand { found: Some(cmd) } => {
                write!(f, "unexpected command byte {:02X}", cmd)
            }
            Self::UnexpectedCommand { found: None } => f.write_str("message too short for a command"),
            Self::UnresolvedDestination => {
                f.write_str("edit buffer dump with no known bank/program selection")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Error building an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Bank not addressable on the hardware.
    BankOutOfRange(u8),
    ProgramOutOfRange(u8),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BankOutOfRange(bank) => {
                write!(f, "bank {} is not addressable on the device (0..{})", bank, DEVICE_BANKS)
            }
            Self::ProgramOutOfRange(program) => write!(f, "program {} out of range", program),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Bank/program the device last selected, tracked from control and program
/// change traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSelection {
    pub bank: u8,
    pub program: u8,
}

/// Address a sound dump declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpLocation {
    Slot { bank: u8, program: u8 },
    /// Dump of the edit buffer; the part number is not a library slot.
    EditBuffer { bank: u8, part: u8 },
}

/// A decoded sound dump whose destination may still need resolving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundDump {
    pub device_id: u8,
    pub location: DumpLocation,
    pub parameters: [u8; PARAMETER_LEN],
    pub checksum: u8,
}

impl SoundDump {
    /// Turn the dump into a record.
    ///
    /// Slot dumps carry their own address. Edit-buffer dumps are placed at the
    /// device's last known selection; without one the dump must be discarded.
    pub fn resolve(self, selection: Option<ProgramSelection>) -> Result<SoundRecord, DecodeError> {
        let (bank, program) = match self.location {
            DumpLocation::Slot { bank, program } => (bank, program),
            DumpLocation::EditBuffer { .. } => {
                let sel = selection.ok_or(DecodeError::UnresolvedDestination)?;
                if sel.bank as usize >= DEVICE_BANKS || sel.program as usize >= PROGRAMS_PER_BANK {
                    return Err(DecodeError::UnresolvedDestination);
                }
                (sel.bank, sel.program)
            }
        };
        Ok(SoundRecord::from_device(bank, program, self.parameters))
    }

    pub fn is_edit_buffer(&self) -> bool {
        matches!(self.location, DumpLocation::EditBuffer { .. })
    }
}

/// Any complete SysEx message, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysExMessage {
    Identity(DeviceInfo),
    Sound(SoundDump),
    /// Another vendor's (or an unhandled universal) message, passed through.
    Foreign(Vec<u8>),
}

/// Universal device inquiry: `F0 7E 7F 06 01 F7`.
pub fn encode_device_inquiry() -> Vec<u8> {
    vec![
        SYSEX_START,
        NON_REALTIME,
        ALL_DEVICES,
        GENERAL_INFO,
        IDENTITY_REQUEST,
        SYSEX_END,
    ]
}

/// Decode the 15-byte identity reply.
pub fn decode_device_inquiry_response(bytes: &[u8]) -> Result<DeviceInfo, DecodeError> {
    if bytes.len() != INQUIRY_REPLY_LEN {
        return Err(DecodeError::MalformedResponse(format!(
            "inquiry reply is {} bytes, expected {}",
            bytes.len(),
            INQUIRY_REPLY_LEN
        )));
    }
    if bytes[0] != SYSEX_START
        || bytes[1] != NON_REALTIME
        || bytes[3] != GENERAL_INFO
        || bytes[4] != IDENTITY_REPLY
        || bytes[INQUIRY_REPLY_LEN - 1] != SYSEX_END
    {
        return Err(DecodeError::MalformedResponse(
            "not an identity reply".to_string(),
        ));
    }

    let firmware = &bytes[10..14];
    if !firmware.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(DecodeError::MalformedResponse(
            "firmware version is not ASCII".to_string(),
        ));
    }

    Ok(DeviceInfo {
        device_id: bytes[2],
        manufacturer: Manufacturer::from_id(bytes[5]),
        model: Model::from_bytes([bytes[6], bytes[7]]),
        variant: Variant::from_bytes([bytes[8], bytes[9]]),
        firmware: String::from_utf8_lossy(firmware).trim().to_string(),
    })
}

fn check_slot(bank: u8, program: u8) -> Result<(), EncodeError> {
    if bank as usize >= DEVICE_BANKS {
        return Err(EncodeError::BankOutOfRange(bank));
    }
    if program as usize >= PROGRAMS_PER_BANK {
        return Err(EncodeError::ProgramOutOfRange(program));
    }
    Ok(())
}

fn sound_request(device_id: u8, bank: u8, program: u8) -> Vec<u8> {
    vec![
        SYSEX_START,
        WALDORF_ID,
        BLOFELD_ID,
        device_id & 0x7F,
        SNDR,
        bank,
        program,
        CHECKSUM_ANY,
        SYSEX_END,
    ]
}

/// Request one stored sound: `F0 3E 13 00 00 <bank> <program> 7F F7`.
pub fn encode_sound_request(bank: u8, program: u8) -> Result<Vec<u8>, EncodeError> {
    encode_sound_request_to(0, bank, program)
}

/// Same request addressed to a device with a non-default device id.
pub fn encode_sound_request_to(device_id: u8, bank: u8, program: u8) -> Result<Vec<u8>, EncodeError> {
    check_slot(bank, program)?;
    Ok(sound_request(device_id, bank, program))
}

/// Request the sound currently in the edit buffer.
pub fn encode_edit_buffer_request(device_id: u8) -> Vec<u8> {
    sound_request(device_id, EDIT_BUFFER_BANK, 0)
}

/// Blofeld checksum: sum of everything after the command byte, 7 bits.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) & 0x7F
}

/// Decode a sound dump. The destination is left unresolved for edit-buffer
/// dumps; see [`SoundDump::resolve`].
pub fn decode_sound_dump(bytes: &[u8]) -> Result<SoundDump, DecodeError> {
    let header_ok = bytes.len() > COMMAND_OFFSET
        && bytes[0] == SYSEX_START
        && bytes[1] == WALDORF_ID
        && bytes[2] == BLOFELD_ID;
    if !header_ok {
        return Err(DecodeError::UnexpectedCommand {
            found: bytes.get(COMMAND_OFFSET).copied(),
        });
    }
    if bytes[COMMAND_OFFSET] != SNDD {
        return Err(DecodeError::UnexpectedCommand {
            found: Some(bytes[COMMAND_OFFSET]),
        });
    }
    if bytes.len() != SOUND_DUMP_LEN || bytes[SOUND_DUMP_LEN - 1] != SYSEX_END {
        return Err(DecodeError::TruncatedDump { len: bytes.len() });
    }

    let body = &bytes[BANK_OFFSET..CHECKSUM_OFFSET];
    if let Some(pos) = body.iter().position(|b| *b > 0x7F) {
        return Err(DecodeError::MalformedResponse(format!(
            "status byte {:02X} inside dump at offset {}",
            body[pos],
            BANK_OFFSET + pos
        )));
    }

    let bank = bytes[BANK_OFFSET];
    let program = bytes[PROGRAM_OFFSET];
    let location = if (bank as usize) < DEVICE_BANKS {
        DumpLocation::Slot { bank, program }
    } else {
        DumpLocation::EditBuffer { bank, part: program }
    };

    let received = bytes[CHECKSUM_OFFSET];
    let expected = checksum(body);
    if received != CHECKSUM_ANY && received != expected {
        log::debug!(
            target: "midi",
            "sound dump {:?}: checksum {:02X}, computed {:02X}",
            location,
            received,
            expected
        );
    }

    let mut parameters = [0u8; PARAMETER_LEN];
    parameters.copy_from_slice(&bytes[PARAMETERS_OFFSET..CHECKSUM_OFFSET]);

    Ok(SoundDump {
        device_id: bytes[3],
        location,
        parameters,
        checksum: received,
    })
}

fn sound_dump(device_id: u8, bank: u8, program: u8, parameters: &[u8; PARAMETER_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SOUND_DUMP_LEN);
    out.extend_from_slice(&[SYSEX_START, WALDORF_ID, BLOFELD_ID, device_id & 0x7F, SNDD]);
    out.push(bank);
    out.push(program);
    out.extend(parameters.iter().map(|b| b & 0x7F));
    let sum = checksum(&out[BANK_OFFSET..]);
    out.push(sum);
    out.push(SYSEX_END);
    out
}

/// Encode a record as a dump into its own device slot.
pub fn encode_sound_dump(record: &SoundRecord, device_id: u8) -> Result<Vec<u8>, EncodeError> {
    check_slot(record.bank(), record.program())?;
    Ok(sound_dump(
        device_id,
        record.bank(),
        record.program(),
        record.parameters(),
    ))
}

/// Encode a record as a dump into the edit buffer, for auditioning without
/// overwriting a stored slot.
pub fn encode_edit_buffer_dump(record: &SoundRecord, device_id: u8) -> Vec<u8> {
    sound_dump(device_id, EDIT_BUFFER_BANK, 0, record.parameters())
}

/// Classify and decode a complete SysEx message.
pub fn decode_message(bytes: &[u8]) -> Result<SysExMessage, DecodeError> {
    match bytes {
        [SYSEX_START, NON_REALTIME, _, GENERAL_INFO, IDENTITY_REPLY, ..] => {
            decode_device_inquiry_response(bytes).map(SysExMessage::Identity)
        }
        [SYSEX_START, WALDORF_ID, BLOFELD_ID, ..] => {
            decode_sound_dump(bytes).map(SysExMessage::Sound)
        }
        _ => Ok(SysExMessage::Foreign(bytes.to_vec())),
    }
}

/// Standard 3-byte control change.
pub fn encode_control_change(channel: u8, controller: u8, value: u8) -> [u8; 3] {
    [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]
}

/// Standard 2-byte program change.
pub fn encode_program_change(channel: u8, program: u8) -> [u8; 2] {
    [0xC0 | (channel & 0x0F), program & 0x7F]
}

/// Bank select (CC 0) followed by program change, selecting a stored sound.
pub fn encode_program_select(channel: u8, selection: ProgramSelection) -> Result<Vec<u8>, EncodeError> {
    check_slot(selection.bank, selection.program)?;
    let mut out = Vec::with_capacity(5);
    out.extend_from_slice(&encode_control_change(channel, 0, selection.bank));
    out.extend_from_slice(&encode_program_change(channel, selection.program));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blofeld_types::{Category, CATEGORY_OFFSET, NAME_LEN, NAME_OFFSET};

    fn dump_bytes(bank: u8, program: u8, name: &str, category: u8) -> Vec<u8> {
        let mut params = [0u8; PARAMETER_LEN];
        for (i, p) in params.iter_mut().enumerate().take(NAME_OFFSET) {
            *p = (i % 128) as u8;
        }
        let padded = format!("{:<16}", name);
        params[NAME_OFFSET..NAME_OFFSET + NAME_LEN].copy_from_slice(&padded.as_bytes()[..NAME_LEN]);
        params[CATEGORY_OFFSET] = category;
        sound_dump(0, bank, program, &params)
    }

    #[test]
    fn device_inquiry_request_bytes() {
        assert_eq!(encode_device_inquiry(), vec![0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]);
    }

    #[test]
    fn decode_blofeld_desktop_identity() {
        let reply = [
            0xF0, 0x7E, 0x7F, 0x06, 0x02, 0x3E, 0x13, 0x00, 0x00, 0x00, 0x31, 0x2E, 0x30, 0x34,
            0xF7,
        ];
        let info = decode_device_inquiry_response(&reply).unwrap();
        assert_eq!(info.manufacturer.to_string(), "Waldorf");
        assert_eq!(info.model.to_string(), "Blofeld");
        assert_eq!(info.variant.to_string(), "Desktop");
        assert_eq!(info.firmware, "1.04");
        assert!(info.is_blofeld());
    }

    #[test]
    fn inquiry_reply_of_wrong_shape_is_malformed() {
        let short = [0xF0, 0x7E, 0x7F, 0x06, 0x02, 0x3E, 0xF7];
        assert!(matches!(
            decode_device_inquiry_response(&short),
            Err(DecodeError::MalformedResponse(_))
        ));

        let mut wrong_header = [
            0xF0, 0x7E, 0x7F, 0x06, 0x02, 0x3E, 0x13, 0x00, 0x00, 0x00, 0x31, 0x2E, 0x30, 0x34,
            0xF7,
        ];
        wrong_header[4] = 0x01;
        assert!(matches!(
            decode_device_inquiry_response(&wrong_header),
            Err(DecodeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn sound_request_bytes() {
        assert_eq!(
            encode_sound_request(2, 5).unwrap(),
            vec![0xF0, 0x3E, 0x13, 0x00, 0x00, 0x02, 0x05, 0x7F, 0xF7]
        );
    }

    #[test]
    fn sound_request_rejects_library_banks() {
        assert_eq!(encode_sound_request(8, 0), Err(EncodeError::BankOutOfRange(8)));
        assert_eq!(encode_sound_request(0, 128), Err(EncodeError::ProgramOutOfRange(128)));
        assert_eq!(encode_sound_request_to(3, 9, 0), Err(EncodeError::BankOutOfRange(9)));
    }

    #[test]
    fn addressed_sound_request_carries_device_id() {
        assert_eq!(
            encode_sound_request_to(5, 2, 5).unwrap(),
            vec![0xF0, 0x3E, 0x13, 0x05, 0x00, 0x02, 0x05, 0x7F, 0xF7]
        );
    }

    #[test]
    fn edit_buffer_request_bytes() {
        assert_eq!(
            encode_edit_buffer_request(0),
            vec![0xF0, 0x3E, 0x13, 0x00, 0x00, 0x7F, 0x00, 0x7F, 0xF7]
        );
        assert_eq!(encode_edit_buffer_request(0x85)[3], 0x05);
    }

    #[test]
    fn decode_slot_dump() {
        let bytes = dump_bytes(3, 17, "Deep Bass", 3);
        assert_eq!(bytes.len(), SOUND_DUMP_LEN);
        let dump = decode_sound_dump(&bytes).unwrap();
        assert_eq!(dump.location, DumpLocation::Slot { bank: 3, program: 17 });
        let record = dump.resolve(None).unwrap();
        assert_eq!(record.location(), (3, 17));
        assert_eq!(record.name(), "Deep Bass");
        assert_eq!(record.category(), Category::Bass);
    }

    #[test]
    fn structured_fields_survive_reencoding() {
        for (bank, program, name, category) in [
            (0u8, 0u8, "Init", 0u8),
            (2, 5, "Glass Pad", 9),
            (7, 127, "Seq Thing 16char", 12),
        ] {
            let original = dump_bytes(bank, program, name, category);
            let record = decode_sound_dump(&original).unwrap().resolve(None).unwrap();
            let reencoded = encode_sound_dump(&record, 0).unwrap();
            assert_eq!(reencoded[BANK_OFFSET], original[BANK_OFFSET]);
            assert_eq!(reencoded[PROGRAM_OFFSET], original[PROGRAM_OFFSET]);
            let name_range = PARAMETERS_OFFSET + NAME_OFFSET..PARAMETERS_OFFSET + NAME_OFFSET + NAME_LEN;
            assert_eq!(reencoded[name_range.clone()], original[name_range]);
            assert_eq!(
                reencoded[PARAMETERS_OFFSET + CATEGORY_OFFSET],
                original[PARAMETERS_OFFSET + CATEGORY_OFFSET]
            );
        }
    }

    #[test]
    fn encoded_dump_carries_checksum() {
        let bytes = dump_bytes(1, 1, "Sum", 4);
        assert_eq!(bytes[CHECKSUM_OFFSET], checksum(&bytes[BANK_OFFSET..CHECKSUM_OFFSET]));
        assert_eq!(bytes[SOUND_DUMP_LEN - 1], SYSEX_END);
    }

    #[test]
    fn short_dump_is_truncated() {
        let mut bytes = dump_bytes(0, 0, "Short", 0);
        bytes.truncate(200);
        bytes.push(SYSEX_END);
        assert_eq!(
            decode_sound_dump(&bytes),
            Err(DecodeError::TruncatedDump { len: 201 })
        );
    }

    #[test]
    fn other_command_is_unexpected() {
        let request = encode_sound_request(0, 0).unwrap();
        assert_eq!(
            decode_sound_dump(&request),
            Err(DecodeError::UnexpectedCommand { found: Some(0x00) })
        );
        assert_eq!(
            decode_sound_dump(&[0xF0, 0x42, 0x30]),
            Err(DecodeError::UnexpectedCommand { found: None })
        );
    }

    #[test]
    fn edit_buffer_dump_needs_a_selection() {
        let mut params = [0u8; PARAMETER_LEN];
        params[NAME_OFFSET..NAME_OFFSET + 4].copy_from_slice(b"Edit");
        let bytes = sound_dump(0, EDIT_BUFFER_BANK, 0, &params);
        let dump = decode_sound_dump(&bytes).unwrap();
        assert!(dump.is_edit_buffer());

        assert_eq!(dump.clone().resolve(None), Err(DecodeError::UnresolvedDestination));

        let record = dump
            .resolve(Some(ProgramSelection { bank: 4, program: 99 }))
            .unwrap();
        assert_eq!(record.location(), (4, 99));
        assert_eq!(record.name(), "Edit");
    }

    #[test]
    fn decode_message_classifies() {
        let reply = [
            0xF0, 0x7E, 0x10, 0x06, 0x02, 0x3E, 0x13, 0x00, 0x01, 0x00, 0x31, 0x2E, 0x32, 0x30,
            0xF7,
        ];
        match decode_message(&reply).unwrap() {
            SysExMessage::Identity(info) => {
                assert_eq!(info.device_id, 0x10);
                assert_eq!(info.variant.to_string(), "Keyboard");
            }
            other => panic!("Expected Identity, got {:?}", other),
        }

        let dump = dump_bytes(0, 1, "X", 0);
        assert!(matches!(decode_message(&dump).unwrap(), SysExMessage::Sound(_)));

        let foreign = [0xF0, 0x42, 0x30, 0x04, 0x10, 0xF7];
        assert_eq!(
            decode_message(&foreign).unwrap(),
            SysExMessage::Foreign(foreign.to_vec())
        );
    }

    #[test]
    fn channel_messages() {
        assert_eq!(encode_control_change(0, 0, 3), [0xB0, 0x00, 0x03]);
        assert_eq!(encode_program_change(15, 42), [0xCF, 42]);
        assert_eq!(
            encode_program_select(1, ProgramSelection { bank: 2, program: 7 }).unwrap(),
            vec![0xB1, 0x00, 0x02, 0xC1, 0x07]
        );
    }
}
