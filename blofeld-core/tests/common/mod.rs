#![allow(dead_code)]
//! Test harness utilities for blofeld-core integration tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use blofeld_core::dump::{DumpOrchestrator, DumpReport, RequestLink};
use blofeld_core::librarian::{Librarian, LibrarianEvent};
use blofeld_core::library::LibraryStore;
use blofeld_core::midi::{
    PortAddress, RawEvent, SequencerSink, SequencerSource, TopologyEvent, TransportError,
    TransportResult,
};
use blofeld_core::sysex;
use blofeld_types::{RecordStatus, SoundRecord, NAME_OFFSET, PARAMETER_LEN};

/// Name the simulated device gives the sound at a slot, e.g. "B017".
pub fn slot_name(bank: u8, program: u8) -> String {
    format!("{}{:03}", blofeld_types::bank_letter(bank), program as u16 + 1)
}

/// Parameter block with `name` in the name field.
pub fn params_named(name: &str) -> [u8; PARAMETER_LEN] {
    let mut params = [0u8; PARAMETER_LEN];
    for (i, b) in params.iter_mut().enumerate().take(NAME_OFFSET) {
        *b = (i % 128) as u8;
    }
    let bytes = name.as_bytes();
    params[NAME_OFFSET..NAME_OFFSET + bytes.len()].copy_from_slice(bytes);
    params
}

pub fn device_record(bank: u8, program: u8) -> SoundRecord {
    SoundRecord::new(
        bank,
        program,
        params_named(&slot_name(bank, program)),
        RecordStatus::received(),
    )
}

/// A full 390-byte dump as the device would send it.
pub fn dump_bytes(bank: u8, program: u8) -> Vec<u8> {
    let record = device_record(bank, program);
    sysex::encode_sound_dump(&record, 0).unwrap()
}

/// 15-byte identity reply from a desktop Blofeld running firmware 1.25.
pub fn identity_reply() -> Vec<u8> {
    vec![
        0xF0, 0x7E, 0x00, 0x06, 0x02, 0x3E, 0x13, 0x00, 0x00, 0x00, b'1', b'.', b'2', b'5', 0xF7,
    ]
}

/// Decode a sound request into (bank, program).
pub fn parse_request(bytes: &[u8]) -> Option<(u8, u8)> {
    match bytes {
        [0xF0, 0x3E, 0x13, _, 0x00, bank, program, 0x7F, 0xF7] => Some((*bank, *program)),
        _ => None,
    }
}

/// Simulated Blofeld answering the orchestrator directly, without a
/// transport. Answers are queued until the test delivers them.
#[derive(Default)]
pub struct SimulatedDevice {
    pub requests: Vec<(u8, u8)>,
    pub pending: VecDeque<SoundRecord>,
    /// Slots the device ignores
    pub silent: HashSet<(u8, u8)>,
    /// Answer a request for the key with a dump for the value
    pub misroute: Option<((u8, u8), (u8, u8))>,
    pub fail_sends: bool,
}

impl RequestLink for SimulatedDevice {
    fn send_request(&mut self, bytes: &[u8]) -> TransportResult<()> {
        if self.fail_sends {
            return Err(TransportError::Send("device unplugged".to_string()));
        }
        let Some(slot) = parse_request(bytes) else {
            return Ok(());
        };
        self.requests.push(slot);
        if self.silent.contains(&slot) {
            return Ok(());
        }
        let (bank, program) = match self.misroute {
            Some((from, to)) if from == slot => to,
            _ => slot,
        };
        self.pending.push_back(device_record(bank, program));
        Ok(())
    }
}

/// Step the orchestrator against `device` until it goes idle or nothing is
/// left to deliver. Each reply takes `reply_time`; pacing is honored.
pub fn run_dump(
    dumps: &mut DumpOrchestrator,
    device: &mut SimulatedDevice,
    library: &LibraryStore,
    start: Instant,
    reply_time: Duration,
) -> (Instant, Vec<DumpReport>) {
    let mut now = start;
    let mut reports = dumps.drain_reports();
    let pacing = dumps.timing().pacing;
    while dumps.is_active() {
        let Some(record) = device.pending.pop_front() else {
            break;
        };
        now += reply_time;
        dumps.on_record(record, library, now);
        now += pacing;
        dumps.tick(device, now);
        reports.extend(dumps.drain_reports());
    }
    (now, reports)
}

/// Script feeding a `ScriptedSource` from the test thread.
#[derive(Clone)]
pub struct Script {
    tx: Sender<TransportResult<RawEvent>>,
}

impl Script {
    pub fn channel(&self, data: &[u8]) {
        let _ = self.tx.send(Ok(RawEvent::Channel {
            timestamp_us: 0,
            data: data.to_vec(),
        }));
    }

    /// Deliver `bytes` as SysEx fragments of at most `chunk` bytes.
    pub fn sysex(&self, bytes: &[u8], chunk: usize) {
        for (i, fragment) in bytes.chunks(chunk.max(1)).enumerate() {
            let _ = self.tx.send(Ok(RawEvent::SysExFragment {
                timestamp_us: i as u64,
                data: fragment.to_vec(),
            }));
        }
    }

    pub fn topology(&self, event: TopologyEvent) {
        let _ = self.tx.send(Ok(RawEvent::Topology(event)));
    }

    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.send(Err(error));
    }
}

pub struct ScriptedSource {
    rx: Receiver<TransportResult<RawEvent>>,
}

impl SequencerSource for ScriptedSource {
    fn poll(&mut self, timeout: Duration) -> TransportResult<Option<RawEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(Some(event)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

pub fn scripted() -> (Script, ScriptedSource) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Script { tx }, ScriptedSource { rx })
}

/// What a `DeviceSink` saw.
#[derive(Clone, Default)]
pub struct SinkLog {
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    pub drains: Arc<AtomicUsize>,
}

impl SinkLog {
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    pub fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }
}

/// Output port wired to a simulated device: sound requests and inquiries are
/// answered through `answer` in small fragments.
pub struct DeviceSink {
    pub log: SinkLog,
    pub answer: Option<Script>,
}

impl SequencerSink for DeviceSink {
    fn address(&self) -> PortAddress {
        PortAddress {
            client: "test".to_string(),
            port: "out".to_string(),
        }
    }

    fn write(&mut self, _source: &PortAddress, bytes: &[u8]) -> TransportResult<()> {
        self.log.written.lock().unwrap().push(bytes.to_vec());
        if let Some(script) = &self.answer {
            if let Some((bank, program)) = parse_request(bytes) {
                if bank < 8 {
                    script.sysex(&dump_bytes(bank, program), 64);
                }
            } else if bytes == sysex::encode_device_inquiry().as_slice() {
                script.sysex(&identity_reply(), 15);
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> TransportResult<()> {
        self.log.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll the librarian until `done` matches an event, or panic after `timeout`.
pub fn drive_until(
    librarian: &mut Librarian,
    timeout: Duration,
    mut done: impl FnMut(&LibrarianEvent) -> bool,
) -> Vec<LibrarianEvent> {
    let start = Instant::now();
    let mut seen = Vec::new();
    while start.elapsed() < timeout {
        for event in librarian.wait(Duration::from_millis(5)) {
            let stop = done(&event);
            seen.push(event);
            if stop {
                return seen;
            }
        }
    }
    panic!("timed out; saw {} events, last {:?}", seen.len(), seen.last());
}
