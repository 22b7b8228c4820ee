//! Owner-thread facade over the transport, the dump orchestrator and the
//! library.
//!
//! The front end calls `poll(now)` periodically. Each call drains the
//! transport feedback, routes decoded sounds into the orchestrator (which
//! stores them), drives dump pacing and timeouts, and returns what happened
//! as a flat list of events.

use std::time::{Duration, Instant};

use blofeld_types::{DeviceInfo, SoundRecord};

use crate::config::{Config, MidiSettings};
use crate::dump::{DumpError, DumpOrchestrator, DumpReport, DumpTiming, SequencePolicy};
use crate::library::LibraryStore;
use crate::midi::midir_backend::{MidirSink, MidirSource};
use crate::midi::{
    MidiEvent, MidiEventKind, SequencerSink, SequencerSource, SequencerTransport, SysExEvent,
    TopologyEvent, TransportError, TransportFeedback, TransportOptions,
};
use crate::sysex::{self, EncodeError, ProgramSelection};

/// What the front end hears back from `poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum LibrarianEvent {
    /// Channel traffic and SysEx not addressed to the librarian
    Midi(MidiEvent),
    Topology(TopologyEvent),
    DeviceIdentified(DeviceInfo),
    /// A sound was stored in the library at this slot
    SoundReceived { bank: u8, program: u8 },
    Dump(DumpReport),
    TransportFault(String),
    TransportStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarianError {
    Transport(TransportError),
    Encode(EncodeError),
    Dump(DumpError),
}

impl std::fmt::Display for LibrarianError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Encode(e) => write!(f, "{}", e),
            Self::Dump(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LibrarianError {}

impl From<TransportError> for LibrarianError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EncodeError> for LibrarianError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<DumpError> for LibrarianError {
    fn from(e: DumpError) -> Self {
        Self::Dump(e)
    }
}

pub type LibrarianResult<T = ()> = Result<T, LibrarianError>;

pub struct Librarian {
    transport: SequencerTransport,
    dumps: DumpOrchestrator,
    library: LibraryStore,
    device: Option<DeviceInfo>,
    device_id: u8,
    /// Channel for program selection, 0-based
    channel: u8,
}

impl Default for Librarian {
    fn default() -> Self {
        Self::new(DumpTiming::default(), SequencePolicy::Permissive)
    }
}

impl Librarian {
    pub fn new(timing: DumpTiming, policy: SequencePolicy) -> Self {
        Self {
            transport: SequencerTransport::default(),
            dumps: DumpOrchestrator::new(timing, policy),
            library: LibraryStore::new(),
            device: None,
            device_id: 0,
            channel: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.dump_timing(), config.sequence_policy())
    }

    /// Open the configured midir ports and start receiving.
    pub fn connect(&mut self, settings: &MidiSettings) -> LibrarianResult {
        if self.transport.is_running() {
            return Err(TransportError::AlreadyRunning.into());
        }
        let sink = MidirSink::open(&settings.client_name, &settings.output_port)?;
        let client_name = settings.client_name.clone();
        let pattern = settings.input_port.clone();
        let scan_interval = settings.port_scan_interval;
        self.set_device_id(settings.device_id);
        self.channel = settings.channel.unwrap_or(0);
        self.connect_with(
            settings.transport_options(),
            move || {
                MidirSource::open(&client_name, &pattern, scan_interval)
                    .map(|source| Box::new(source) as Box<dyn SequencerSource>)
            },
            Box::new(sink),
        )
    }

    /// Start the transport on any sequencer backend.
    pub fn connect_with<F>(
        &mut self,
        options: TransportOptions,
        open_source: F,
        sink: Box<dyn SequencerSink>,
    ) -> LibrarianResult
    where
        F: FnOnce() -> Result<Box<dyn SequencerSource>, TransportError> + Send + 'static,
    {
        if self.transport.is_running() {
            return Err(TransportError::AlreadyRunning.into());
        }
        self.transport = SequencerTransport::new(options);
        self.device = None;
        self.transport.start(open_source, sink)?;
        Ok(())
    }

    /// Cancel any dump and stop the transport. Returns once the sequencer
    /// client is released.
    pub fn disconnect(&mut self) {
        self.dumps.cancel();
        self.transport.stop();
    }

    /// Address requests and sound writes to the device with this id.
    pub fn set_device_id(&mut self, device_id: u8) {
        self.device_id = device_id & 0x7F;
        self.dumps.set_device_id(device_id);
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_running()
    }

    /// Send a device inquiry; the answer arrives as `DeviceIdentified`.
    pub fn identify(&mut self) -> LibrarianResult {
        self.transport.send(&sysex::encode_device_inquiry())?;
        Ok(())
    }

    pub fn request_single(&mut self, bank: u8, program: u8, now: Instant) -> LibrarianResult {
        self.dumps
            .request_single(&mut self.transport, bank, program, now)?;
        Ok(())
    }

    pub fn request_bank(&mut self, bank: u8, now: Instant) -> LibrarianResult {
        self.dumps.request_bank(&mut self.transport, bank, now)?;
        Ok(())
    }

    pub fn request_all(&mut self, now: Instant) -> LibrarianResult {
        self.dumps.request_all(&mut self.transport, now)?;
        Ok(())
    }

    pub fn cancel(&mut self) -> bool {
        self.dumps.cancel()
    }

    pub fn retry(&mut self, now: Instant) -> LibrarianResult {
        self.dumps.retry(&mut self.transport, now)?;
        Ok(())
    }

    /// Ask the edit buffer for its sound; it is placed at the last selection
    /// seen on the input.
    pub fn request_edit_buffer(&mut self) -> LibrarianResult {
        self.transport.send(&sysex::encode_edit_buffer_request(self.device_id))?;
        Ok(())
    }

    /// Write `record` into its own device slot. The library copy, if the
    /// record is in the library, is marked as dumped.
    pub fn send_sound(&mut self, record: &SoundRecord) -> LibrarianResult {
        let bytes = sysex::encode_sound_dump(record, self.device_id)?;
        self.transport.send(&bytes)?;
        if self.library.locate(record.id()).is_some() {
            let mut sent = record.clone();
            sent.mark_dumped();
            self.library.add(sent);
        }
        Ok(())
    }

    /// Load `record` into the edit buffer without touching any stored slot.
    pub fn audition(&mut self, record: &SoundRecord) -> LibrarianResult {
        self.transport
            .send(&sysex::encode_edit_buffer_dump(record, self.device_id))?;
        Ok(())
    }

    /// Bank select plus program change on the configured channel.
    pub fn select_program(&mut self, bank: u8, program: u8) -> LibrarianResult {
        let bytes = sysex::encode_program_select(self.channel, ProgramSelection { bank, program })?;
        self.transport.send(&bytes)?;
        Ok(())
    }

    pub fn poll(&mut self, now: Instant) -> Vec<LibrarianEvent> {
        let mut events = Vec::new();
        for feedback in self.transport.drain_feedback() {
            self.handle_feedback(feedback, now, &mut events);
        }
        self.dumps.tick(&mut self.transport, now);
        events.extend(self.dumps.drain_reports().into_iter().map(LibrarianEvent::Dump));
        events
    }

    /// Block on the feedback channel for up to `timeout`, then poll. For
    /// front ends without their own event loop.
    pub fn wait(&mut self, timeout: Duration) -> Vec<LibrarianEvent> {
        let mut events = Vec::new();
        if let Ok(feedback) = self.transport.feedback().recv_timeout(timeout) {
            self.handle_feedback(feedback, Instant::now(), &mut events);
        }
        events.extend(self.poll(Instant::now()));
        events
    }

    fn handle_feedback(
        &mut self,
        feedback: TransportFeedback,
        now: Instant,
        events: &mut Vec<LibrarianEvent>,
    ) {
        match feedback {
            TransportFeedback::Event(event) => self.route(event, now, events),
            TransportFeedback::Fault(e) => {
                if self.dumps.is_active() {
                    self.dumps.abort(DumpError::Transport(e.clone()));
                }
                events.push(LibrarianEvent::TransportFault(e.to_string()));
            }
            TransportFeedback::Stopped => events.push(LibrarianEvent::TransportStopped),
        }
    }

    fn route(&mut self, event: MidiEvent, now: Instant, events: &mut Vec<LibrarianEvent>) {
        match event.kind {
            MidiEventKind::SysEx(SysExEvent::Sound(record)) => {
                let (bank, program) = record.location();
                self.dumps.on_record(record, &self.library, now);
                events.push(LibrarianEvent::SoundReceived { bank, program });
            }
            MidiEventKind::SysEx(SysExEvent::Identity(info)) => {
                if !info.is_blofeld() {
                    log::warn!(target: "midi", "inquiry answered by {}", info);
                }
                self.device = Some(info.clone());
                events.push(LibrarianEvent::DeviceIdentified(info));
            }
            MidiEventKind::Topology(topology) => events.push(LibrarianEvent::Topology(topology)),
            kind => events.push(LibrarianEvent::Midi(MidiEvent::new(event.timestamp_us, kind))),
        }
    }

    pub fn library(&self) -> &LibraryStore {
        &self.library
    }

    /// Last device that answered an inquiry on this connection.
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn dumps(&self) -> &DumpOrchestrator {
        &self.dumps
    }
}
