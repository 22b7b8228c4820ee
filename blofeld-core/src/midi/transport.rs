//! SequencerTransport: one input port, one output port, and a dedicated
//! receive thread.
//!
//! The input side is opened on the receive thread and dropped there when the
//! loop ends, so the sequencer client never outlives the loop. The output side
//! stays with the owner; sends happen on the owner thread only.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use super::{
    parse_channel_message, MidiEvent, MidiEventKind, SelectionTracker, SysExAssembler, SysExEvent,
    TopologyEvent,
};
use crate::sysex::{self, DecodeError, SysExMessage};

/// Result type for transport operations.
pub type TransportResult<T = ()> = Result<T, TransportError>;

/// Transport fault. Faults raised by the receive loop end it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Sequencer client could not be created
    Init(String),
    PortNotFound(String),
    Connect(String),
    Send(String),
    /// The connected port went away
    PortLost(String),
    /// The driver side of the input channel is gone
    Disconnected,
    NotRunning,
    AlreadyRunning,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init(e) => write!(f, "sequencer client init failed: {}", e),
            Self::PortNotFound(p) => write!(f, "no MIDI port matching '{}'", p),
            Self::Connect(e) => write!(f, "port connection failed: {}", e),
            Self::Send(e) => write!(f, "send failed: {}", e),
            Self::PortLost(p) => write!(f, "MIDI port '{}' disappeared", p),
            Self::Disconnected => f.write_str("sequencer input disconnected"),
            Self::NotRunning => f.write_str("transport is not running"),
            Self::AlreadyRunning => f.write_str("transport is already running"),
        }
    }
}

impl std::error::Error for TransportError {}

/// An event as the sequencer hands it over, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Channel-voice message bytes.
    Channel { timestamp_us: u64, data: Vec<u8> },
    /// One fragment of a SysEx message.
    SysExFragment { timestamp_us: u64, data: Vec<u8> },
    Topology(TopologyEvent),
}

/// Input side of the sequencer, polled by the receive loop.
pub trait SequencerSource {
    /// Wait up to `timeout` for one event. `Ok(None)` means nothing arrived.
    /// An error means the client is no longer usable.
    fn poll(&mut self, timeout: Duration) -> TransportResult<Option<RawEvent>>;
}

/// Sequencer address of our own output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortAddress {
    pub client: String,
    pub port: String,
}

impl std::fmt::Display for PortAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

/// Output side of the sequencer.
pub trait SequencerSink {
    fn address(&self) -> PortAddress;
    /// Queue one message, stamped with `source` as sender.
    fn write(&mut self, source: &PortAddress, bytes: &[u8]) -> TransportResult<()>;
    /// Block until queued output has been handed to the driver.
    fn drain(&mut self) -> TransportResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportState::Running,
            2 => TransportState::Stopping,
            _ => TransportState::Stopped,
        }
    }
}

/// Messages from the receive thread to the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFeedback {
    Event(MidiEvent),
    /// Fatal fault; the loop is ending. Sent at most once per run.
    Fault(TransportError),
    /// The loop has exited and released the sequencer client.
    Stopped,
}

/// Receive loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Upper bound on one poll, and so on how long `stop` takes.
    pub poll_timeout: Duration,
    /// Channel to follow for bank/program selection; None = any.
    pub selection_channel: Option<u8>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            selection_channel: None,
        }
    }
}

pub struct SequencerTransport {
    state: Arc<AtomicU8>,
    stop_requested: Arc<AtomicBool>,
    sink: Option<Box<dyn SequencerSink>>,
    feedback_tx: Sender<TransportFeedback>,
    feedback_rx: Receiver<TransportFeedback>,
    join_handle: Option<JoinHandle<()>>,
    options: TransportOptions,
}

impl SequencerTransport {
    pub fn new(options: TransportOptions) -> Self {
        let (feedback_tx, feedback_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(AtomicU8::new(TransportState::Stopped as u8)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            sink: None,
            feedback_tx,
            feedback_rx,
            join_handle: None,
            options,
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == TransportState::Running
    }

    /// Spawn the receive loop. `open_source` runs on the new thread; if it
    /// fails the fault is reported through the feedback channel.
    pub fn start<F>(&mut self, open_source: F, sink: Box<dyn SequencerSink>) -> TransportResult<()>
    where
        F: FnOnce() -> TransportResult<Box<dyn SequencerSource>> + Send + 'static,
    {
        if self.state() != TransportState::Stopped {
            return Err(TransportError::AlreadyRunning);
        }
        // Reap a loop that ended on its own after a fault.
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }

        self.stop_requested.store(false, Ordering::Release);
        self.state.store(TransportState::Running as u8, Ordering::Release);
        log::info!(target: "midi", "transport starting, output {}", sink.address());
        self.sink = Some(sink);

        let receive = ReceiveLoop {
            state: Arc::clone(&self.state),
            stop_requested: Arc::clone(&self.stop_requested),
            feedback_tx: self.feedback_tx.clone(),
            assembler: SysExAssembler::new(),
            selection: SelectionTracker::new(self.options.selection_channel),
            poll_timeout: self.options.poll_timeout,
        };

        let spawned = thread::Builder::new()
            .name("midi-receive".to_string())
            .spawn(move || receive.run(open_source));

        match spawned {
            Ok(handle) => {
                self.join_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.store(TransportState::Stopped as u8, Ordering::Release);
                self.sink = None;
                Err(TransportError::Init(e.to_string()))
            }
        }
    }

    /// Ask the loop to finish and wait for it. Returns once the sequencer
    /// client has been released.
    pub fn stop(&mut self) {
        let Some(handle) = self.join_handle.take() else {
            return;
        };
        self.stop_requested.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            TransportState::Running as u8,
            TransportState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if handle.join().is_err() {
            log::error!(target: "midi", "receive thread panicked");
        }
        self.state.store(TransportState::Stopped as u8, Ordering::Release);
        self.sink = None;
        log::info!(target: "midi", "transport stopped");
    }

    /// Send one message and drain the output before returning, so request
    /// N is with the driver before request N+1 is written.
    pub fn send(&mut self, bytes: &[u8]) -> TransportResult<()> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        let sink = self.sink.as_mut().ok_or(TransportError::NotRunning)?;
        let source = sink.address();
        sink.write(&source, bytes)?;
        sink.drain()?;
        log::trace!(target: "midi", "sent {} bytes from {}", bytes.len(), source);
        Ok(())
    }

    /// Address outgoing messages are stamped with.
    pub fn address(&self) -> Option<PortAddress> {
        self.sink.as_ref().map(|s| s.address())
    }

    /// All pending feedback (non-blocking).
    pub fn drain_feedback(&self) -> Vec<TransportFeedback> {
        self.feedback_rx.try_iter().collect()
    }

    /// Feedback receiver, for callers that want to block or select on it.
    pub fn feedback(&self) -> &Receiver<TransportFeedback> {
        &self.feedback_rx
    }
}

impl Default for SequencerTransport {
    fn default() -> Self {
        Self::new(TransportOptions::default())
    }
}

impl Drop for SequencerTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the receive thread.
struct ReceiveLoop {
    state: Arc<AtomicU8>,
    stop_requested: Arc<AtomicBool>,
    feedback_tx: Sender<TransportFeedback>,
    assembler: SysExAssembler,
    selection: SelectionTracker,
    poll_timeout: Duration,
}

impl ReceiveLoop {
    fn run<F>(mut self, open_source: F)
    where
        F: FnOnce() -> TransportResult<Box<dyn SequencerSource>>,
    {
        match open_source() {
            Ok(mut source) => {
                while !self.stop_requested.load(Ordering::Acquire) {
                    match source.poll(self.poll_timeout) {
                        Ok(Some(raw)) => {
                            if !self.dispatch(raw) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::error!(target: "midi", "receive loop ending: {}", e);
                            let _ = self.feedback_tx.send(TransportFeedback::Fault(e));
                            break;
                        }
                    }
                }
                drop(source);
            }
            Err(e) => {
                log::error!(target: "midi", "could not open sequencer input: {}", e);
                let _ = self.feedback_tx.send(TransportFeedback::Fault(e));
            }
        }

        self.state.store(TransportState::Stopped as u8, Ordering::Release);
        let _ = self.feedback_tx.send(TransportFeedback::Stopped);
    }

    /// Returns false when the owner is gone.
    fn dispatch(&mut self, raw: RawEvent) -> bool {
        match raw {
            RawEvent::Channel { timestamp_us, data } => match parse_channel_message(&data) {
                Some(kind) => {
                    self.selection.observe(&kind);
                    self.emit(MidiEvent::new(timestamp_us, kind))
                }
                None => true,
            },
            RawEvent::SysExFragment { timestamp_us, data } => {
                let Some(message) = self.assembler.push(&data) else {
                    return true;
                };
                match self.decode(&message) {
                    Ok(event) => self.emit(MidiEvent::new(timestamp_us, MidiEventKind::SysEx(event))),
                    Err(e) => {
                        log::warn!(
                            target: "midi",
                            "dropping SysEx message ({} bytes): {}",
                            message.len(),
                            e
                        );
                        true
                    }
                }
            }
            RawEvent::Topology(event) => {
                log::debug!(target: "midi", "topology: {:?}", event);
                self.emit(MidiEvent::new(0, MidiEventKind::Topology(event)))
            }
        }
    }

    fn decode(&self, message: &[u8]) -> Result<SysExEvent, DecodeError> {
        match sysex::decode_message(message)? {
            SysExMessage::Identity(info) => Ok(SysExEvent::Identity(info)),
            SysExMessage::Sound(dump) => dump
                .resolve(self.selection.current())
                .map(SysExEvent::Sound),
            SysExMessage::Foreign(bytes) => Ok(SysExEvent::Foreign(bytes)),
        }
    }

    fn emit(&self, event: MidiEvent) -> bool {
        self.feedback_tx.send(TransportFeedback::Event(event)).is_ok()
    }
}
