//! Sequencer backend on midir.
//!
//! midir hands input to a callback on its own thread; the callback forwards
//! raw packets over a channel that the receive loop polls with a timeout.
//! midir has no topology notifications, so port changes are found by diffing
//! the port list every `scan_interval`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use serde::Serialize;

use super::transport::{
    PortAddress, RawEvent, SequencerSink, SequencerSource, TransportError, TransportResult,
};
use super::TopologyEvent;
use crate::sysex::{SYSEX_END, SYSEX_START};

/// Information about an available MIDI port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Ports visible to a fresh client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortListing {
    pub inputs: Vec<MidiPortInfo>,
    pub outputs: Vec<MidiPortInfo>,
}

pub fn list_ports(client_name: &str) -> TransportResult<PortListing> {
    let midi_in = MidiInput::new(client_name).map_err(|e| TransportError::Init(e.to_string()))?;
    let midi_out =
        MidiOutput::new(client_name).map_err(|e| TransportError::Init(e.to_string()))?;

    let inputs = midi_in
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_in
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect();
    let outputs = midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect();

    Ok(PortListing { inputs, outputs })
}

/// First port whose name contains `pattern`, case-insensitively. An empty
/// pattern takes the first port.
pub fn match_port(names: &[String], pattern: &str) -> Option<usize> {
    let pattern = pattern.to_lowercase();
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&pattern))
}

/// Sort a raw midir packet into channel traffic or SysEx fragments. System
/// common and realtime bytes are dropped.
pub fn classify_packet(timestamp_us: u64, data: &[u8]) -> Option<RawEvent> {
    let &first = data.first()?;
    if first == SYSEX_START || first == SYSEX_END || first < 0x80 {
        Some(RawEvent::SysExFragment {
            timestamp_us,
            data: data.to_vec(),
        })
    } else if first < 0xF0 {
        Some(RawEvent::Channel {
            timestamp_us,
            data: data.to_vec(),
        })
    } else {
        None
    }
}

fn input_port_names(midi_in: &MidiInput) -> Vec<String> {
    midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect()
}

pub struct MidirSource {
    _connection: MidiInputConnection<()>,
    packets: Receiver<(u64, Vec<u8>)>,
    /// Second client used only to list ports
    watcher: Option<MidiInput>,
    known_ports: Vec<String>,
    connected_port: String,
    pending: VecDeque<RawEvent>,
    scan_interval: Duration,
    last_scan: Instant,
    lost: bool,
}

impl MidirSource {
    /// Connect to the first input port matching `pattern`.
    pub fn open(client_name: &str, pattern: &str, scan_interval: Duration) -> TransportResult<Self> {
        let mut midi_in =
            MidiInput::new(client_name).map_err(|e| TransportError::Init(e.to_string()))?;
        // Dumps are SysEx; midir drops it by default.
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        let index = match_port(&names, pattern)
            .ok_or_else(|| TransportError::PortNotFound(pattern.to_string()))?;
        let connected_port = names[index].clone();

        let (tx, rx) = crossbeam_channel::unbounded();
        let connection = midi_in
            .connect(
                &ports[index],
                "blofeld-in",
                move |timestamp, message, _| {
                    let _ = tx.send((timestamp, message.to_vec()));
                },
                (),
            )
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        log::info!(target: "midi", "input connected to {}", connected_port);

        let watcher = match MidiInput::new(&format!("{}-watch", client_name)) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!(target: "midi", "port watching disabled: {}", e);
                None
            }
        };

        let mut pending = VecDeque::new();
        pending.push_back(RawEvent::Topology(TopologyEvent::Subscribed {
            port: connected_port.clone(),
        }));

        Ok(Self {
            _connection: connection,
            packets: rx,
            watcher,
            known_ports: names,
            connected_port,
            pending,
            scan_interval,
            last_scan: Instant::now(),
            lost: false,
        })
    }

    fn rescan(&mut self) {
        self.last_scan = Instant::now();
        let Some(watcher) = self.watcher.as_ref() else {
            return;
        };
        let current = input_port_names(watcher);

        for name in current.iter().filter(|n| !self.known_ports.contains(n)) {
            self.pending.push_back(RawEvent::Topology(TopologyEvent::PortAdded {
                name: name.clone(),
            }));
        }
        for name in self.known_ports.iter().filter(|n| !current.contains(n)) {
            self.pending.push_back(RawEvent::Topology(TopologyEvent::PortRemoved {
                name: name.clone(),
            }));
        }

        if !current.contains(&self.connected_port) {
            self.pending.push_back(RawEvent::Topology(TopologyEvent::Unsubscribed {
                port: self.connected_port.clone(),
            }));
            self.lost = true;
        }
        self.known_ports = current;
    }
}

impl SequencerSource for MidirSource {
    fn poll(&mut self, timeout: Duration) -> TransportResult<Option<RawEvent>> {
        if !self.lost && self.last_scan.elapsed() >= self.scan_interval {
            self.rescan();
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.lost {
            return Err(TransportError::PortLost(self.connected_port.clone()));
        }

        match self.packets.recv_timeout(timeout) {
            Ok((timestamp, data)) => Ok(classify_packet(timestamp, &data)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

pub struct MidirSink {
    connection: MidiOutputConnection,
    address: PortAddress,
}

impl MidirSink {
    /// Connect to the first output port matching `pattern`.
    pub fn open(client_name: &str, pattern: &str) -> TransportResult<Self> {
        let midi_out =
            MidiOutput::new(client_name).map_err(|e| TransportError::Init(e.to_string()))?;
        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        let index = match_port(&names, pattern)
            .ok_or_else(|| TransportError::PortNotFound(pattern.to_string()))?;

        let connection = midi_out
            .connect(&ports[index], "blofeld-out")
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        log::info!(target: "midi", "output connected to {}", names[index]);

        Ok(Self {
            connection,
            address: PortAddress {
                client: client_name.to_string(),
                port: "blofeld-out".to_string(),
            },
        })
    }
}

impl SequencerSink for MidirSink {
    fn address(&self) -> PortAddress {
        self.address.clone()
    }

    fn write(&mut self, _source: &PortAddress, bytes: &[u8]) -> TransportResult<()> {
        // midir stamps our own port as sender
        self.connection
            .send(bytes)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn drain(&mut self) -> TransportResult<()> {
        // midir hands each message to the driver inside send()
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_port_is_case_insensitive_substring() {
        let names = vec![
            "Midi Through:Midi Through Port-0 14:0".to_string(),
            "Blofeld:Blofeld MIDI 1 20:0".to_string(),
        ];
        assert_eq!(match_port(&names, "blofeld"), Some(1));
        assert_eq!(match_port(&names, ""), Some(0));
        assert_eq!(match_port(&names, "volca"), None);
    }

    #[test]
    fn classify_channel_and_sysex_packets() {
        assert!(matches!(
            classify_packet(5, &[0x90, 60, 100]),
            Some(RawEvent::Channel { timestamp_us: 5, .. })
        ));
        assert!(matches!(
            classify_packet(0, &[0xF0, 0x3E, 0x13]),
            Some(RawEvent::SysExFragment { .. })
        ));
        assert!(matches!(
            classify_packet(0, &[0x10, 0x20, 0xF7]),
            Some(RawEvent::SysExFragment { .. })
        ));
        assert!(matches!(
            classify_packet(0, &[0xF7]),
            Some(RawEvent::SysExFragment { .. })
        ));
    }

    #[test]
    fn classify_drops_realtime_and_empty() {
        assert!(classify_packet(0, &[0xF8]).is_none());
        assert!(classify_packet(0, &[0xFE]).is_none());
        assert!(classify_packet(0, &[]).is_none());
    }
}
