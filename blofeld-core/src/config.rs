use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dump::{DumpTiming, SequencePolicy};
use crate::midi::TransportOptions;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    midi: MidiConfig,
    #[serde(default)]
    dump: DumpConfig,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    client_name: Option<String>,
    input_port: Option<String>,
    output_port: Option<String>,
    device_id: Option<u8>,
    channel: Option<u8>,
    poll_timeout_ms: Option<u64>,
    port_scan_interval_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct DumpConfig {
    pacing_ms: Option<u64>,
    silence_timeout_ms: Option<u64>,
    eta_min_samples: Option<usize>,
    strict_sequence: Option<bool>,
}

/// Everything `Librarian::connect` needs to open the device ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiSettings {
    pub client_name: String,
    /// Case-insensitive substring of the input port name
    pub input_port: String,
    pub output_port: String,
    pub device_id: u8,
    /// 0-based channel to follow for selection; None = any
    pub channel: Option<u8>,
    pub poll_timeout: Duration,
    pub port_scan_interval: Duration,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            client_name: "Blofeld Librarian".to_string(),
            input_port: "Blofeld".to_string(),
            output_port: "Blofeld".to_string(),
            device_id: 0,
            channel: None,
            poll_timeout: Duration::from_millis(50),
            port_scan_interval: Duration::from_secs(1),
        }
    }
}

impl MidiSettings {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            poll_timeout: self.poll_timeout,
            selection_channel: self.channel,
        }
    }
}

pub struct Config {
    midi: MidiConfig,
    dump: DumpConfig,
}

impl Config {
    /// Built-in defaults overlaid with the user's config file, if any.
    pub fn load() -> Self {
        match user_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::embedded(),
        }
    }

    /// Built-in defaults overlaid with `path`. A missing, unreadable or
    /// malformed file leaves the defaults in place.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::embedded();
        if !path.exists() {
            return config;
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                Ok(user) => {
                    merge_midi(&mut config.midi, user.midi);
                    merge_dump(&mut config.dump, user.dump);
                }
                Err(e) => {
                    log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                }
            },
            Err(e) => {
                log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
            }
        }
        config
    }

    fn embedded() -> Self {
        let base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });
        Config {
            midi: base.midi,
            dump: base.dump,
        }
    }

    pub fn midi(&self) -> MidiSettings {
        let fallback = MidiSettings::default();
        MidiSettings {
            client_name: self.midi.client_name.clone().unwrap_or(fallback.client_name),
            input_port: self.midi.input_port.clone().unwrap_or(fallback.input_port),
            output_port: self.midi.output_port.clone().unwrap_or(fallback.output_port),
            device_id: self.midi.device_id.map(|id| id & 0x7F).unwrap_or(fallback.device_id),
            // 1-16 in the file, 0 meaning omni
            channel: match self.midi.channel {
                Some(ch @ 1..=16) => Some(ch - 1),
                Some(0) | None => fallback.channel,
                Some(ch) => {
                    log::warn!(target: "config", "midi.channel {} out of range, following all channels", ch);
                    None
                }
            },
            poll_timeout: self
                .midi
                .poll_timeout_ms
                .map(|ms| Duration::from_millis(ms.clamp(1, 1000)))
                .unwrap_or(fallback.poll_timeout),
            port_scan_interval: self
                .midi
                .port_scan_interval_ms
                .map(|ms| Duration::from_millis(ms.max(10)))
                .unwrap_or(fallback.port_scan_interval),
        }
    }

    pub fn dump_timing(&self) -> DumpTiming {
        let fallback = DumpTiming::default();
        DumpTiming {
            pacing: self
                .dump
                .pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.pacing),
            silence_timeout: self
                .dump
                .silence_timeout_ms
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(fallback.silence_timeout),
            eta_min_samples: self
                .dump
                .eta_min_samples
                .map(|n| n.max(1))
                .unwrap_or(fallback.eta_min_samples),
        }
    }

    pub fn sequence_policy(&self) -> SequencePolicy {
        if self.dump.strict_sequence.unwrap_or(false) {
            SequencePolicy::Strict
        } else {
            SequencePolicy::Permissive
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("blofeld-librarian").join("config.toml"))
}

fn merge_midi(base: &mut MidiConfig, user: MidiConfig) {
    if user.client_name.is_some() {
        base.client_name = user.client_name;
    }
    if user.input_port.is_some() {
        base.input_port = user.input_port;
    }
    if user.output_port.is_some() {
        base.output_port = user.output_port;
    }
    if user.device_id.is_some() {
        base.device_id = user.device_id;
    }
    if user.channel.is_some() {
        base.channel = user.channel;
    }
    if user.poll_timeout_ms.is_some() {
        base.poll_timeout_ms = user.poll_timeout_ms;
    }
    if user.port_scan_interval_ms.is_some() {
        base.port_scan_interval_ms = user.port_scan_interval_ms;
    }
}

fn merge_dump(base: &mut DumpConfig, user: DumpConfig) {
    if user.pacing_ms.is_some() {
        base.pacing_ms = user.pacing_ms;
    }
    if user.silence_timeout_ms.is_some() {
        base.silence_timeout_ms = user.silence_timeout_ms;
    }
    if user.eta_min_samples.is_some() {
        base.eta_min_samples = user.eta_min_samples;
    }
    if user.strict_sequence.is_some() {
        base.strict_sequence = user.strict_sequence;
    }
}
