//! # blofeld-core
//!
//! MIDI SysEx librarian engine for the Waldorf Blofeld. Talks to the device
//! over a sequencer transport, decodes its sound dumps, walks banks with a
//! paced dump state machine, and keeps the in-memory sound library.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::{Duration, Instant};
//! use blofeld_core::config::Config;
//! use blofeld_core::librarian::{Librarian, LibrarianEvent};
//!
//! let config = Config::load();
//! let mut librarian = Librarian::from_config(&config);
//! librarian.connect(&config.midi())?;
//! librarian.request_bank(0, Instant::now())?;
//!
//! loop {
//!     for event in librarian.wait(Duration::from_millis(20)) {
//!         // LibrarianEvent::Dump(DumpReport::Finished { .. }) ends the run
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`sysex`]: encode/decode of device inquiry, sound requests and dumps
//! - [`midi`]: typed MIDI events, SysEx reassembly, selection tracking, the
//!   sequencer transport and its midir backend
//! - [`library`]: the 26x128 grid of sounds
//! - [`dump`]: single/bank/all dump state machine with pacing and ETA
//! - [`librarian`]: owner-thread facade tying the above together
//! - [`config`]: TOML configuration (embedded defaults + user overrides)

pub mod config;
pub mod dump;
pub mod librarian;
pub mod library;
pub mod midi;
pub mod sysex;
