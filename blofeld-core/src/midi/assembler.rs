//! Reassembly of SysEx messages the driver delivers in fragments.

use crate::sysex::{SYSEX_END, SYSEX_START};

/// Growable buffer collecting SysEx fragments into complete messages.
///
/// A fragment starting with `F0` always begins a new message, dropping any
/// unfinished one. A message is complete when the last byte received is `F7`.
/// Fragments arriving with no message open are appended anyway: the driver
/// gives no sequence numbers, so there is nothing to check them against.
#[derive(Debug, Default)]
pub struct SysExAssembler {
    buffer: Vec<u8>,
}

impl SysExAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the message once it is complete.
    pub fn push(&mut self, fragment: &[u8]) -> Option<Vec<u8>> {
        let (&first, _) = fragment.split_first()?;

        if first == SYSEX_START {
            if !self.buffer.is_empty() {
                log::warn!(
                    target: "midi",
                    "discarding {} bytes of unterminated SysEx",
                    self.buffer.len()
                );
                self.buffer.clear();
            }
        } else if self.buffer.is_empty() {
            log::debug!(
                target: "midi",
                "SysEx continuation ({} bytes) with no message open",
                fragment.len()
            );
        }

        self.buffer.extend_from_slice(fragment);

        if self.buffer.last() == Some(&SYSEX_END) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Bytes of the message currently being collected.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
