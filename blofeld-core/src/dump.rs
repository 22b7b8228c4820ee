//! DumpOrchestrator: walks the device slot by slot and fills the library.
//!
//! Runs on the owner thread. It never blocks: requests go out from
//! `request_*` and `tick`, dumps come in through `on_record`, and the caller
//! drives `tick` from its periodic poll with the current time. Reports queue
//! up until `drain_reports`.

use std::time::{Duration, Instant};

use blofeld_types::{SoundRecord, DEVICE_BANKS, PROGRAMS_PER_BANK};

use crate::library::LibraryStore;
use crate::midi::{SequencerTransport, TransportError, TransportResult};
use crate::sysex::{self, EncodeError};

/// Where dump requests go. Implemented by the transport; tests substitute a
/// simulated device.
pub trait RequestLink {
    fn send_request(&mut self, bytes: &[u8]) -> TransportResult<()>;
}

impl RequestLink for SequencerTransport {
    fn send_request(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.send(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpScope {
    Single { bank: u8, program: u8 },
    Bank(u8),
    All,
}

impl std::fmt::Display for DumpScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpScope::Single { bank, program } => write!(
                f,
                "sound {}{:03}",
                blofeld_types::bank_letter(*bank),
                *program as u16 + 1
            ),
            DumpScope::Bank(bank) => write!(f, "bank {}", blofeld_types::bank_letter(*bank)),
            DumpScope::All => f.write_str("all banks"),
        }
    }
}

/// Next slot expected from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCursor {
    pub bank: u8,
    pub program: u8,
}

impl SlotCursor {
    pub fn new(bank: u8, program: u8) -> Self {
        Self { bank, program }
    }

    pub fn location(self) -> (u8, u8) {
        (self.bank, self.program)
    }

    /// Slot after this one within `scope`, or None when the scope is done.
    pub fn next(self, scope: DumpScope) -> Option<SlotCursor> {
        let last_program = (PROGRAMS_PER_BANK - 1) as u8;
        match scope {
            DumpScope::Single { .. } => None,
            DumpScope::Bank(_) if self.program < last_program => {
                Some(Self::new(self.bank, self.program + 1))
            }
            DumpScope::Bank(_) => None,
            DumpScope::All if self.program < last_program => {
                Some(Self::new(self.bank, self.program + 1))
            }
            DumpScope::All if ((self.bank + 1) as usize) < DEVICE_BANKS => {
                Some(Self::new(self.bank + 1, 0))
            }
            DumpScope::All => None,
        }
    }

    /// Slots from this one to the end of `scope`, inclusive.
    pub fn remaining_in(self, scope: DumpScope) -> usize {
        match scope {
            DumpScope::Single { .. } => 1,
            DumpScope::Bank(_) => PROGRAMS_PER_BANK - self.program as usize,
            DumpScope::All => {
                (DEVICE_BANKS - self.bank as usize) * PROGRAMS_PER_BANK - self.program as usize
            }
        }
    }
}

/// What to do with a dump that is not for the expected slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Keep the dump where it says it belongs and carry on from the cursor.
    Permissive,
    /// Abort the run.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceDecision {
    Continue,
    Abort,
}

impl SequencePolicy {
    pub fn decide(self, expected: SlotCursor, received: (u8, u8)) -> SequenceDecision {
        if expected.location() == received {
            return SequenceDecision::Continue;
        }
        match self {
            SequencePolicy::Permissive => SequenceDecision::Continue,
            SequencePolicy::Strict => SequenceDecision::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DumpTiming {
    /// Gap between a received dump and the next request
    pub pacing: Duration,
    /// No dump for this long after a request fails the run
    pub silence_timeout: Duration,
    /// Completed slots needed before an ETA is reported
    pub eta_min_samples: usize,
}

impl Default for DumpTiming {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(50),
            silence_timeout: Duration::from_secs(3),
            eta_min_samples: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpError {
    /// Nothing came back within the silence window.
    DeviceTimeout { bank: u8, program: u8 },
    OutOfSequence {
        expected: SlotCursor,
        received: (u8, u8),
    },
    /// A run is already in flight.
    Busy,
    NothingToRetry,
    Transport(TransportError),
    Encode(EncodeError),
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceTimeout { bank, program } => write!(
                f,
                "device did not answer the request for {}/{}",
                bank, program
            ),
            Self::OutOfSequence { expected, received } => write!(
                f,
                "expected {}/{}, device sent {}/{}",
                expected.bank, expected.program, received.0, received.1
            ),
            Self::Busy => f.write_str("a dump is already running"),
            Self::NothingToRetry => f.write_str("no interrupted dump to retry"),
            Self::Transport(e) => write!(f, "{}", e),
            Self::Encode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DumpError {}

impl From<TransportError> for DumpError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EncodeError> for DumpError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

/// Snapshot of a running dump after a slot arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpProgress {
    /// Slot that was just received
    pub bank: u8,
    pub program: u8,
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// None until enough slots have arrived for a stable estimate
    pub remaining: Option<Duration>,
}

impl DumpProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f32 / self.total as f32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpReport {
    Started {
        scope: DumpScope,
        total: usize,
    },
    Progress(DumpProgress),
    Finished {
        scope: DumpScope,
        received: usize,
        elapsed: Duration,
    },
    Cancelled {
        scope: DumpScope,
        received: usize,
    },
    Failed {
        scope: DumpScope,
        error: DumpError,
    },
}

struct DumpRun {
    scope: DumpScope,
    cursor: SlotCursor,
    total: usize,
    completed: usize,
    started_at: Instant,
    elapsed: Duration,
    /// Set while a request is out and unanswered
    requested_at: Option<Instant>,
    /// Set while pacing before the next request
    next_request_at: Option<Instant>,
}

pub struct DumpOrchestrator {
    run: Option<DumpRun>,
    /// Scope and cursor of the last run that did not finish
    resume: Option<(DumpScope, SlotCursor)>,
    timing: DumpTiming,
    policy: SequencePolicy,
    /// Device id stamped into outgoing requests
    device_id: u8,
    reports: Vec<DumpReport>,
}

impl Default for DumpOrchestrator {
    fn default() -> Self {
        Self::new(DumpTiming::default(), SequencePolicy::Permissive)
    }
}

impl DumpOrchestrator {
    pub fn new(timing: DumpTiming, policy: SequencePolicy) -> Self {
        Self {
            run: None,
            resume: None,
            timing,
            policy,
            device_id: 0,
            reports: Vec::new(),
        }
    }

    pub fn set_device_id(&mut self, device_id: u8) {
        self.device_id = device_id & 0x7F;
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn is_active(&self) -> bool {
        self.run.is_some()
    }

    pub fn scope(&self) -> Option<DumpScope> {
        self.run.as_ref().map(|r| r.scope)
    }

    pub fn cursor(&self) -> Option<SlotCursor> {
        self.run.as_ref().map(|r| r.cursor)
    }

    /// Where `retry` would pick up.
    pub fn resume_point(&self) -> Option<(DumpScope, SlotCursor)> {
        self.resume
    }

    pub fn timing(&self) -> DumpTiming {
        self.timing
    }

    pub fn policy(&self) -> SequencePolicy {
        self.policy
    }

    pub fn drain_reports(&mut self) -> Vec<DumpReport> {
        std::mem::take(&mut self.reports)
    }

    pub fn request_single(
        &mut self,
        link: &mut dyn RequestLink,
        bank: u8,
        program: u8,
        now: Instant,
    ) -> Result<(), DumpError> {
        self.begin(
            link,
            DumpScope::Single { bank, program },
            SlotCursor::new(bank, program),
            now,
        )
    }

    pub fn request_bank(&mut self, link: &mut dyn RequestLink, bank: u8, now: Instant) -> Result<(), DumpError> {
        self.begin(link, DumpScope::Bank(bank), SlotCursor::new(bank, 0), now)
    }

    pub fn request_all(&mut self, link: &mut dyn RequestLink, now: Instant) -> Result<(), DumpError> {
        self.begin(link, DumpScope::All, SlotCursor::new(0, 0), now)
    }

    /// Restart the last interrupted run from where it stopped.
    pub fn retry(&mut self, link: &mut dyn RequestLink, now: Instant) -> Result<(), DumpError> {
        let (scope, cursor) = self.resume.ok_or(DumpError::NothingToRetry)?;
        self.begin(link, scope, cursor, now)
    }

    fn begin(
        &mut self,
        link: &mut dyn RequestLink,
        scope: DumpScope,
        cursor: SlotCursor,
        now: Instant,
    ) -> Result<(), DumpError> {
        if self.run.is_some() {
            return Err(DumpError::Busy);
        }
        let request = sysex::encode_sound_request_to(self.device_id, cursor.bank, cursor.program)?;
        link.send_request(&request)?;

        let total = cursor.remaining_in(scope);
        log::info!(
            target: "dump",
            "dumping {} from {}/{} ({} slots)",
            scope, cursor.bank, cursor.program, total
        );
        self.resume = None;
        self.run = Some(DumpRun {
            scope,
            cursor,
            total,
            completed: 0,
            started_at: now,
            elapsed: Duration::ZERO,
            requested_at: Some(now),
            next_request_at: None,
        });
        self.reports.push(DumpReport::Started { scope, total });
        Ok(())
    }

    /// Stop issuing requests. Dumps already on their way are still stored
    /// when they arrive but do not restart the run.
    pub fn cancel(&mut self) -> bool {
        let Some(run) = self.run.take() else {
            return false;
        };
        log::info!(
            target: "dump",
            "{} cancelled after {} of {}",
            run.scope, run.completed, run.total
        );
        self.resume = Some((run.scope, run.cursor));
        self.reports.push(DumpReport::Cancelled {
            scope: run.scope,
            received: run.completed,
        });
        true
    }

    /// A sound arrived. It always goes into the library; whether it moves the
    /// run forward depends on what was asked for.
    pub fn on_record(&mut self, record: SoundRecord, library: &LibraryStore, now: Instant) {
        let received = record.location();
        library.add(record);

        let Some(run) = self.run.as_mut() else {
            log::debug!(target: "dump", "stored {}/{} outside a dump", received.0, received.1);
            return;
        };
        if run.requested_at.is_none() {
            log::debug!(
                target: "dump",
                "stored unsolicited {}/{} while pacing",
                received.0, received.1
            );
            return;
        }

        if let DumpScope::Single { bank, program } = run.scope {
            if received != (bank, program) {
                log::debug!(
                    target: "dump",
                    "waiting for {}/{}, stored {}/{}",
                    bank, program, received.0, received.1
                );
                return;
            }
        } else if self.policy.decide(run.cursor, received) == SequenceDecision::Abort {
            let error = DumpError::OutOfSequence {
                expected: run.cursor,
                received,
            };
            self.abort(error);
            return;
        } else if run.cursor.location() != received {
            log::warn!(
                target: "dump",
                "expected {}/{}, got {}/{}; continuing",
                run.cursor.bank, run.cursor.program, received.0, received.1
            );
        }

        run.completed += 1;
        run.elapsed = now.saturating_duration_since(run.started_at);
        let remaining = if run.completed >= self.timing.eta_min_samples.max(1) {
            let left = (run.total - run.completed.min(run.total)) as u32;
            Some(run.elapsed / run.completed as u32 * left)
        } else {
            None
        };
        self.reports.push(DumpReport::Progress(DumpProgress {
            bank: received.0,
            program: received.1,
            completed: run.completed,
            total: run.total,
            elapsed: run.elapsed,
            remaining,
        }));

        match run.cursor.next(run.scope) {
            Some(next) => {
                run.cursor = next;
                run.requested_at = None;
                run.next_request_at = Some(now + self.timing.pacing);
            }
            None => {
                let scope = run.scope;
                let received = run.completed;
                let elapsed = run.elapsed;
                self.run = None;
                log::info!(
                    target: "dump",
                    "{} finished: {} sounds in {:.1}s",
                    scope, received, elapsed.as_secs_f32()
                );
                self.reports.push(DumpReport::Finished {
                    scope,
                    received,
                    elapsed,
                });
            }
        }
    }

    /// Periodic driver: sends the next request once pacing has elapsed and
    /// fails the run when the device has gone quiet.
    pub fn tick(&mut self, link: &mut dyn RequestLink, now: Instant) {
        let Some(run) = self.run.as_mut() else {
            return;
        };

        if let Some(due) = run.next_request_at {
            if now < due {
                return;
            }
            let sent = sysex::encode_sound_request_to(self.device_id, run.cursor.bank, run.cursor.program)
                .map_err(DumpError::from)
                .and_then(|request| link.send_request(&request).map_err(DumpError::from));
            match sent {
                Ok(()) => {
                    run.next_request_at = None;
                    run.requested_at = Some(now);
                }
                Err(e) => self.abort(e),
            }
        } else if let Some(requested_at) = run.requested_at {
            if now.saturating_duration_since(requested_at) >= self.timing.silence_timeout {
                let error = DumpError::DeviceTimeout {
                    bank: run.cursor.bank,
                    program: run.cursor.program,
                };
                self.abort(error);
            }
        }
    }

    /// End the run with `error`; `retry` picks up from the current cursor.
    pub fn abort(&mut self, error: DumpError) {
        let Some(run) = self.run.take() else {
            return;
        };
        log::warn!(target: "dump", "{} failed: {}", run.scope, error);
        self.resume = Some((run.scope, run.cursor));
        self.reports.push(DumpReport::Failed {
            scope: run.scope,
            error,
        });
    }
}
