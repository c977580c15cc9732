//! Telemetry ring for mux transitions.
//!
//! The worker records every task boundary, register write and poll outcome
//! into a bounded history so front-ends and tests can observe what happened
//! on the bus without touching the registers themselves.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::arbiter::{Mode, MuxTarget};
use crate::queue::TaskTicket;
use crate::registers::RegisterDump;
use crate::signals::CableSignal;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Identifier attached to each record.
pub type EventId = u32;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    TaskStarted(TaskTicket),
    TaskFinished(TaskTicket),
    SignalChanged(CableSignal),
    ModeApplied(Mode),
    TargetComputed(MuxTarget),
    SoftwareControlEnabled,
    RegisterWrite { target: MuxTarget, cfg0: u32 },
    /// Hold between the two writes of a two-step transition, in milliseconds.
    SettleDelay(u32),
    SwitchConfirmed { target: MuxTarget, polls: u32 },
    SwitchTimedOut { target: MuxTarget, polls: u32 },
    RegistersDumped(RegisterDump),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::TaskStarted(ticket) => write!(f, "task-started {ticket}"),
            TelemetryEventKind::TaskFinished(ticket) => write!(f, "task-finished {ticket}"),
            TelemetryEventKind::SignalChanged(signal) => write!(f, "signal {signal}"),
            TelemetryEventKind::ModeApplied(mode) => write!(f, "mode {mode}"),
            TelemetryEventKind::TargetComputed(target) => write!(f, "target {target}"),
            TelemetryEventKind::SoftwareControlEnabled => f.write_str("software-control"),
            TelemetryEventKind::RegisterWrite { target, cfg0 } => {
                write!(f, "write cfg0={cfg0:08x} {target}")
            }
            TelemetryEventKind::SettleDelay(ms) => write!(f, "settle {ms}ms"),
            TelemetryEventKind::SwitchConfirmed { target, polls } => {
                write!(f, "switched {target} polls={polls}")
            }
            TelemetryEventKind::SwitchTimedOut { target, polls } => {
                write!(f, "timeout {target} polls={polls}")
            }
            TelemetryEventKind::RegistersDumped(dump) => write!(f, "{dump}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord<Instant> {
    pub id: EventId,
    pub timestamp: Instant,
    pub event: TelemetryEventKind,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<Instant> {
    ring: HistoryBuf<TelemetryRecord<Instant>, TELEMETRY_RING_CAPACITY>,
    next_event_id: EventId,
}

impl<Instant: Copy> TelemetryRecorder<Instant> {
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records `event` and returns its identifier.
    pub fn record(&mut self, event: TelemetryEventKind, timestamp: Instant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
        });
        id
    }

    /// Identifier the next record will receive.
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent record, if any.
    pub fn latest(&self) -> Option<&TelemetryRecord<Instant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Iterates over retained records, oldest first.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<Instant>> {
        self.ring.oldest_ordered()
    }

    /// Iterates over retained records with an id at or after `first`.
    pub fn since(&self, first: EventId) -> impl Iterator<Item = &TelemetryRecord<Instant>> + '_ {
        self.oldest_first().filter(move |record| record.id >= first)
    }
}

impl<Instant: Copy> Default for TelemetryRecorder<Instant> {
    fn default() -> Self {
        Self::new()
    }
}
