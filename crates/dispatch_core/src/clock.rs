//! Discrete-event clock driving the periodic control events.
//!
//! The external simulation drives [`crate::controller::DispatchController::step`]
//! once per tick; the clock holds the pending `MatchRun` / `RebalanceRun`
//! events in a min-heap and hands out everything that is due at or before the
//! externally supplied instant. Timestamps are simulation seconds.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    MatchRun,
    RebalanceRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub kind: EventKind,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by timestamp. Ties
        // pop in kind order, so a match run precedes a rebalance run due at
        // the same instant.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.kind.cmp(&self.kind))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event currently being processed by the schedule.
#[derive(Debug, Clone, Copy, Resource)]
pub struct CurrentEvent(pub Event);

#[derive(Debug, Default, Resource)]
pub struct SimulationClock {
    now: u64,
    events: BinaryHeap<Event>,
}

impl SimulationClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn schedule_at(&mut self, timestamp: u64, kind: EventKind) {
        debug_assert!(
            timestamp >= self.now,
            "event timestamp must be >= current time"
        );
        self.events.push(Event { timestamp, kind });
    }

    /// Schedules an event `delta_secs` after the current time.
    pub fn schedule_in(&mut self, delta_secs: u64, kind: EventKind) {
        self.events.push(Event {
            timestamp: self.now.saturating_add(delta_secs),
            kind,
        });
    }

    /// Pops the next event if it is due at or before `instant`, advancing the
    /// clock to the event's timestamp.
    pub fn pop_due(&mut self, instant: u64) -> Option<Event> {
        let next = self.events.peek()?;
        if next.timestamp > instant {
            return None;
        }
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    /// Moves the clock forward without processing events. No-op when `instant`
    /// is in the past.
    pub fn advance_to(&mut self, instant: u64) {
        if instant > self.now {
            self.now = instant;
        }
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|e| e.timestamp)
    }
}
