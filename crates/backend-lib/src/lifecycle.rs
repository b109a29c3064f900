// ============================
// crates/backend-lib/src/lifecycle.rs
// ============================
//! Room lifecycle state machine.
//!
//! Forming -> Active -> Ending -> Closed, with Active falling back to
//! Forming when occupancy drops below two. Ending is entered exactly once,
//! guarded by [`Lifecycle::begin_ending`]; everything that must happen
//! exactly once at teardown keys off that method returning `true`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Fewer than two participants; waiting for a counterpart
    Forming,
    /// Two or more participants; negotiation in full swing
    Active,
    /// Teardown in progress
    Ending,
    /// Terminal; the room id is retired
    Closed,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: RoomState,
    /// Set while the room has zero participants
    empty_since: Option<Instant>,
    /// Set while exactly one participant waits alone
    lone_since: Option<Instant>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RoomState::Forming,
            empty_since: Some(Instant::now()),
            lone_since: None,
        }
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    /// Whether the room still accepts joins and relays.
    pub fn is_open(&self) -> bool {
        matches!(self.state, RoomState::Forming | RoomState::Active)
    }

    /// Record the current occupancy. Returns the new state if this tipped
    /// the room between Forming and Active.
    pub fn on_occupancy(&mut self, count: usize) -> Option<RoomState> {
        match count {
            0 => {
                self.empty_since.get_or_insert_with(Instant::now);
                self.lone_since = None;
            },
            1 => {
                self.lone_since.get_or_insert_with(Instant::now);
                self.empty_since = None;
            },
            _ => {
                self.empty_since = None;
                self.lone_since = None;
            },
        }

        match (self.state, count) {
            (RoomState::Forming, n) if n >= 2 => {
                self.state = RoomState::Active;
                Some(RoomState::Active)
            },
            (RoomState::Active, n) if n < 2 => {
                self.state = RoomState::Forming;
                Some(RoomState::Forming)
            },
            _ => None,
        }
    }

    /// Enter Ending. Only the first caller gets `true`; teardown work hangs
    /// off that result so it cannot run twice.
    pub fn begin_ending(&mut self) -> bool {
        if self.is_open() {
            self.state = RoomState::Ending;
            true
        } else {
            false
        }
    }

    /// Ending -> Closed, after teardown completes.
    pub fn finish_closed(&mut self) {
        debug_assert_eq!(self.state, RoomState::Ending);
        self.state = RoomState::Closed;
    }

    /// How long the room has been empty, if it is.
    pub fn empty_for(&self) -> Option<Duration> {
        self.empty_since.map(|t| t.elapsed())
    }

    /// How long a single participant has waited alone, if one is.
    pub fn lone_for(&self) -> Option<Duration> {
        self.lone_since.map(|t| t.elapsed())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
