//! Elapsed-frame counters.
//!
//! Counters are frame-indexed: they count processed frames, not wall-clock
//! time. They only ever grow by one or reset to zero.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimerState {
    pub frames_since_movement: u64,
    pub frames_since_closed: u64,
}

pub struct TimerTracker {
    movement_cutoff: u64,
    state: TimerState,
}

impl TimerTracker {
    pub fn new(movement_cutoff: u64) -> Self {
        Self {
            movement_cutoff,
            state: TimerState::default(),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Advance both counters by one processed frame.
    pub fn update(&mut self, motion: u64, door_closed: bool) -> TimerState {
        self.state.frames_since_movement = if motion > self.movement_cutoff {
            0
        } else {
            self.state.frames_since_movement.saturating_add(1)
        };
        self.state.frames_since_closed = if door_closed {
            0
        } else {
            self.state.frames_since_closed.saturating_add(1)
        };
        self.state
    }
}
