//! Round-robin rotation over the configured source channels.
//!
//! The pointer always moves to the next channel, whatever the previous
//! channel yielded, so a silent channel never starves its neighbours. A
//! wraparound to index 0 completes a pass and starts a new sweep, which
//! rewinds every cursor. Passes in which no channel produced a candidate
//! are counted for logging.

use crate::channels::ChannelId;
use crate::error::RelayError;

/// One scheduled visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub channel: ChannelId,
    pub index: usize,
    /// Zero-based number of the pass this turn belongs to.
    pub pass: u64,
    /// First turn of a new pass (not the very first pass). Cursors are
    /// rewound before this turn is taken.
    pub new_pass: bool,
    /// The pass that just completed produced no candidate.
    pub previous_pass_idle: bool,
}

/// Pointer into the ordered source list.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    channels: Vec<ChannelId>,
    next_index: usize,
    pass: u64,
    started: bool,
    pass_had_candidate: bool,
    idle_passes: u64,
}

impl RoundRobin {
    pub fn new(channels: Vec<ChannelId>) -> Result<Self, RelayError> {
        if channels.is_empty() {
            return Err(RelayError::NoSources);
        }
        Ok(Self {
            channels,
            next_index: 0,
            pass: 0,
            started: false,
            pass_had_candidate: false,
            idle_passes: 0,
        })
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Advance to the next channel.
    pub fn next_turn(&mut self) -> Turn {
        let index = self.next_index;
        let mut new_pass = false;
        let mut previous_pass_idle = false;

        if index == 0 && self.started {
            self.pass += 1;
            new_pass = true;
            if !self.pass_had_candidate {
                self.idle_passes += 1;
                previous_pass_idle = true;
            }
            self.pass_had_candidate = false;
        }

        self.started = true;
        self.next_index = (index + 1) % self.channels.len();

        Turn {
            channel: self.channels[index].clone(),
            index,
            pass: self.pass,
            new_pass,
            previous_pass_idle,
        }
    }

    /// Note that the current turn produced a candidate.
    pub fn record_candidate(&mut self) {
        self.pass_had_candidate = true;
    }

    /// Passes completed so far.
    pub fn completed_passes(&self) -> u64 {
        self.pass
    }

    /// Completed passes in which no channel produced a candidate.
    pub fn idle_passes(&self) -> u64 {
        self.idle_passes
    }
}
