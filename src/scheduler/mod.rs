//! Round-robin scheduling over source channels.
//!
//! Each tick visits one channel: its cursor says how far into the channel's
//! recent history the current sweep has looked, and the scanner returns the
//! next eligible message from there.

pub mod cursor;
pub mod round_robin;
pub mod scan;

pub use cursor::ChannelCursors;
pub use round_robin::{RoundRobin, Turn};
pub use scan::{Candidate, CandidateScanner, DEFAULT_SCAN_BUDGET, DEFAULT_WINDOW_SIZE};
