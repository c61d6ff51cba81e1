//! Channel relay: reposts media from Telegram source channels to a target.

pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod relay;
pub mod scheduler;
pub mod store;
