//! Messaging-platform I/O.

pub mod channel;
pub mod channel_id;
pub mod telegram;

pub use channel::*;
pub use channel_id::ChannelId;
pub use telegram::TelegramClient;
