//! Per-channel scan offsets. Memory only; rebuilt from zero on restart.

use std::collections::HashMap;

use crate::channels::ChannelId;

/// Offsets into each channel's newest-first message window.
#[derive(Debug, Default, Clone)]
pub struct ChannelCursors {
    offsets: HashMap<ChannelId, usize>,
}

impl ChannelCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset for a channel, creating it at zero on first visit.
    pub fn visit(&mut self, channel: &ChannelId) -> usize {
        *self.offsets.entry(channel.clone()).or_insert(0)
    }

    /// Current offset without creating a cursor.
    pub fn get(&self, channel: &ChannelId) -> Option<usize> {
        self.offsets.get(channel).copied()
    }

    pub fn set(&mut self, channel: &ChannelId, offset: usize) {
        self.offsets.insert(channel.clone(), offset);
    }

    /// Move a channel's cursor forward by `step`.
    pub fn advance(&mut self, channel: &ChannelId, step: usize) -> usize {
        let offset = self.offsets.entry(channel.clone()).or_insert(0);
        *offset = offset.saturating_add(step);
        *offset
    }

    /// Rewind every cursor to the newest message.
    pub fn reset_all(&mut self) {
        for offset in self.offsets.values_mut() {
            *offset = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
