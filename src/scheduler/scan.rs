//! Candidate scan over one channel's recent history.

use tracing::{debug, trace};

use crate::channels::{ChannelId, Message, PlatformClient};
use crate::error::ChannelError;
use crate::pipeline::{Fingerprint, fingerprint_message};
use crate::store::{DedupStore, MessageKey};

/// Messages fetched per visit.
pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// Unposted messages examined per visit.
pub const DEFAULT_SCAN_BUDGET: usize = 10;

/// An eligible message and where the channel's cursor should move.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub message: Message,
    pub key: MessageKey,
    pub fingerprint: Fingerprint,
    /// Position just past the candidate in the fetched window.
    pub new_offset: usize,
}

/// Finds the next not-yet-posted media message in a channel.
#[derive(Debug, Clone, Copy)]
pub struct CandidateScanner {
    window_size: usize,
    scan_budget: usize,
}

impl Default for CandidateScanner {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_SCAN_BUDGET)
    }
}

impl CandidateScanner {
    pub fn new(window_size: usize, scan_budget: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            scan_budget: scan_budget.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Scan `channel` from `offset`.
    ///
    /// Skips messages whose origin is not `channel`, messages without a
    /// photo/video/document-class attachment, and anything already posted
    /// by id or by content. Only the first two count against the budget, so
    /// a rewound cursor can pass over what earlier sweeps already posted.
    /// Returns `None` when the budget or the window runs out; the caller
    /// then nudges the cursor forward by one.
    pub async fn next_candidate(
        &self,
        client: &dyn PlatformClient,
        store: &DedupStore,
        channel: &ChannelId,
        offset: usize,
    ) -> Result<Option<Candidate>, ChannelError> {
        let window = client.fetch_recent_messages(channel, self.window_size).await?;

        if offset >= window.len() {
            trace!(channel = %channel, offset, fetched = window.len(), "Window exhausted");
            return Ok(None);
        }

        let mut budget = self.scan_budget;
        for (position, message) in window.iter().enumerate().skip(offset) {
            if budget == 0 {
                trace!(channel = %channel, position, "Scan budget spent");
                break;
            }

            if !channel.matches(&message.chat) {
                budget -= 1;
                debug!(
                    channel = %channel,
                    message_id = message.id,
                    origin = message.chat.id,
                    "Skipping message attributed to another chat"
                );
                continue;
            }

            if !message.has_relayable_media() {
                budget -= 1;
                trace!(channel = %channel, message_id = message.id, "Skipping message without media");
                continue;
            }

            let key = MessageKey::new(channel.clone(), message.id);
            if store.is_duplicate_by_id(&key) {
                trace!(key = %key, "Skipping already posted message");
                continue;
            }

            let fingerprint = fingerprint_message(message);
            if store.is_duplicate_by_content(&fingerprint) {
                debug!(key = %key, "Skipping already posted content");
                continue;
            }

            return Ok(Some(Candidate {
                message: message.clone(),
                key,
                fingerprint,
                new_offset: position + 1,
            }));
        }

        Ok(None)
    }
}
