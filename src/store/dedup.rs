//! Dedup store: which messages and which contents were already posted.
//!
//! Two independent bounded sets: message keys (cheap id-level check) and
//! content fingerprints (catches the same post arriving from another
//! channel or under another id). Only the fingerprint set is durable.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channels::{ChannelId, Message};
use crate::pipeline::{Fingerprint, fingerprint_message};
use crate::store::bounded::BoundedSet;
use crate::store::mirror::FingerprintMirror;

/// Default cap on each dedup set.
pub const DEFAULT_DEDUP_CAP: usize = 10_000;

/// Identity of one physical message: (normalized channel, platform id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub channel: ChannelId,
    pub message_id: i64,
}

impl MessageKey {
    pub fn new(channel: ChannelId, message_id: i64) -> Self {
        Self {
            channel,
            message_id,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.channel, self.message_id)
    }
}

/// Sizes of the dedup sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    pub message_keys: usize,
    pub fingerprints: usize,
    pub capacity: usize,
}

/// Bounded, persisted record of what has been posted.
pub struct DedupStore {
    seen_keys: BoundedSet<MessageKey>,
    seen_fingerprints: BoundedSet<Fingerprint>,
    mirror: Box<dyn FingerprintMirror>,
}

impl DedupStore {
    /// Empty store; nothing is read from the mirror.
    pub fn new(mirror: Box<dyn FingerprintMirror>, capacity: usize) -> Self {
        Self {
            seen_keys: BoundedSet::new(capacity),
            seen_fingerprints: BoundedSet::new(capacity),
            mirror,
        }
    }

    /// Store seeded from the mirror. Persisted entries are trusted as-is;
    /// only the newest `capacity` are kept. A load failure is logged and
    /// the store starts empty.
    pub async fn load(mirror: Box<dyn FingerprintMirror>, capacity: usize) -> Self {
        let mut store = Self::new(mirror, capacity);

        match store.mirror.load().await {
            Ok(persisted) => {
                let skip = persisted.len().saturating_sub(store.seen_fingerprints.capacity());
                store.seen_fingerprints.extend(persisted.into_iter().skip(skip));
                info!(
                    fingerprints = store.seen_fingerprints.len(),
                    "Loaded posted-content fingerprints"
                );
            }
            Err(e) => {
                warn!(error = %e, "Could not load posted-content fingerprints, starting empty");
            }
        }

        store
    }

    pub fn is_duplicate_by_id(&self, key: &MessageKey) -> bool {
        self.seen_keys.contains(key)
    }

    pub fn is_duplicate_by_content(&self, fingerprint: &Fingerprint) -> bool {
        self.seen_fingerprints.contains(fingerprint)
    }

    /// Record a successful send and mirror the fingerprint list.
    ///
    /// A mirror failure is logged and swallowed; the in-memory record stands.
    pub async fn record_sent(&mut self, key: MessageKey, fingerprint: Fingerprint) {
        let new_key = self.seen_keys.insert(key.clone());
        let new_content = self.seen_fingerprints.insert(fingerprint);
        debug!(key = %key, new_key, new_content, "Recorded sent message");
        self.persist().await;
    }

    /// Seed the fingerprint set from messages already in the target channel
    /// so a restart does not re-post what the target already shows. Message
    /// keys are left alone (target ids live in another namespace).
    ///
    /// Returns how many fingerprints were added.
    pub async fn bootstrap(&mut self, existing: &[Message]) -> usize {
        let mut added = 0;
        for message in existing {
            if self.seen_fingerprints.insert(fingerprint_message(message)) {
                added += 1;
            }
        }

        if added > 0 {
            self.persist().await;
        }
        info!(
            scanned = existing.len(),
            added, "Seeded fingerprints from target channel history"
        );
        added
    }

    /// Fingerprints from oldest to newest.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.seen_fingerprints.iter().cloned().collect()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            message_keys: self.seen_keys.len(),
            fingerprints: self.seen_fingerprints.len(),
            capacity: self.seen_fingerprints.capacity(),
        }
    }

    async fn persist(&self) {
        let snapshot = self.fingerprints();
        if let Err(e) = self.mirror.save(&snapshot).await {
            warn!(error = %e, "Failed to persist fingerprints; keeping in-memory state");
        }
    }
}
