//! Shared fixtures: an in-memory platform client and message builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;

use channel_relay::channels::{
    ChannelId, ChatEntity, ChatRef, FormatMode, MediaDescriptor, MediaKind, MediaPayload,
    Message, MessageStream, PlatformClient,
};
use channel_relay::clock::{Clock, ManualClock};
use channel_relay::error::{ChannelError, StoreError};
use channel_relay::pipeline::{FilterEngine, Fingerprint, Footer, Forwarder, TextNormalizer};
use channel_relay::store::{DedupStore, FingerprintMirror};

pub const TARGET: &str = "@target";
pub const POST_DELAY: Duration = Duration::from_secs(60);
pub const DOWNLOADED: &[u8] = b"downloaded-bytes";

/// What the fake recorded for a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMedia {
    Reference { kind: MediaKind, file_id: String },
    Upload { kind: MediaKind, len: usize, file_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPost {
    pub target: ChannelId,
    pub text: String,
    pub mode: FormatMode,
    pub media: Option<SentMedia>,
}

/// Failure switches. All off by default.
#[derive(Debug, Default, Clone)]
pub struct Failures {
    pub reference: bool,
    pub upload: bool,
    pub download: bool,
    pub text: bool,
    pub reject_html: bool,
    pub rate_limit_next: Option<Duration>,
    pub unreachable: HashSet<ChannelId>,
    /// Panic inside the next history fetch, once.
    pub panic_next_fetch: bool,
}

/// In-memory [`PlatformClient`]. Histories are stored newest first.
#[derive(Default)]
pub struct FakeClient {
    histories: Mutex<HashMap<ChannelId, Vec<Message>>>,
    sent: Mutex<Vec<SentPost>>,
    fetches: Mutex<Vec<ChannelId>>,
    failures: Mutex<Failures>,
    live: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a message as the newest in `channel`.
    pub fn publish(&self, channel: &ChannelId, message: Message) {
        self.histories
            .lock()
            .unwrap()
            .entry(channel.clone())
            .or_default()
            .insert(0, message);
    }

    /// Push a message to every live subscriber.
    pub fn push_live(&self, message: Message) {
        for tx in self.live.lock().unwrap().iter() {
            let _ = tx.unbounded_send(message.clone());
        }
    }

    /// Drop every subscriber so their streams end.
    pub fn close_live(&self) {
        self.live.lock().unwrap().clear();
    }

    pub fn sent(&self) -> Vec<SentPost> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<ChannelId> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fail(&self, update: impl FnOnce(&mut Failures)) {
        update(&mut self.failures.lock().unwrap());
    }

    fn failures(&self) -> Failures {
        self.failures.lock().unwrap().clone()
    }

    fn take_rate_limit(&self) -> Option<Duration> {
        self.failures.lock().unwrap().rate_limit_next.take()
    }

    fn check_send(&self, target: &ChannelId, mode: FormatMode) -> Result<(), ChannelError> {
        if let Some(wait) = self.take_rate_limit() {
            return Err(ChannelError::RateLimited {
                retry_after: Some(wait),
            });
        }
        if mode == FormatMode::Html && self.failures().reject_html {
            return Err(ChannelError::FormattingRejected {
                reason: "can't parse entities".into(),
            });
        }
        if self.failures().unreachable.contains(target) {
            return Err(ChannelError::SendFailed {
                channel: target.to_string(),
                reason: "chat not found".into(),
            });
        }
        Ok(())
    }

    fn record(&self, target: &ChannelId, text: &str, mode: FormatMode, media: Option<SentMedia>) {
        self.sent.lock().unwrap().push(SentPost {
            target: target.clone(),
            text: text.to_string(),
            mode,
            media,
        });
    }
}

#[async_trait]
impl PlatformClient for FakeClient {
    async fn resolve_entity(&self, channel: &ChannelId) -> Result<ChatEntity, ChannelError> {
        if self.failures().unreachable.contains(channel) {
            return Err(ChannelError::ResolveFailed {
                channel: channel.to_string(),
                reason: "chat not found".into(),
            });
        }
        Ok(ChatEntity {
            id: -1_000,
            title: Some(channel.to_string()),
            username: Some(handle(channel)),
        })
    }

    async fn fetch_recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, ChannelError> {
        let panic_now = std::mem::take(&mut self.failures.lock().unwrap().panic_next_fetch);
        if panic_now {
            panic!("history fetch for {channel} blew up");
        }
        self.fetches.lock().unwrap().push(channel.clone());
        self.resolve_entity(channel).await?;
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(channel)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_text(
        &self,
        target: &ChannelId,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError> {
        self.check_send(target, mode)?;
        if self.failures().text {
            return Err(ChannelError::SendFailed {
                channel: target.to_string(),
                reason: "text refused".into(),
            });
        }
        self.record(target, text, mode, None);
        Ok(())
    }

    async fn send_media(
        &self,
        target: &ChannelId,
        media: MediaPayload,
        caption: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError> {
        self.check_send(target, mode)?;
        let sent = match media {
            MediaPayload::Reference { kind, file_id } => {
                if self.failures().reference {
                    return Err(ChannelError::SendFailed {
                        channel: target.to_string(),
                        reason: "file reference expired".into(),
                    });
                }
                SentMedia::Reference { kind, file_id }
            }
            MediaPayload::Upload {
                kind,
                bytes,
                file_name,
            } => {
                if self.failures().upload {
                    return Err(ChannelError::SendFailed {
                        channel: target.to_string(),
                        reason: "upload refused".into(),
                    });
                }
                SentMedia::Upload {
                    kind,
                    len: bytes.len(),
                    file_name,
                }
            }
        };
        self.record(target, caption, mode, Some(sent));
        Ok(())
    }

    async fn download_media(&self, _message: &Message) -> Result<Vec<u8>, ChannelError> {
        if self.failures().download {
            return Err(ChannelError::DownloadFailed {
                reason: "file too big".into(),
            });
        }
        Ok(DOWNLOADED.to_vec())
    }

    async fn subscribe(&self, _channels: &[ChannelId]) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::unbounded();
        self.live.lock().unwrap().push(tx);
        Ok(Box::pin(rx))
    }
}

/// Mirror that keeps the last saved list in memory.
#[derive(Default, Clone)]
pub struct MemoryMirror {
    saved: Arc<Mutex<Vec<Fingerprint>>>,
}

impl MemoryMirror {
    pub fn saved(&self) -> Vec<Fingerprint> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl FingerprintMirror for MemoryMirror {
    async fn load(&self) -> Result<Vec<Fingerprint>, StoreError> {
        Ok(self.saved())
    }

    async fn save(&self, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        *self.saved.lock().unwrap() = fingerprints.to_vec();
        Ok(())
    }
}

pub fn channel(reference: &str) -> ChannelId {
    ChannelId::parse(reference).unwrap()
}

fn handle(channel: &ChannelId) -> String {
    channel.as_str().trim_start_matches('@').to_string()
}

/// Origin as the platform would report it for a handle channel.
pub fn chat_of(channel: &ChannelId) -> ChatRef {
    ChatRef {
        id: -1_000,
        username: Some(handle(channel)),
        title: None,
    }
}

pub fn text_post(channel: &ChannelId, id: i64, text: &str) -> Message {
    Message {
        id,
        chat: chat_of(channel),
        text: text.to_string(),
        media: None,
        date: Utc::now(),
    }
}

pub fn photo(unique: &str) -> MediaDescriptor {
    MediaDescriptor::new(MediaKind::Photo)
        .with_file_id(format!("file-{unique}"))
        .with_unique_id(unique)
}

pub fn media_post(channel: &ChannelId, id: i64, text: &str, media: MediaDescriptor) -> Message {
    Message {
        media: Some(media),
        ..text_post(channel, id, text)
    }
}

pub fn footer() -> Footer {
    Footer {
        label: "👉".into(),
        link_text: "Join".into(),
        url: "https://t.me/target".into(),
    }
}

pub fn rendered_footer() -> String {
    "👉 <a href=\"https://t.me/target\">Join</a>".to_string()
}

pub fn forwarder(
    client: &Arc<FakeClient>,
    clock: &Arc<ManualClock>,
    filter: FilterEngine,
) -> Forwarder {
    let client: Arc<dyn PlatformClient> = client.clone();
    let clock: Arc<dyn Clock> = clock.clone();
    Forwarder::new(
        client,
        channel(TARGET),
        TextNormalizer::new(&footer()),
        filter,
        clock,
        POST_DELAY,
    )
}

pub fn memory_store() -> (DedupStore, MemoryMirror) {
    let mirror = MemoryMirror::default();
    (DedupStore::new(Box::new(mirror.clone()), 100), mirror)
}
