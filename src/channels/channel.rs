//! Platform client abstraction.
//!
//! Everything the relay needs from the messaging platform goes through
//! [`PlatformClient`]. The relay core never talks HTTP itself, which keeps
//! the pipeline testable against an in-memory client.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::channels::ChannelId;
use crate::error::ChannelError;

/// Live messages delivered by a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Identity of a resolved chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntity {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl ChatEntity {
    /// Best human-readable name for logging.
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.username.as_ref().map(|u| format!("@{u}")))
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Origin chat of a message, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
}

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Animation,
    Audio,
    Voice,
    Sticker,
    Other,
}

impl MediaKind {
    /// Stable tag, also used as the coarsest media identity.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Animation => "animation",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Other => "other",
        }
    }

    /// Photo, video and document-class attachments are relayed; the rest
    /// are skipped by the scanner.
    pub fn is_relayable(&self) -> bool {
        matches!(
            self,
            Self::Photo | Self::Video | Self::Document | Self::Animation
        )
    }

    /// Default file name used when re-uploading downloaded bytes.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::Photo => "photo.jpg",
            Self::Video => "video.mp4",
            Self::Animation => "animation.mp4",
            Self::Audio => "audio.mp3",
            Self::Voice => "voice.ogg",
            Self::Sticker => "sticker.webp",
            Self::Document | Self::Other => "file",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Media metadata attached to a message.
///
/// Identity fields the platform did not supply (or that could not be read)
/// are `None`; consumers degrade to coarser identities rather than failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    /// Per-upload reference, usable to re-send the same blob.
    pub file_id: Option<String>,
    /// Stable cross-reference id of the blob itself.
    pub file_unique_id: Option<String>,
    pub file_name: Option<String>,
}

impl MediaDescriptor {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            file_id: None,
            file_unique_id: None,
            file_name: None,
        }
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.file_unique_id = Some(unique_id.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Most specific identity available: unique id, then file id, then kind.
    pub fn identity(&self) -> &str {
        self.file_unique_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.file_id.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| self.kind.tag())
    }
}

/// A message fetched from, or pushed by, the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat: ChatRef,
    /// Text body or media caption; empty when there is none.
    pub text: String,
    pub media: Option<MediaDescriptor>,
    pub date: DateTime<Utc>,
}

impl Message {
    /// Whether the message carries a photo/video/document-class attachment.
    pub fn has_relayable_media(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.kind.is_relayable())
    }

    /// Short preview for log lines.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut preview: String = self.text.chars().take(max_chars).collect();
        if self.text.chars().count() > max_chars {
            preview.push('…');
        }
        preview
    }
}

/// How the platform should interpret markup in outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    Html,
    Plain,
}

impl FormatMode {
    /// Value of the Bot API `parse_mode` parameter, if any.
    pub fn parse_mode(&self) -> Option<&'static str> {
        match self {
            Self::Html => Some("HTML"),
            Self::Plain => None,
        }
    }
}

/// Media to attach to an outgoing post.
#[derive(Debug, Clone)]
pub enum MediaPayload {
    /// Relay an existing blob by platform reference (no re-encoding).
    Reference { kind: MediaKind, file_id: String },
    /// Upload raw bytes.
    Upload {
        kind: MediaKind,
        bytes: Vec<u8>,
        file_name: String,
    },
}

impl MediaPayload {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Reference { kind, .. } | Self::Upload { kind, .. } => *kind,
        }
    }
}

/// The messaging-platform operations the relay consumes.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Resolve a channel reference; fails if it is unknown or inaccessible.
    async fn resolve_entity(&self, channel: &ChannelId) -> Result<ChatEntity, ChannelError>;

    /// Most recent messages of a channel, newest first.
    async fn fetch_recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, ChannelError>;

    /// Send a text message.
    async fn send_text(
        &self,
        target: &ChannelId,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError>;

    /// Send a media post with a caption.
    async fn send_media(
        &self,
        target: &ChannelId,
        media: MediaPayload,
        caption: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError>;

    /// Download the media attached to a message.
    async fn download_media(&self, message: &Message) -> Result<Vec<u8>, ChannelError>;

    /// Subscribe to new messages posted in any of `channels`.
    async fn subscribe(&self, channels: &[ChannelId]) -> Result<MessageStream, ChannelError>;
}
