//! Shared types for the relay pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One way of delivering a post to the target, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStrategy {
    /// Re-send the original media by platform reference with the new caption.
    RelayOriginal,
    /// Download the media and upload the bytes with the new caption.
    Reupload,
    /// Send the caption alone as a text message.
    TextOnly,
}

impl DeliveryStrategy {
    /// Strategies to try, in order, for a post with or without media.
    pub fn chain(has_media: bool) -> &'static [DeliveryStrategy] {
        if has_media {
            &[Self::RelayOriginal, Self::Reupload, Self::TextOnly]
        } else {
            &[Self::TextOnly]
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RelayOriginal => "relay_original",
            Self::Reupload => "reupload",
            Self::TextOnly => "text_only",
        }
    }
}

impl fmt::Display for DeliveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub strategy: DeliveryStrategy,
    pub reason: String,
}

/// What the forwarder did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Posted to the target and recorded.
    Sent {
        strategy: DeliveryStrategy,
        /// The platform rejected the markup and the plain-text retry succeeded.
        plain_text: bool,
    },
    /// Message key already posted.
    DuplicateId,
    /// Same content already posted (possibly from another channel).
    DuplicateContent,
    /// Rejected by the keyword filter.
    Filtered { reason: String },
    /// Every strategy failed; nothing recorded, the message may come up again.
    Exhausted { failures: Vec<AttemptFailure> },
}

impl ForwardOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::DuplicateId => "duplicate_id",
            Self::DuplicateContent => "duplicate_content",
            Self::Filtered { .. } => "filtered",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}
