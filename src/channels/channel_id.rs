//! Normalized channel identifiers.
//!
//! A reference is either a handle (`@name`, `name`, `t.me/name`) or a numeric
//! chat id. Handles are lowercased and prefixed with `@`; channel and
//! supergroup ids are brought to the `-100…` form. Two references name the
//! same channel iff their normalized forms are equal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channels::ChatRef;
use crate::error::ConfigError;

/// Prefix the platform uses for channel and supergroup ids.
const SUPERGROUP_PREFIX: &str = "-100";

/// URL prefixes accepted in front of a public handle.
const LINK_PREFIXES: &[&str] = &["t.me/", "telegram.me/", "telegram.dog/"];

/// A normalized channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Parse and normalize a user-supplied channel reference.
    pub fn parse(reference: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidChannel {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let mut value = reference.trim();
        if value.is_empty() {
            return Err(invalid("empty reference"));
        }

        for scheme in ["https://", "http://"] {
            if let Some(rest) = value.strip_prefix(scheme) {
                value = rest;
            }
        }
        for prefix in LINK_PREFIXES {
            if let Some(rest) = value.strip_prefix(prefix) {
                value = rest;
                break;
            }
        }
        let value = value.trim_end_matches('/');

        if let Ok(numeric) = value.parse::<i64>() {
            if numeric == 0 {
                return Err(invalid("zero is not a chat id"));
            }
            return Ok(Self::from_numeric(numeric));
        }

        Self::from_username(value).ok_or_else(|| {
            invalid("expected @handle, t.me link or numeric chat id")
        })
    }

    /// Canonical form of a numeric chat id as reported by the platform.
    ///
    /// Positive ids are bare channel ids and gain the `-100` prefix; negative
    /// ids are already in platform form.
    pub fn from_numeric(id: i64) -> Self {
        if id > 0 {
            Self(format!("{SUPERGROUP_PREFIX}{id}"))
        } else {
            Self(id.to_string())
        }
    }

    /// Handle form of a username, with or without a leading `@`.
    pub fn from_username(username: &str) -> Option<Self> {
        let name = username.trim().trim_start_matches('@');
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(Self(format!("@{}", name.to_ascii_lowercase())))
    }

    /// The normalized string form (what the Bot API accepts as `chat_id`).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifier is a public handle rather than a numeric id.
    pub fn is_handle(&self) -> bool {
        self.0.starts_with('@')
    }

    /// Whether a message origin refers to this channel, by id or by handle.
    pub fn matches(&self, chat: &ChatRef) -> bool {
        if Self::from_numeric(chat.id) == *self {
            return true;
        }
        chat.username
            .as_deref()
            .and_then(Self::from_username)
            .is_some_and(|handle| handle == *self)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}
