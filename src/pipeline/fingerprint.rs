//! Content fingerprints: message identity independent of origin and id.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::channels::{MediaDescriptor, Message};
use crate::pipeline::normalize::normalize;

/// Hex-encoded SHA-256 over normalized text and media identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a digest loaded from durable storage. Trusted as-is.
    pub fn from_digest(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of `text` plus optional media.
///
/// The digest input is `lowercase(normalize(text)).trim() + "|" + identity`
/// where identity is the media's most specific id, or empty without media.
pub fn fingerprint(text: &str, media: Option<&MediaDescriptor>) -> Fingerprint {
    let normalized = normalize(text).to_lowercase();
    let identity = media.map(MediaDescriptor::identity).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(normalized.trim().as_bytes());
    hasher.update(b"|");
    hasher.update(identity.as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Fingerprint of a platform message.
pub fn fingerprint_message(message: &Message) -> Fingerprint {
    fingerprint(&message.text, message.media.as_ref())
}
