//! Forwarder: turns an accepted source message into a target post.
//!
//! Flow for each message:
//! 1. Skip if its message key or content fingerprint was already posted
//! 2. Skip if the keyword filter rejects the raw text
//! 3. Normalize the text and append the footer
//! 4. Walk the delivery chain until one strategy succeeds
//! 5. Record the send, then hold the post delay
//!
//! A message whose whole chain fails is not recorded, so a later sweep may
//! try it again.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::{ChannelId, FormatMode, MediaPayload, Message, PlatformClient};
use crate::clock::Clock;
use crate::error::ChannelError;
use crate::pipeline::filter::FilterEngine;
use crate::pipeline::fingerprint::fingerprint_message;
use crate::pipeline::normalize::{TextNormalizer, strip_markup};
use crate::pipeline::types::{AttemptFailure, DeliveryStrategy, ForwardOutcome};
use crate::store::{DedupStore, MessageKey};

/// Characters of source text shown in log lines.
const LOG_PREVIEW_CHARS: usize = 50;

/// Longest platform-requested wait honoured between strategies.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(300);

/// Posts messages to the target channel.
pub struct Forwarder {
    client: Arc<dyn PlatformClient>,
    target: ChannelId,
    normalizer: TextNormalizer,
    filter: FilterEngine,
    clock: Arc<dyn Clock>,
    post_delay: Duration,
}

impl Forwarder {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        target: ChannelId,
        normalizer: TextNormalizer,
        filter: FilterEngine,
        clock: Arc<dyn Clock>,
        post_delay: Duration,
    ) -> Self {
        Self {
            client,
            target,
            normalizer,
            filter,
            clock,
            post_delay,
        }
    }

    pub fn target(&self) -> &ChannelId {
        &self.target
    }

    pub fn post_delay(&self) -> Duration {
        self.post_delay
    }

    /// Run one message through the pipeline.
    pub async fn post(
        &self,
        store: &mut DedupStore,
        message: &Message,
        origin: &ChannelId,
    ) -> ForwardOutcome {
        let key = MessageKey::new(origin.clone(), message.id);

        if store.is_duplicate_by_id(&key) {
            debug!(key = %key, "Already posted (message id)");
            return ForwardOutcome::DuplicateId;
        }

        let fingerprint = fingerprint_message(message);
        if store.is_duplicate_by_content(&fingerprint) {
            debug!(key = %key, "Already posted (same content)");
            return ForwardOutcome::DuplicateContent;
        }

        let decision = self.filter.evaluate(&message.text);
        if !decision.is_accepted() {
            info!(
                key = %key,
                reason = %decision.reason(),
                preview = %message.preview(LOG_PREVIEW_CHARS),
                "⏭️ Skipped by filter"
            );
            return ForwardOutcome::Filtered {
                reason: decision.reason(),
            };
        }

        let caption = self.normalizer.compose(&message.text);
        let chain = DeliveryStrategy::chain(message.media.is_some());
        let mut failures = Vec::new();

        for (index, &strategy) in chain.iter().enumerate() {
            match self.attempt(strategy, message, &caption).await {
                Ok(plain_text) => {
                    store.record_sent(key.clone(), fingerprint).await;
                    info!(
                        key = %key,
                        origin = %origin,
                        strategy = %strategy,
                        plain_text,
                        preview = %message.preview(LOG_PREVIEW_CHARS),
                        "✅ Posted"
                    );
                    self.clock.sleep(self.post_delay).await;
                    return ForwardOutcome::Sent {
                        strategy,
                        plain_text,
                    };
                }
                Err(e) => {
                    warn!(key = %key, strategy = %strategy, error = %e, "Delivery attempt failed");
                    // No wait once the chain is used up.
                    match &e {
                        ChannelError::RateLimited {
                            retry_after: Some(wait),
                        } if index + 1 < chain.len() => {
                            self.clock.sleep((*wait).min(MAX_RATE_LIMIT_WAIT)).await;
                        }
                        _ => {}
                    }
                    failures.push(AttemptFailure {
                        strategy,
                        reason: e.to_string(),
                    });
                }
            }
        }

        error!(
            key = %key,
            attempts = failures.len(),
            "❌ All delivery strategies failed; will retry on a later sweep"
        );
        ForwardOutcome::Exhausted { failures }
    }

    /// Try one strategy. If the platform rejects the markup, retry once as
    /// plain text. Returns whether the plain-text retry was used.
    async fn attempt(
        &self,
        strategy: DeliveryStrategy,
        message: &Message,
        caption: &str,
    ) -> Result<bool, ChannelError> {
        let payload = self.prepare(strategy, message).await?;

        match self.deliver(payload.clone(), caption, FormatMode::Html).await {
            Ok(()) => Ok(false),
            Err(e) if e.is_formatting_rejection() => {
                debug!(strategy = %strategy, error = %e, "Markup rejected, retrying as plain text");
                self.deliver(payload, &strip_markup(caption), FormatMode::Plain)
                    .await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Media to attach for a strategy; `None` for text-only.
    async fn prepare(
        &self,
        strategy: DeliveryStrategy,
        message: &Message,
    ) -> Result<Option<MediaPayload>, ChannelError> {
        match strategy {
            DeliveryStrategy::TextOnly => Ok(None),
            DeliveryStrategy::RelayOriginal => {
                let media = message.media.as_ref().ok_or(ChannelError::NoMedia)?;
                let file_id = media.file_id.clone().ok_or(ChannelError::NoMedia)?;
                Ok(Some(MediaPayload::Reference {
                    kind: media.kind,
                    file_id,
                }))
            }
            DeliveryStrategy::Reupload => {
                let media = message.media.as_ref().ok_or(ChannelError::NoMedia)?;
                let bytes = self.client.download_media(message).await?;
                let file_name = media
                    .file_name
                    .clone()
                    .unwrap_or_else(|| media.kind.default_file_name().to_string());
                Ok(Some(MediaPayload::Upload {
                    kind: media.kind,
                    bytes,
                    file_name,
                }))
            }
        }
    }

    async fn deliver(
        &self,
        payload: Option<MediaPayload>,
        caption: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError> {
        match payload {
            Some(media) => {
                self.client
                    .send_media(&self.target, media, caption, mode)
                    .await
            }
            None => self.client.send_text(&self.target, caption, mode).await,
        }
    }
}
