//! Telegram client: Bot API implementation of [`PlatformClient`].
//!
//! The Bot API has no history endpoint, so the client long-polls
//! `getUpdates` and keeps a bounded per-chat buffer of recent posts. The
//! buffer answers `fetch_recent_messages`; the same updates are fanned out
//! to live subscribers. Only chats the client was told to watch are kept;
//! updates from any other chat the bot is in are dropped. The bot must be a
//! member (admin for channels) of every source and of the target.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::{
    ChannelId, ChatEntity, ChatRef, FormatMode, MediaDescriptor, MediaKind, MediaPayload,
    Message, MessageStream, PlatformClient,
};
use crate::error::ChannelError;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Messages kept per chat when no explicit cap is given.
const DEFAULT_HISTORY_CAP: usize = 200;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Base wait after a failed poll; jitter is added on top.
const POLL_RETRY_BASE: Duration = Duration::from_secs(5);

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<Value>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// A live-message subscriber and the channels it listens to.
struct Subscriber {
    channels: Vec<ChannelId>,
    tx: mpsc::UnboundedSender<Message>,
}

/// Telegram Bot API client.
pub struct TelegramClient {
    bot_token: SecretString,
    client: reqwest::Client,
    api_base: String,
    history_cap: usize,
    watched: Vec<ChannelId>,
    history: RwLock<HashMap<i64, VecDeque<Message>>>,
    entities: RwLock<HashMap<ChannelId, ChatEntity>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl TelegramClient {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            history_cap: DEFAULT_HISTORY_CAP,
            watched: Vec::new(),
            history: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Point the client at a different Bot API server (self-hosted or test).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Number of messages remembered per chat.
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Chats whose updates are kept (sources and target).
    pub fn watching(mut self, channels: impl IntoIterator<Item = ChannelId>) -> Self {
        self.watched.extend(channels);
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Call a JSON Bot API method and unwrap the `result` field.
    async fn call(&self, method: &str, body: &Value, context: &str) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;
        Self::unwrap_response(method, resp, context).await
    }

    /// Call a multipart Bot API method (uploads).
    async fn call_multipart(
        &self,
        method: &str,
        form: Form,
        context: &str,
    ) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;
        Self::unwrap_response(method, resp, context).await
    }

    async fn unwrap_response(
        method: &str,
        resp: reqwest::Response,
        context: &str,
    ) -> Result<Value, ChannelError> {
        let status = resp.status();
        let envelope: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("{method} returned {status}: {e}")))?;

        if envelope.ok {
            return Ok(envelope.result.unwrap_or(Value::Null));
        }

        Err(classify_api_error(
            envelope.error_code.unwrap_or(status.as_u16()),
            envelope.description.as_deref().unwrap_or("no description"),
            envelope.parameters.and_then(|p| p.retry_after),
            context,
        ))
    }

    /// Spawn the background `getUpdates` loop that feeds history and subscribers.
    pub fn spawn_update_poller(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Telegram update poller started");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["channel_post", "message"]
                });

                let updates = match this.call("getUpdates", &body, "getUpdates").await {
                    Ok(Value::Array(updates)) => updates,
                    Ok(other) => {
                        warn!(response = %other, "Unexpected getUpdates payload");
                        Vec::new()
                    }
                    Err(e) => {
                        let wait = retry_wait(&e);
                        warn!(error = %e, wait_secs = wait.as_secs(), "Telegram poll error");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                };

                for update in &updates {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(raw) = update.get("channel_post").or_else(|| update.get("message"))
                    else {
                        continue;
                    };

                    match parse_message(raw) {
                        Some(message) => this.ingest(message).await,
                        None => debug!("Skipping unparseable update"),
                    }
                }
            }
        })
    }

    /// Record a message in the chat history and fan it out to subscribers.
    pub(crate) async fn ingest(&self, message: Message) {
        if !self.is_watched(&message.chat).await {
            debug!(chat = message.chat.id, "Ignoring update from unwatched chat");
            return;
        }
        self.remember(message.clone()).await;

        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|sub| {
            if !sub.channels.iter().any(|c| c.matches(&message.chat)) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(message.clone()).is_ok()
        });
    }

    /// A chat is watched if it matches a configured channel or a resolved
    /// entity id.
    async fn is_watched(&self, chat: &ChatRef) -> bool {
        if self.watched.iter().any(|c| c.matches(chat)) {
            return true;
        }
        self.entities.read().await.values().any(|e| e.id == chat.id)
    }

    async fn remember(&self, message: Message) {
        let mut history = self.history.write().await;
        let buffer = history.entry(message.chat.id).or_default();
        if buffer.iter().any(|m| m.id == message.id) {
            return;
        }
        buffer.push_back(message);
        while buffer.len() > self.history_cap {
            buffer.pop_front();
        }
    }

    /// Remember a sent message (the Bot API never echoes our own posts).
    async fn remember_sent(&self, result: &Value) {
        if let Some(message) = parse_message(result) {
            self.remember(message).await;
        }
    }

    /// Pre-populate the entity cache.
    pub(crate) async fn remember_entity(&self, channel: ChannelId, entity: ChatEntity) {
        self.entities.write().await.insert(channel, entity);
    }
}

#[async_trait]
impl PlatformClient for TelegramClient {
    async fn resolve_entity(&self, channel: &ChannelId) -> Result<ChatEntity, ChannelError> {
        if let Some(entity) = self.entities.read().await.get(channel) {
            return Ok(entity.clone());
        }

        let body = serde_json::json!({ "chat_id": channel.as_str() });
        let result = self
            .call("getChat", &body, channel.as_str())
            .await
            .map_err(|e| ChannelError::ResolveFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        let entity = parse_chat_entity(&result).ok_or_else(|| ChannelError::ResolveFailed {
            channel: channel.to_string(),
            reason: "getChat returned no chat id".into(),
        })?;

        self.remember_entity(channel.clone(), entity.clone()).await;
        Ok(entity)
    }

    async fn fetch_recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, ChannelError> {
        let entity = self.resolve_entity(channel).await?;
        let history = self.history.read().await;
        Ok(history
            .get(&entity.id)
            .map(|buffer| buffer.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_text(
        &self,
        target: &ChannelId,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": target.as_str(),
            "text": text,
        });
        if let Some(parse_mode) = mode.parse_mode() {
            body["parse_mode"] = Value::String(parse_mode.into());
        }

        let result = self.call("sendMessage", &body, target.as_str()).await?;
        self.remember_sent(&result).await;
        Ok(())
    }

    async fn send_media(
        &self,
        target: &ChannelId,
        media: MediaPayload,
        caption: &str,
        mode: FormatMode,
    ) -> Result<(), ChannelError> {
        let (method, field) = media_method(media.kind());

        let result = match media {
            MediaPayload::Reference { file_id, .. } => {
                let mut body = serde_json::json!({
                    "chat_id": target.as_str(),
                    field: file_id,
                    "caption": caption,
                });
                if let Some(parse_mode) = mode.parse_mode() {
                    body["parse_mode"] = Value::String(parse_mode.into());
                }
                self.call(method, &body, target.as_str()).await?
            }
            MediaPayload::Upload {
                bytes, file_name, ..
            } => {
                let part = Part::bytes(bytes).file_name(file_name);
                let mut form = Form::new()
                    .text("chat_id", target.as_str().to_string())
                    .text("caption", caption.to_string())
                    .part(field, part);
                if let Some(parse_mode) = mode.parse_mode() {
                    form = form.text("parse_mode", parse_mode);
                }
                self.call_multipart(method, form, target.as_str()).await?
            }
        };

        self.remember_sent(&result).await;
        info!(target = %target, method, "Telegram media sent");
        Ok(())
    }

    async fn download_media(&self, message: &Message) -> Result<Vec<u8>, ChannelError> {
        let file_id = message
            .media
            .as_ref()
            .and_then(|m| m.file_id.as_deref())
            .ok_or(ChannelError::NoMedia)?;

        let body = serde_json::json!({ "file_id": file_id });
        let file = self
            .call("getFile", &body, "getFile")
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                reason: e.to_string(),
            })?;
        let file_path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::DownloadFailed {
                reason: "getFile returned no file_path (file too big?)".into(),
            })?;

        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(ChannelError::DownloadFailed {
                reason: format!("file download returned {}", resp.status()),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| ChannelError::DownloadFailed {
            reason: e.to_string(),
        })?;
        debug!(file_id, size = bytes.len(), "Downloaded media");
        Ok(bytes.to_vec())
    }

    async fn subscribe(&self, channels: &[ChannelId]) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(Subscriber {
            channels: channels.to_vec(),
            tx,
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a Bot API failure onto the relay's error taxonomy.
fn classify_api_error(
    code: u16,
    description: &str,
    retry_after: Option<u64>,
    context: &str,
) -> ChannelError {
    let lower = description.to_lowercase();

    if lower.contains("can't parse entities")
        || lower.contains("can't find end of")
        || lower.contains("unsupported start tag")
    {
        return ChannelError::FormattingRejected {
            reason: description.to_string(),
        };
    }

    if code == 429 {
        return ChannelError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
        };
    }

    if lower.contains("chat not found") || code == 403 {
        return ChannelError::ResolveFailed {
            channel: context.to_string(),
            reason: description.to_string(),
        };
    }

    ChannelError::SendFailed {
        channel: context.to_string(),
        reason: format!("{code}: {description}"),
    }
}

/// How long the poller waits after an error.
fn retry_wait(error: &ChannelError) -> Duration {
    if let ChannelError::RateLimited {
        retry_after: Some(after),
    } = error
    {
        return *after;
    }
    let jitter = rand::thread_rng().gen_range(0..2_000);
    POLL_RETRY_BASE + Duration::from_millis(jitter)
}

/// Bot API method and form field used to send a given media kind.
fn media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Photo => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Animation => ("sendAnimation", "animation"),
        MediaKind::Audio => ("sendAudio", "audio"),
        MediaKind::Voice => ("sendVoice", "voice"),
        MediaKind::Sticker => ("sendSticker", "sticker"),
        MediaKind::Document | MediaKind::Other => ("sendDocument", "document"),
    }
}

fn parse_chat_entity(chat: &Value) -> Option<ChatEntity> {
    Some(ChatEntity {
        id: chat.get("id").and_then(Value::as_i64)?,
        title: chat.get("title").and_then(Value::as_str).map(String::from),
        username: chat.get("username").and_then(Value::as_str).map(String::from),
    })
}

/// Convert a Bot API `Message` object into a [`Message`].
fn parse_message(raw: &Value) -> Option<Message> {
    let id = raw.get("message_id").and_then(Value::as_i64)?;
    let chat = raw.get("chat")?;
    let chat = ChatRef {
        id: chat.get("id").and_then(Value::as_i64)?,
        username: chat.get("username").and_then(Value::as_str).map(String::from),
        title: chat.get("title").and_then(Value::as_str).map(String::from),
    };

    let text = raw
        .get("text")
        .or_else(|| raw.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let date = raw
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Some(Message {
        id,
        chat,
        text,
        media: parse_media(raw),
        date,
    })
}

/// Extract the attached media, if any. Missing identity fields stay `None`.
fn parse_media(raw: &Value) -> Option<MediaDescriptor> {
    // Photos arrive as a list of sizes; the last one is the largest.
    if let Some(sizes) = raw.get("photo").and_then(Value::as_array) {
        let largest = sizes.last();
        return Some(describe(MediaKind::Photo, largest));
    }

    // `animation` messages also carry a `document`; check it first.
    const FIELDS: &[(&str, MediaKind)] = &[
        ("animation", MediaKind::Animation),
        ("video", MediaKind::Video),
        ("document", MediaKind::Document),
        ("audio", MediaKind::Audio),
        ("voice", MediaKind::Voice),
        ("video_note", MediaKind::Video),
        ("sticker", MediaKind::Sticker),
    ];

    FIELDS
        .iter()
        .find_map(|(field, kind)| raw.get(*field).map(|obj| describe(*kind, Some(obj))))
}

fn describe(kind: MediaKind, obj: Option<&Value>) -> MediaDescriptor {
    let field = |name: &str| {
        obj.and_then(|o| o.get(name))
            .and_then(Value::as_str)
            .map(String::from)
    };
    MediaDescriptor {
        kind,
        file_id: field("file_id"),
        file_unique_id: field("file_unique_id"),
        file_name: field("file_name"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
