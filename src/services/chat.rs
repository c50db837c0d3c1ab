//! Chat store and per-connection session handling.
//!
//! [`ChatStore`] is the typed facade over the generic write-behind store.
//! [`ChatSessionHandler`] turns raw inbound payloads from a connection into
//! stored messages and [`ChatResponse`] replies, keeping a message counter
//! per open session.

use super::flush::{FlushHandle, FlushScheduler};
use super::session::SessionCounterRegistry;
use crate::config::ChatSettings;
use crate::models::{ChatMessage, ChatResponse, ChatRole, MessageId, ResponseKind, StoreEvent};
use crate::observability::Subscription;
use crate::storage::{PersistenceSink, Snapshot, WriteBehindStore};
use crate::{Error, Result, current_timestamp_millis};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Write-behind store of chat messages.
///
/// Cheap to clone; clones share the same underlying store.
#[derive(Debug, Clone)]
pub struct ChatStore {
    store: Arc<WriteBehindStore<ChatMessage>>,
    settings: ChatSettings,
}

impl ChatStore {
    /// Creates an empty chat store.
    #[must_use]
    pub fn new(settings: &ChatSettings) -> Self {
        Self {
            store: Arc::new(WriteBehindStore::new()),
            settings: *settings,
        }
    }

    /// Stores a new message with a freshly assigned ID.
    pub fn store_message(
        &self,
        session_id: &str,
        content: impl Into<String>,
        role: ChatRole,
    ) -> Arc<ChatMessage> {
        let message = ChatMessage {
            id: MessageId::new(self.store.next_sequence()),
            session_id: session_id.to_string(),
            content: content.into(),
            role,
            timestamp: Utc::now(),
        };
        self.store.put(message)
    }

    /// Returns a message by ID.
    #[must_use]
    pub fn get_message(&self, id: MessageId) -> Option<Arc<ChatMessage>> {
        self.store.get(&id)
    }

    /// Deletes a message. Returns false if it did not exist.
    pub fn delete_message(&self, id: MessageId) -> bool {
        self.store.delete(&id)
    }

    /// Snapshot of every message, oldest first.
    #[must_use]
    pub fn all_messages(&self) -> Snapshot<ChatMessage> {
        self.store.scan()
    }

    /// A session's existing messages followed by its new ones as they
    /// arrive.
    #[must_use]
    pub fn session_messages(&self, session_id: &str) -> Subscription<ChatMessage> {
        let session_id = session_id.to_string();
        self.store
            .subscribe_with_snapshot(move |event: &StoreEvent<ChatMessage>| {
                event.item().is_some_and(|m| m.session_id == session_id)
            })
    }

    /// Every change from now on, across all sessions.
    #[must_use]
    pub fn watch_all(&self) -> Subscription<ChatMessage> {
        self.store.subscribe()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if no messages are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The underlying generic store.
    #[must_use]
    pub fn store(&self) -> &WriteBehindStore<ChatMessage> {
        &self.store
    }

    /// Builds a flush scheduler for this store without starting it.
    #[must_use]
    pub fn flusher(&self, sink: Arc<dyn PersistenceSink<ChatMessage>>) -> Arc<FlushScheduler<ChatMessage>> {
        Arc::new(FlushScheduler::new(
            self.store.queue(),
            sink,
            &self.settings.flush,
        ))
    }

    /// Starts background flushing into `sink`.
    #[must_use]
    pub fn spawn_flusher(&self, sink: Arc<dyn PersistenceSink<ChatMessage>>) -> FlushHandle {
        self.flusher(sink).spawn()
    }
}

/// Inbound socket payload.
///
/// Read leniently: scalar fields are taken as their text, and a missing or
/// non-numeric audio size counts as zero. Only a payload that is not JSON
/// at all is rejected.
#[derive(Debug)]
struct InboundMessage {
    content: String,
    kind: String,
    audio: Option<AudioAttachment>,
}

impl InboundMessage {
    fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| Error::InvalidInput(format!("malformed message: {e}")))?;
        Ok(Self {
            content: text_field(&value, "content").unwrap_or_default(),
            kind: text_field(&value, "type").unwrap_or_else(|| "message".to_string()),
            audio: value.get("audio").map(AudioAttachment::from_value),
        })
    }
}

#[derive(Debug)]
struct AudioAttachment {
    mime_type: String,
    size: u64,
    data: String,
}

/// Text of a field. Objects and arrays read as empty text; null and
/// absent fields as `None`.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(String::new()),
    }
}

/// Numeric value of a field, or 0 when it has none.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_field(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(b)) => u64::from(*b),
        _ => 0,
    }
}

impl AudioAttachment {
    fn from_value(value: &Value) -> Self {
        Self {
            mime_type: text_field(value, "mimeType").unwrap_or_else(|| "unknown".to_string()),
            size: count_field(value, "size"),
            data: text_field(value, "data").unwrap_or_default(),
        }
    }

    fn summary(&self) -> String {
        format!(
            " [Audio: {}, {} bytes, {} chars base64]",
            self.mime_type,
            self.size,
            self.data.len()
        )
    }
}

/// Opens chat sessions over a shared store and counter registry.
#[derive(Debug, Clone)]
pub struct ChatSessionHandler {
    store: ChatStore,
    counters: Arc<SessionCounterRegistry>,
}

impl ChatSessionHandler {
    /// Creates a handler storing into `store`.
    #[must_use]
    pub fn new(store: ChatStore) -> Self {
        Self {
            store,
            counters: Arc::new(SessionCounterRegistry::new()),
        }
    }

    /// Opens a session with a generated ID.
    #[must_use]
    pub fn connect(&self) -> ChatSession {
        self.connect_with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Opens a session with a caller-chosen ID.
    #[must_use]
    pub fn connect_with_id(&self, session_id: impl Into<String>) -> ChatSession {
        let id = session_id.into();
        self.counters.on_connect(&id);
        tracing::info!(session_id = %id, "Chat session connected");
        ChatSession {
            id,
            store: self.store.clone(),
            counters: Arc::clone(&self.counters),
        }
    }

    /// The counter registry shared by this handler's sessions.
    #[must_use]
    pub fn counters(&self) -> &SessionCounterRegistry {
        &self.counters
    }

    /// The store messages are written to.
    #[must_use]
    pub const fn store(&self) -> &ChatStore {
        &self.store
    }
}

/// One open chat connection.
///
/// Dropping the session closes it and discards its counter; messages it
/// already stored stay queued for persistence.
#[derive(Debug)]
pub struct ChatSession {
    id: String,
    store: ChatStore,
    counters: Arc<SessionCounterRegistry>,
}

impl ChatSession {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Messages received on this session so far.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.counters.current(&self.id).unwrap_or(0)
    }

    /// Handles one inbound payload and builds the reply.
    ///
    /// Never fails: problems are reported as an `error` response carrying
    /// the current count.
    #[instrument(skip(self, payload), fields(session_id = %self.id, payload_len = payload.len()))]
    pub fn process(&self, payload: &str) -> ChatResponse {
        match self.try_process(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Error processing message");
                self.respond(
                    ResponseKind::Error,
                    format!("Error processing message: {e}"),
                    self.message_count(),
                    false,
                )
            },
        }
    }

    /// Closes the session.
    pub fn close(self) {
        drop(self);
    }

    fn try_process(&self, payload: &str) -> Result<ChatResponse> {
        let inbound = InboundMessage::parse(payload)?;

        let count = self.counters.increment(&self.id)?;
        let audio_info = inbound
            .audio
            .as_ref()
            .map(AudioAttachment::summary)
            .unwrap_or_default();

        let message = self
            .store
            .store_message(&self.id, inbound.content.as_str(), ChatRole::User);
        tracing::info!(
            message_id = %message.id,
            count,
            kind = %inbound.kind,
            "Processing message #{count}: {}{audio_info}",
            inbound.content
        );

        let has_audio = inbound.audio.is_some();
        let content = if has_audio {
            format!("Voice message received: \"{}\"{audio_info}", inbound.content)
        } else {
            format!("Message received: \"{}\"", inbound.content)
        };
        Ok(self.respond(ResponseKind::Response, content, count, has_audio))
    }

    fn respond(&self, kind: ResponseKind, content: String, count: u64, has_audio: bool) -> ChatResponse {
        ChatResponse {
            kind,
            content,
            message_count: count,
            session_id: self.id.clone(),
            timestamp: current_timestamp_millis(),
            has_audio,
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.counters.on_close(&self.id);
        tracing::info!(session_id = %self.id, "Chat session closed");
    }
}
