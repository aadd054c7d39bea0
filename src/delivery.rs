// Staged delivery
//
// Posts transcripts to a chat as one or more messages. Long-audio jobs first show a
// draft that is replaced once the refined text is ready. The chat backend sits behind
// `MessageSink`; `MemorySink` keeps messages in memory for the HTTP API and tests.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

pub type MessageId = u64;

/// Longest message most chat platforms accept, in characters
pub const DEFAULT_MESSAGE_LIMIT: usize = 4096;

/// Header shown above a draft while refinement runs
pub const DRAFT_HEADER: &str = "Draft (refining...)";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Failed to edit message {id}: {reason}")]
    Edit { id: MessageId, reason: String },

    #[error("Failed to delete message {id}: {reason}")]
    Delete { id: MessageId, reason: String },

    #[error("Cannot {action} in state {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
}

/// Chat backend
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<MessageId, DeliveryError>;
    async fn edit(&self, chat_id: &str, message_id: MessageId, text: &str) -> Result<(), DeliveryError>;
    async fn delete(&self, chat_id: &str, message_id: MessageId) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub text: String,
}

/// Messages kept per chat before the oldest are dropped
pub const DEFAULT_CHAT_HISTORY: usize = 100;

#[derive(Default)]
struct ChatLog {
    messages: Vec<StoredMessage>,
    last_activity: Option<Instant>,
}

impl ChatLog {
    fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    fn idle_for(&self, ttl: Duration) -> bool {
        self.last_activity.map_or(true, |t| t.elapsed() >= ttl)
    }
}

/// In-memory chat, messages kept in posting order per chat. Each chat keeps at most
/// `history` messages and is forgotten once idle for the eviction TTL.
pub struct MemorySink {
    next_id: AtomicU64,
    history: usize,
    chats: Mutex<HashMap<String, ChatLog>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_history(DEFAULT_CHAT_HISTORY)
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            history: history.max(1),
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn messages(&self, chat_id: &str) -> Vec<StoredMessage> {
        self.with_chats(|chats| chats.get(chat_id).map(|log| log.messages.clone()).unwrap_or_default())
    }

    pub fn chat_count(&self) -> usize {
        self.with_chats(|chats| chats.len())
    }

    pub fn message_count(&self) -> usize {
        self.with_chats(|chats| chats.values().map(|log| log.messages.len()).sum())
    }

    /// Forget chats with no activity for `ttl`. Returns how many were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        self.with_chats(|chats| {
            let before = chats.len();
            chats.retain(|_, log| !log.idle_for(ttl));
            before - chats.len()
        })
    }

    /// Periodically evict idle chats
    pub fn start_eviction_task(self: &Arc<Self>, interval: Duration, ttl: Duration) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let count = sink.evict_idle(ttl);
                if count > 0 {
                    info!("Evicted {} idle chats", count);
                } else {
                    debug!("No idle chats to evict");
                }
            }
        })
    }

    fn with_chats<T>(&self, f: impl FnOnce(&mut HashMap<String, ChatLog>) -> T) -> T {
        match self.chats.lock() {
            Ok(mut chats) => f(&mut chats),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, chat_id: &str, text: &str) -> Result<MessageId, DeliveryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let history = self.history;
        self.with_chats(|chats| {
            let log = chats.entry(chat_id.to_string()).or_default();
            log.messages.push(StoredMessage {
                id,
                text: text.to_string(),
            });
            if log.messages.len() > history {
                let excess = log.messages.len() - history;
                log.messages.drain(..excess);
            }
            log.touch();
        });
        Ok(id)
    }

    async fn edit(&self, chat_id: &str, message_id: MessageId, text: &str) -> Result<(), DeliveryError> {
        self.with_chats(|chats| {
            let log = chats.get_mut(chat_id).ok_or_else(|| DeliveryError::Edit {
                id: message_id,
                reason: "chat not found".into(),
            })?;
            let message = log
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| DeliveryError::Edit {
                    id: message_id,
                    reason: "message not found".into(),
                })?;
            message.text = text.to_string();
            log.touch();
            Ok(())
        })
    }

    async fn delete(&self, chat_id: &str, message_id: MessageId) -> Result<(), DeliveryError> {
        self.with_chats(|chats| {
            let log = chats.get_mut(chat_id).ok_or_else(|| DeliveryError::Delete {
                id: message_id,
                reason: "chat not found".into(),
            })?;
            let before = log.messages.len();
            log.messages.retain(|m| m.id != message_id);
            if log.messages.len() == before {
                return Err(DeliveryError::Delete {
                    id: message_id,
                    reason: "message not found".into(),
                });
            }
            log.touch();
            Ok(())
        })
    }
}

/// Split `text` into parts of at most `limit` characters, preferring paragraph breaks,
/// then line breaks, then spaces. Words longer than `limit` are cut hard.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let window_end = match rest.char_indices().nth(limit) {
            Some((idx, _)) => idx,
            None => {
                parts.push(rest.to_string());
                break;
            }
        };
        let window = &rest[..window_end];
        let cut = [window.rfind("\n\n"), window.rfind('\n'), window.rfind(' ')]
            .into_iter()
            .flatten()
            .find(|&idx| idx > 0)
            .unwrap_or(window_end);

        let part = rest[..cut].trim_end();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        rest = rest[cut..].trim_start();
    }
    parts
}

/// Where a job's messages are in the draft/refine lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    NoDraftSent,
    DraftSentSingle(MessageId),
    DraftSentMultiPart(Vec<MessageId>),
    Refined(Vec<MessageId>),
    Delivered(Vec<MessageId>),
    Failed,
}

impl DeliveryState {
    fn label(&self) -> &'static str {
        match self {
            DeliveryState::NoDraftSent => "no_draft_sent",
            DeliveryState::DraftSentSingle(_) => "draft_sent_single",
            DeliveryState::DraftSentMultiPart(_) => "draft_sent_multi_part",
            DeliveryState::Refined(_) => "refined",
            DeliveryState::Delivered(_) => "delivered",
            DeliveryState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Refined(_) | DeliveryState::Delivered(_) | DeliveryState::Failed
        )
    }
}

/// Message lifecycle of one job
pub struct StagedDelivery {
    sink: Arc<dyn MessageSink>,
    chat_id: String,
    /// "Processing..." message reused for the first part
    status_message: Option<MessageId>,
    limit: usize,
    state: DeliveryState,
}

impl StagedDelivery {
    pub fn new(sink: Arc<dyn MessageSink>, chat_id: &str, status_message: Option<MessageId>) -> Self {
        Self {
            sink,
            chat_id: chat_id.to_string(),
            status_message,
            limit: DEFAULT_MESSAGE_LIMIT,
            state: DeliveryState::NoDraftSent,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(DRAFT_HEADER.len() + 2);
        self
    }

    pub fn state(&self) -> &DeliveryState {
        &self.state
    }

    /// Show the draft, in one message or several
    pub async fn show_draft(&mut self, text: &str) -> Result<(), DeliveryError> {
        if self.state != DeliveryState::NoDraftSent {
            return Err(self.invalid("show a draft"));
        }
        let draft = format!("{}\n\n{}", DRAFT_HEADER, text);
        let ids = self.post_parts(split_message(&draft, self.limit)).await?;
        self.state = match ids.as_slice() {
            [single] => DeliveryState::DraftSentSingle(*single),
            _ => DeliveryState::DraftSentMultiPart(ids),
        };
        Ok(())
    }

    /// Replace the draft with the refined text.
    ///
    /// A single-message draft is edited in place (continuation parts are new messages).
    /// A multi-part draft is deleted part by part and the refined text is posted fresh;
    /// a part that cannot be deleted is logged and left behind.
    pub async fn finalize_refined(&mut self, text: &str) -> Result<(), DeliveryError> {
        let parts = split_message(text, self.limit);
        let ids = match std::mem::replace(&mut self.state, DeliveryState::Failed) {
            DeliveryState::NoDraftSent => self.post_parts(parts).await?,
            DeliveryState::DraftSentSingle(draft_id) => {
                let mut parts = parts.into_iter();
                let first = parts.next().unwrap_or_default();
                let mut ids = Vec::new();
                match self.sink.edit(&self.chat_id, draft_id, &first).await {
                    Ok(()) => ids.push(draft_id),
                    Err(e) => {
                        warn!("Could not edit draft {}, posting refined text anew: {}", draft_id, e);
                        ids.push(self.sink.send(&self.chat_id, &first).await?);
                    }
                }
                for part in parts {
                    ids.push(self.sink.send(&self.chat_id, &part).await?);
                }
                ids
            }
            DeliveryState::DraftSentMultiPart(draft_ids) => {
                for id in draft_ids {
                    if let Err(e) = self.sink.delete(&self.chat_id, id).await {
                        warn!("Could not delete draft part {}: {}", id, e);
                    }
                }
                self.post_parts(parts).await?
            }
            other => {
                self.state = other;
                return Err(self.invalid("finalize refined text"));
            }
        };
        debug!("Refined text delivered to chat {} in {} message(s)", self.chat_id, ids.len());
        self.state = DeliveryState::Refined(ids);
        Ok(())
    }

    /// Deliver the final text directly, without a draft stage
    pub async fn deliver(&mut self, text: &str) -> Result<(), DeliveryError> {
        if self.state != DeliveryState::NoDraftSent {
            return Err(self.invalid("deliver"));
        }
        let ids = self.post_parts(split_message(text, self.limit)).await?;
        self.state = DeliveryState::Delivered(ids);
        Ok(())
    }

    /// Tell the user the job failed
    pub async fn fail(&mut self, message: &str) -> Result<(), DeliveryError> {
        let result = match self.state.clone() {
            DeliveryState::NoDraftSent => self.post_parts(vec![message.to_string()]).await.map(|_| ()),
            DeliveryState::DraftSentSingle(id) => self.sink.edit(&self.chat_id, id, message).await,
            DeliveryState::DraftSentMultiPart(_) => self.sink.send(&self.chat_id, message).await.map(|_| ()),
            _ => return Err(self.invalid("report a failure")),
        };
        self.state = DeliveryState::Failed;
        result
    }

    /// Post parts, reusing the status message for the first one
    async fn post_parts(&mut self, parts: Vec<String>) -> Result<Vec<MessageId>, DeliveryError> {
        let mut ids = Vec::with_capacity(parts.len());
        for (index, part) in parts.into_iter().enumerate() {
            if index == 0 {
                if let Some(status_id) = self.status_message.take() {
                    match self.sink.edit(&self.chat_id, status_id, &part).await {
                        Ok(()) => {
                            ids.push(status_id);
                            continue;
                        }
                        Err(e) => warn!("Could not reuse status message {}: {}", status_id, e),
                    }
                }
            }
            ids.push(self.sink.send(&self.chat_id, &part).await?);
        }
        Ok(ids)
    }

    fn invalid(&self, action: &'static str) -> DeliveryError {
        DeliveryError::InvalidTransition {
            state: self.state.label(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MemorySink whose deletes always fail
    struct StickySink(MemorySink);

    #[async_trait]
    impl MessageSink for StickySink {
        async fn send(&self, chat_id: &str, text: &str) -> Result<MessageId, DeliveryError> {
            self.0.send(chat_id, text).await
        }

        async fn edit(&self, chat_id: &str, message_id: MessageId, text: &str) -> Result<(), DeliveryError> {
            self.0.edit(chat_id, message_id, text).await
        }

        async fn delete(&self, _chat_id: &str, message_id: MessageId) -> Result<(), DeliveryError> {
            Err(DeliveryError::Delete {
                id: message_id,
                reason: "message too old".into(),
            })
        }
    }

    fn texts(sink: &MemorySink, chat: &str) -> Vec<String> {
        sink.messages(chat).into_iter().map(|m| m.text).collect()
    }

    #[test]
    fn test_split_prefers_paragraphs_then_lines_then_words() {
        let text = "first paragraph\n\nsecond one here";
        assert_eq!(split_message(text, 20), vec!["first paragraph", "second one here"]);

        let text = "line one\nline two is longer";
        assert_eq!(split_message(text, 12), vec!["line one", "line two is", "longer"]);

        assert_eq!(split_message("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(split_message("   ", 10).is_empty());
    }

    #[test]
    fn test_split_respects_limit_in_chars() {
        let text = "слово ".repeat(2000);
        let parts = split_message(&text, 4096);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.chars().count() <= 4096));
        assert_eq!(parts.join(" "), text.trim());
    }

    #[tokio::test]
    async fn test_single_draft_is_edited_in_place() {
        let sink = Arc::new(MemorySink::new());
        let mut delivery = StagedDelivery::new(sink.clone(), "chat", None);

        delivery.show_draft("draft text").await.unwrap();
        let draft_id = match delivery.state() {
            DeliveryState::DraftSentSingle(id) => *id,
            other => panic!("unexpected state {:?}", other),
        };

        delivery.finalize_refined("Refined text.").await.unwrap();
        assert_eq!(delivery.state(), &DeliveryState::Refined(vec![draft_id]));
        assert_eq!(texts(&sink, "chat"), vec!["Refined text."]);
    }

    #[tokio::test]
    async fn test_multi_part_draft_is_replaced() {
        let sink = Arc::new(MemorySink::new());
        let mut delivery = StagedDelivery::new(sink.clone(), "chat", None).with_limit(40);

        delivery
            .show_draft("word ".repeat(20).trim())
            .await
            .unwrap();
        assert!(matches!(delivery.state(), DeliveryState::DraftSentMultiPart(ids) if ids.len() > 1));

        delivery.finalize_refined("Short refined.").await.unwrap();
        assert_eq!(texts(&sink, "chat"), vec!["Short refined."]);
        assert!(delivery.state().is_terminal());
    }

    #[tokio::test]
    async fn test_failed_delete_is_not_fatal() {
        let sink = Arc::new(StickySink(MemorySink::new()));
        let mut delivery = StagedDelivery::new(sink.clone(), "chat", None).with_limit(40);

        delivery.show_draft(&"word ".repeat(20)).await.unwrap();
        let draft_parts = sink.0.messages("chat").len();

        delivery.finalize_refined("Refined.").await.unwrap();
        let messages = sink.0.messages("chat");
        assert_eq!(messages.len(), draft_parts + 1);
        assert_eq!(messages.last().unwrap().text, "Refined.");
    }

    #[tokio::test]
    async fn test_status_message_is_reused() {
        let sink = Arc::new(MemorySink::new());
        let status = sink.send("chat", "Processing...").await.unwrap();
        let mut delivery = StagedDelivery::new(sink.clone(), "chat", Some(status));

        delivery.deliver("final").await.unwrap();
        assert_eq!(delivery.state(), &DeliveryState::Delivered(vec![status]));
        assert_eq!(texts(&sink, "chat"), vec!["final"]);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let sink = Arc::new(MemorySink::new());
        let mut delivery = StagedDelivery::new(sink.clone(), "chat", None);
        delivery.deliver("done").await.unwrap();

        assert!(matches!(
            delivery.show_draft("again").await,
            Err(DeliveryError::InvalidTransition { state: "delivered", .. })
        ));
        assert!(delivery.finalize_refined("again").await.is_err());
        assert_eq!(delivery.state(), &DeliveryState::Delivered(vec![1]));
        assert!(delivery.fail("oops").await.is_err());
    }

    #[tokio::test]
    async fn test_failure_replaces_single_draft() {
        let sink = Arc::new(MemorySink::new());
        let mut delivery = StagedDelivery::new(sink.clone(), "chat", None);
        delivery.show_draft("partial").await.unwrap();
        delivery.fail("Transcription failed.").await.unwrap();
        assert_eq!(delivery.state(), &DeliveryState::Failed);
        assert_eq!(texts(&sink, "chat"), vec!["Transcription failed."]);
    }

    #[tokio::test]
    async fn test_idle_chats_are_evicted() {
        let sink = MemorySink::new();
        for chat in 0..200 {
            sink.send(&format!("chat-{}", chat), "transcript").await.unwrap();
        }
        assert_eq!(sink.message_count(), 200);

        assert_eq!(sink.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(sink.evict_idle(Duration::ZERO), 200);
        assert_eq!(sink.chat_count(), 0);
        assert_eq!(sink.message_count(), 0);
        assert!(sink.messages("chat-7").is_empty());
    }

    #[tokio::test]
    async fn test_chat_history_is_capped() {
        let sink = MemorySink::with_history(3);
        for n in 0..5 {
            sink.send("chat", &format!("m{}", n)).await.unwrap();
        }
        assert_eq!(texts(&sink, "chat"), vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_eviction_task_clears_idle_chats() {
        let sink = Arc::new(MemorySink::new());
        sink.send("chat", "transcript").await.unwrap();

        let handle = sink.start_eviction_task(Duration::from_millis(10), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.chat_count(), 0);
        handle.abort();
    }
}
