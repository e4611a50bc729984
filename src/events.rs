//! Chat List Event Bus
//!
//! Notifies open sessions that a user's chat list changed, so they can
//! refetch it. Owned by the application state; a subscription ends when its
//! receiver is dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Chat list changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatEventKind {
    /// A chat was created by a message update without a chat id
    ChatCreated { chat_id: String },
    /// A message in the chat was written
    ChatTouched { chat_id: String },
    /// The chat title changed
    TitleChanged { chat_id: String, title: String },
    /// A message was removed from the chat
    MessageDeleted { chat_id: String, message_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub user_id: String,
    pub kind: ChatEventKind,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all subscribers; dropped silently when nobody listens.
    pub fn publish(&self, user_id: &str, kind: ChatEventKind) {
        let _ = self.tx.send(ChatEvent {
            user_id: user_id.to_string(),
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
