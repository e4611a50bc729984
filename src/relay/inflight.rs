//! Tracks which chats currently have a reply streaming.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct InFlightChats {
    active: Arc<Mutex<HashSet<String>>>,
}

/// Marks a chat as streaming until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    chat_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlightChats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the chat; `None` while another reply for it is streaming.
    pub fn try_begin(&self, chat_id: &str) -> Option<InFlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(chat_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            chat_id: chat_id.to_string(),
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self, chat_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(chat_id)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_reply_per_chat() {
        let chats = InFlightChats::new();
        let guard = chats.try_begin("c1").expect("first claim");
        assert!(chats.try_begin("c1").is_none());
        assert!(chats.try_begin("c2").is_some());
        assert!(chats.is_active("c1"));

        drop(guard);
        assert!(!chats.is_active("c1"));
        assert!(chats.try_begin("c1").is_some());
    }
}
