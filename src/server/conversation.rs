use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageAuthor {
    LocalServer,
    RemoteServer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    pub author: MessageAuthor,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub unread: bool,
}

/// Messages exchanged with one remote endpoint, oldest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub remote: SocketAddr,
    pub messages: Vec<TextMessage>,
}

impl Conversation {
    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| m.unread).count()
    }

    pub fn last_message(&self) -> Option<&TextMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Mutex<Vec<Conversation>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, opening the conversation on first contact
    pub fn add(&self, remote: SocketAddr, author: MessageAuthor, text: impl Into<String>) {
        let message = TextMessage {
            author,
            text: text.into(),
            timestamp: Utc::now(),
            unread: author == MessageAuthor::RemoteServer,
        };

        let mut conversations = self.conversations.lock();
        match conversations.iter_mut().find(|c| c.remote == remote) {
            Some(conversation) => conversation.messages.push(message),
            None => conversations.push(Conversation {
                remote,
                messages: vec![message],
            }),
        }
    }

    pub fn get(&self, remote: SocketAddr) -> Option<Conversation> {
        self.conversations
            .lock()
            .iter()
            .find(|c| c.remote == remote)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.conversations.lock().clone()
    }

    /// Mark every message from `remote` read; returns how many were unread
    pub fn mark_read(&self, remote: SocketAddr) -> usize {
        let mut conversations = self.conversations.lock();
        let Some(conversation) = conversations.iter_mut().find(|c| c.remote == remote) else {
            return 0;
        };
        let mut marked = 0;
        for message in conversation.messages.iter_mut().filter(|m| m.unread) {
            message.unread = false;
            marked += 1;
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversations_keyed_by_endpoint() {
        let store = ConversationStore::new();
        let a: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9002".parse().unwrap();

        store.add(a, MessageAuthor::RemoteServer, "ping");
        store.add(a, MessageAuthor::LocalServer, "pong");
        store.add(b, MessageAuthor::RemoteServer, "hello");

        assert_eq!(store.snapshot().len(), 2);
        let with_a = store.get(a).unwrap();
        assert_eq!(with_a.messages.len(), 2);
        assert_eq!(with_a.last_message().unwrap().text, "pong");
        assert_eq!(with_a.unread_count(), 1);

        assert_eq!(store.mark_read(a), 1);
        assert_eq!(store.get(a).unwrap().unread_count(), 0);
        assert_eq!(store.mark_read("127.0.0.1:1".parse().unwrap()), 0);
    }
}
