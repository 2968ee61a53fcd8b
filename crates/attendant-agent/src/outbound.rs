//! Narrow transport boundary — spec.md §9 ("express [delivery] as an
//! injected send-callback supplied at subsystem construction, never as a
//! global singleton") and §6 (`sendMessage(chatId, text)`).
//!
//! Grounded on the `Channel` trait shape, reduced to exactly the one
//! method the core subsystems (agent manager, heartbeat loop, scheduler
//! payloads, reminder store) need to deliver text back to a conversation
//! without owning — or even knowing about — the chat transport.

use async_trait::async_trait;
use attendant_core::ConversationId;

#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, chat_id: &ConversationId, text: &str) -> Result<(), String>;
}

/// Test/dev sink that records every call instead of delivering anywhere.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: std::sync::Mutex<Vec<(ConversationId, String)>>,
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn send(&self, chat_id: &ConversationId, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.clone(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_captures_sends() {
        let sink = RecordingSink::default();
        sink.send(&ConversationId::from("c1"), "hello").await.unwrap();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "hello");
    }
}
