//! Heartbeat / briefing loops — spec.md §4.L. Periodic triggers that inject
//! a synthesized user turn ("heartbeat check" / "send briefing") into the
//! tool-use loop (§4.F) with the relevant workspace files already present
//! in the system prompt.
//!
//! Grounded on the "synthesize then deliver" shape already present in
//! `tools/reminder.rs`'s bash_command augmentation, generalized into a
//! standalone periodic trigger.

use std::sync::Arc;

use async_trait::async_trait;
use attendant_core::ConversationId;
use tracing::{debug, warn};

use crate::outbound::OutboundSink;

/// Sentinel the orchestrator returns when it decides nothing is
/// user-visible-worthy this tick — the surrounding code suppresses it
/// instead of delivering it to the transport.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Abstracts over §4.F's orchestrator: run a synthesized user turn for
/// `chat_id` and return the assistant's final text. Kept as a narrow trait
/// (rather than depending on the concrete tool-loop type) so the heartbeat
/// loop can be unit-tested against a stub.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(&self, chat_id: &ConversationId, message: &str) -> Result<String, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    Check,
    Briefing,
}

impl HeartbeatKind {
    fn synthesized_message(&self) -> &'static str {
        match self {
            HeartbeatKind::Check => {
                "[heartbeat check] Review the heartbeat checklist and recent context. \
                 If nothing needs proactive attention, respond with exactly HEARTBEAT_OK."
            }
            HeartbeatKind::Briefing => {
                "[send briefing] Compose today's briefing for the user from the workspace \
                 files already in context. If there is nothing worth sending, respond with \
                 exactly HEARTBEAT_OK."
            }
        }
    }
}

/// Fires one heartbeat/briefing turn for `chat_id` and delivers the
/// resulting text to the transport unless the orchestrator returned the
/// `HEARTBEAT_OK` sentinel.
pub async fn fire(
    runner: &dyn TurnRunner,
    sink: &Arc<dyn OutboundSink>,
    chat_id: &ConversationId,
    kind: HeartbeatKind,
) {
    let message = kind.synthesized_message();
    let result = runner.run_turn(chat_id, message).await;
    match result {
        Ok(text) if text.trim() == HEARTBEAT_OK => {
            debug!(%chat_id, ?kind, "heartbeat produced no user-visible output");
        }
        Ok(text) => {
            if let Err(e) = sink.send(chat_id, &text).await {
                warn!(%chat_id, error = %e, "failed to deliver heartbeat output");
            }
        }
        Err(e) => {
            warn!(%chat_id, ?kind, error = %e, "heartbeat turn failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::RecordingSink;

    struct StubRunner(Result<String, String>);

    #[async_trait]
    impl TurnRunner for StubRunner {
        async fn run_turn(&self, _chat_id: &ConversationId, _message: &str) -> Result<String, String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn heartbeat_ok_sentinel_is_suppressed() {
        let runner = StubRunner(Ok(HEARTBEAT_OK.to_string()));
        let recording_sink = Arc::new(RecordingSink::default());
        let sink: Arc<dyn OutboundSink> = recording_sink.clone();
        fire(&runner, &sink, &ConversationId::from("c1"), HeartbeatKind::Check).await;
        assert!(recording_sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_sentinel_text_is_delivered() {
        let runner = StubRunner(Ok("you have 3 overdue tasks".to_string()));
        let recording_sink = Arc::new(RecordingSink::default());
        let sink: Arc<dyn OutboundSink> = recording_sink.clone();
        fire(&runner, &sink, &ConversationId::from("c1"), HeartbeatKind::Briefing).await;
        let sent = recording_sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "you have 3 overdue tasks");
    }

    #[tokio::test]
    async fn failed_turn_is_logged_not_delivered() {
        let runner = StubRunner(Err("provider down".to_string()));
        let recording_sink = Arc::new(RecordingSink::default());
        let sink: Arc<dyn OutboundSink> = recording_sink.clone();
        fire(&runner, &sink, &ConversationId::from("c1"), HeartbeatKind::Check).await;
        assert!(recording_sink.sent.lock().unwrap().is_empty());
    }
}
