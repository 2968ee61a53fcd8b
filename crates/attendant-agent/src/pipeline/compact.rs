//! Session compaction — LLM-based summarization for long-running sessions.
//!
//! When a conversation's in-memory history grows beyond `COMPACT_THRESHOLD`
//! messages, the oldest `COMPACT_BATCH` are sent to a cheap model (Haiku)
//! for summarization. The summary replaces them in `SessionManager`'s
//! history (spec.md §4.G) and is also ingested into long-term memory
//! (spec.md §4.C) so it stays retrievable by hybrid search after the raw
//! turns are gone.

use std::sync::Arc;

use tracing::{info, warn};

use attendant_core::ConversationId;
use attendant_sessions::types::ContentBlock;

use crate::provider::{ChatRequest, Message, Role};

use super::context::MessageContext;

const COMPACT_THRESHOLD: usize = 40;
const COMPACT_BATCH: usize = 20;

/// Compact a conversation's history when it exceeds the message threshold.
///
/// Triggered as a fire-and-forget `tokio::spawn` after each assistant turn
/// is appended.
pub async fn compact_session_if_needed<C: MessageContext + 'static>(ctx: Arc<C>, conv_id: ConversationId) {
    let history = ctx.sessions().get_history(&conv_id);
    if history.len() < COMPACT_THRESHOLD {
        return;
    }

    info!(
        session = %conv_id,
        turns = history.len(),
        "compact: threshold reached, summarizing oldest {} turns",
        COMPACT_BATCH
    );

    let old_turns = &history[..COMPACT_BATCH.min(history.len())];
    let transcript: String = old_turns
        .iter()
        .map(|m| {
            let role = match m.role {
                attendant_sessions::types::Role::User => "USER",
                attendant_sessions::types::Role::Assistant => "ASSISTANT",
            };
            let text: String = m
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            format!("{role}: {text}")
        })
        .filter(|line| !line.ends_with(": "))
        .collect::<Vec<_>>()
        .join("\n\n");

    // Call Haiku — cheapest Claude model — to condense the batch into a
    // short summary worth keeping once the raw turns are dropped.
    let req = ChatRequest {
        model: "claude-haiku-4-5-20251001".to_string(),
        system: concat!(
            "You summarize a slice of an ongoing conversation between a user and their ",
            "personal assistant. Write 3-6 terse bullet points covering facts, preferences, ",
            "and instructions the user stated that are worth remembering after these turns ",
            "are dropped from the active history. Skip tool mechanics and small talk. ",
            "If nothing is worth keeping, reply with a single line: \"(nothing notable)\"."
        )
        .to_string(),
        system_prompt: None,
        messages: vec![Message {
            role: Role::User,
            content: format!("Summarize this conversation slice:\n\n{transcript}"),
        }],
        max_tokens: 400,
        stream: false,
        thinking: None,
        thinking_budget: None,
        tools: Vec::new(),
        raw_messages: None,
    };

    let response = match ctx.agent().provider().send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, session = %conv_id, "compact: Haiku call failed");
            return;
        }
    };

    let summary = response.content.trim().to_string();
    if summary.is_empty() || summary == "(nothing notable)" {
        ctx.sessions().compact(&conv_id, Vec::new());
        info!(session = %conv_id, "compact: session trimmed with no notable summary");
        return;
    }

    ctx.sessions().compact(&conv_id, vec![summary.clone()]);

    let source = format!("compact:{conv_id}");
    if let Err(e) = ctx
        .memory()
        .ingest_source(&source, &summary, chrono::Utc::now().timestamp())
    {
        warn!(error = %e, session = %conv_id, "compact: failed to persist summary to long-term memory");
    }

    info!(session = %conv_id, "compact: session compacted and summary ingested");
}
