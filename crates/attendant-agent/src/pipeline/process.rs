//! Non-streaming message pipeline — shared by all channel adapters.
//!
//! `process_message_non_streaming` runs the full agentic turn:
//! load session history → build system prompt → build tools → tool loop →
//! append the turn to session state → spawn compaction → return
//! `ProcessedMessage`.
//!
//! The caller only handles channel-specific formatting (WS frame, Discord
//! chunking, etc.). Everything else is here, once.

use std::sync::Arc;

use tracing::info;

use attendant_core::ConversationId;
use attendant_memory::store::HybridOptions;
use attendant_sessions::types::{ContentBlock, Message as SessionMessage, Role as SessionRole};

use crate::prompt::MemoryHit;
use crate::provider::{ChatRequest, ProviderError};
use crate::tools::tool_loop;

use super::compact::compact_session_if_needed;
use super::context::MessageContext;

/// Result of a completed non-streaming pipeline turn.
pub struct ProcessedMessage {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Names of every tool invoked while producing this turn — spec.md
    /// §4.F's `{text, toolsUsed}` contract.
    pub tools_used: Vec<String>,
}

/// Run the full non-streaming message pipeline for any channel adapter.
///
/// Steps:
/// 1. Load the session's history and pinned context from `SessionManager`.
/// 2. Build the system prompt (workspace + pinned/user context + recent
///    daily logs + a hybrid-search sweep over long-term memory).
/// 3. Build the tool list using the context's terminal/memory subsystems.
/// 4. Run `tool_loop::run_tool_loop` (LLM → tool calls → results → LLM → …).
/// 5. Append the user and assistant turns to the session's history.
/// 6. Spawn `compact_session_if_needed` (fire-and-forget).
/// 7. Return `ProcessedMessage`.
///
/// # Arguments
/// - `ctx` — shared host context (gateway `AppState`, discord `Arc<C>`, etc.)
/// - `session_key` — unique key for this user/channel conversation
/// - `channel_name` — label used for the timestamp envelope (e.g. `"discord"`)
/// - `content` — the user's message text
/// - `user_context` — optional pre-rendered long-term memory context string
/// - `model_override` — optional per-request model ID (overrides runtime default)
/// - `attachment_blocks` — optional multimodal content blocks (images, files) to append
///   to the user turn, passed straight through to the wire format.
#[allow(clippy::too_many_arguments)]
pub async fn process_message_non_streaming<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    session_key: &str,
    channel_name: &str,
    content: &str,
    user_context: Option<&str>,
    model_override: Option<&str>,
    attachment_blocks: Option<Vec<serde_json::Value>>,
) -> Result<ProcessedMessage, ProviderError> {
    let conv_id = ConversationId::from(session_key);

    // Build tools — includes execute_command, bash PTY session, reminder scheduling, skills.
    let tools = crate::tools::build::build_tools(Arc::clone(ctx), &conv_id);
    let tool_defs = crate::tools::build::tool_definitions(&tools);

    let (session_pinned, history) = ctx.sessions().build_context_for_prompt(&conv_id);

    let now = chrono::Utc::now();
    let session_info = crate::prompt::SessionInfo {
        session_key: session_key.to_string(),
        turn_count: history.len() as u32,
        timestamp: now.format("%Y-%m-%d %H:%M UTC").to_string(),
    };

    // Pinned context is the session's own notes (set via `append_pinned`);
    // `user_context` is the long-term rendered memory context passed in by
    // the caller. Both land under the same "Pinned context" section.
    let pinned_combined = match (session_pinned.is_empty(), user_context) {
        (true, Some(u)) => Some(u.to_string()),
        (true, None) => None,
        (false, Some(u)) => Some(format!("{session_pinned}\n\n{u}")),
        (false, None) => Some(session_pinned),
    };

    let prompt_builder = ctx.agent().prompt().await;
    let recent_daily = crate::workspace::WorkspaceStore::new(prompt_builder.workspace_path())
        .list_recent_daily(2)
        .await;

    let query = vector_query(&history, content);
    let vector_results: Vec<MemoryHit> = ctx
        .memory()
        .hybrid_search(&query, &HybridOptions::default())
        .await
        .unwrap_or_default()
        .into_iter()
        .take(3)
        .map(|hit| MemoryHit {
            source: hit.source,
            text: hit.text,
        })
        .collect();

    let turn_ctx = crate::prompt::TurnContext {
        workspace_path: prompt_builder.workspace_path(),
        pinned_context: pinned_combined.as_deref(),
        recent_daily: &recent_daily,
        vector_results: &vector_results,
        session_info: Some(&session_info),
    };
    let system_prompt = prompt_builder.build_prompt(&turn_ctx);
    let plain = system_prompt.to_plain_text();
    drop(prompt_builder);

    // Resolve the model: per-request override takes priority over runtime default.
    let model = match model_override {
        Some(m) => m.to_string(),
        None => ctx.agent().get_model().await,
    };

    // Bridge the session's ContentBlock-structured history straight into the
    // wire format, then append the current user turn (with any attachments).
    let mut raw_messages: Vec<serde_json::Value> = history
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect();

    let mut content_parts: Vec<serde_json::Value> = vec![serde_json::json!({
        "type": "text",
        "text": format_envelope(channel_name, &now.to_rfc3339(), content),
    })];
    if let Some(blocks) = attachment_blocks {
        content_parts.extend(blocks);
    }
    raw_messages.push(serde_json::json!({ "role": "user", "content": content_parts }));

    let thinking_level = ctx.agent().get_thinking_level().await;
    let estimated_input = crate::token::estimate(&plain) + crate::token::estimate(content);
    let supports = crate::thinking::supports_extended_thinking(&model);
    let budget = thinking_level.resolve(ctx.agent().context_window(), estimated_input as u32, supports);
    let thinking = budget.thinking_budget.map(|_| thinking_level);

    let request = ChatRequest {
        model,
        system: plain,
        system_prompt: Some(system_prompt),
        messages: Vec::new(),
        max_tokens: budget.max_tokens,
        stream: false,
        thinking,
        thinking_budget: budget.thinking_budget,
        tools: tool_defs,
        raw_messages: Some(raw_messages),
    };

    let r = tool_loop::run_tool_loop(ctx.agent().provider(), request, &tools).await?;

    info!(
        tokens_in = r.tokens_in,
        tokens_out = r.tokens_out,
        model = %r.model,
        session = %session_key,
        "pipeline: chat complete"
    );

    // Append both turns to the session, as plain text. Tool-use/tool-result
    // exchanges within a turn stay transient — they're not worth carrying
    // into the next turn's history once the final answer is in hand.
    if !r.content.is_empty() {
        let _ = ctx
            .sessions()
            .append(&conv_id, SessionMessage::text(SessionRole::User, content));
        let _ = ctx
            .sessions()
            .append(&conv_id, SessionMessage::text(SessionRole::Assistant, r.content.clone()));

        let ctx_clone = Arc::clone(ctx);
        let cid = conv_id.clone();
        tokio::spawn(async move {
            compact_session_if_needed(ctx_clone, cid).await;
        });
    }

    Ok(ProcessedMessage {
        content: r.content,
        model: r.model,
        tokens_in: r.tokens_in,
        tokens_out: r.tokens_out,
        stop_reason: r.stop_reason,
        tools_used: r.tools_used,
    })
}

/// Build the hybrid-search query per spec.md §4.N: concatenate the last two
/// user turns already in history plus the message currently being
/// answered, oldest first.
fn vector_query(history: &[SessionMessage], current: &str) -> String {
    let mut parts: Vec<String> = history
        .iter()
        .rev()
        .filter(|m| m.role == SessionRole::User)
        .take(2)
        .map(text_of)
        .collect();
    parts.reverse();
    parts.push(current.to_string());
    parts.join(" ")
}

fn text_of(message: &SessionMessage) -> String {
    message
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrap a message with a timestamp envelope.
///
/// Format: `[channel YYYY-MM-DD HH:MM UTC] content`
fn format_envelope(channel: &str, created_at: &str, content: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(created_at) {
        Ok(dt) => {
            let utc = dt.with_timezone(&chrono::Utc);
            format!("[{} {}] {}", channel, utc.format("%Y-%m-%d %H:%M UTC"), content)
        }
        Err(_) => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_envelope_wraps_with_channel_and_utc_time() {
        let out = format_envelope("discord", "2026-03-05T14:30:00-05:00", "hello");
        assert_eq!(out, "[discord 2026-03-05 19:30 UTC] hello");
    }

    #[test]
    fn format_envelope_passes_through_on_bad_timestamp() {
        let out = format_envelope("discord", "not-a-date", "hello");
        assert_eq!(out, "hello");
    }

    #[test]
    fn vector_query_takes_last_two_user_turns_oldest_first() {
        let history = vec![
            SessionMessage::text(SessionRole::User, "first question"),
            SessionMessage::text(SessionRole::Assistant, "first answer"),
            SessionMessage::text(SessionRole::User, "second question"),
            SessionMessage::text(SessionRole::Assistant, "second answer"),
            SessionMessage::text(SessionRole::User, "third question"),
            SessionMessage::text(SessionRole::Assistant, "third answer"),
        ];
        let query = vector_query(&history, "current question");
        assert_eq!(query, "second question third question current question");
    }

    #[test]
    fn vector_query_with_empty_history_is_just_the_current_message() {
        let query = vector_query(&[], "hello there");
        assert_eq!(query, "hello there");
    }

    #[test]
    fn text_of_joins_only_text_blocks() {
        let msg = SessionMessage::text(SessionRole::User, "hello world");
        assert_eq!(text_of(&msg), "hello world");
    }
}
