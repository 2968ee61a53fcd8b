//! Tool execution loop — the core agentic behavior.
//!
//! Flow: prompt → LLM → if tool_use → execute tools (in parallel) → inject
//! results → LLM → repeat. Stops when: stop_reason is not "tool_use", max
//! iterations reached, or error.

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use attendant_core::config::TOOL_LOOP_MAX_ITERATIONS;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};
use crate::stream::StreamEvent;

use super::{Tool, ToolResult};

/// Default per-tool timeout; command-execution tools get a longer ceiling.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
/// Tool names that run arbitrary shell commands and need the longer ceiling.
const COMMAND_TOOL_NAMES: &[&str] = &["execute_command", "bash"];

/// Hard cap on a single tool result's content before it's handed back to
/// the model.
const RESULT_CAP: usize = 10_000;

const TOO_MANY_TOOL_CALLS_MESSAGE: &str =
    "I've made too many tool calls while working on this and need to stop here. \
     Here's a summary of what I attempted:";

/// Run the full tool execution loop (non-streaming).
///
/// Starts from `initial_request`, which must have `messages` or `raw_messages` set.
/// Returns the final `ChatResponse` (the one with `stop_reason != "tool_use"`),
/// with `tools_used` carrying every tool name called across all iterations.
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    initial_request: ChatRequest,
    tools: &[Box<dyn Tool>],
) -> Result<ChatResponse, crate::provider::ProviderError> {
    // Build initial raw JSON message list from the structured messages.
    let mut raw_messages: Vec<serde_json::Value> =
        if let Some(ref raw) = initial_request.raw_messages {
            raw.clone()
        } else {
            initial_request
                .messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
                .collect()
        };

    let mut tools_used: Vec<String> = Vec::new();
    let mut call_summaries: Vec<String> = Vec::new();

    for iteration in 0..TOOL_LOOP_MAX_ITERATIONS {
        // Build the request for this iteration, injecting the full message history.
        // Subsequent tool-loop turns disable thinking, to avoid provider errors
        // on tool-result continuations (spec.md §4.F step 4).
        let mut req = initial_request.clone();
        req.raw_messages = Some(raw_messages.clone());
        if iteration > 0 {
            req.thinking = None;
            req.thinking_budget = None;
        }

        debug!(iteration, "tool loop iteration");

        let mut response = provider.send(&req).await?;

        if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
            info!(iteration, "tool loop complete — no more tool calls");
            response.tools_used = tools_used;
            return Ok(response);
        }

        // Build the assistant turn content block list.
        // It includes any text content plus the tool_use blocks.
        let mut assistant_content: Vec<serde_json::Value> = Vec::new();

        if !response.content.is_empty() {
            assistant_content.push(serde_json::json!({
                "type": "text",
                "text": response.content,
            }));
        }

        for call in &response.tool_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }

        // Append the assistant message.
        raw_messages.push(serde_json::json!({
            "role": "assistant",
            "content": assistant_content,
        }));

        // Execute every tool call in parallel (fan-out), each under its own
        // timeout, preserving result order by index so the tool_result
        // blocks line up with their tool_use blocks even though they ran
        // concurrently — spec.md §4.F step 2/3.
        let executions = response
            .tool_calls
            .iter()
            .map(|call| execute_tool(tools, call));
        let results = join_all(executions).await;

        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();
        for (call, result) in response.tool_calls.iter().zip(results.into_iter()) {
            tools_used.push(call.name.clone());
            call_summaries.push(format!(
                "{}({}) -> {}",
                call.name,
                truncate_chars(&call.input.to_string(), 200),
                truncate_chars(&result.content, 500),
            ));
            tool_result_content.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": result.content,
                "is_error": result.is_error,
            }));
        }

        // Append the user message containing all tool results.
        raw_messages.push(serde_json::json!({
            "role": "user",
            "content": tool_result_content,
        }));
    }

    warn!(
        max_iterations = TOOL_LOOP_MAX_ITERATIONS,
        "tool loop hit maximum iterations"
    );

    // Unresolved tool_use blocks were just appended without a matching
    // tool_result turn, so replaying the last response would violate the
    // tool_use/tool_result pairing invariant on the next turn. Return a
    // fixed message plus what was actually attempted instead — spec.md
    // §4.F ("return a fixed ... message and the accumulated summaries").
    let content = if call_summaries.is_empty() {
        TOO_MANY_TOOL_CALLS_MESSAGE.to_string()
    } else {
        format!("{TOO_MANY_TOOL_CALLS_MESSAGE}\n{}", call_summaries.join("\n"))
    };

    Ok(ChatResponse {
        content,
        model: initial_request.model,
        tokens_in: 0,
        tokens_out: 0,
        stop_reason: "max_tool_iterations".to_string(),
        tool_calls: Vec::new(),
        tools_used,
    })
}

/// Stream the first turn; if it asks for tools, fall back to the
/// non-streaming tool loop with thinking disabled and relay the final
/// answer as a single `TextDelta` + `Done` — spec.md §4.F ("the streaming
/// variant falls back to the non-streaming tool-use loop, with thinking
/// disabled, once the model requests a tool").
///
/// Every event from the first (real) streaming attempt is relayed to `tx`
/// as it arrives, so callers that don't need tools see no difference.
pub async fn run_tool_loop_stream(
    provider: &dyn LlmProvider,
    initial_request: ChatRequest,
    tools: &[Box<dyn Tool>],
    tx: mpsc::Sender<StreamEvent>,
) -> Result<(), ProviderError> {
    let (inner_tx, mut inner_rx) = mpsc::channel::<StreamEvent>(64);
    provider.send_stream(&initial_request, inner_tx).await?;

    let mut saw_tool_use = false;
    let mut done_event: Option<StreamEvent> = None;
    while let Some(event) = inner_rx.recv().await {
        if matches!(event, StreamEvent::ToolUse { .. }) {
            saw_tool_use = true;
            continue; // swallowed — the non-streaming loop re-derives tool calls itself.
        }
        if let StreamEvent::Done { .. } = &event {
            done_event = Some(event);
            continue;
        }
        if tx.send(event).await.is_err() {
            return Ok(()); // receiver dropped
        }
    }

    let Some(StreamEvent::Done { stop_reason, .. }) = done_event else {
        return Ok(());
    };

    if !saw_tool_use && stop_reason != "tool_use" {
        let _ = tx
            .send(StreamEvent::Done {
                model: initial_request.model.clone(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason,
            })
            .await;
        return Ok(());
    }

    info!("stream requested tool use — falling back to non-streaming tool loop");
    let mut fallback_request = initial_request;
    fallback_request.stream = false;
    // spec.md §4.F: thinking is disabled for the fallback and every
    // subsequent tool-loop turn, same as the non-streaming path.
    fallback_request.thinking = None;
    fallback_request.thinking_budget = None;

    let response = run_tool_loop(provider, fallback_request, tools).await?;
    let _ = tx.send(StreamEvent::TextDelta { text: response.content }).await;
    let _ = tx
        .send(StreamEvent::Done {
            model: response.model,
            tokens_in: response.tokens_in,
            tokens_out: response.tokens_out,
            stop_reason: response.stop_reason,
        })
        .await;
    Ok(())
}

/// Find and execute the named tool under its timeout. Returns an error
/// `ToolResult` if the tool is unknown or times out, and compresses the
/// result per spec.md §4.E before it's handed back to the model.
async fn execute_tool(tools: &[Box<dyn Tool>], call: &ToolCall) -> ToolResult {
    let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
        return ToolResult::error(format!("unknown tool: {}", call.name));
    };

    debug!(tool = %call.name, "executing tool");
    let budget = if COMMAND_TOOL_NAMES.contains(&call.name.as_str()) {
        COMMAND_TOOL_TIMEOUT
    } else {
        DEFAULT_TOOL_TIMEOUT
    };

    let mut result = match timeout(budget, tool.execute(call.input.clone())).await {
        Ok(result) => result,
        Err(_) => {
            warn!(tool = %call.name, timeout_secs = budget.as_secs(), "tool call timed out");
            return ToolResult::error(format!(
                "Error: tool '{}' timed out after {}s",
                call.name,
                budget.as_secs()
            ));
        }
    };

    result.content = compress_result(&call.name, result.content);
    result
}

/// Tool-specific result compression, per spec.md §4.E.
fn compress_result(tool_name: &str, content: String) -> String {
    if content.len() <= RESULT_CAP {
        return content;
    }
    match tool_name {
        // Folders first, then as many files as fit (head + tail) within the cap.
        "list_files" => {
            let (dirs, files): (Vec<&str>, Vec<&str>) =
                content.lines().partition(|l| l.trim_end().ends_with('/'));
            let mut out = dirs.join("\n");
            let remaining = RESULT_CAP.saturating_sub(out.len());
            let files_joined = files.join("\n");
            if files_joined.len() <= remaining {
                if !out.is_empty() && !files_joined.is_empty() {
                    out.push('\n');
                }
                out.push_str(&files_joined);
            } else {
                let half = remaining / 2;
                let head: String = files_joined.chars().take(half).collect();
                let tail: String = files_joined
                    .chars()
                    .rev()
                    .take(half)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&head);
                out.push_str("\n... (truncated) ...\n");
                out.push_str(&tail);
            }
            out
        }
        // Preserve the head of a file read — the start of a file is almost
        // always the part worth keeping (imports, signatures, structure).
        "read_file" => {
            let head_cap = RESULT_CAP * 8 / 10;
            let head: String = content.chars().take(head_cap).collect();
            format!("{head}\n... (truncated)")
        }
        _ => {
            let head: String = content.chars().take(RESULT_CAP).collect();
            format!("{head}... (truncated)")
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, input: serde_json::Value) -> ToolResult {
            ToolResult::success(input.to_string())
        }
    }

    /// Calls a tool once, then answers plainly.
    struct OneShotToolProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for OneShotToolProvider {
        fn name(&self) -> &str {
            "test"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ChatResponse {
                    content: String::new(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "tool_use".to_string(),
                    tool_calls: vec![ToolCall {
                        id: "tu-1".to_string(),
                        name: "echo".to_string(),
                        input: serde_json::json!({"x": 1}),
                    }],
                    tools_used: Vec::new(),
                })
            } else {
                Ok(ChatResponse {
                    content: "done".to_string(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "end_turn".to_string(),
                    tool_calls: Vec::new(),
                    tools_used: Vec::new(),
                })
            }
        }
    }

    /// Always wants a tool — used to exercise the max-iteration cutoff.
    struct AlwaysToolProvider;

    #[async_trait]
    impl LlmProvider for AlwaysToolProvider {
        fn name(&self) -> &str {
            "test"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: String::new(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "tool_use".to_string(),
                tool_calls: vec![ToolCall {
                    id: "tu-loop".to_string(),
                    name: "echo".to_string(),
                    input: serde_json::json!({}),
                }],
                tools_used: Vec::new(),
            })
        }
    }

    /// Streams a ToolUse event then Done{tool_use}, then answers plainly on
    /// the non-streaming fallback call.
    struct StreamThenFallbackProvider;

    #[async_trait]
    impl LlmProvider for StreamThenFallbackProvider {
        fn name(&self) -> &str {
            "test"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            assert!(req.thinking.is_none(), "fallback must disable thinking");
            Ok(ChatResponse {
                content: "fallback answer".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".to_string(),
                tool_calls: Vec::new(),
                tools_used: Vec::new(),
            })
        }
        async fn send_stream(
            &self,
            _req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            tx.send(StreamEvent::TextDelta { text: "partial".to_string() }).await.ok();
            tx.send(StreamEvent::ToolUse {
                id: "tu-1".to_string(),
                name: "echo".to_string(),
                input: serde_json::json!({}),
            })
            .await
            .ok();
            tx.send(StreamEvent::Done {
                model: "test-model".to_string(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "tool_use".to_string(),
            })
            .await
            .ok();
            Ok(())
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            system: "sys".to_string(),
            system_prompt: None,
            messages: Vec::new(),
            max_tokens: 64,
            stream: false,
            thinking: Some(crate::thinking::ThinkingLevel::Medium),
            thinking_budget: Some(1024),
            tools: Vec::new(),
            raw_messages: Some(vec![serde_json::json!({"role": "user", "content": "hi"})]),
        }
    }

    fn tools() -> Vec<Box<dyn Tool>> {
        vec![Box::new(EchoTool)]
    }

    #[tokio::test]
    async fn runs_a_tool_then_returns_final_response_with_tools_used() {
        let provider = OneShotToolProvider { calls: AtomicU32::new(0) };
        let resp = run_tool_loop(&provider, request(), &tools()).await.unwrap();
        assert_eq!(resp.content, "done");
        assert_eq!(resp.tools_used, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn hitting_max_iterations_returns_fixed_message_with_summaries() {
        let provider = AlwaysToolProvider;
        let resp = run_tool_loop(&provider, request(), &tools()).await.unwrap();
        assert_eq!(resp.stop_reason, "max_tool_iterations");
        assert!(resp.content.starts_with(TOO_MANY_TOOL_CALLS_MESSAGE));
        assert_eq!(resp.tools_used.len(), TOOL_LOOP_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn unknown_tool_name_returns_an_error_result_without_panicking() {
        let call = ToolCall {
            id: "tu-x".to_string(),
            name: "does_not_exist".to_string(),
            input: serde_json::json!({}),
        };
        let result = execute_tool(&tools(), &call).await;
        assert!(result.is_error);
    }

    #[test]
    fn compress_result_default_branch_truncates_over_cap() {
        let huge = "a".repeat(RESULT_CAP + 100);
        let compressed = compress_result("some_other_tool", huge);
        assert!(compressed.ends_with("... (truncated)"));
        assert!(compressed.len() < RESULT_CAP + 100);
    }

    #[test]
    fn compress_result_under_cap_is_unchanged() {
        let small = "hello".to_string();
        assert_eq!(compress_result("read_file", small.clone()), small);
    }

    #[tokio::test]
    async fn streaming_tool_use_falls_back_to_non_streaming_loop_with_thinking_off() {
        let provider = StreamThenFallbackProvider;
        let (tx, mut rx) = mpsc::channel(16);
        run_tool_loop_stream(&provider, request(), &tools(), tx).await.unwrap();

        let events = Mutex::new(Vec::new());
        while let Some(event) = rx.recv().await {
            events.lock().unwrap().push(event);
        }
        let events = events.into_inner().unwrap();

        assert!(events.iter().any(|e| matches!(e, StreamEvent::TextDelta { text } if text == "partial")));
        assert!(events.iter().any(
            |e| matches!(e, StreamEvent::TextDelta { text } if text == "fallback answer")
        ));
        assert!(matches!(events.last(), Some(StreamEvent::Done { stop_reason, .. }) if stop_reason == "end_turn"));
    }
}
