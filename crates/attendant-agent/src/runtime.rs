use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::prompt::{PromptBuilder, SessionInfo, TurnContext};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
use crate::stream::StreamEvent;
use crate::thinking::{self, ThinkingLevel};
use crate::token;

/// Central agent runtime — holds the LLM provider and prompt builder.
/// Shared across all connections via Arc in AppState.
pub struct AgentRuntime {
    provider: Box<dyn LlmProvider>,
    prompt: RwLock<PromptBuilder>,
    default_model: RwLock<String>,
    thinking_level: RwLock<ThinkingLevel>,
    /// Model context window (W in spec.md §4.F), from `AgentConfig::context_window`.
    context_window: u32,
}

impl AgentRuntime {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        prompt: PromptBuilder,
        default_model: String,
        context_window: u32,
    ) -> Self {
        Self {
            provider,
            prompt: RwLock::new(prompt),
            default_model: RwLock::new(default_model),
            thinking_level: RwLock::new(ThinkingLevel::default()),
            context_window,
        }
    }

    /// The configured model context window, for §4.F's budgeting formula.
    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    /// Get the current default model name.
    pub async fn get_model(&self) -> String {
        self.default_model.read().await.clone()
    }

    /// Change the default model at runtime. Returns the previous model.
    pub async fn set_model(&self, model: String) -> String {
        let mut guard = self.default_model.write().await;
        std::mem::replace(&mut *guard, model)
    }

    /// Get the current default thinking level.
    pub async fn get_thinking_level(&self) -> ThinkingLevel {
        *self.thinking_level.read().await
    }

    /// Change the default thinking level at runtime. Returns the previous level.
    pub async fn set_thinking_level(&self, level: ThinkingLevel) -> ThinkingLevel {
        let mut guard = self.thinking_level.write().await;
        std::mem::replace(&mut *guard, level)
    }

    /// Access the LLM provider directly (for tool-loop usage).
    pub fn provider(&self) -> &dyn LlmProvider {
        &*self.provider
    }

    /// Access the prompt builder (async read lock).
    pub async fn prompt(&self) -> tokio::sync::RwLockReadGuard<'_, PromptBuilder> {
        self.prompt.read().await
    }

    /// Re-read every workspace file from disk and swap it into the live
    /// prompt builder — backs the `/reload` slash command.
    pub async fn reload_prompt(&self) {
        let mut guard = self.prompt.write().await;
        let store = crate::workspace::WorkspaceStore::new(guard.workspace_path());
        let workspace = store.load().await;
        guard.set_workspace(workspace);
    }

    /// Process a user message and return the AI response (non-streaming).
    pub async fn chat(&self, user_message: &str) -> Result<ChatResponse, ProviderError> {
        let req = self.build_request(user_message, None, None, None).await;
        info!(model = %req.model, provider = %self.provider.name(), "processing chat request");
        self.provider.send(&req).await
    }

    /// Chat with user context, session info, and optional model override.
    pub async fn chat_with_context(
        &self,
        user_message: &str,
        user_context: Option<&str>,
        session_info: Option<&SessionInfo>,
        model_override: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let req = self
            .build_request(user_message, user_context, session_info, model_override)
            .await;
        info!(
            model = %req.model, provider = %self.provider.name(),
            cached = req.system_prompt.is_some(), "processing chat request with context"
        );

        let started = Instant::now();
        let result = self.provider.send(&req).await;
        let _latency_ms = started.elapsed().as_millis() as u64;

        result
    }

    /// Stream a chat response — sends events to the provided channel.
    pub async fn chat_stream(
        &self,
        user_message: &str,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let mut req = self.build_request(user_message, None, None, None).await;
        req.stream = true;
        info!(model = %req.model, provider = %self.provider.name(), "processing streaming chat request");
        self.provider.send_stream(&req, tx).await
    }

    /// Stream with user context, session info, and optional model override.
    pub async fn chat_stream_with_context(
        &self,
        user_message: &str,
        user_context: Option<&str>,
        session_info: Option<&SessionInfo>,
        model_override: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let mut req = self
            .build_request(user_message, user_context, session_info, model_override)
            .await;
        req.stream = true;
        info!(
            model = %req.model, provider = %self.provider.name(),
            cached = req.system_prompt.is_some(), "processing streaming chat request with context"
        );

        let started = Instant::now();
        let result = self.provider.send_stream(&req, tx).await;
        let _latency_ms = started.elapsed().as_millis() as u64;

        result
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    async fn build_request(
        &self,
        user_message: &str,
        user_context: Option<&str>,
        session_info: Option<&SessionInfo>,
        model_override: Option<&str>,
    ) -> ChatRequest {
        let prompt_builder = self.prompt.read().await;
        let turn_ctx = TurnContext {
            workspace_path: prompt_builder.workspace_path(),
            pinned_context: user_context,
            recent_daily: &[],
            vector_results: &[],
            session_info,
        };
        let system_prompt = prompt_builder.build_prompt(&turn_ctx);
        let plain = system_prompt.to_plain_text();
        let model = match model_override {
            Some(m) => m.to_string(),
            None => self.default_model.read().await.clone(),
        };

        let level = *self.thinking_level.read().await;
        let estimated_input = token::estimate(&plain) + token::estimate(user_message);
        let supports = thinking::supports_extended_thinking(&model);
        let budget = level.resolve(self.context_window, estimated_input as u32, supports);
        let thinking = budget.thinking_budget.map(|_| level);

        ChatRequest {
            model,
            system: plain,
            system_prompt: Some(system_prompt),
            messages: vec![Message {
                role: Role::User,
                content: user_message.to_string(),
            }],
            max_tokens: budget.max_tokens,
            stream: false,
            thinking,
            thinking_budget: budget.thinking_budget,
            tools: Vec::new(),
            raw_messages: None,
        }
    }
}
