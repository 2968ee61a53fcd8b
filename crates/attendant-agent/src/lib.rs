//! Conversation orchestrator — spec.md §4 components D through N: token
//! estimation, the tool catalog, the LLM request/response cycle, session
//! prompt assembly, background agents, warmup, and the heartbeat/briefing
//! loops. `attendant-app` is the only crate that depends directly on this
//! one's public surface to build a running process.

pub mod anthropic;
pub mod anthropic_stream;
pub mod briefing;
pub mod heartbeat;
pub mod manager;
pub mod outbound;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod router;
pub mod runtime;
pub mod ssrf;
pub mod stream;
pub mod thinking;
pub mod token;
pub mod tools;
pub mod warmup;
pub mod workspace;

pub use manager::AgentManager;
pub use outbound::OutboundSink;
pub use prompt::{PromptBuilder, SessionInfo, SystemPrompt, TurnContext};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
pub use router::RetryingProvider;
pub use runtime::AgentRuntime;
pub use thinking::ThinkingLevel;
pub use warmup::{WarmupCoordinator, WarmupStatus};
pub use workspace::{Workspace, WorkspaceStore};
