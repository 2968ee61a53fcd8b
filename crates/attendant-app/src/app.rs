//! Composition root state — wires the four core subsystems (B/C workspace +
//! memory, F orchestrator, G sessions, H/I/J scheduling) behind one
//! `MessageContext` implementation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use attendant_agent::heartbeat::TurnRunner;
use attendant_agent::manager::AgentManager;
use attendant_agent::outbound::OutboundSink;
use attendant_agent::pipeline::MessageContext;
use attendant_agent::runtime::AgentRuntime;
use attendant_core::ConversationId;
use attendant_memory::manager::MemoryManager;
use attendant_scheduler::SchedulerHandle;
use attendant_sessions::manager::SessionManager;
use attendant_terminal::manager::TerminalManager;
use tracing::info;

/// Shared state for the single running process — one `Arc<AppState>` per
/// `attendant` binary. Every background loop and every turn of the pipeline
/// holds a clone of this `Arc`.
pub struct AppState {
    pub config: attendant_core::config::AttendantConfig,
    pub agent: AgentRuntime,
    pub memory: Arc<MemoryManager>,
    pub sessions: SessionManager,
    pub scheduler: SchedulerHandle,
    pub terminal: tokio::sync::Mutex<TerminalManager>,
    pub agents: AgentManager,
}

impl AppState {
    pub fn new(
        config: attendant_core::config::AttendantConfig,
        agent: AgentRuntime,
        memory: Arc<MemoryManager>,
        sessions: SessionManager,
        scheduler: SchedulerHandle,
        terminal: TerminalManager,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            config,
            agent,
            memory,
            sessions,
            scheduler,
            terminal: tokio::sync::Mutex::new(terminal),
            agents: AgentManager::new(sink),
        }
    }

    pub fn workspace_home(&self) -> PathBuf {
        PathBuf::from(&self.config.workspace.home)
    }
}

impl MessageContext for AppState {
    fn agent(&self) -> &AgentRuntime {
        &self.agent
    }

    fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn terminal(&self) -> &tokio::sync::Mutex<TerminalManager> {
        &self.terminal
    }

    fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    fn agents(&self) -> &AgentManager {
        &self.agents
    }

    fn database_path(&self) -> Option<&str> {
        Some(&self.config.memory.db_path)
    }
}

/// Drive a single completed turn through the shared pipeline and deliver
/// the reply (or log the failure) through `sink`. Shared by the stdin loop,
/// the cron-job dispatcher (`JobPayload::AgentTurn`), and the reminder
/// fired-channel drain.
pub async fn run_turn_and_deliver(
    state: &Arc<AppState>,
    sink: &Arc<dyn OutboundSink>,
    chat_id: &ConversationId,
    message: &str,
) {
    let result = attendant_agent::pipeline::process_message_non_streaming(
        state,
        chat_id.as_str(),
        "cli",
        message,
        None,
        None,
        None,
    )
    .await;

    match result {
        Ok(processed) if !processed.content.is_empty() => {
            if let Err(e) = sink.send(chat_id, &processed.content).await {
                tracing::warn!(%chat_id, error = %e, "failed to deliver turn output");
            }
        }
        Ok(_) => info!(%chat_id, "turn produced no output"),
        Err(e) => tracing::warn!(%chat_id, error = %e, "turn failed"),
    }
}

/// Bridges the pipeline into [`TurnRunner`] so the heartbeat/briefing loops
/// (spec.md §4.L) can fire a synthesized turn without knowing how it's
/// delivered — `heartbeat::fire` handles suppressing `HEARTBEAT_OK` and
/// delivering everything else through the same `OutboundSink`.
pub struct PipelineRunner(pub Arc<AppState>);

#[async_trait]
impl TurnRunner for PipelineRunner {
    async fn run_turn(&self, chat_id: &ConversationId, message: &str) -> Result<String, String> {
        attendant_agent::pipeline::process_message_non_streaming(
            &self.0,
            chat_id.as_str(),
            "heartbeat",
            message,
            None,
            None,
            None,
        )
        .await
        .map(|p| p.content)
        .map_err(|e| e.to_string())
    }
}
