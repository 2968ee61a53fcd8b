//! `attendant` — composition root binary. Wires the workspace/memory,
//! orchestrator, session, and scheduling subsystems into one running
//! process and hosts a minimal stdin/stdout chat transport so the core can
//! be exercised end to end — the real chat-transport client stays an
//! external collaborator per spec.md §1.

mod app;
mod stop;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use attendant_agent::anthropic::AnthropicProvider;
use attendant_agent::briefing::BriefingStore;
use attendant_agent::heartbeat::{self, HeartbeatKind};
use attendant_agent::outbound::OutboundSink;
use attendant_agent::pipeline::slash::handle_slash_command;
use attendant_agent::prompt::PromptBuilder;
use attendant_agent::runtime::AgentRuntime;
use attendant_agent::warmup::WarmupCoordinator;
use attendant_agent::workspace::WorkspaceStore;
use attendant_core::config::AttendantConfig;
use attendant_core::ConversationId;
use attendant_memory::manager::MemoryManager;
use attendant_scheduler::{JobPayload, SchedulerEngine, SchedulerHandle};
use attendant_sessions::manager::SessionManager;
use attendant_terminal::manager::TerminalManager;

use app::{AppState, PipelineRunner};

/// Every turn typed into the local terminal belongs to this one
/// conversation — a real transport would mint one `ConversationId` per
/// incoming chat.
const LOCAL_CHAT_ID: &str = "local";

/// Delivers assistant output and background-task results to stdout.
struct StdoutSink;

#[async_trait::async_trait]
impl OutboundSink for StdoutSink {
    async fn send(&self, _chat_id: &ConversationId, text: &str) -> Result<(), String> {
        println!("\n{text}\n");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendant=info".into()),
        )
        .init();

    let config_path = std::env::var("ATTENDANT_CONFIG").ok();
    let config = match AttendantConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("config load failed: {e}");
            std::process::exit(1);
        }
    };

    if config.anthropic.api_key.trim().is_empty() {
        error!("startup failed: anthropic.api_key is required (set it in attendant.toml or ATTENDANT_ANTHROPIC_API_KEY)");
        std::process::exit(1);
    }

    let workspace_home = config.workspace.home.clone();
    if let Err(e) = std::fs::create_dir_all(&workspace_home) {
        error!("startup failed: could not create workspace root {workspace_home}: {e}");
        std::process::exit(1);
    }
    if !Path::new(&workspace_home).is_dir() {
        error!("startup failed: workspace root {workspace_home} exists but is not a directory");
        std::process::exit(1);
    }

    let workspace_store = WorkspaceStore::new(&workspace_home);
    let workspace = workspace_store.load().await;
    let prompt_builder = PromptBuilder::new(workspace, workspace_home.clone());

    let anthropic = AnthropicProvider::new(
        config.anthropic.api_key.clone(),
        Some(config.anthropic.base_url.clone()),
    );
    let provider = Box::new(attendant_agent::RetryingProvider::new(
        Box::new(anthropic),
        attendant_core::config::PROVIDER_MAX_RETRIES,
    ));
    let agent = AgentRuntime::new(
        provider,
        prompt_builder,
        config.agent.model_medium.clone(),
        config.agent.context_window as u32,
    );

    let memory = match open_memory(&config.memory.db_path) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("startup failed: could not open memory store at {}: {e}", config.memory.db_path);
            std::process::exit(1);
        }
    };
    if let Err(e) = memory.warm_up() {
        warn!("memory warm_up failed (continuing): {e}");
    }

    let sessions = SessionManager::new(config.session.cap, config.session.ttl_hours);
    let terminal = TerminalManager::new(workspace_home.clone());

    let scheduler_dir = Path::new(&workspace_home).join("scheduler");
    let scheduler = match SchedulerHandle::new(&scheduler_dir) {
        Ok(s) => s,
        Err(e) => {
            error!("startup failed: could not open scheduler store: {e}");
            std::process::exit(1);
        }
    };

    let (cron_fired_tx, mut cron_fired_rx) = mpsc::channel(64);
    let scheduler_engine = match SchedulerEngine::new(
        &scheduler_dir,
        config.scheduler.tick_secs,
        Some(cron_fired_tx),
    ) {
        Ok(e) => e,
        Err(e) => {
            error!("startup failed: could not start scheduler engine: {e}");
            std::process::exit(1);
        }
    };

    let reminder_dir = Path::new(&workspace_home).join("reminders");
    let (reminder_fired_tx, mut reminder_fired_rx) = mpsc::channel(64);
    let reminders = match attendant_scheduler::ReminderStore::new(&reminder_dir, reminder_fired_tx) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("startup failed: could not open reminder store: {e}");
            std::process::exit(1);
        }
    };
    reminders.restore();

    let sink: Arc<dyn OutboundSink> = Arc::new(StdoutSink);

    let state = Arc::new(AppState::new(
        config, agent, memory, sessions, scheduler, terminal, sink.clone(),
    ));

    let warmup = WarmupCoordinator::new(state.memory.clone(), Arc::new(workspace_store));
    let status = warmup.warmup().await;
    info!(
        embedding_ok = status.embedding.ok,
        workspace_ok = status.workspace.ok,
        memory_ok = status.memory.ok,
        elapsed_ms = status.total_elapsed.as_millis() as u64,
        "warmup complete"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(scheduler_engine.run(shutdown_rx));

    // Cron jobs (`I`) fire `JobPayload::AgentTurn` back into the pipeline —
    // the AI-facing `reminder` tool is grounded here, not on `reminders`.
    {
        let state = state.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            while let Some(job) = cron_fired_rx.recv().await {
                let JobPayload::AgentTurn { message } = job.payload;
                let chat_id = ConversationId::from(job.chat_id.as_str());
                app::run_turn_and_deliver(&state, &sink, &chat_id, &message).await;
            }
        });
    }

    // One-shot/recurring exact-text reminders (`J`) bypass the LLM entirely.
    {
        let sink = sink.clone();
        let reminders = reminders.clone();
        tokio::spawn(async move {
            while let Some(reminder) = reminder_fired_rx.recv().await {
                let chat_id = ConversationId::from(reminder.chat_id.as_str());
                if let Err(e) = sink.send(&chat_id, &reminder.message).await {
                    warn!(%chat_id, error = %e, "failed to deliver reminder");
                }
                if let Err(e) = reminders.mark_fired(&reminder.id, chrono_tz::UTC) {
                    warn!(reminder_id = %reminder.id, error = %e, "failed to mark reminder fired");
                }
            }
        });
    }

    // Background agent reaper — spec.md §4.K ("periodic sweep every 10 min").
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(
                attendant_core::config::AGENT_REAP_SWEEP_SECS,
            ));
            loop {
                tick.tick().await;
                state.agents.sweep();
            }
        });
    }

    // Session eviction — periodic sweep for TTL-expired and over-cap
    // sessions, on top of the eviction `SessionManager::append` already
    // does on access.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(
                attendant_core::config::SESSION_EVICT_SWEEP_SECS,
            ));
            loop {
                tick.tick().await;
                state.sessions.evict_stale();
            }
        });
    }

    // Heartbeat checks (`L`) — periodic "anything need proactive attention?"
    // turns against the local conversation.
    {
        let runner = Arc::new(PipelineRunner(state.clone()));
        let sink = sink.clone();
        let chat_id = ConversationId::from(LOCAL_CHAT_ID);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(
                attendant_core::config::HEARTBEAT_CHECK_SECS,
            ));
            tick.tick().await; // first tick fires immediately; skip it.
            loop {
                tick.tick().await;
                heartbeat::fire(runner.as_ref(), &sink, &chat_id, HeartbeatKind::Check).await;
            }
        });
    }

    // Daily briefing dispatch (`L`) — per-chat `briefing.json` configs,
    // each firing at most once per scheduled minute.
    {
        let runner = Arc::new(PipelineRunner(state.clone()));
        let sink = sink.clone();
        let configs = BriefingStore::new(&workspace_home).load();
        if configs.is_empty() {
            info!("no briefing.json configs — briefing dispatch loop idle");
        }
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(
                attendant_core::config::BRIEFING_TICK_SECS,
            ));
            let mut fired_this_minute: std::collections::HashSet<(String, String)> =
                std::collections::HashSet::new();
            loop {
                tick.tick().await;
                let now = chrono::Utc::now();
                let minute_key = now.format("%Y-%m-%dT%H:%M").to_string();
                for config in &configs {
                    let key = (config.chat_id.clone(), minute_key.clone());
                    if fired_this_minute.contains(&key) {
                        continue;
                    }
                    if attendant_agent::briefing::is_due(config, now) {
                        fired_this_minute.insert(key);
                        let chat_id = ConversationId::from(config.chat_id.as_str());
                        heartbeat::fire(runner.as_ref(), &sink, &chat_id, HeartbeatKind::Briefing)
                            .await;
                    }
                }
                // bound the dedup set — stale minute keys accumulate otherwise.
                if fired_this_minute.len() > 10_000 {
                    fired_this_minute.clear();
                }
            }
        });
    }

    info!("attendant ready — type a message, or /help, /stop, /remind <secs> <message>");
    run_repl(&state, &reminders, &sink).await;

    let _ = shutdown_tx.send(true);
}

fn open_memory(db_path: &str) -> anyhow::Result<MemoryManager> {
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(db_path)?;
    Ok(MemoryManager::new(conn)?)
}

async fn run_repl(
    state: &Arc<AppState>,
    reminders: &Arc<attendant_scheduler::ReminderStore>,
    sink: &Arc<dyn OutboundSink>,
) {
    let chat_id = ConversationId::from(LOCAL_CHAT_ID);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break, // stdin closed (EOF) — clean shutdown.
            Err(e) => {
                error!("stdin read error: {e}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("/quit") || trimmed.eq_ignore_ascii_case("/exit") {
            break;
        }
        if trimmed.eq_ignore_ascii_case("/stop") {
            println!("{}", stop::execute_stop(state).await);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("/remind ") {
            handle_remind_command(reminders, &chat_id, rest);
            continue;
        }
        if let Some(reply) = handle_slash_command(trimmed, state.as_ref()).await {
            println!("{reply}");
            continue;
        }

        app::run_turn_and_deliver(state, sink, &chat_id, trimmed).await;
    }
}

/// `/remind <seconds> <message>` — one-shot exact-text reminder via the
/// standalone timer store (module J), distinct from the AI tool's
/// cron-engine-backed `reminder` tool.
fn handle_remind_command(
    reminders: &Arc<attendant_scheduler::ReminderStore>,
    chat_id: &ConversationId,
    rest: &str,
) {
    let mut parts = rest.splitn(2, ' ');
    let (secs, message) = (parts.next(), parts.next());
    let (Some(secs), Some(message)) = (secs, message) else {
        println!("usage: /remind <seconds> <message>");
        return;
    };
    let Ok(secs) = secs.parse::<i64>() else {
        println!("usage: /remind <seconds> <message> — seconds must be an integer");
        return;
    };
    let scheduled_at = chrono::Utc::now() + chrono::Duration::seconds(secs);
    match reminders.add(chat_id.as_str(), message, scheduled_at, false, None) {
        Ok(r) => println!("Reminder {} set for {}", r.id, r.scheduled_at.to_rfc3339()),
        Err(e) => println!("failed to set reminder: {e}"),
    }
}
