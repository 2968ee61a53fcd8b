//! Shared context interface for all channel adapters.
//!
//! `MessageContext` is the single trait that every channel host (gateway, discord,
//! future telegram, etc.) must implement. It replaces the old `DiscordAppContext`
//! and lets the pipeline crate stay channel-agnostic.

use attendant_memory::manager::MemoryManager;
use attendant_scheduler::SchedulerHandle;
use attendant_sessions::manager::SessionManager;
use attendant_terminal::manager::TerminalManager;

use crate::manager::AgentManager;
use crate::runtime::AgentRuntime;

/// Minimal context interface required by the shared message pipeline.
///
/// Implemented by `AppState` in `attendant-gateway` and any future channel host.
/// Defined here (in `attendant-agent`) to avoid circular dependency: all channel
/// crates depend on `attendant-agent`; `attendant-agent` depends only on `attendant-core`,
/// `attendant-memory`, `attendant-scheduler`, and `attendant-terminal`.
pub trait MessageContext: Send + Sync {
    fn agent(&self) -> &AgentRuntime;
    fn memory(&self) -> &MemoryManager;
    fn sessions(&self) -> &SessionManager;
    fn terminal(&self) -> &tokio::sync::Mutex<TerminalManager>;
    fn scheduler(&self) -> &SchedulerHandle;
    fn agents(&self) -> &AgentManager;

    /// WS listen port, for `/config`'s display — `None` outside the gateway.
    fn gateway_port(&self) -> Option<u16> {
        None
    }

    /// SQLite path, for `/config`'s display.
    fn database_path(&self) -> Option<&str> {
        None
    }
}
