use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Wire-protocol version reported by `/version` — bumped whenever a
/// breaking change lands in the transport-facing message shapes.
pub const PROTOCOL_VERSION: &str = "1";

/// Tool-loop hard cap — spec.md §5 Quotas ("Tool loop hard cap 10 iterations").
pub const TOOL_LOOP_MAX_ITERATIONS: usize = 10;
/// Session cap — spec.md §5 Quotas ("History cap 100 sessions").
pub const SESSION_CAP: usize = 100;
/// Session TTL — spec.md §3 ("TTL > 24 h since last access").
pub const SESSION_TTL_HOURS: i64 = 24;
/// Memory query-result cache cap — spec.md §5 Quotas.
pub const MEMORY_QUERY_CACHE_CAP: usize = 100;
/// Scheduler tick cadence ceiling — spec.md §4.I ("periodic tick (≤ 30 s cadence)").
pub const SCHEDULER_TICK_SECS: u64 = 5;
/// Agent max lifetime — spec.md §5 Quotas.
pub const AGENT_MAX_LIFETIME_SECS: u64 = 60 * 60;
/// Agent reaper sweep cadence — spec.md §4.K ("periodic sweep (every 10 min)").
pub const AGENT_REAP_SWEEP_SECS: u64 = 10 * 60;
/// LLM request retry attempts on transient errors — spec.md §4.F.
pub const PROVIDER_MAX_RETRIES: u32 = 3;
/// Heartbeat-check cadence — spec.md §4.L ("periodic triggers").
pub const HEARTBEAT_CHECK_SECS: u64 = 60 * 60;
/// Briefing dispatch cadence — minute-resolution so `"HH:MM"` configs fire
/// within the minute they're scheduled for (spec.md §6 `briefing.json`).
pub const BRIEFING_TICK_SECS: u64 = 60;
/// Session eviction sweep cadence — spec.md §3 (stale/over-cap sessions are
/// evicted periodically, not just on access).
pub const SESSION_EVICT_SWEEP_SECS: u64 = 10 * 60;

/// Top-level config (`attendant.toml` + `ATTENDANT_*` env overrides),
/// following the figment-layered pattern in
/// `skynet_core::config::AttendantConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendantConfig {
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Per-user home directory, per spec.md §6's workspace layout
    /// (`<home>/.<app>/`).
    #[serde(default = "default_workspace_home")]
    pub home: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            home: default_workspace_home(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Concrete model string per tier. Tier names are abstract per
    /// spec.md §3; these map {small,medium,large} to provider model ids.
    #[serde(default = "default_model_small")]
    pub model_small: String,
    #[serde(default = "default_model_medium")]
    pub model_medium: String,
    #[serde(default = "default_model_large")]
    pub model_large: String,
    /// Model context window used by the dynamic budgeting formula
    /// (spec.md §4.F). Per-tier because small/large models differ.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_small: default_model_small(),
            model_medium: default_model_medium(),
            model_large: default_model_large(),
            context_window: default_context_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_cap")]
    pub cap: usize,
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cap: default_session_cap(),
            ttl_hours: default_session_ttl_hours(),
        }
    }
}

fn default_workspace_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.attendant")
}
fn default_model_small() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_model_medium() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_model_large() -> String {
    "claude-opus-4-6".to_string()
}
fn default_context_window() -> usize {
    200_000
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_db_path() -> String {
    format!("{}/memory/index.db", default_workspace_home())
}
fn default_embedding_dim() -> usize {
    384
}
fn default_tick_secs() -> u64 {
    SCHEDULER_TICK_SECS
}
fn default_session_cap() -> usize {
    SESSION_CAP
}
fn default_session_ttl_hours() -> i64 {
    SESSION_TTL_HOURS
}

impl AttendantConfig {
    /// Load config from a TOML file with `ATTENDANT_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `ATTENDANT_CONFIG`,
    /// then `~/.attendant/attendant.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("ATTENDANT_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: AttendantConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ATTENDANT_").split("_"))
            .extract()
            .map_err(|e| crate::error::AttendantError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    format!("{}/attendant.toml", default_workspace_home())
}
