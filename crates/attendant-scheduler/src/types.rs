use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exactly one schedule kind — spec.md §3 `CronJob` invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire exactly once at the given UTC instant.
    At { at_ms: i64 },
    /// Fire every `interval_ms`, optionally anchored to `start_ms`
    /// (defaults to job-creation time).
    Every {
        interval_ms: i64,
        start_ms: Option<i64>,
    },
    /// Cron expression plus IANA timezone name (e.g. "Asia/Seoul", "UTC").
    Cron { expr: String, tz: String },
}

/// Tagged job payload — spec.md §3 ("typically `agentTurn{message}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    AgentTurn { message: String },
}

/// A persisted scheduled job — spec.md §3 `CronJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub chat_id: String,
    pub name: String,
    pub schedule: Schedule,
    pub payload: JobPayload,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub max_runs: Option<u32>,
}

/// A one-shot or recurring timed notification — spec.md §3 `Reminder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub chat_id: String,
    pub message: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub recurring: bool,
    pub cron_expr: Option<String>,
}

/// On-disk document shape — spec.md §4.H Persistence
/// ("Single JSON document `{version, jobs[]}`").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobDocument {
    pub version: u32,
    pub jobs: Vec<CronJob>,
}

/// Sibling document for reminders, same persistence shape as jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReminderDocument {
    pub version: u32,
    pub reminders: Vec<Reminder>,
}
