//! Agent manager — spec.md §4.K. Spawns fire-and-forget LLM tasks that run
//! independently of any conversation's session history, tracks their
//! status, and auto-delivers the result back to the originating
//! conversation through an [`OutboundSink`].
//!
//! Grounded on the `AppState::active_operations:
//! DashMap<String, CancellationToken>` pattern (`skynet-gateway/src/
//! {app,stop}.rs`) — the one piece of the dropped gateway crate worth
//! keeping, since no other crate in the pack implements background agents.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use attendant_core::ConversationId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::outbound::OutboundSink;

/// Agent max lifetime — spec.md §5 Quotas ("Agent max lifetime 1 h").
const AGENT_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);
/// How long a terminal agent stays in the table before the sweep removes it.
const AGENT_RETENTION_AFTER_COMPLETION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub task: String,
    pub chat_id: ConversationId,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Agent {
    fn new(id: String, task: String, chat_id: ConversationId) -> Self {
        Self {
            id,
            task,
            chat_id,
            status: AgentStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

pub struct AgentManager {
    agents: Arc<DashMap<String, Agent>>,
    tokens: Arc<DashMap<String, CancellationToken>>,
    sink: Arc<dyn OutboundSink>,
}

impl AgentManager {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
            tokens: Arc::new(DashMap::new()),
            sink,
        }
    }

    /// Allocate an id, record a `running` agent, and drive `work` to
    /// completion on an independent Tokio task. `work` never shares session
    /// history with the owning conversation — it's handed only the task
    /// description by the caller.
    #[instrument(skip(self, work))]
    pub fn spawn<F>(&self, task: String, chat_id: ConversationId, work: F) -> String
    where
        F: Future<Output = Result<String, String>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        self.agents
            .insert(id.clone(), Agent::new(id.clone(), task, chat_id.clone()));
        let token = CancellationToken::new();
        self.tokens.insert(id.clone(), token.clone());

        info!(agent_id = %id, %chat_id, "spawned background agent");

        let agents = Arc::clone(&self.agents);
        let sink = Arc::clone(&self.sink);
        let agent_id = id.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = work => Some(result),
                _ = token.cancelled() => None,
            };

            let Some(outcome) = outcome else {
                // Cancelled before completion — result discarded, status
                // already set to Cancelled by `cancel()`.
                return;
            };

            // The agent may have been cancelled in the same instant the
            // work future resolved; a cancelled agent's result is always
            // discarded regardless of which happened "first".
            let already_cancelled = agents
                .get(&agent_id)
                .map(|a| a.status == AgentStatus::Cancelled)
                .unwrap_or(true);
            if already_cancelled {
                return;
            }

            let message = match &outcome {
                Ok(result) => format!("Background task finished: {result}"),
                Err(err) => format!("Background task failed: {err}"),
            };

            if let Some(mut agent) = agents.get_mut(&agent_id) {
                match outcome {
                    Ok(result) => {
                        agent.status = AgentStatus::Completed;
                        agent.result = Some(result);
                    }
                    Err(err) => {
                        agent.status = AgentStatus::Failed;
                        agent.error = Some(err);
                    }
                }
                agent.completed_at = Some(Utc::now());
                let chat_id = agent.chat_id.clone();
                drop(agent);
                if let Err(e) = sink.send(&chat_id, &message).await {
                    warn!(agent_id = %agent_id, error = %e, "failed to deliver agent result");
                }
            }
        });

        id
    }

    /// Transition `running → cancelled`, abort the in-flight work, and
    /// ensure any subsequent result is discarded.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(mut agent) = self.agents.get_mut(id) else {
            return false;
        };
        if agent.status != AgentStatus::Running {
            return false;
        }
        agent.status = AgentStatus::Cancelled;
        agent.completed_at = Some(Utc::now());
        drop(agent);
        if let Some(token) = self.tokens.get(id) {
            token.cancel();
        }
        true
    }

    pub fn status(&self, id: &str) -> Option<Agent> {
        self.agents.get(id).map(|a| a.clone())
    }

    pub fn list(&self) -> Vec<Agent> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    /// Periodic sweep (spec.md §4.K: "every 10 min"). Reaps terminal agents
    /// older than their retention window, and forcibly reaps `running`
    /// agents older than [`AGENT_MAX_LIFETIME`] (stuck-agent guard).
    pub fn sweep(&self) {
        let now = Utc::now();

        let stuck: Vec<String> = self
            .agents
            .iter()
            .filter(|e| {
                e.status == AgentStatus::Running
                    && now.signed_duration_since(e.created_at)
                        > chrono::Duration::from_std(AGENT_MAX_LIFETIME).unwrap()
            })
            .map(|e| e.key().clone())
            .collect();
        for id in &stuck {
            if let Some(mut agent) = self.agents.get_mut(id) {
                warn!(agent_id = %id, "reaping stuck agent past max lifetime");
                agent.status = AgentStatus::Failed;
                agent.error = Some("reaped: exceeded max agent lifetime".to_string());
                agent.completed_at = Some(now);
            }
            if let Some(token) = self.tokens.get(id) {
                token.cancel();
            }
        }

        let expired: Vec<String> = self
            .agents
            .iter()
            .filter(|e| {
                e.completed_at.is_some_and(|completed| {
                    now.signed_duration_since(completed)
                        > chrono::Duration::from_std(AGENT_RETENTION_AFTER_COMPLETION).unwrap()
                })
            })
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            self.agents.remove(&id);
            self.tokens.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::RecordingSink;

    fn manager() -> (AgentManager, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (AgentManager::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn spawn_records_running_then_completed() {
        let (mgr, sink) = manager();
        let id = mgr.spawn(
            "summarize".to_string(),
            ConversationId::from("c1"),
            async { Ok("done".to_string()) },
        );
        assert_eq!(mgr.status(&id).unwrap().status, AgentStatus::Running);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let agent = mgr.status(&id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        assert_eq!(agent.result.as_deref(), Some("done"));
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_discards_late_result() {
        let (mgr, sink) = manager();
        let id = mgr.spawn(
            "long task".to_string(),
            ConversationId::from("c1"),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("too late".to_string())
            },
        );
        assert!(mgr.cancel(&id));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(mgr.status(&id).unwrap().status, AgentStatus::Cancelled);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_twice_is_a_no_op_the_second_time() {
        let (mgr, _sink) = manager();
        let id = mgr.spawn("t".to_string(), ConversationId::from("c1"), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("x".to_string())
        });
        assert!(mgr.cancel(&id));
        assert!(!mgr.cancel(&id));
    }

    #[tokio::test]
    async fn sweep_reaps_stuck_running_agents() {
        let (mgr, _sink) = manager();
        let id = mgr.spawn("stuck".to_string(), ConversationId::from("c1"), async {
            std::future::pending::<Result<String, String>>().await
        });
        if let Some(mut agent) = mgr.agents.get_mut(&id) {
            agent.created_at = Utc::now() - chrono::Duration::hours(2);
        }
        mgr.sweep();
        assert_eq!(mgr.status(&id).unwrap().status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn sweep_removes_old_terminal_agents() {
        let (mgr, _sink) = manager();
        let id = mgr.spawn("done".to_string(), ConversationId::from("c1"), async {
            Ok("ok".to_string())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(mut agent) = mgr.agents.get_mut(&id) {
            agent.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
        }
        mgr.sweep();
        assert!(mgr.status(&id).is_none());
    }
}
