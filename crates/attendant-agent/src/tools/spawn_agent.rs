//! `spawn_agent` tool — delegate a task to an independent background agent.
//!
//! Backs spec.md §4.K: a fire-and-forget LLM turn that runs without the
//! calling conversation's history, tracked by [`AgentManager`] and
//! delivered back through the originating chat's `OutboundSink` when it
//! finishes. The calling conversation isn't blocked waiting on it — this is
//! the only entry point that exercises `AgentManager::spawn`/`status`/`list`/
//! `cancel` outside their own tests. Action-dispatch shape follows
//! `ReminderTool`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use attendant_core::ConversationId;

use crate::manager::AgentStatus;
use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

pub struct SpawnAgentTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    chat_id: ConversationId,
}

impl<C: MessageContext + 'static> SpawnAgentTool<C> {
    pub fn new(ctx: Arc<C>, chat_id: ConversationId) -> Self {
        Self { ctx, chat_id }
    }

    fn start(&self, input: &Value) -> ToolResult {
        let task = match input.get("task").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return ToolResult::error("'task' is required for the start action"),
        };

        let ctx = Arc::clone(&self.ctx);
        let task_message = task.clone();
        // `chat` runs outside this conversation's session history and tool
        // loop by design — a delegated agent gets a fresh turn, not the
        // calling conversation's context.
        let id = self.ctx.agents().spawn(task.clone(), self.chat_id.clone(), async move {
            ctx.agent()
                .chat(&task_message)
                .await
                .map(|resp| resp.content)
                .map_err(|e| e.to_string())
        });

        ToolResult::success(format!(
            "Spawned background agent {id} for task: {task}\nYou'll be notified in this chat when it finishes."
        ))
    }

    fn status(&self, input: &Value) -> ToolResult {
        let id = match input.get("agent_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => return self.list(),
        };
        match self.ctx.agents().status(id) {
            Some(agent) => ToolResult::success(format_agent(&agent)),
            None => ToolResult::error(format!("no agent with id '{id}'")),
        }
    }

    fn list(&self) -> ToolResult {
        let agents = self.ctx.agents().list();
        if agents.is_empty() {
            return ToolResult::success("No background agents.");
        }
        let mut out = format!("Background agents ({}):\n", agents.len());
        for agent in &agents {
            out.push_str(&format!("- {}\n", format_agent(agent)));
        }
        ToolResult::success(out)
    }

    fn cancel(&self, input: &Value) -> ToolResult {
        let id = match input.get("agent_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => return ToolResult::error("'agent_id' is required for the cancel action"),
        };
        if self.ctx.agents().cancel(id) {
            ToolResult::success(format!("Agent '{id}' cancelled."))
        } else {
            ToolResult::error(format!("agent '{id}' is not running (already finished, or no such id)"))
        }
    }
}

fn format_agent(agent: &crate::manager::Agent) -> String {
    let status = match agent.status {
        AgentStatus::Running => "running",
        AgentStatus::Completed => "completed",
        AgentStatus::Failed => "failed",
        AgentStatus::Cancelled => "cancelled",
    };
    match &agent.result {
        Some(result) => format!("{} [{}] task: {} — result: {}", agent.id, status, agent.task, result),
        None => match &agent.error {
            Some(err) => format!("{} [{}] task: {} — error: {}", agent.id, status, agent.task, err),
            None => format!("{} [{}] task: {}", agent.id, status, agent.task),
        },
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for SpawnAgentTool<C> {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a background agent that runs independently \
         of this conversation, or check on/cancel one already running. Use 'start' for \
         work that takes a while and doesn't need back-and-forth (e.g. 'research X and \
         summarize', 'go through these files and report anything unusual') — the result \
         is delivered back to this chat when the agent finishes, you do not wait for it \
         here. Use 'status' to check progress (omit agent_id to list all), and 'cancel' \
         to abort a running one. Actions: 'start', 'status', 'cancel'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "status", "cancel"],
                    "description": "Operation: start a new background agent, check status (or list all), or cancel a running one."
                },
                "task": {
                    "type": "string",
                    "description": "Full, self-contained description of the task. The background agent has no access to this conversation's history, so include everything it needs. Required for start."
                },
                "agent_id": {
                    "type": "string",
                    "description": "Id returned by a previous start. Required for cancel; optional for status (omit to list all agents)."
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let action = match input.get("action").and_then(|v| v.as_str()) {
            Some(a) => a,
            None => return ToolResult::error("missing required field 'action'"),
        };

        match action {
            "start" => self.start(&input),
            "status" => self.status(&input),
            "cancel" => self.cancel(&input),
            other => ToolResult::error(format!(
                "unknown action '{other}': must be 'start', 'status', or 'cancel'"
            )),
        }
    }
}
