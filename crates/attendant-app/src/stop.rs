//! `/stop` emergency stop — cancels all running background agents, kills
//! the persistent bash session and any PTY sessions, and removes every
//! pending scheduler job.
//!
//! Grounded on `skynet-gateway/src/stop.rs`'s sequence, adapted to the
//! real `AgentManager`/`TerminalManager`/`SchedulerHandle` APIs.

use tracing::info;

use crate::app::AppState;

pub async fn execute_stop(app: &AppState) -> String {
    let mut lines: Vec<String> = Vec::new();

    let running: Vec<String> = app
        .agents
        .list()
        .into_iter()
        .filter(|a| a.status == attendant_agent::manager::AgentStatus::Running)
        .map(|a| a.id)
        .collect();
    if running.is_empty() {
        lines.push("- No running background agents".to_string());
    } else {
        for id in &running {
            app.agents.cancel(id);
            lines.push(format!("- Background agent cancelled: `{id}`"));
        }
    }

    let bash_killed = attendant_agent::tools::bash_session::kill_bash_session(app).await;
    if bash_killed {
        lines.push("- Persistent bash session killed".to_string());
    } else {
        lines.push("- No active bash session".to_string());
    }

    let mut pty_killed = 0usize;
    {
        let mut term = app.terminal.lock().await;
        let session_ids: Vec<_> = term.list().iter().map(|s| s.id.clone()).collect();
        for sid in session_ids {
            if term.kill(&sid).await.is_ok() {
                pty_killed += 1;
            }
        }
    }
    if pty_killed > 0 {
        lines.push(format!("- {pty_killed} PTY session(s) killed"));
    } else {
        lines.push("- No PTY sessions".to_string());
    }

    let mut jobs_removed = 0usize;
    if let Ok(jobs) = app.scheduler.list_jobs() {
        for job in &jobs {
            if app.scheduler.remove_job(&job.id).is_ok() {
                jobs_removed += 1;
            }
        }
    }
    if jobs_removed > 0 {
        lines.push(format!("- {jobs_removed} scheduler job(s) removed"));
    } else {
        lines.push("- No scheduler jobs".to_string());
    }

    let report = format!("**Emergency stop executed:**\n{}", lines.join("\n"));
    info!(
        agents = running.len(),
        bash = bash_killed,
        pty = pty_killed,
        jobs = jobs_removed,
        "/stop executed"
    );
    report
}
