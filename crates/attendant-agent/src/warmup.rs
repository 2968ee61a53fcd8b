//! Warmup coordinator — spec.md §4.M. Pays the embedding-model load cost,
//! the workspace read, and the memory-chunk ingest/embed cost once, up
//! front, instead of on the first real turn.
//!
//! Grounded on `tools/bash_session.rs`'s `OnceLock`-guarded singleton
//! pattern, generalized from "one lazily-built session" to "one
//! idempotent, shared-future startup task" via [`tokio::sync::OnceCell`] —
//! concurrent callers (e.g. a heartbeat tick racing the first user message)
//! all await the same in-flight warmup instead of redoing it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use attendant_memory::MemoryManager;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::workspace::WorkspaceStore;

/// Result of one of the three warmup legs: how long it took, and whether
/// it settled or failed. A failed leg never aborts the other two —
/// spec.md §4.M ("fires tasks in parallel; individual errors don't fail
/// the bot").
#[derive(Debug, Clone)]
pub struct LegStatus {
    pub ok: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Aggregate outcome of one `warmup()` call, cached for the process
/// lifetime and handed out to every caller (including ones that arrive
/// after the first run completed).
#[derive(Debug, Clone)]
pub struct WarmupStatus {
    pub embedding: LegStatus,
    pub workspace: LegStatus,
    pub memory: LegStatus,
    pub total_elapsed: Duration,
}

impl WarmupStatus {
    /// Whether every leg settled without error — used by the health
    /// endpoint to report a single boolean alongside the structured detail.
    pub fn all_ok(&self) -> bool {
        self.embedding.ok && self.workspace.ok && self.memory.ok
    }
}

/// Coordinates the three warmup legs behind a single shared promise.
pub struct WarmupCoordinator {
    memory: Arc<MemoryManager>,
    workspace: Arc<WorkspaceStore>,
    once: OnceCell<WarmupStatus>,
}

impl WarmupCoordinator {
    pub fn new(memory: Arc<MemoryManager>, workspace: Arc<WorkspaceStore>) -> Self {
        Self {
            memory,
            workspace,
            once: OnceCell::new(),
        }
    }

    /// Runs the warmup exactly once regardless of how many callers invoke
    /// it concurrently; every caller after the first gets the cached
    /// result instantly.
    pub async fn warmup(&self) -> WarmupStatus {
        self.once
            .get_or_init(|| async { self.run().await })
            .await
            .clone()
    }

    async fn run(&self) -> WarmupStatus {
        let start = Instant::now();
        let memory = Arc::clone(&self.memory);
        let workspace = Arc::clone(&self.workspace);

        let embedding_task = tokio::task::spawn_blocking(move || time_leg(|| memory.warm_up().map_err(|e| e.to_string())));

        let workspace_for_preload = Arc::clone(&self.workspace);
        let memory_for_chunks = Arc::clone(&self.memory);
        let workspace_task = async { time_leg_async(|| async { workspace.load().await; Ok(()) }).await };
        let chunk_task = async {
            time_leg_async(|| async {
                let ws = workspace_for_preload.load().await;
                ingest_workspace_chunks(&memory_for_chunks, &ws)
            })
            .await
        };

        let (embedding, workspace_result, memory_result) =
            tokio::join!(async { embedding_task.await.unwrap_or_else(|e| failed_leg(e.to_string())) }, workspace_task, chunk_task);

        let status = WarmupStatus {
            embedding,
            workspace: workspace_result,
            memory: memory_result,
            total_elapsed: start.elapsed(),
        };
        if status.all_ok() {
            info!(elapsed_ms = status.total_elapsed.as_millis() as u64, "warmup complete");
        } else {
            warn!(?status, "warmup finished with at least one failed leg");
        }
        status
    }
}

fn ingest_workspace_chunks(
    memory: &MemoryManager,
    ws: &crate::workspace::Workspace,
) -> Result<(), String> {
    let now = chrono::Utc::now().timestamp();
    let sources: &[(&str, &Option<String>)] = &[
        ("MEMORY.md", &ws.long_memory),
        ("AGENTS.md", &ws.rules),
        ("BOOTSTRAP.md", &ws.onboarding),
    ];
    for (name, content) in sources {
        if let Some(text) = content {
            memory
                .ingest_source(name, text, now)
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

fn time_leg<T, F: FnOnce() -> Result<T, String>>(f: F) -> LegStatus {
    let start = Instant::now();
    match f() {
        Ok(_) => LegStatus { ok: true, elapsed: start.elapsed(), error: None },
        Err(e) => LegStatus { ok: false, elapsed: start.elapsed(), error: Some(e) },
    }
}

async fn time_leg_async<T, Fut: std::future::Future<Output = Result<T, String>>, F: FnOnce() -> Fut>(
    f: F,
) -> LegStatus {
    let start = Instant::now();
    match f().await {
        Ok(_) => LegStatus { ok: true, elapsed: start.elapsed(), error: None },
        Err(e) => LegStatus { ok: false, elapsed: start.elapsed(), error: Some(e) },
    }
}

fn failed_leg(error: String) -> LegStatus {
    LegStatus { ok: false, elapsed: Duration::default(), error: Some(error) }
}

impl std::fmt::Debug for WarmupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupCoordinator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_coordinator() -> (tempfile::TempDir, WarmupCoordinator) {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = Connection::open_in_memory().expect("sqlite");
        let memory = Arc::new(MemoryManager::new(conn).expect("memory manager"));
        let workspace = Arc::new(WorkspaceStore::new(dir.path()));
        (dir, WarmupCoordinator::new(memory, workspace))
    }

    #[tokio::test]
    async fn warmup_succeeds_on_empty_workspace() {
        let (_dir, coord) = test_coordinator();
        let status = coord.warmup().await;
        assert!(status.all_ok());
    }

    #[tokio::test]
    async fn warmup_ingests_present_memory_files() {
        let (dir, coord) = test_coordinator();
        std::fs::write(dir.path().join("MEMORY.md"), "## note\n\nsome durable fact worth keeping around").unwrap();
        let status = coord.warmup().await;
        assert!(status.memory.ok);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let (_dir, coord) = test_coordinator();
        let coord = Arc::new(coord);
        let a = Arc::clone(&coord);
        let b = Arc::clone(&coord);
        let (sa, sb) = tokio::join!(tokio::spawn(async move { a.warmup().await }), tokio::spawn(async move { b.warmup().await }));
        let sa = sa.unwrap();
        let sb = sb.unwrap();
        assert_eq!(sa.total_elapsed, sb.total_elapsed);
    }
}
