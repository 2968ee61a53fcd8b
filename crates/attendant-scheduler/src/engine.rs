use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    cron::compute_next_run,
    error::{Result, SchedulerError},
    store::JsonStore,
    types::{CronJob, JobDocument, JobPayload, Schedule},
};

/// Grace window for one-shot jobs discovered in the past on `restore()` —
/// spec.md §4.I ("one-shot jobs in the past are dropped or, if within a
/// grace window, fired once").
const RESTORE_GRACE: chrono::Duration = chrono::Duration::minutes(5);

/// Shared handle for job management (list/add/remove/enable) independent
/// of the running tick loop.
pub struct SchedulerHandle {
    store: JsonStore,
}

impl SchedulerHandle {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: JsonStore::new(dir.into())?,
        })
    }

    pub fn add_job(&self, chat_id: &str, name: &str, schedule: Schedule, payload: JobPayload) -> Result<CronJob> {
        let now = Utc::now();
        let next_run = compute_next_run(&schedule, now);
        let job = CronJob {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            name: name.to_string(),
            schedule,
            payload,
            enabled: true,
            created_at: now,
            last_run: None,
            next_run,
            run_count: 0,
            max_runs: None,
        };

        let mut doc = self.store.load_jobs();
        doc.jobs.push(job.clone());
        self.store.save_jobs(&doc)?;
        info!(job_id = %job.id, %name, "job added");
        Ok(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let mut doc = self.store.load_jobs();
        let before = doc.jobs.len();
        doc.jobs.retain(|j| j.id != id);
        if doc.jobs.len() == before {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        self.store.save_jobs(&doc)?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<CronJob>> {
        Ok(self.store.load_jobs().jobs)
    }
}

/// Tick-driven dispatch engine — spec.md §4.I. Persistence is the JSON
/// document store (4.H) rather than a SQLite `jobs` table; the tick loop
/// shape (interval against a `watch::Receiver<bool>` shutdown signal,
/// non-blocking `try_send` fan-out) matches `SchedulerEngine::run`/`tick`.
pub struct SchedulerEngine {
    store: JsonStore,
    tick_secs: u64,
    fired_tx: Option<mpsc::Sender<CronJob>>,
}

impl SchedulerEngine {
    pub fn new(dir: impl Into<PathBuf>, tick_secs: u64, fired_tx: Option<mpsc::Sender<CronJob>>) -> Result<Self> {
        Ok(Self {
            store: JsonStore::new(dir.into())?,
            tick_secs,
            fired_tx,
        })
    }

    /// On startup: recompute `nextRun` for any job that's undefined or in
    /// the past. Recurring jobs advance; one-shot jobs strictly in the past
    /// fire once if within the grace window, else are dropped.
    pub fn restore(&self) -> Result<()> {
        let now = Utc::now();
        let mut doc = self.store.load_jobs();
        let mut keep = Vec::with_capacity(doc.jobs.len());

        for mut job in doc.jobs.drain(..) {
            if !job.enabled {
                keep.push(job);
                continue;
            }
            let needs_recompute = job.next_run.map(|nr| nr <= now).unwrap_or(true);
            if !needs_recompute {
                keep.push(job);
                continue;
            }

            match &job.schedule {
                Schedule::At { .. } => {
                    let missed_at = job.next_run.unwrap_or(now);
                    if now - missed_at <= RESTORE_GRACE {
                        job.next_run = Some(now);
                        keep.push(job);
                    } else {
                        warn!(job_id = %job.id, "dropping stale one-shot job past the restore grace window");
                    }
                }
                _ => {
                    job.next_run = compute_next_run(&job.schedule, now);
                    keep.push(job);
                }
            }
        }

        doc.jobs = keep;
        self.store.save_jobs(&doc)
    }

    /// Main event loop. Ticks every `tick_secs` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        if let Err(e) = self.restore() {
            error!("scheduler restore failed: {e}");
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.tick_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch every job whose `next_run` has arrived, then atomically
    /// mark it executed (increment run_count, set last_run, recompute or
    /// disable if terminal) — spec.md §4.I.
    fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let mut doc: JobDocument = self.store.load_jobs();
        let mut changed = false;

        for job in doc.jobs.iter_mut() {
            if !job.enabled {
                continue;
            }
            let due = match job.next_run {
                Some(nr) => nr <= now,
                None => false,
            };
            if !due {
                continue;
            }

            job.run_count += 1;
            job.last_run = Some(now);
            let terminal = job
                .max_runs
                .is_some_and(|m| job.run_count >= m);
            job.next_run = if terminal {
                None
            } else {
                compute_next_run(&job.schedule, now)
            };
            if job.next_run.is_none() {
                job.enabled = false;
            }
            changed = true;

            info!(job_id = %job.id, name = %job.name, run = job.run_count, "executing job");
            if let Some(ref tx) = self.fired_tx {
                if tx.try_send(job.clone()).is_err() {
                    warn!(job_id = %job.id, "delivery channel full or closed — job dropped");
                }
            }
        }

        if changed {
            self.store.save_jobs(&doc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_list_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = SchedulerHandle::new(tmp.path()).unwrap();
        handle
            .add_job(
                "chat-1",
                "daily briefing",
                Schedule::Every {
                    interval_ms: 60_000,
                    start_ms: None,
                },
                JobPayload::AgentTurn {
                    message: "brief me".into(),
                },
            )
            .unwrap();
        let jobs = handle.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].chat_id, "chat-1");
    }

    #[test]
    fn remove_missing_job_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = SchedulerHandle::new(tmp.path()).unwrap();
        assert!(handle.remove_job("nope").is_err());
    }
}
