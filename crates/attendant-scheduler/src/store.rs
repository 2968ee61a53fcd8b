use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::{JobDocument, ReminderDocument};

/// Lock acquisition retry budget — spec.md §4.H Persistence
/// ("retry ≤ 100 × 50 ms").
const LOCK_RETRIES: u32 = 100;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);
/// A lock file older than this is presumed abandoned by a crashed process.
const STALE_LOCK_AGE: Duration = Duration::from_secs(5);

/// JSON-document-backed store for jobs and reminders, each behind its own
/// advisory file lock — spec.md §4.H Persistence. SQLite-backed job
/// storage isn't a fit here; follows the crate's usual `thiserror`/
/// `tracing` conventions and the standard create-lockfile-then-atomic-
/// rename recipe.
pub struct JsonStore {
    jobs_path: PathBuf,
    reminders_path: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            jobs_path: dir.join("jobs.json"),
            reminders_path: dir.join("reminders.json"),
        })
    }

    pub fn load_jobs(&self) -> JobDocument {
        load_or_default(&self.jobs_path)
    }

    pub fn save_jobs(&self, doc: &JobDocument) -> Result<()> {
        with_lock(&self.jobs_path, || write_atomic(&self.jobs_path, doc))
    }

    pub fn load_reminders(&self) -> ReminderDocument {
        load_or_default(&self.reminders_path)
    }

    pub fn save_reminders(&self, doc: &ReminderDocument) -> Result<()> {
        with_lock(&self.reminders_path, || write_atomic(&self.reminders_path, doc))
    }
}

fn load_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt store file, starting empty");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

fn write_atomic<T: serde::Serialize>(path: &Path, doc: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(doc).map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn with_lock<F: FnOnce() -> Result<()>>(path: &Path, f: F) -> Result<()> {
    let lock_path = path.with_extension("lock");
    acquire_lock(&lock_path)?;
    let result = f();
    let _ = fs::remove_file(&lock_path);
    result
}

fn acquire_lock(lock_path: &Path) -> Result<()> {
    for _ in 0..LOCK_RETRIES {
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(_) => return Ok(()),
            Err(_) => {
                if is_stale(lock_path) {
                    let _ = fs::remove_file(lock_path);
                    continue;
                }
                sleep(LOCK_RETRY_DELAY);
            }
        }
    }
    Err(SchedulerError::LimitExceeded(format!(
        "could not acquire lock {}",
        lock_path.display()
    )))
}

fn is_stale(lock_path: &Path) -> bool {
    let meta = match fs::metadata(lock_path) {
        Ok(m) => m,
        Err(_) => return true,
    };
    let modified = match meta.modified() {
        Ok(m) => m,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > STALE_LOCK_AGE)
        .unwrap_or(false)
}

#[allow(dead_code)]
fn touch(path: &Path) -> std::io::Result<()> {
    File::create(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_document() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::new(tmp.path()).unwrap();
        let doc = store.load_jobs();
        assert!(doc.jobs.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        use crate::types::{CronJob, JobPayload, Schedule};
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::new(tmp.path()).unwrap();
        let job = CronJob {
            id: "job-1".into(),
            chat_id: "chat-1".into(),
            name: "test".into(),
            schedule: Schedule::At { at_ms: 0 },
            payload: JobPayload::AgentTurn {
                message: "hi".into(),
            },
            enabled: true,
            created_at: chrono::Utc::now(),
            last_run: None,
            next_run: None,
            run_count: 0,
            max_runs: None,
        };
        store
            .save_jobs(&crate::types::JobDocument {
                version: 1,
                jobs: vec![job],
            })
            .unwrap();
        let loaded = store.load_jobs();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].id, "job-1");
    }

    #[test]
    fn corrupt_file_yields_empty_document() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonStore::new(tmp.path()).unwrap();
        fs::write(tmp.path().join("jobs.json"), "{not json").unwrap();
        let doc = store.load_jobs();
        assert!(doc.jobs.is_empty());
    }
}
