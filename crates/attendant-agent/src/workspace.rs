//! Workspace store — spec.md §4.A. Reads and writes the fixed set of named
//! persona/memory markdown files under one per-user directory (§6's
//! `<home>/.<app>/` layout), plus the dated daily-memory log.
//!
//! Grounded on `prompt.rs::WorkspaceLoader`'s shape (ordered known-file
//! loading, per-file char caps, truncation-with-marker) but extended with
//! `save`/`append_daily_log`/`list_recent_daily`, which a read-only loader
//! never needed.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Fixed truncation marker appended whenever content exceeds its cap.
/// `pub(crate)` so the prompt builder can detect which fields were
/// truncated without re-deriving the marker text itself.
pub(crate) const TRUNCATION_MARKER: &str = "\n\n[... truncated ...]";

/// One loaded workspace snapshot — `None` for any file that was missing or
/// empty (spec.md §4.A: "Missing files yield null (non-fatal)").
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub identity: Option<String>,
    pub persona: Option<String>,
    pub user: Option<String>,
    pub rules: Option<String>,
    pub tools_notes: Option<String>,
    pub heartbeat: Option<String>,
    pub long_memory: Option<String>,
    pub onboarding: Option<String>,
}

struct FileSpec {
    name: &'static str,
    cap: Option<usize>,
}

/// Known file table in §6's order, with per-file caps per §4.A
/// ("identity 2k, persona 4k, user 3k, rules 8k, tools 3k, heartbeat 2k,
/// long-memory 6k, onboarding ∞").
const FILES: &[FileSpec] = &[
    FileSpec { name: "IDENTITY.md", cap: Some(2_000) },
    FileSpec { name: "SOUL.md", cap: Some(4_000) },
    FileSpec { name: "USER.md", cap: Some(3_000) },
    FileSpec { name: "AGENTS.md", cap: Some(8_000) },
    FileSpec { name: "TOOLS.md", cap: Some(3_000) },
    FileSpec { name: "HEARTBEAT.md", cap: Some(2_000) },
    FileSpec { name: "MEMORY.md", cap: Some(6_000) },
    FileSpec { name: "BOOTSTRAP.md", cap: None },
];

/// `attendant-agent`'s handle onto one user's workspace directory.
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every known file. Each read is independent — a missing or
    /// unreadable file just yields `None` for that field, never an error.
    ///
    /// `WorkspaceLoader` does this as a sequential fan-out over one
    /// directory listing; here each file lives at a known fixed path, so the
    /// "parallel fan-out" spec.md describes is expressed as independent
    /// blocking reads under `spawn_blocking`, joined concurrently.
    pub async fn load(&self) -> Workspace {
        let reads = FILES.iter().map(|spec| {
            let path = self.root.join(spec.name);
            let cap = spec.cap;
            tokio::task::spawn_blocking(move || read_and_truncate(&path, cap))
        });
        let mut results = Vec::with_capacity(FILES.len());
        for read in reads {
            results.push(read.await.unwrap_or(None));
        }

        let mut iter = results.into_iter();
        Workspace {
            identity: iter.next().flatten(),
            persona: iter.next().flatten(),
            user: iter.next().flatten(),
            rules: iter.next().flatten(),
            tools_notes: iter.next().flatten(),
            heartbeat: iter.next().flatten(),
            long_memory: iter.next().flatten(),
            onboarding: iter.next().flatten(),
        }
    }

    /// Overwrite one known file (or an arbitrary extra `.md` file) with
    /// `content`. Creates the workspace directory if it doesn't exist yet.
    pub async fn save(&self, file: &str, content: &str) -> std::io::Result<()> {
        let root = self.root.clone();
        let file = file.to_string();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            std::fs::write(root.join(&file), content)
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)))
    }

    /// Append a timestamped `## ` section to today's `memory/YYYY-MM-DD.md`
    /// daily log, creating the file and `memory/` directory as needed.
    pub async fn append_daily_log(&self, content: &str) -> std::io::Result<()> {
        let root = self.root.clone();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || {
            let dir = root.join("memory");
            std::fs::create_dir_all(&dir)?;
            let today = Utc::now().format("%Y-%m-%d").to_string();
            let path = dir.join(format!("{today}.md"));
            let timestamp = Utc::now().format("%H:%M:%S UTC").to_string();
            let section = format!("\n## {timestamp}\n\n{content}\n");
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            f.write_all(section.as_bytes())
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)))
    }

    /// Return today's and yesterday's daily logs (most recent first),
    /// each independently capped and trimmed oldest-section-first —
    /// spec.md §4.A ("Daily memory: today's + yesterday's files are
    /// concatenated; each is independently capped; when over cap, trim
    /// oldest `## timestamp` sections first").
    pub async fn list_recent_daily(&self, days: u32) -> Vec<(String, String)> {
        const DAILY_CAP: usize = 8_000;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            let today = Utc::now().date_naive();
            for offset in 0..days {
                let date = today - ChronoDuration::days(offset as i64);
                let name = date.format("%Y-%m-%d").to_string();
                let path = root.join("memory").join(format!("{name}.md"));
                match std::fs::read_to_string(&path) {
                    Ok(content) if !content.trim().is_empty() => {
                        out.push((name, trim_daily_sections(&content, DAILY_CAP)));
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to read daily log"),
                }
            }
            out
        })
        .await
        .unwrap_or_default()
    }
}

/// Drop leading `## ` sections (oldest first) from `content` until it fits
/// within `cap` characters, or only one section remains.
fn trim_daily_sections(content: &str, cap: usize) -> String {
    if content.len() <= cap {
        return content.to_string();
    }
    let mut boundaries: Vec<usize> = content
        .match_indices("\n## ")
        .map(|(i, _)| i + 1)
        .collect();
    if boundaries.is_empty() {
        return truncate_with_marker(content, cap);
    }
    boundaries.push(content.len());

    let mut start_section = 0;
    while start_section + 1 < boundaries.len() {
        let remaining = &content[boundaries[start_section]..];
        if remaining.len() <= cap {
            return remaining.to_string();
        }
        start_section += 1;
    }
    truncate_with_marker(&content[boundaries[boundaries.len() - 2]..], cap)
}

/// Read `path`, returning `None` if missing/unreadable/empty; otherwise
/// truncate to `cap` (if any) per spec.md §4.A's rule.
fn read_and_truncate(path: &Path, cap: Option<usize>) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    match cap {
        Some(cap) => Some(truncate_with_marker(&content, cap)),
        None => Some(content),
    }
}

/// Truncation policy: if content > cap, cut at the last `\n\n` within
/// `[cap*0.7, cap]`; else at `cap`; append the fixed marker.
pub(crate) fn truncate_with_marker(content: &str, cap: usize) -> String {
    if content.len() <= cap {
        return content.to_string();
    }
    let lower_bound = (cap as f64 * 0.7) as usize;
    let cut = content[..cap]
        .rfind("\n\n")
        .filter(|&i| i >= lower_bound)
        .unwrap_or(cap);
    let mut out = content[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workspace() -> (tempfile::TempDir, WorkspaceStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = WorkspaceStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn load_yields_none_for_missing_files() {
        let (_dir, store) = make_workspace();
        let ws = store.load().await;
        assert!(ws.identity.is_none());
        assert!(ws.persona.is_none());
    }

    #[tokio::test]
    async fn load_reads_known_files_into_their_fields() {
        let (dir, store) = make_workspace();
        std::fs::write(dir.path().join("SOUL.md"), "be kind").unwrap();
        std::fs::write(dir.path().join("IDENTITY.md"), "Attendant").unwrap();
        let ws = store.load().await;
        assert_eq!(ws.persona.as_deref(), Some("be kind"));
        assert_eq!(ws.identity.as_deref(), Some("Attendant"));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (_dir, store) = make_workspace();
        store.save("USER.md", "name: Dana").await.unwrap();
        let ws = store.load().await;
        assert_eq!(ws.user.as_deref(), Some("name: Dana"));
    }

    #[tokio::test]
    async fn append_daily_log_creates_todays_file() {
        let (_dir, store) = make_workspace();
        store.append_daily_log("had a chat about rust").await.unwrap();
        let recent = store.list_recent_daily(2).await;
        assert_eq!(recent.len(), 1);
        assert!(recent[0].1.contains("had a chat about rust"));
    }

    #[tokio::test]
    async fn list_recent_daily_skips_missing_days() {
        let (_dir, store) = make_workspace();
        store.append_daily_log("today's note").await.unwrap();
        let recent = store.list_recent_daily(5).await;
        // only today's file exists; the other 4 days are silently skipped
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn truncate_cuts_at_last_paragraph_break_in_window() {
        let content = format!("{}\n\n{}", "a".repeat(50), "b".repeat(60));
        let cap = 70;
        let result = truncate_with_marker(&content, cap);
        assert!(result.contains("[... truncated ...]"));
        assert!(!result.contains('b'));
    }

    #[test]
    fn truncate_falls_back_to_hard_cut_without_paragraph_break() {
        let content = "x".repeat(100);
        let result = truncate_with_marker(&content, 50);
        assert!(result.starts_with(&"x".repeat(50)));
        assert!(result.contains("[... truncated ...]"));
    }

    #[test]
    fn truncate_is_noop_under_cap() {
        let content = "short";
        assert_eq!(truncate_with_marker(content, 50), content);
    }

    #[test]
    fn trim_daily_sections_drops_oldest_first() {
        let content = format!(
            "## 09:00:00\n\n{}\n## 10:00:00\n\n{}\n",
            "early ".repeat(20),
            "late ".repeat(5)
        );
        let trimmed = trim_daily_sections(&content, 60);
        assert!(trimmed.contains("10:00:00"));
        assert!(!trimmed.contains("09:00:00"));
    }
}
