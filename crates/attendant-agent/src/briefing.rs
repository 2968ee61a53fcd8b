//! Daily briefing config — spec.md §6 workspace layout's `briefing.json`
//! (`{configs:[{chatId, enabled, time, city, timezone}]}`), consumed by the
//! [`crate::heartbeat`] "send briefing" trigger.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefingConfig {
    pub chat_id: String,
    pub enabled: bool,
    /// `"HH:MM"` in `timezone`.
    pub time: String,
    pub city: Option<String>,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct BriefingDocument {
    configs: Vec<BriefingConfig>,
}

/// Reads `briefing.json` once at startup. A missing or corrupt file yields
/// an empty config list rather than a fatal error — briefings are optional.
pub struct BriefingStore {
    path: PathBuf,
}

impl BriefingStore {
    pub fn new(workspace_home: impl AsRef<Path>) -> Self {
        Self {
            path: workspace_home.as_ref().join("briefing.json"),
        }
    }

    pub fn load(&self) -> Vec<BriefingConfig> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<BriefingDocument>(&raw) {
                Ok(doc) => doc.configs,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "corrupt briefing.json, ignoring");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }
}

/// Whether `config`'s scheduled `"HH:MM"` matches the current minute in its
/// timezone. Used by the briefing dispatch tick (minute-resolution cadence)
/// to decide whether to fire today's briefing for this chat.
pub fn is_due(config: &BriefingConfig, now: DateTime<Utc>) -> bool {
    if !config.enabled {
        return false;
    }
    let Ok(zone) = config.timezone.parse::<Tz>() else {
        return false;
    };
    let local = now.with_timezone(&zone);
    let formatted = format!("{:02}:{:02}", local.hour(), local.minute());
    formatted == config.time
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg(time: &str, tz: &str, enabled: bool) -> BriefingConfig {
        BriefingConfig {
            chat_id: "c1".to_string(),
            enabled,
            time: time.to_string(),
            city: None,
            timezone: tz.to_string(),
        }
    }

    #[test]
    fn matches_exact_utc_minute() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 8, 30, 0).unwrap();
        assert!(is_due(&cfg("08:30", "UTC", true), now));
    }

    #[test]
    fn disabled_never_fires() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 8, 30, 0).unwrap();
        assert!(!is_due(&cfg("08:30", "UTC", false), now));
    }

    #[test]
    fn respects_timezone_offset() {
        // 08:30 UTC is 00:30 in America/Los_Angeles (PST, UTC-8) in March.
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 8, 30, 0).unwrap();
        assert!(is_due(&cfg("00:30", "America/Los_Angeles", true), now));
        assert!(!is_due(&cfg("08:30", "America/Los_Angeles", true), now));
    }

    #[test]
    fn unknown_timezone_never_fires() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 8, 30, 0).unwrap();
        assert!(!is_due(&cfg("08:30", "Not/AZone", true), now));
    }
}
