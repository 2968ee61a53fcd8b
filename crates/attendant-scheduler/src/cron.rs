use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::types::Schedule;

/// Bound on the forward walk in `next_run` — spec.md §4.H ("bounded to 1 year").
const MAX_WALK_MINUTES: i64 = 366 * 24 * 60;

/// Dispatch next-run computation across all three `Schedule` kinds —
/// spec.md §3 `CronJob` ("exactly one schedule kind").
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::At { at_ms } => {
            let at = DateTime::<Utc>::from_timestamp_millis(*at_ms)?;
            (at > from).then_some(at)
        }
        Schedule::Every {
            interval_ms,
            start_ms,
        } => {
            if *interval_ms <= 0 {
                return None;
            }
            let anchor = start_ms
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or(from);
            let elapsed = (from - anchor).num_milliseconds().max(0);
            let steps = elapsed / interval_ms + 1;
            Some(anchor + Duration::milliseconds(steps * interval_ms))
        }
        Schedule::Cron { expr, tz } => {
            let parsed = CronExpr::parse(expr).ok()?;
            let zone: Tz = tz.parse().unwrap_or(chrono_tz::UTC);
            next_run(&parsed, zone, from)
        }
    }
}

/// A parsed 5-field cron expression. Each field is either "any" or an
/// explicit set of accepted values, which keeps matching a single lookup
/// regardless of whether the source was `*`, a list, a range, or a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Values(Vec<u32>),
}

impl Field {
    fn matches(&self, v: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(vs) => vs.contains(&v),
        }
    }
}

const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Parse a single cron field bounded to `[min, max]`, accepting `*`,
/// `a,b,c`, `a-b`, `*/n`, `a-b/n`. Day-of-week also accepts three-letter
/// names. Rejects anything out of range or malformed.
fn parse_field(raw: &str, min: u32, max: u32, is_dow: bool) -> Result<Field, String> {
    if raw == "*" {
        return Ok(Field::Any);
    }
    let mut values = Vec::new();
    for part in raw.split(',') {
        values.extend(parse_field_part(part, min, max, is_dow)?);
    }
    values.sort_unstable();
    values.dedup();
    if values.iter().any(|v| *v < min || *v > max) {
        return Err(format!("field value out of range [{min},{max}]: {raw}"));
    }
    Ok(Field::Values(values))
}

fn parse_field_part(part: &str, min: u32, max: u32, is_dow: bool) -> Result<Vec<u32>, String> {
    let (base, step) = match part.split_once('/') {
        Some((b, s)) => (
            b,
            s.parse::<u32>().map_err(|_| format!("bad step: {s}"))?,
        ),
        None => (part, 1),
    };

    let (lo, hi) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        (resolve_value(a, is_dow)?, resolve_value(b, is_dow)?)
    } else {
        let v = resolve_value(base, is_dow)?;
        (v, v)
    };

    if step == 0 {
        return Err("step cannot be zero".to_string());
    }
    Ok((lo..=hi).step_by(step as usize).collect())
}

fn resolve_value(s: &str, is_dow: bool) -> Result<u32, String> {
    if is_dow {
        let lower = s.to_ascii_lowercase();
        if let Some(pos) = DOW_NAMES.iter().position(|n| *n == lower) {
            return Ok(pos as u32);
        }
    }
    s.parse::<u32>().map_err(|_| format!("bad field value: {s}"))
}

impl CronExpr {
    /// Parse a 5-field `minute hour day-of-month month day-of-week` string —
    /// spec.md §4.H Expression grammar.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 fields, got {}", fields.len()));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59, false)?,
            hour: parse_field(fields[1], 0, 23, false)?,
            day_of_month: parse_field(fields[2], 1, 31, false)?,
            month: parse_field(fields[3], 1, 12, false)?,
            day_of_week: parse_field(fields[4], 0, 6, true)?,
        })
    }

    fn matches(&self, dt: &DateTime<Tz>) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self.day_of_week.matches(dt.weekday().num_days_from_sunday())
    }
}

/// Timezone-aware next-run computation — spec.md §4.H Next-run computation.
/// Walks forward minute by minute in `tz`, bounded to one year, returning
/// the first instant strictly after `from` that satisfies all five fields.
pub fn next_run(expr: &CronExpr, tz: Tz, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut local = from.with_timezone(&tz);
    // Round up to the start of the next minute so `from` itself never matches.
    local = local
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))?
        + Duration::minutes(1);

    for _ in 0..MAX_WALK_MINUTES {
        if expr.matches(&local) {
            return Some(local.with_timezone(&Utc));
        }
        local += Duration::minutes(1);
    }
    None
}

/// Result of parsing a natural-language time phrase — spec.md §4.H
/// Natural-language subset. A phrase either resolves to a recurring cron
/// expression, a fixed interval, a concrete instant, or is unrecognized.
#[derive(Debug, Clone, PartialEq)]
pub enum NlSchedule {
    Cron { expr: String },
    IntervalMs(i64),
    Instant(DateTime<Utc>),
    NotRecognized,
}

/// Weekday name table ordered longest-first so a scan-in-order match never
/// takes a short prefix (e.g. "tue") over a longer name that also matches
/// the input at that position (e.g. "tuesday").
const WEEKDAY_TOKENS: &[(&str, u32)] = &[
    ("wednesday", 3),
    ("thursday", 4),
    ("saturday", 6),
    ("sunday", 0),
    ("monday", 1),
    ("tuesday", 2),
    ("friday", 5),
    ("wed", 3),
    ("thu", 4),
    ("sat", 6),
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("fri", 5),
];

fn find_weekday(text: &str) -> Option<u32> {
    WEEKDAY_TOKENS
        .iter()
        .find(|(name, _)| text.contains(name))
        .map(|(_, dow)| *dow)
}

/// Parse `H:MM` or `H` (24-hour) into `(hour, minute)`.
fn parse_hm(text: &str) -> Option<(u32, u32)> {
    if let Some((h, m)) = text.split_once(':') {
        Some((h.trim().parse().ok()?, m.trim().parse().ok()?))
    } else {
        Some((text.trim().parse().ok()?, 0))
    }
}

/// Parse the documented natural-language subset. `now` and `tz` anchor
/// relative phrases ("tomorrow", "in N minutes").
pub fn parse_natural_language(phrase: &str, now: DateTime<Utc>, tz: Tz) -> NlSchedule {
    let text = phrase.trim().to_ascii_lowercase();

    if let Some(n) = extract_number(&text, "every", "minutes").or_else(|| extract_number(&text, "every", "minute")) {
        return NlSchedule::IntervalMs(n * 60_000);
    }
    if let Some(n) = extract_number(&text, "every", "hours").or_else(|| extract_number(&text, "every", "hour")) {
        return NlSchedule::IntervalMs(n * 3_600_000);
    }
    if let Some(n) = extract_number(&text, "in", "minutes").or_else(|| extract_number(&text, "in", "minute")) {
        return NlSchedule::Instant(now + Duration::minutes(n));
    }
    if let Some(n) = extract_number(&text, "in", "hours").or_else(|| extract_number(&text, "in", "hour")) {
        return NlSchedule::Instant(now + Duration::hours(n));
    }

    if text.starts_with("every day at") || text.starts_with("daily at") {
        if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
            return NlSchedule::Cron {
                expr: format!("{m} {h} * * *"),
            };
        }
    }
    if text.starts_with("weekdays at") {
        if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
            return NlSchedule::Cron {
                expr: format!("{m} {h} * * 1-5"),
            };
        }
    }
    if text.starts_with("weekends at") {
        if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
            return NlSchedule::Cron {
                expr: format!("{m} {h} * * 0,6"),
            };
        }
    }
    if text.starts_with("every week on") {
        if let Some(dow) = find_weekday(&text) {
            if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
                return NlSchedule::Cron {
                    expr: format!("{m} {h} * * {dow}"),
                };
            }
        }
    }
    if text.starts_with("every month on the") {
        if let Some(day) = extract_ordinal_day(&text) {
            if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
                return NlSchedule::Cron {
                    expr: format!("{m} {h} {day} * *"),
                };
            }
        }
    }

    if text.starts_with("tomorrow at") {
        if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
            let local = now.with_timezone(&tz) + Duration::days(1);
            if let Some(instant) = local_at(local, h, m, tz) {
                return NlSchedule::Instant(instant);
            }
        }
    }
    if text.starts_with("today at") {
        if let Some((h, m)) = text.rsplit("at").next().and_then(parse_hm) {
            let local = now.with_timezone(&tz);
            if let Some(instant) = local_at(local, h, m, tz) {
                return NlSchedule::Instant(instant);
            }
        }
    }

    if let Some(instant) = parse_absolute(&text, tz) {
        return NlSchedule::Instant(instant);
    }

    NlSchedule::NotRecognized
}

fn extract_number(text: &str, prefix: &str, suffix: &str) -> Option<i64> {
    let rest = text.strip_prefix(prefix)?.trim();
    let rest = rest.strip_suffix(suffix)?.trim();
    rest.parse::<i64>().ok()
}

fn extract_ordinal_day(text: &str) -> Option<u32> {
    // "every month on the 15th at 9:00" — pull the digits before the suffix.
    let after = text.split("the").nth(1)?;
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit() || *c == ' ').collect();
    digits.trim().parse::<u32>().ok()
}

fn local_at(day: DateTime<Tz>, hour: u32, minute: u32, tz: Tz) -> Option<DateTime<Utc>> {
    tz.with_ymd_and_hms(day.year(), day.month(), day.day(), hour, minute, 0)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `YYYY-MM-DD HH:MM` absolute instant, interpreted in `tz`.
fn parse_absolute(text: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let (date, time) = text.split_once(' ')?;
    let (y, rest) = date.split_once('-')?;
    let (mo, d) = rest.split_once('-')?;
    let (h, mi) = time.split_once(':')?;
    tz.with_ymd_and_hms(
        y.parse().ok()?,
        mo.parse().ok()?,
        d.parse().ok()?,
        h.parse().ok()?,
        mi.trim().parse().ok()?,
        0,
    )
    .single()
    .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_star_and_range_fields() {
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        assert_eq!(expr.minute, Field::Values(vec![0]));
        assert_eq!(expr.hour, Field::Values(vec![9]));
        assert_eq!(expr.day_of_week, Field::Values(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn parses_day_of_week_names() {
        let expr = CronExpr::parse("0 9 * * mon,wed,fri").unwrap();
        assert_eq!(expr.day_of_week, Field::Values(vec![1, 3, 5]));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpr::parse("60 9 * * *").is_err());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("0 9 * *").is_err());
    }

    #[test]
    fn next_run_is_strictly_after_from() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let tz: Tz = chrono_tz::UTC;
        let from = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        let next = next_run(&expr, tz, from).unwrap();
        assert!(next > from);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn weekday_longest_match_prefers_full_name() {
        assert_eq!(find_weekday("every week on tuesday at 9:00"), Some(2));
        assert_eq!(find_weekday("every week on tue at 9:00"), Some(2));
    }

    #[test]
    fn natural_language_every_n_minutes() {
        let now = Utc::now();
        let result = parse_natural_language("every 15 minutes", now, chrono_tz::UTC);
        assert_eq!(result, NlSchedule::IntervalMs(900_000));
    }

    #[test]
    fn natural_language_unrecognized_phrase() {
        let now = Utc::now();
        let result = parse_natural_language("whenever the wind blows", now, chrono_tz::UTC);
        assert_eq!(result, NlSchedule::NotRecognized);
    }
}
