// src/scheduler/schedule.rs
// Cron expression parsing and next-run computation. The store keeps the
// user's 5-field expression verbatim; a seconds field is prepended only
// for the parser.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Timestamp format used in cron rows, comparable to SQLite datetime('now').
pub const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a standard 5-field cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "invalid cron expression '{expr}': expected 5 fields (minute hour day month weekday), got {}",
            fields.len()
        ));
    }
    let with_seconds = format!("0 {}", fields.join(" "));
    Schedule::from_str(&with_seconds).map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

/// First fire time strictly after `after`.
pub fn next_run_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

pub fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

pub fn now_db_time() -> String {
    format_db_time(Utc::now())
}

/// Validate an expression and compute its first run from now.
/// This is the synchronous check `set_cron` performs before inserting.
pub fn initial_next_run(expr: &str) -> Result<String, String> {
    let schedule = parse_schedule(expr)?;
    next_run_after(&schedule, Utc::now())
        .map(format_db_time)
        .ok_or_else(|| format!("cron expression '{expr}' never fires"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(parse_schedule("* * * * * *").is_err());
        assert!(parse_schedule("* * *").is_err());
        assert!(parse_schedule("not a cron").is_err());
        assert!(parse_schedule("61 * * * *").is_err());
    }

    #[test]
    fn test_every_minute_advances() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 15).unwrap();
        let next = next_run_after(&schedule, after).unwrap();
        assert_eq!(format_db_time(next), "2026-08-01 09:31:00");
    }

    #[test]
    fn test_daily_nine_am() {
        let schedule = parse_schedule("0 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let next = next_run_after(&schedule, after).unwrap();
        assert_eq!(format_db_time(next), "2026-08-02 09:00:00");
    }

    #[test]
    fn test_initial_next_run_is_in_the_future() {
        let next = initial_next_run("* * * * *").unwrap();
        assert!(next > now_db_time());
    }
}
