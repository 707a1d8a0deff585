// src/scheduler/cron.rs

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::errors::{Result, SnapdError};

/// Number of fields in an accepted expression: `sec min hour dom month dow`.
pub const CRON_FIELDS: usize = 6;

/// Parse a six-field cron expression.
///
/// Five-field (minute granularity) and seven-field (with year) forms are
/// rejected so every schedule in a config reads the same way.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    if fields != CRON_FIELDS {
        return Err(SnapdError::InvalidSchedule {
            expr: expr.to_string(),
            reason: format!(
                "expected {CRON_FIELDS} fields (sec min hour day-of-month month day-of-week), got {fields}"
            ),
        });
    }

    Schedule::from_str(expr).map_err(|e| SnapdError::InvalidSchedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time strictly after both `previous` (if any) and `now`.
pub fn next_fire(
    schedule: &Schedule,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let from = previous.map_or(now, |p| p.max(now));
    schedule.after(&from).next()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn six_fields_accepted() {
        assert!(parse_schedule("0 * * * * *").is_ok());
        assert!(parse_schedule("*/10 * * * * *").is_ok());
        assert!(parse_schedule("0 0 3 * * Sun").is_ok());
    }

    #[test]
    fn other_field_counts_rejected() {
        let err = parse_schedule("* * * * *").unwrap_err();
        assert!(err.to_string().contains("expected 6 fields"), "{err}");
        assert!(parse_schedule("0 0 0 1 1 * 2030").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            parse_schedule("a b c d e f"),
            Err(SnapdError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn next_fire_never_repeats_previous() {
        let schedule = parse_schedule("0 * * * * *").expect("valid");
        let prev = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).single().expect("valid date");
        // Clock slightly behind the last fire time must not fire it again.
        let now = prev - chrono::Duration::milliseconds(5);
        let next = next_fire(&schedule, Some(prev), now).expect("next");
        assert_eq!(next, prev + chrono::Duration::minutes(1));
    }
}
