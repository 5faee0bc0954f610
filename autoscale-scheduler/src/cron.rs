//! `next_cron_occurrence` (§4.7): the earliest time strictly greater than
//! `now` matching a standard 5-field cron expression. Grounded in
//! `otter.scheduler.next_cron_occurrence`'s `croniter(...).get_next()`, and
//! in the pack's own cron usage (`cron_scheduler.rs`'s `Schedule::from_str`
//! + `.after(&now)`), which is built on the 6-field (seconds-first) form
//! the `cron` crate actually parses.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("invalid cron expression {0:?}: {1}")]
    Invalid(String, String),
    #[error("cron expression {0:?} has no occurrence after the given time")]
    NoNextOccurrence(String),
}

/// Policies author standard 5-field expressions (minute hour
/// day-of-month month day-of-week); the `cron` crate requires a
/// seconds-first 6th field, so a literal `:00` is prepended before parsing.
fn to_six_field(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_owned()
    }
}

/// Returns the earliest time strictly greater than `now` matching `expr`.
pub fn next_cron_occurrence(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    let normalized = to_six_field(expr);
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| CronError::Invalid(expr.to_owned(), e.to_string()))?;
    schedule
        .after(&now)
        .next()
        .ok_or_else(|| CronError::NoNextOccurrence(expr.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_five_minutes_from_exact_boundary() {
        // §8 scenario 5: cron="*/5 * * * *" at t=12:00:00 -> next=12:05:00.
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap();
        let next = next_cron_occurrence("*/5 * * * *", now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn result_is_strictly_after_now() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_cron_occurrence("0 * * * *", now).unwrap();
        assert!(next > now);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn invalid_expression_is_an_error() {
        let now = Utc::now();
        assert!(next_cron_occurrence("not a cron", now).is_err());
    }
}
