//! Interval and schedule parsing.

use anyhow::{Result, bail};

use clawdis_common::time::now_ms;

use crate::types::CronSchedule;

/// Parse a human-friendly interval like `"30s"`, `"5m"`, `"2h"`, `"1d"`
/// into milliseconds. A bare number is taken as milliseconds.
pub fn parse_interval_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty interval");
    }
    let (num, multiplier) = if let Some(n) = input.strip_suffix('d') {
        (n, 86_400_000u64)
    } else if let Some(n) = input.strip_suffix('h') {
        (n, 3_600_000u64)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60_000u64)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1_000u64)
    } else {
        (input, 1u64)
    };
    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid interval: {input}"))?;
    if value == 0 {
        bail!("interval must be > 0");
    }
    Ok(value * multiplier)
}

/// Compute the next fire time for a schedule, strictly after `after_ms`.
/// Returns `None` when the schedule has no future firings.
#[must_use]
pub fn next_run_at(schedule: &CronSchedule, after_ms: u64) -> Option<u64> {
    match schedule {
        CronSchedule::At { at_ms } => (*at_ms > after_ms).then_some(*at_ms),
        CronSchedule::Every { every_ms } => Some(after_ms + every_ms),
        CronSchedule::Cron { expr, tz } => next_cron_at(expr, tz.as_deref(), after_ms),
    }
}

fn next_cron_at(expr: &str, tz: Option<&str>, after_ms: u64) -> Option<u64> {
    use {chrono::TimeZone, std::str::FromStr};

    // The `cron` crate wants a seconds field; 5-field expressions get one
    // prepended.
    let expr = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    let schedule = cron::Schedule::from_str(&expr).ok()?;
    let after = chrono::Utc.timestamp_millis_opt(after_ms as i64).single()?;

    match tz {
        Some(tz_name) => {
            let tz: chrono_tz::Tz = tz_name.parse().ok()?;
            let next = schedule.after(&after.with_timezone(&tz)).next()?;
            Some(next.timestamp_millis() as u64)
        },
        None => {
            let next = schedule.after(&after).next()?;
            Some(next.timestamp_millis() as u64)
        },
    }
}

/// Next fire time from now.
#[must_use]
pub fn next_run_from_now(schedule: &CronSchedule) -> Option<u64> {
    next_run_at(schedule, now_ms())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_parse() {
        assert_eq!(parse_interval_ms("5m").unwrap(), 300_000);
        assert_eq!(parse_interval_ms("30m").unwrap(), 1_800_000);
        assert_eq!(parse_interval_ms("1h").unwrap(), 3_600_000);
        assert_eq!(parse_interval_ms("90s").unwrap(), 90_000);
        assert_eq!(parse_interval_ms("1d").unwrap(), 86_400_000);
        assert_eq!(parse_interval_ms("750").unwrap(), 750);
    }

    #[test]
    fn bad_intervals_fail() {
        assert!(parse_interval_ms("").is_err());
        assert!(parse_interval_ms("0m").is_err());
        assert!(parse_interval_ms("fast").is_err());
    }

    #[test]
    fn at_schedule_fires_once() {
        let s = CronSchedule::At { at_ms: 1_000 };
        assert_eq!(next_run_at(&s, 500), Some(1_000));
        assert_eq!(next_run_at(&s, 1_000), None);
    }

    #[test]
    fn every_schedule_advances() {
        let s = CronSchedule::Every { every_ms: 300_000 };
        assert_eq!(next_run_at(&s, 1_000_000), Some(1_300_000));
    }

    #[test]
    fn five_field_cron_gets_seconds() {
        let s = CronSchedule::Cron {
            expr: "0 9 * * *".into(),
            tz: None,
        };
        // 2026-01-01T00:00:00Z → next 09:00 UTC same day.
        let jan1 = 1_767_225_600_000u64;
        let next = next_run_at(&s, jan1).unwrap();
        assert_eq!(next, jan1 + 9 * 3_600_000);
    }

    #[test]
    fn invalid_cron_yields_none() {
        let s = CronSchedule::Cron {
            expr: "not a cron".into(),
            tz: None,
        };
        assert_eq!(next_run_at(&s, 0), None);
    }
}
