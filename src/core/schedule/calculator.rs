use chrono::{DateTime, Duration, Months, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

use crate::core::error::{Result, SyncError};
use crate::models::{Schedule, TimeUnit};

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Next fire time strictly after `after`, or `None` for manual schedules.
pub fn next_run_after(schedule: &Schedule, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        Schedule::Manual => Ok(None),
        Schedule::Interval { unit, magnitude } => interval_after(*unit, *magnitude, after).map(Some),
        Schedule::Cron {
            expression,
            timezone,
        } => cron_after(expression, timezone, after).map(Some),
    }
}

pub fn validate(schedule: &Schedule) -> Result<()> {
    next_run_after(schedule, Utc::now()).map(|_| ())
}

fn interval_after(unit: TimeUnit, magnitude: u32, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if magnitude == 0 {
        return Err(SyncError::InvalidSchedule(
            "interval magnitude must be at least 1".to_string(),
        ));
    }

    let m = i64::from(magnitude);
    let next = match unit {
        TimeUnit::Minutes => after.checked_add_signed(Duration::minutes(m)),
        TimeUnit::Hours => after.checked_add_signed(Duration::hours(m)),
        TimeUnit::Days => after.checked_add_signed(Duration::days(m)),
        TimeUnit::Weeks => after.checked_add_signed(Duration::weeks(m)),
        TimeUnit::Months => after.checked_add_months(Months::new(magnitude)),
    };
    next.ok_or_else(|| SyncError::InvalidSchedule("interval is out of range".to_string()))
}

fn cron_after(expression: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let tz = Tz::from_str(timezone)
        .map_err(|_| SyncError::InvalidSchedule(format!("unknown timezone '{}'", timezone)))?;
    let normalized = normalize_expression(expression)?;
    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|e| SyncError::InvalidSchedule(format!("invalid cron expression '{}': {}", expression, e)))?;

    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| {
            SyncError::InvalidSchedule(format!("cron expression '{}' never fires", expression))
        })
}

/// Accepts standard five-field crontab syntax (minute-first, Sunday = 0 or 7)
/// and rewrites it for the seconds-first parser. Six- and seven-field
/// expressions are passed through unchanged.
fn normalize_expression(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = translate_weekdays(fields[4])?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(SyncError::InvalidSchedule(format!(
            "cron expression must have 5 or 6 fields, got {}",
            n
        ))),
    }
}

fn weekday_name(token: &str) -> Result<String> {
    match token.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => Ok(WEEKDAYS[n].to_string()),
        Ok(n) => Err(SyncError::InvalidSchedule(format!("day of week {} is out of range", n))),
        // Already a name, `*` or `?`
        Err(_) => Ok(token.to_string()),
    }
}

fn translate_weekdays(field: &str) -> Result<String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let translated = match range.split_once('-') {
            // `1-7` would wrap from MON back to SUN, split it instead
            Some((start, "7")) if step.is_none() && start != "0" && start != "7" => {
                format!("{}-SAT,SUN", weekday_name(start)?)
            }
            Some((start, end)) => format!("{}-{}", weekday_name(start)?, weekday_name(end)?),
            None => weekday_name(range)?,
        };

        items.push(match step {
            Some(step) => format!("{}/{}", translated, step),
            None => translated,
        });
    }
    Ok(items.join(","))
}
