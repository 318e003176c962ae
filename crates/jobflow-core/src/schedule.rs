use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobflowError, Result};

/// Defines when a job is triggered by the cron dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Trigger exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Trigger repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Trigger every hour at the given minute.
    Hourly { minute: u8 },

    /// Trigger every day at the given hour and minute (UTC).
    Daily { hour: u8, minute: u8 },

    /// Trigger on a specific weekday (0 = Monday … 6 = Sunday) at the given time (UTC).
    Weekly { day: u8, hour: u8, minute: u8 },
}

impl Schedule {
    /// Reject out-of-range fields before the schedule is handed to a dispatcher.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(JobflowError::InvalidSchedule(msg));
        match *self {
            Schedule::Once { .. } => Ok(()),
            Schedule::Interval { every_secs } if every_secs == 0 => {
                bad("interval must be at least one second".to_string())
            }
            Schedule::Interval { .. } => Ok(()),
            Schedule::Hourly { minute } if minute > 59 => bad(format!("minute {minute} > 59")),
            Schedule::Hourly { .. } => Ok(()),
            Schedule::Daily { hour, minute } | Schedule::Weekly { hour, minute, .. }
                if hour > 23 || minute > 59 =>
            {
                bad(format!("time {hour:02}:{minute:02} is not a valid time of day"))
            }
            Schedule::Weekly { day, .. } if day > 6 => bad(format!("weekday {day} > 6")),
            Schedule::Daily { .. } | Schedule::Weekly { .. } => Ok(()),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
            Schedule::Interval { every_secs } => write!(f, "every {every_secs}s"),
            Schedule::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
            Schedule::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02}"),
            Schedule::Weekly { day, hour, minute } => {
                write!(f, "weekly on day {day} at {hour:02}:{minute:02}")
            }
        }
    }
}

/// Compute the next UTC trigger time for `schedule` strictly *after* `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` schedule whose
/// instant has passed) or when its fields cannot form a valid time.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match *schedule {
        Schedule::Once { at } => (at > from).then_some(at),

        Schedule::Interval { every_secs } => {
            Some(from + Duration::seconds(i64::try_from(every_secs).ok()?))
        }

        Schedule::Hourly { minute } => {
            let time = NaiveTime::from_hms_opt(from.hour(), minute as u32, 0)?;
            let candidate = from.date_naive().and_time(time).and_utc();
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::hours(1))
            }
        }

        Schedule::Daily { hour, minute } => {
            let time = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)?;
            let candidate = from.date_naive().and_time(time).and_utc();
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(1))
            }
        }

        Schedule::Weekly { day, hour, minute } => {
            // 0=Monday … 6=Sunday, matching chrono's `num_days_from_monday`.
            let today = from.weekday().num_days_from_monday() as i64;
            let days_ahead = (day as i64 - today).rem_euclid(7);
            let time = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)?;
            let candidate = (from.date_naive() + Duration::days(days_ahead))
                .and_time(time)
                .and_utc();
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(7))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn once_in_future_fires_once() {
        let target = at(2024, 3, 1, 12, 0, 0);
        let s = Schedule::Once { at: target };
        assert_eq!(compute_next_run(&s, at(2024, 3, 1, 11, 0, 0)), Some(target));
        assert_eq!(compute_next_run(&s, target), None);
    }

    #[test]
    fn interval_adds_period() {
        let s = Schedule::Interval { every_secs: 90 };
        let from = at(2024, 3, 1, 11, 0, 0);
        assert_eq!(compute_next_run(&s, from), Some(at(2024, 3, 1, 11, 1, 30)));
    }

    #[test]
    fn hourly_rolls_over_to_next_hour() {
        let s = Schedule::Hourly { minute: 15 };
        assert_eq!(
            compute_next_run(&s, at(2024, 3, 1, 11, 10, 0)),
            Some(at(2024, 3, 1, 11, 15, 0))
        );
        assert_eq!(
            compute_next_run(&s, at(2024, 3, 1, 11, 15, 0)),
            Some(at(2024, 3, 1, 12, 15, 0))
        );
        assert_eq!(
            compute_next_run(&s, at(2024, 3, 1, 23, 30, 0)),
            Some(at(2024, 3, 2, 0, 15, 0))
        );
    }

    #[test]
    fn daily_advances_once_window_passed() {
        let s = Schedule::Daily { hour: 6, minute: 30 };
        assert_eq!(
            compute_next_run(&s, at(2024, 3, 1, 5, 0, 0)),
            Some(at(2024, 3, 1, 6, 30, 0))
        );
        assert_eq!(
            compute_next_run(&s, at(2024, 3, 1, 7, 0, 0)),
            Some(at(2024, 3, 2, 6, 30, 0))
        );
    }

    #[test]
    fn weekly_targets_requested_weekday() {
        // 2024-03-01 is a Friday.
        let s = Schedule::Weekly { day: 0, hour: 9, minute: 0 };
        assert_eq!(
            compute_next_run(&s, at(2024, 3, 1, 12, 0, 0)),
            Some(at(2024, 3, 4, 9, 0, 0))
        );

        // Same weekday, time already passed: one week later.
        let friday = Schedule::Weekly { day: 4, hour: 9, minute: 0 };
        assert_eq!(
            compute_next_run(&friday, at(2024, 3, 1, 12, 0, 0)),
            Some(at(2024, 3, 8, 9, 0, 0))
        );
        assert_eq!(
            compute_next_run(&friday, at(2024, 3, 1, 8, 0, 0)),
            Some(at(2024, 3, 1, 9, 0, 0))
        );
    }

    #[test]
    fn validate_rejects_out_of_range_fields() {
        assert!(Schedule::Interval { every_secs: 0 }.validate().is_err());
        assert!(Schedule::Hourly { minute: 60 }.validate().is_err());
        assert!(Schedule::Daily { hour: 24, minute: 0 }.validate().is_err());
        assert!(Schedule::Weekly { day: 7, hour: 1, minute: 0 }.validate().is_err());
        assert!(Schedule::Weekly { day: 6, hour: 23, minute: 59 }.validate().is_ok());
    }

    #[test]
    fn schedule_deserializes_from_tagged_json() {
        let s: Schedule = serde_json::from_str(r#"{"kind":"daily","hour":2,"minute":5}"#).unwrap();
        assert_eq!(s, Schedule::Daily { hour: 2, minute: 5 });
    }
}
