use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid recurrence: {0}")]
    Invalid(String),

    #[error("recurrence has no further occurrence")]
    Exhausted,
}

/// How a recurring task computes its next due instant. All variants are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Recurrence {
    /// Fixed cadence on the `start + k * every` grid.
    Interval { every_secs: u64 },

    /// Every day at HH:MM.
    Daily { hour: u8, minute: u8 },

    /// On `day` (0 = Monday … 6 = Sunday) at HH:MM.
    Weekly { day: u8, hour: u8, minute: u8 },
}

impl Recurrence {
    pub fn every_secs(secs: u64) -> Self {
        Recurrence::Interval { every_secs: secs }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        match *self {
            Recurrence::Interval { every_secs } => interval_secs(every_secs).map(|_| ()),
            Recurrence::Daily { hour, minute } => time_of_day(hour, minute).map(|_| ()),
            Recurrence::Weekly { day, hour, minute } => {
                if day > 6 {
                    return Err(ScheduleError::Invalid(format!(
                        "weekday must be 0..=6, got {day}"
                    )));
                }
                time_of_day(hour, minute).map(|_| ())
            }
        }
    }

    /// Next occurrence strictly after `now`.
    ///
    /// `previous` is any occurrence on the grid, usually the first scheduled
    /// run. Interval recurrences stay on the `previous + k * every` grid and
    /// skip any occurrences already in the past instead of firing them back
    /// to back.
    pub fn next_after(
        &self,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        self.validate()?;

        match *self {
            Recurrence::Interval { every_secs } => {
                let every = interval_secs(every_secs)?;
                let steps = if previous >= now {
                    1
                } else {
                    (now - previous).num_seconds() / every + 1
                };
                let offset = steps
                    .checked_mul(every)
                    .and_then(Duration::try_seconds)
                    .ok_or(ScheduleError::Exhausted)?;
                let mut next = previous
                    .checked_add_signed(offset)
                    .ok_or(ScheduleError::Exhausted)?;
                // sub-second remainders can leave `next == now`
                if next <= now {
                    next = next
                        .checked_add_signed(Duration::seconds(every))
                        .ok_or(ScheduleError::Exhausted)?;
                }
                Ok(next)
            }

            Recurrence::Daily { hour, minute } => {
                let at = time_of_day(hour, minute)?;
                let candidate = now.date_naive().and_time(at).and_utc();
                if candidate > now {
                    Ok(candidate)
                } else {
                    Ok(candidate + Duration::days(1))
                }
            }

            Recurrence::Weekly { day, hour, minute } => {
                let at = time_of_day(hour, minute)?;
                let today = now.weekday().num_days_from_monday() as i64;
                let days_ahead = (day as i64 - today).rem_euclid(7);
                let candidate =
                    (now.date_naive() + Duration::days(days_ahead)).and_time(at).and_utc();
                if candidate > now {
                    Ok(candidate)
                } else {
                    Ok(candidate + Duration::days(7))
                }
            }
        }
    }
}

/// Interval length as signed seconds, bounded by what `chrono::Duration` holds.
fn interval_secs(every_secs: u64) -> Result<i64, ScheduleError> {
    if every_secs == 0 {
        return Err(ScheduleError::Invalid(
            "interval must be at least one second".into(),
        ));
    }
    i64::try_from(every_secs)
        .ok()
        .filter(|secs| Duration::try_seconds(*secs).is_some())
        .ok_or_else(|| ScheduleError::Invalid(format!("interval of {every_secs}s is too large")))
}

fn time_of_day(hour: u8, minute: u8) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::from_hms_opt(hour as u32, minute as u32, 0).ok_or_else(|| {
        ScheduleError::Invalid(format!("invalid time of day {hour:02}:{minute:02}"))
    })
}
