use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use mentorline_types::DEFAULT_SLA_WINDOW_HOURS;

use crate::{SlaError, SlaResult};

pub const DEFAULT_SWEEP_BATCH_LIMIT: usize = 500;
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 120;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Upper bound on the SLA window: one leap year.
pub const MAX_SLA_WINDOW_HOURS: i64 = 366 * 24;

/// Tunables shared by the sweep and the realtime path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaConfig {
    /// Time a mentor has to reply before a learner message breaches.
    pub window: chrono::Duration,
    /// Maximum candidates examined per sweep run.
    pub sweep_batch_limit: usize,
    /// Characters of message text kept in the mentor breach alert.
    pub preview_max_chars: usize,
    pub candidate_timeout: Duration,
    pub batch_timeout: Duration,
    /// Candidates processed concurrently within one sweep run.
    pub sweep_concurrency: usize,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::hours(DEFAULT_SLA_WINDOW_HOURS),
            sweep_batch_limit: DEFAULT_SWEEP_BATCH_LIMIT,
            preview_max_chars: DEFAULT_PREVIEW_MAX_CHARS,
            candidate_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(10 * 60),
            sweep_concurrency: 4,
        }
    }
}

impl SlaConfig {
    pub fn validate(&self) -> SlaResult<()> {
        if self.window <= chrono::Duration::zero() {
            return Err(SlaError::InvalidConfig(
                "sla window must be greater than 0".to_string(),
            ));
        }
        if self.window.num_hours() > MAX_SLA_WINDOW_HOURS {
            return Err(SlaError::InvalidConfig(format!(
                "sla window must not exceed {MAX_SLA_WINDOW_HOURS} hours"
            )));
        }
        if self.sweep_batch_limit == 0 {
            return Err(SlaError::InvalidConfig(
                "sweep batch limit must be greater than 0".to_string(),
            ));
        }
        if self.sweep_concurrency == 0 {
            return Err(SlaError::InvalidConfig(
                "sweep concurrency must be greater than 0".to_string(),
            ));
        }
        if self.candidate_timeout.is_zero() || self.batch_timeout.is_zero() {
            return Err(SlaError::InvalidConfig(
                "sweep timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whole hours of the window, used in notification copy.
    pub fn window_hours(&self) -> i64 {
        self.window.num_hours()
    }
}

/// When the periodic sweep runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepCadence {
    Interval(Duration),
    /// Six-field cron expression (seconds first) evaluated in `timezone`.
    Cron {
        expression: String,
        timezone: String,
    },
}

impl Default for SweepCadence {
    fn default() -> Self {
        Self::Interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl SweepCadence {
    pub fn validate(&self) -> SlaResult<()> {
        self.next_run_after(Utc::now()).map(|_| ())
    }

    /// First run instant strictly after `from`.
    pub fn next_run_after(&self, from: DateTime<Utc>) -> SlaResult<DateTime<Utc>> {
        match self {
            Self::Interval(period) => {
                if period.is_zero() {
                    return Err(SlaError::InvalidSchedule(
                        "sweep interval must be greater than 0".to_string(),
                    ));
                }
                let period = chrono::Duration::from_std(*period).map_err(|error| {
                    SlaError::InvalidSchedule(format!("sweep interval out of range: {error}"))
                })?;
                from.checked_add_signed(period).ok_or_else(|| {
                    SlaError::InvalidSchedule("sweep interval overflows the calendar".to_string())
                })
            }
            Self::Cron {
                expression,
                timezone,
            } => {
                let schedule = Schedule::from_str(expression).map_err(|error| {
                    SlaError::InvalidSchedule(format!(
                        "invalid cron expression '{expression}': {error}"
                    ))
                })?;
                let tz: Tz = timezone.parse().map_err(|_| {
                    SlaError::InvalidSchedule(format!("invalid timezone '{timezone}'"))
                })?;
                schedule
                    .after(&from.with_timezone(&tz))
                    .next()
                    .map(|next| next.with_timezone(&Utc))
                    .ok_or_else(|| {
                        SlaError::InvalidSchedule(format!(
                            "cron expression '{expression}' has no future occurrence"
                        ))
                    })
            }
        }
    }
}
