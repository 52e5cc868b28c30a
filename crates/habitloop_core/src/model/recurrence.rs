//! Recurrence cadence and window arithmetic.
//!
//! # Responsibility
//! - Encode how often an obligation recurs (`Cadence`) and its text form.
//! - Compute the time window that contains a reference instant.
//! - Own the single expiry predicate used by the lifecycle engine.
//!
//! # Invariants
//! - Window computation is pure and deterministic for a given `Calendar`.
//! - Every day/week/month boundary is derived through `Calendar`, so one
//!   day-boundary rule applies everywhere.
//! - Multipliers are always within `1..=MAX_MULTIPLIER`.

use crate::model::period::Period;
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Largest accepted cadence multiplier.
pub const MAX_MULTIPLIER: u32 = 366;

static CADENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(always|daily|weekly|monthly)(?:/(\d{1,6}))?$").expect("valid cadence regex")
});

/// Errors raised while building or parsing a recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    /// Text does not match `always | daily[/N] | weekly[/N] | monthly[/N]`.
    #[error("malformed cadence `{0}`; expected always|daily[/N]|weekly[/N]|monthly[/N]")]
    Malformed(String),
    /// `always` does not take a multiplier.
    #[error("cadence `always` does not accept a multiplier")]
    UnexpectedMultiplier,
    /// Multiplier outside `1..=MAX_MULTIPLIER`.
    #[error("cadence multiplier {0} is out of range 1..={MAX_MULTIPLIER}")]
    MultiplierOutOfRange(u32),
}

/// First day of a calendar week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekStart {
    #[default]
    Monday,
    Sunday,
}

/// Day-boundary rule shared by every date computation in the engine.
///
/// A day starts at local midnight of a fixed UTC offset. The default is UTC
/// midnight with Monday-based weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    utc_offset_seconds: i32,
    week_start: WeekStart,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    /// UTC midnight, weeks starting Monday.
    pub const fn utc() -> Self {
        Self {
            utc_offset_seconds: 0,
            week_start: WeekStart::Monday,
        }
    }

    /// Builds a calendar from an offset in minutes east of UTC.
    ///
    /// Callers validate the range; see `EngineConfig`.
    pub const fn with_offset_minutes(utc_offset_minutes: i32, week_start: WeekStart) -> Self {
        Self {
            utc_offset_seconds: utc_offset_minutes * 60,
            week_start,
        }
    }

    pub fn week_start(&self) -> WeekStart {
        self.week_start
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_seconds / 60
    }

    /// Calendar date containing `instant` under this day-boundary rule.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        (instant.naive_utc() + TimeDelta::seconds(i64::from(self.utc_offset_seconds))).date()
    }

    /// UTC instant at which `date` begins.
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight: NaiveDateTime = date.and_time(chrono::NaiveTime::MIN);
        let utc_naive = local_midnight - TimeDelta::seconds(i64::from(self.utc_offset_seconds));
        Utc.from_utc_datetime(&utc_naive)
    }

    fn days_into_week(&self, date: NaiveDate) -> u32 {
        match self.week_start {
            WeekStart::Monday => date.weekday().num_days_from_monday(),
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
        }
    }
}

/// Half-open time window `[start, end)`. `end = None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && self.end.map_or(true, |end| instant < end)
    }
}

/// Recurrence cadence with its frequency multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// Always open; closes only through completion.
    AlwaysAvailable,
    Daily(u32),
    Weekly(u32),
    Monthly(u32),
}

/// Validated recurrence rule.
///
/// Persisted and serialized through its text form (`daily/2`, `weekly`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecurrenceRule {
    cadence: Cadence,
}

impl RecurrenceRule {
    /// Builds a rule, rejecting zero or oversized multipliers.
    pub fn new(cadence: Cadence) -> Result<Self, RecurrenceError> {
        match cadence {
            Cadence::AlwaysAvailable => {}
            Cadence::Daily(n) | Cadence::Weekly(n) | Cadence::Monthly(n) => {
                if n == 0 || n > MAX_MULTIPLIER {
                    return Err(RecurrenceError::MultiplierOutOfRange(n));
                }
            }
        }
        Ok(Self { cadence })
    }

    pub fn always() -> Self {
        Self {
            cadence: Cadence::AlwaysAvailable,
        }
    }

    pub fn daily(n: u32) -> Result<Self, RecurrenceError> {
        Self::new(Cadence::Daily(n))
    }

    pub fn weekly(n: u32) -> Result<Self, RecurrenceError> {
        Self::new(Cadence::Weekly(n))
    }

    pub fn monthly(n: u32) -> Result<Self, RecurrenceError> {
        Self::new(Cadence::Monthly(n))
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Whether windows of this rule end on a calendar boundary.
    pub fn is_windowed(&self) -> bool {
        !matches!(self.cadence, Cadence::AlwaysAvailable)
    }

    /// Computes the window containing `reference`.
    ///
    /// - `AlwaysAvailable`: `[reference, +inf)`.
    /// - `Daily(n)`: `[startOfDay, startOfDay + n days)`.
    /// - `Weekly(n)`: anchored to the start of the week containing `reference`.
    /// - `Monthly(n)`: anchored to the first day of the month.
    pub fn compute_window(&self, reference: DateTime<Utc>, calendar: &Calendar) -> Window {
        let day = calendar.date_of(reference);
        let (start_date, end_date) = match self.cadence {
            Cadence::AlwaysAvailable => {
                return Window {
                    start: reference,
                    end: None,
                };
            }
            Cadence::Daily(n) => (day, add_days(day, u64::from(n))),
            Cadence::Weekly(n) => {
                let start = sub_days(day, u64::from(calendar.days_into_week(day)));
                (start, add_days(start, u64::from(n) * 7))
            }
            Cadence::Monthly(n) => {
                let start = day.with_day(1).unwrap_or(day);
                let end = start
                    .checked_add_months(Months::new(n))
                    .unwrap_or(NaiveDate::MAX);
                (start, end)
            }
        };

        Window {
            start: calendar.start_of(start_date),
            end: Some(calendar.start_of(end_date)),
        }
    }

    /// End of the window that directly follows one ending at `end`.
    ///
    /// Returns `None` for unbounded cadences.
    pub fn following_window_end(
        &self,
        end: DateTime<Utc>,
        calendar: &Calendar,
    ) -> Option<DateTime<Utc>> {
        self.compute_window(end, calendar).end
    }
}

/// Sole expiry predicate: `now >= endInstant && isActive`.
///
/// Unbounded periods never expire through this predicate.
pub fn is_expired(period: &Period, now: DateTime<Utc>) -> bool {
    period.is_active && period.end_instant.is_some_and(|end| now >= end)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(chrono::Days::new(days))
        .unwrap_or(NaiveDate::MAX)
}

fn sub_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(chrono::Days::new(days))
        .unwrap_or(NaiveDate::MIN)
}

impl Display for RecurrenceRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.cadence {
            Cadence::AlwaysAvailable => write!(f, "always"),
            Cadence::Daily(1) => write!(f, "daily"),
            Cadence::Weekly(1) => write!(f, "weekly"),
            Cadence::Monthly(1) => write!(f, "monthly"),
            Cadence::Daily(n) => write!(f, "daily/{n}"),
            Cadence::Weekly(n) => write!(f, "weekly/{n}"),
            Cadence::Monthly(n) => write!(f, "monthly/{n}"),
        }
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let captures = CADENCE_RE
            .captures(&normalized)
            .ok_or_else(|| RecurrenceError::Malformed(value.to_string()))?;

        let multiplier = match captures.get(2) {
            Some(raw) => Some(
                raw.as_str()
                    .parse::<u32>()
                    .map_err(|_| RecurrenceError::Malformed(value.to_string()))?,
            ),
            None => None,
        };

        let cadence = match (&captures[1], multiplier) {
            ("always", None) => Cadence::AlwaysAvailable,
            ("always", Some(_)) => return Err(RecurrenceError::UnexpectedMultiplier),
            ("daily", n) => Cadence::Daily(n.unwrap_or(1)),
            ("weekly", n) => Cadence::Weekly(n.unwrap_or(1)),
            ("monthly", n) => Cadence::Monthly(n.unwrap_or(1)),
            _ => return Err(RecurrenceError::Malformed(value.to_string())),
        };
        Self::new(cadence)
    }
}

impl TryFrom<String> for RecurrenceRule {
    type Error = RecurrenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecurrenceRule> for String {
    fn from(value: RecurrenceRule) -> Self {
        value.to_string()
    }
}
