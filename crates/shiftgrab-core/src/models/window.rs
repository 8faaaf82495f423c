use chrono::{DateTime, Days, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::ConfigError;

/// Default length of the pick window once it opens.
pub const DEFAULT_PICK_DURATION_HOURS: i64 = 1;

/// A window within which shifts may be claimed. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RuleInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvertedInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// True iff `[start, end]` lies entirely inside this interval.
    /// Partial overlap does not count.
    pub fn contains(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start >= self.start && end <= self.end
    }
}

/// When the picker may run, and which shifts it should go after.
#[derive(Debug, Clone, PartialEq)]
pub struct PickWindowConfig {
    /// Opening instant. `None` means the window is always open.
    pub time_to_pick: Option<DateTime<Utc>>,
    /// How long the window stays open after `time_to_pick`.
    /// `TimeDelta::MAX` is used for "max" and makes the window open-ended.
    pub duration: TimeDelta,
    pub time_zone: Tz,
    pub rules: Vec<RuleInterval>,
    /// Daily wall-clock time (in `time_zone`) at which the session is rebuilt
    pub reload_session_on: Option<NaiveTime>,
}

impl PickWindowConfig {
    pub fn new(rules: Vec<RuleInterval>) -> Self {
        Self {
            time_to_pick: None,
            duration: TimeDelta::hours(DEFAULT_PICK_DURATION_HOURS),
            time_zone: Tz::UTC,
            rules,
            reload_session_on: None,
        }
    }

    /// Whether picking is allowed at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let Some(opens) = self.time_to_pick else {
            return true;
        };
        if now < opens {
            return false;
        }
        match opens.checked_add_signed(self.duration) {
            Some(closes) => now < closes,
            // Not representable: treat as open-ended
            None => true,
        }
    }

    /// Whether the daily reload time fell in `(last_check, now]`.
    ///
    /// Only today's and yesterday's occurrence (in the configured zone) are
    /// considered, which is enough as long as checks are less than a day apart.
    pub fn reload_due(&self, last_check: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(at) = self.reload_session_on else {
            return false;
        };
        if now <= last_check {
            return false;
        }
        let today = now.with_timezone(&self.time_zone).date_naive();
        [Some(today), today.checked_sub_days(Days::new(1))]
            .into_iter()
            .flatten()
            .filter_map(|date| {
                self.time_zone
                    .from_local_datetime(&date.and_time(at))
                    .earliest()
            })
            .map(|local| local.with_timezone(&Utc))
            .any(|instant| instant > last_check && instant <= now)
    }
}
