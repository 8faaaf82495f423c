use chrono::{DateTime, TimeDelta, Utc};

use crate::config::ConfigError;
use crate::models::RuleInterval;

/// The opportunity API refuses ranges longer than a week
pub const MAX_CHUNK_DAYS: i64 = 7;

/// Span covering every rule interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Horizon {
    /// `[earliest rule start, latest rule end]`.
    pub fn from_rules(rules: &[RuleInterval]) -> Result<Self, ConfigError> {
        let start = rules.iter().map(|r| r.start).min().ok_or(ConfigError::EmptyRules)?;
        let end = rules.iter().map(|r| r.end).max().ok_or(ConfigError::EmptyRules)?;
        if start > end {
            return Err(ConfigError::InvertedInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Consecutive sub-ranges of at most `MAX_CHUNK_DAYS`. Neighbours share
    /// their boundary point; the last chunk may be shorter.
    pub fn chunks(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let step = TimeDelta::days(MAX_CHUNK_DAYS);
        if self.end - self.start < step {
            return vec![(self.start, self.end)];
        }

        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let chunk_end = cursor
                .checked_add_signed(step)
                .map_or(self.end, |t| t.min(self.end));
            chunks.push((cursor, chunk_end));
            cursor = chunk_end;
        }
        chunks
    }
}
