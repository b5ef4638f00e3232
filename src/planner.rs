//! Partition planning
//!
//! Given a stream's checkpoint and the current wall-clock time, computes the
//! ordered, bounded list of partitions still to be ingested. Partitions are
//! half-open `[start, end)` slices of fixed per-stream granularity, emitted
//! oldest first so committed data always forms a contiguous prefix from the
//! stream's epoch.

use crate::checkpoint::Checkpoint;
use crate::{Cursor, Partition};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Fixed partition width for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// 5 minutes
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 1 hour
    #[serde(rename = "1h")]
    OneHour,
    /// 1 day
    #[serde(rename = "1d")]
    OneDay,
    /// 7 days
    #[serde(rename = "1w")]
    OneWeek,
}

impl Granularity {
    /// Partition width in milliseconds.
    pub fn step_millis(&self) -> i64 {
        match self {
            Granularity::FiveMinutes => 300_000,
            Granularity::OneHour => 3_600_000,
            Granularity::OneDay => 86_400_000,
            Granularity::OneWeek => 604_800_000,
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Granularity::FiveMinutes => "5m",
            Granularity::OneHour => "1h",
            Granularity::OneDay => "1d",
            Granularity::OneWeek => "1w",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Granularity::FiveMinutes),
            "1h" => Ok(Granularity::OneHour),
            "1d" => Ok(Granularity::OneDay),
            "1w" => Ok(Granularity::OneWeek),
            _ => Err(format!(
                "Invalid granularity: {s}. Valid options: 5m, 1h, 1d, 1w"
            )),
        }
    }
}

/// Computes the partitions a run still needs for one stream.
#[derive(Debug, Clone)]
pub struct PartitionPlanner {
    stream_id: String,
    granularity: Granularity,
}

impl PartitionPlanner {
    /// Planner for a stream with the given partition granularity.
    pub fn new(stream_id: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            stream_id: stream_id.into(),
            granularity,
        }
    }

    /// The planner's partition granularity.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Compute the ordered partitions strictly after `checkpoint.cursor()`
    /// whose end does not pass `now`, truncated to `max_partitions`.
    ///
    /// Returns an empty plan when the next full partition would reach into
    /// the future — the terminal state for a caught-up stream. When the
    /// remaining gap exceeds the budget, older partitions always come first.
    pub fn plan(
        &self,
        checkpoint: &Checkpoint,
        now: Cursor,
        max_partitions: usize,
    ) -> Vec<Partition> {
        let step = self.granularity.step_millis();
        let mut partitions = Vec::new();
        let mut start = checkpoint.cursor();

        while partitions.len() < max_partitions {
            let end = start.advance_by(step);
            if end > now {
                break;
            }
            partitions.push(Partition::new(self.stream_id.clone(), start, end));
            start = end;
        }

        partitions
    }
}
