//! Outcome of a cache sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use timelines_common::ZoomLevel;

/// Which entry point started the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepKind {
    /// Every level rebuilt from the dataset start
    Create,
    /// Every level resumed from its newest tile
    Update,
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepKind::Create => write!(f, "create"),
            SweepKind::Update => write!(f, "update"),
        }
    }
}

/// Per-level counts of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelReport {
    pub level: ZoomLevel,
    /// Start of the first window visited
    pub start: DateTime<Utc>,
    /// Start of the newest window, if it had not fully elapsed at sweep time
    pub frontier: Option<DateTime<Utc>>,
    pub written: usize,
    /// Windows left empty because the level below has no tile there
    pub skipped: usize,
    pub failed: usize,
}

impl LevelReport {
    pub fn new(level: ZoomLevel, start: DateTime<Utc>) -> Self {
        Self {
            level,
            start,
            frontier: None,
            written: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub fn visited(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    /// The single "now" every level of the sweep was built against
    pub now: DateTime<Utc>,
    pub levels: Vec<LevelReport>,
    pub elapsed: Duration,
}

impl SweepReport {
    pub fn level(&self, level: ZoomLevel) -> Option<&LevelReport> {
        self.levels.iter().find(|r| r.level == level)
    }

    pub fn written(&self) -> usize {
        self.levels.iter().map(|r| r.written).sum()
    }

    pub fn skipped(&self) -> usize {
        self.levels.iter().map(|r| r.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.levels.iter().map(|r| r.failed).sum()
    }
}
