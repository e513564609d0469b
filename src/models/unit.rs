//! Units of work and their checkpoint records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of a unit of work within a run.
///
/// Brands are keyed by listing URL and menu items by item URL, both of which
/// are stable across runs over the same site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey(String);

impl UnitKey {
    pub fn brand(brand_url: &str) -> Self {
        Self(format!("brand:{brand_url}"))
    }

    pub fn menu_item(item_url: &str) -> Self {
        Self(format!("item:{item_url}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_brand(&self) -> bool {
        self.0.starts_with("brand:")
    }
}

impl From<String> for UnitKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a unit: `Pending → InProgress → Completed`, with `Failed`
/// re-entering `Pending` on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// What a completed unit produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub entities: usize,
    pub rejected: usize,
    pub upload_failures: usize,
    pub gaps: usize,
}

impl UnitSummary {
    pub fn absorb(&mut self, other: &UnitSummary) {
        self.entities += other.entities;
        self.rejected += other.rejected;
        self.upload_failures += other.upload_failures;
        self.gaps += other.gaps;
    }
}

/// Durable progress record for one `(run_id, unit_key)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub unit: UnitKey,
    pub state: UnitState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub summary: Option<UnitSummary>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(unit: UnitKey) -> Self {
        Self {
            unit,
            state: UnitState::Pending,
            attempts: 0,
            summary: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn start(mut self) -> Self {
        self.state = UnitState::InProgress;
        self.attempts += 1;
        self.updated_at = Utc::now();
        self
    }

    pub fn complete(mut self, summary: UnitSummary) -> Self {
        self.state = UnitState::Completed;
        self.summary = Some(summary);
        self.last_error = None;
        self.updated_at = Utc::now();
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.state = UnitState::Failed;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
        self
    }
}

/// Counts of checkpoint records per state for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointStatus {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl CheckpointStatus {
    pub fn record(&mut self, state: UnitState) {
        match state {
            UnitState::Pending => self.pending += 1,
            UnitState::InProgress => self.in_progress += 1,
            UnitState::Completed => self.completed += 1,
            UnitState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_lifecycle() {
        let rec = CheckpointRecord::new(UnitKey::menu_item("https://x/a"));
        assert_eq!(rec.state, UnitState::Pending);

        let rec = rec.start();
        assert_eq!(rec.state, UnitState::InProgress);
        assert_eq!(rec.attempts, 1);

        let rec = rec.fail("boom").start();
        assert_eq!(rec.attempts, 2);

        let rec = rec.complete(UnitSummary::default());
        assert_eq!(rec.state, UnitState::Completed);
        assert!(rec.last_error.is_none());
    }

    #[test]
    fn unit_key_kinds() {
        assert!(UnitKey::brand("https://x/b").is_brand());
        assert!(!UnitKey::menu_item("https://x/b/i").is_brand());
    }
}
