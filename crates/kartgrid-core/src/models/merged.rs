//! Reconciler output. Never persisted.

use super::column::ColumnSpec;
use super::kart::{KartNumber, KartRecord, Timestamp};
use serde::Serialize;

/// Where a merged record's placement comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Placement confirmed by the latest remote snapshot.
    Remote,
    /// Placement from an in-flight move.
    Optimistic,
}

/// A kart record as displayed, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedKartRecord {
    pub base: KartRecord,
    pub origin: Origin,
    pub display_timestamp: Timestamp,
}

impl MergedKartRecord {
    pub fn remote(base: KartRecord) -> Self {
        let display_timestamp = base.timestamp;
        Self {
            base,
            origin: Origin::Remote,
            display_timestamp,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.origin == Origin::Optimistic
    }

    pub fn number(&self) -> KartNumber {
        self.base.number
    }
}

/// One display-ready column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedColumn {
    pub spec: ColumnSpec,
    /// Most recent first.
    pub records: Vec<MergedKartRecord>,
}

impl MergedColumn {
    pub fn new(spec: ColumnSpec) -> Self {
        Self {
            spec,
            records: Vec::new(),
        }
    }

    /// The lead kart: most recently placed record.
    pub fn lead(&self) -> Option<&MergedKartRecord> {
        self.records.first()
    }

    /// Overlay insertions may exceed capacity until the store answers.
    pub fn is_over_capacity(&self) -> bool {
        self.records.len() > self.spec.capacity
    }

    pub fn numbers(&self) -> impl Iterator<Item = KartNumber> + '_ {
        self.records.iter().map(|r| r.base.number)
    }

    /// Identity and placement only, used to compare grids.
    pub fn layout(&self) -> Vec<(String, u8)> {
        self.records
            .iter()
            .map(|r| (r.base.id.0.clone(), r.base.number.get()))
            .collect()
    }
}
