//! Columns (lineups) and the per-column snapshots streamed by the store.

use super::kart::{KartRecord, WireKartRecord};
use serde::{Deserialize, Serialize};

/// Colors handed out to columns when none are configured.
pub const DEFAULT_PALETTE: [&str; 6] = [
    "#e53935", "#1e88e5", "#43a047", "#fdd835", "#8e24aa", "#fb8c00",
];

/// Static description of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub index: usize,
    pub color: String,
    /// Declared row capacity. Only the store enforces it.
    pub capacity: usize,
}

/// Ordered kart lists, one per column, as delivered by the snapshot stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsSnapshot {
    pub columns: Vec<Vec<KartRecord>>,
}

impl ColumnsSnapshot {
    pub fn new(columns: Vec<Vec<KartRecord>>) -> Self {
        Self { columns }
    }

    /// Empty snapshot with `count` columns.
    pub fn empty(count: usize) -> Self {
        Self {
            columns: vec![Vec::new(); count],
        }
    }

    /// Decode raw per-column documents, dropping malformed records.
    pub fn from_wire(columns: &[Vec<WireKartRecord>]) -> Self {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(index, records)| {
                records
                    .iter()
                    .filter_map(|wire| KartRecord::from_wire(wire, index))
                    .collect()
            })
            .collect();
        Self { columns }
    }

    /// Column currently holding `id`, if any.
    pub fn column_of(&self, id: &super::RecordId) -> Option<usize> {
        self.columns
            .iter()
            .position(|records| records.iter().any(|r| &r.id == id))
    }

    pub fn records(&self) -> impl Iterator<Item = (usize, &KartRecord)> {
        self.columns
            .iter()
            .enumerate()
            .flat_map(|(index, records)| records.iter().map(move |r| (index, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;

    #[test]
    fn from_wire_skips_malformed_records() {
        let raw = vec![
            vec![
                WireKartRecord {
                    id: Some("a".into()),
                    number: Some(3),
                    performance: Some("+".into()),
                    timestamp: Some(10),
                },
                WireKartRecord::default(),
            ],
            vec![WireKartRecord {
                id: Some("b".into()),
                number: Some(4),
                performance: Some("~".into()),
                timestamp: Some(11),
            }],
        ];

        let snapshot = ColumnsSnapshot::from_wire(&raw);
        assert_eq!(snapshot.columns[0].len(), 1);
        assert_eq!(snapshot.columns[1][0].column, 1);
        assert_eq!(snapshot.column_of(&RecordId::from("b")), Some(1));
        assert_eq!(snapshot.column_of(&RecordId::from("zz")), None);
    }
}
