//! Grid reconciliation: remote snapshot + overlay → one display-ready grid.
//!
//! # Merge Rules
//!
//! 1. Remote records are indexed by id; duplicate ids keep their first occurrence
//! 2. A kart with an overlay entry leaves its remote column and is placed at
//!    the front of the overlay target, tagged [`Origin::Optimistic`]
//! 3. Every other kart keeps its remote column, tagged [`Origin::Remote`]
//! 4. Within a column a repeated number keeps the optimistic record, else the
//!    lowest id
//! 5. Across columns a repeated number keeps the optimistic record, else the
//!    most recently placed one, else the lowest id
//! 6. Columns are sorted by display timestamp, most recent first
//!
//! The function is total. Records or overlay entries pointing outside the
//! configured columns are treated as absent.

use crate::models::{
    ColumnSpec, ColumnsSnapshot, KartNumber, KartRecord, MergedColumn, MergedKartRecord, Origin,
    Performance, RecordId,
};
use crate::overlay::{OptimisticMove, OptimisticState};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub columns: Vec<MergedColumn>,
    /// The pre-dedup merge held a repeated number somewhere.
    pub duplicates_detected: bool,
    /// Some column held a repeated number before dedup.
    pub column_duplicates: bool,
    /// Records removed by deduplication.
    pub dropped: usize,
}

impl Reconciliation {
    /// Per-column `(id, number)` lists, ignoring origin and timestamps.
    pub fn layout(&self) -> Vec<Vec<(String, u8)>> {
        self.columns.iter().map(MergedColumn::layout).collect()
    }

    /// True when both grids render the same records in the same places,
    /// whatever their display timestamps.
    pub fn same_view(&self, other: &Reconciliation) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.spec == b.spec && view(a).eq(view(b)))
    }

    /// Column showing `id`, if any.
    pub fn column_of(&self, id: &RecordId) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.records.iter().any(|r| &r.base.id == id))
    }
}

fn view(column: &MergedColumn) -> impl Iterator<Item = (&RecordId, KartNumber, Performance, Origin)> {
    column
        .records
        .iter()
        .map(|r| (&r.base.id, r.base.number, r.base.performance, r.origin))
}

/// Merge the latest remote snapshot with the overlay.
pub fn reconcile(
    remote: &ColumnsSnapshot,
    overlay: &OptimisticState,
    specs: &[ColumnSpec],
) -> Reconciliation {
    let column_count = specs.len();
    let mut index: HashMap<&RecordId, &KartRecord> = HashMap::new();
    let mut remote_order: Vec<(usize, &KartRecord)> = Vec::new();

    for (column, records) in remote.columns.iter().enumerate().take(column_count) {
        for record in records {
            if index.contains_key(&record.id) {
                trace!(id = %record.id, "duplicate id in snapshot, keeping first");
                continue;
            }
            index.insert(&record.id, record);
            remote_order.push((column, record));
        }
    }

    let ceiling = remote_order
        .iter()
        .map(|(_, r)| r.timestamp)
        .max()
        .unwrap_or_default();

    let mut pending: Vec<&OptimisticMove> = overlay
        .iter()
        .filter(|m| m.to_column < column_count)
        .collect();
    pending.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.kart_id.cmp(&b.kart_id))
    });

    let mut columns: Vec<Vec<MergedKartRecord>> = vec![Vec::new(); column_count];
    let mut displaced: HashSet<&RecordId> = HashSet::new();
    let mut display = ceiling;

    for m in pending {
        // Later than every remote record and than every earlier overlay entry.
        display = display.next().max(m.created_at);
        let base = match index.get(&m.kart_id) {
            Some(remote) => KartRecord {
                column: m.to_column,
                number: m.number,
                performance: m.performance,
                ..(*remote).clone()
            },
            None => KartRecord {
                id: m.kart_id.clone(),
                number: m.number,
                performance: m.performance,
                column: m.to_column,
                timestamp: m.created_at,
            },
        };
        displaced.insert(&m.kart_id);
        columns[m.to_column].push(MergedKartRecord {
            base,
            origin: Origin::Optimistic,
            display_timestamp: display,
        });
    }

    for (column, record) in remote_order {
        if displaced.contains(&record.id) {
            continue;
        }
        columns[column].push(MergedKartRecord::remote(KartRecord {
            column,
            ..record.clone()
        }));
    }

    let mut column_duplicates = false;
    let mut dropped = 0;

    for records in columns.iter_mut() {
        let before = records.len();
        *records = dedup_column(std::mem::take(records));
        if records.len() != before {
            column_duplicates = true;
            dropped += before - records.len();
        }
    }

    let mut duplicates_detected = column_duplicates;
    let losers = cross_column_losers(&columns);
    if !losers.is_empty() {
        duplicates_detected = true;
        dropped += losers.len();
        for records in columns.iter_mut() {
            records.retain(|r| !losers.contains(&r.base.id));
        }
    }

    if duplicates_detected {
        debug!(dropped, "reconcile resolved duplicate numbers");
    }

    let columns = specs
        .iter()
        .cloned()
        .zip(columns)
        .map(|(spec, mut records)| {
            records.sort_by(|a, b| {
                b.display_timestamp
                    .cmp(&a.display_timestamp)
                    .then_with(|| a.base.id.cmp(&b.base.id))
            });
            MergedColumn { spec, records }
        })
        .collect();

    Reconciliation {
        columns,
        duplicates_detected,
        column_duplicates,
        dropped,
    }
}

fn dedup_column(records: Vec<MergedKartRecord>) -> Vec<MergedKartRecord> {
    let mut winners: HashMap<KartNumber, usize> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        match winners.get(&record.number()) {
            Some(&j) if !wins_in_column(record, &records[j]) => {}
            _ => {
                winners.insert(record.number(), i);
            }
        }
    }
    let keep: HashSet<usize> = winners.into_values().collect();
    records
        .into_iter()
        .enumerate()
        .filter_map(|(i, r)| keep.contains(&i).then_some(r))
        .collect()
}

fn wins_in_column(a: &MergedKartRecord, b: &MergedKartRecord) -> bool {
    match (a.origin, b.origin) {
        (Origin::Optimistic, Origin::Remote) => true,
        (Origin::Remote, Origin::Optimistic) => false,
        (Origin::Optimistic, Origin::Optimistic) => a.display_timestamp > b.display_timestamp,
        (Origin::Remote, Origin::Remote) => a.base.id < b.base.id,
    }
}

fn cross_column_losers(columns: &[Vec<MergedKartRecord>]) -> HashSet<RecordId> {
    let mut by_number: HashMap<KartNumber, Vec<&MergedKartRecord>> = HashMap::new();
    for record in columns.iter().flatten() {
        by_number.entry(record.number()).or_default().push(record);
    }

    let mut losers = HashSet::new();
    for (_, mut holders) in by_number {
        if holders.len() < 2 {
            continue;
        }
        holders.sort_by(|a, b| rank_across(a, b));
        for loser in &holders[1..] {
            losers.insert(loser.base.id.clone());
        }
    }
    losers
}

/// Winner sorts first.
fn rank_across(a: &MergedKartRecord, b: &MergedKartRecord) -> Ordering {
    let optimistic = |r: &MergedKartRecord| r.is_optimistic();
    optimistic(b)
        .cmp(&optimistic(a))
        .then_with(|| b.display_timestamp.cmp(&a.display_timestamp))
        .then_with(|| a.base.id.cmp(&b.base.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GridConfig;
    use crate::models::Timestamp;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn rec(id: &str, number: i64, column: usize, ts: u64) -> KartRecord {
        KartRecord {
            id: RecordId::from(id),
            number: KartNumber::new(number).unwrap(),
            performance: Performance::Average,
            column,
            timestamp: Timestamp(ts),
        }
    }

    fn specs(n: usize) -> Vec<ColumnSpec> {
        GridConfig::with_columns(n).column_specs()
    }

    fn overlay() -> OptimisticState {
        OptimisticState::with_clock(Arc::new(ManualClock::new(5)))
    }

    fn num(n: i64) -> KartNumber {
        KartNumber::new(n).unwrap()
    }

    #[test]
    fn remote_only_grid_is_sorted_most_recent_first() {
        let remote = ColumnsSnapshot::new(vec![
            vec![rec("a", 1, 0, 10), rec("b", 2, 0, 30), rec("c", 3, 0, 20)],
            vec![],
        ]);
        let grid = reconcile(&remote, &overlay(), &specs(2));

        let ids: Vec<_> = grid.columns[0]
            .records
            .iter()
            .map(|r| r.base.id.as_str())
            .collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert!(grid.columns[0].records.iter().all(|r| r.origin == Origin::Remote));
        assert!(!grid.duplicates_detected);
    }

    #[test]
    fn optimistic_move_leads_target_column() {
        let remote = ColumnsSnapshot::new(vec![
            vec![rec("a", 1, 0, 10)],
            vec![rec("b", 2, 1, 99)],
        ]);
        let mut state = overlay();
        state.apply_move("a".into(), 0, 1, num(1), Performance::VeryGood);

        let grid = reconcile(&remote, &state, &specs(2));
        assert!(grid.columns[0].records.is_empty());

        let lead = grid.columns[1].lead().unwrap();
        assert_eq!(lead.base.id.as_str(), "a");
        assert_eq!(lead.origin, Origin::Optimistic);
        assert_eq!(lead.base.performance, Performance::VeryGood);
        assert!(lead.display_timestamp > Timestamp(99));
    }

    #[test]
    fn stale_snapshot_under_same_number_keeps_optimistic_copy() {
        // R1 (#7) dragged 0 → 2; the store already re-created it in column 2
        // as R9 while column 0 still lists R1.
        let remote = ColumnsSnapshot::new(vec![
            vec![rec("R1", 7, 0, 10)],
            vec![],
            vec![rec("R9", 7, 2, 11)],
        ]);
        let mut state = overlay();
        state.apply_move("R1".into(), 0, 2, num(7), Performance::Good);

        let grid = reconcile(&remote, &state, &specs(3));
        assert!(grid.duplicates_detected);
        assert_eq!(grid.dropped, 1);
        assert_eq!(grid.columns[0].numbers().filter(|n| n.get() == 7).count(), 0);

        let sevens: Vec<_> = grid.columns[2]
            .records
            .iter()
            .filter(|r| r.number().get() == 7)
            .collect();
        assert_eq!(sevens.len(), 1);
        assert_eq!(sevens[0].origin, Origin::Optimistic);
        assert_eq!(sevens[0].base.id.as_str(), "R1");
    }

    #[test]
    fn remote_duplicates_in_column_keep_lowest_id() {
        let remote = ColumnsSnapshot::new(vec![vec![rec("z", 4, 0, 50), rec("m", 4, 0, 10)]]);
        let grid = reconcile(&remote, &overlay(), &specs(1));
        assert_eq!(grid.layout(), vec![vec![("m".to_string(), 4)]]);
        assert!(grid.duplicates_detected);
    }

    #[test]
    fn remote_duplicates_across_columns_keep_latest_placement() {
        let remote = ColumnsSnapshot::new(vec![vec![rec("a", 4, 0, 10)], vec![rec("b", 4, 1, 20)]]);
        let grid = reconcile(&remote, &overlay(), &specs(2));
        assert!(grid.columns[0].records.is_empty());
        assert_eq!(grid.column_of(&"b".into()), Some(1));
        assert!(grid.duplicates_detected);
        assert!(!grid.column_duplicates);
    }

    #[test]
    fn newer_remote_ceiling_keeps_the_same_view() {
        let mut state = overlay();
        state.apply_move("a".into(), 0, 1, num(1), Performance::Good);
        let before = ColumnsSnapshot::new(vec![vec![rec("a", 1, 0, 10)], vec![rec("b", 2, 1, 20)]]);
        let after = ColumnsSnapshot::new(vec![vec![rec("a", 1, 0, 10)], vec![rec("b", 2, 1, 80)]]);

        let first = reconcile(&before, &state, &specs(2));
        let second = reconcile(&after, &state, &specs(2));
        assert_ne!(first, second);
        assert!(first.same_view(&second));

        state.confirm(&"a".into());
        let confirmed = reconcile(&after, &state, &specs(2));
        assert!(!second.same_view(&confirmed));
    }

    #[test]
    fn later_overlay_entries_sort_first() {
        let remote = ColumnsSnapshot::new(vec![
            vec![rec("a", 1, 0, 10), rec("b", 2, 0, 10)],
            vec![],
        ]);
        let mut state = overlay();
        state.apply_move("a".into(), 0, 1, num(1), Performance::Good);
        state.apply_move("b".into(), 0, 1, num(2), Performance::Good);

        let grid = reconcile(&remote, &state, &specs(2));
        let ids: Vec<_> = grid.columns[1]
            .records
            .iter()
            .map(|r| r.base.id.as_str())
            .collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn over_capacity_is_displayed() {
        let config = GridConfig {
            columns: 2,
            rows_limit: 1,
            ..GridConfig::default()
        };
        let remote = ColumnsSnapshot::new(vec![vec![rec("a", 1, 0, 1)], vec![rec("b", 2, 1, 1)]]);
        let mut state = overlay();
        state.apply_move("a".into(), 0, 1, num(1), Performance::Good);

        let grid = reconcile(&remote, &state, &config.column_specs());
        assert_eq!(grid.columns[1].records.len(), 2);
        assert!(grid.columns[1].is_over_capacity());
    }

    #[test]
    fn out_of_range_input_is_absent() {
        let remote = ColumnsSnapshot::new(vec![
            vec![rec("a", 1, 0, 1), rec("a", 1, 0, 2)],
            vec![rec("lost", 3, 5, 1)],
        ]);
        let mut state = overlay();
        state.apply_move("a".into(), 0, 9, num(1), Performance::Good);

        let grid = reconcile(&remote, &state, &specs(1));
        assert_eq!(grid.columns.len(), 1);
        assert_eq!(grid.layout(), vec![vec![("a".to_string(), 1)]]);
        assert_eq!(grid.columns[0].records[0].origin, Origin::Remote);
    }

    #[test]
    fn empty_overlay_round_trips_remote() {
        let remote = ColumnsSnapshot::new(vec![vec![rec("a", 1, 0, 1)], vec![rec("b", 2, 1, 3)]]);
        let grid = reconcile(&remote, &overlay(), &specs(2));
        assert_eq!(
            grid.layout(),
            vec![vec![("a".to_string(), 1)], vec![("b".to_string(), 2)]]
        );
    }

    fn arb_snapshot() -> impl Strategy<Value = (ColumnsSnapshot, Vec<(usize, usize, i64)>)> {
        let records = prop::collection::vec((0usize..4, 1i64..12, 0u64..50), 0..20);
        let moves = prop::collection::vec((0usize..20, 0usize..5, 1i64..12), 0..8);
        (records, moves).prop_map(|(records, moves)| {
            let mut columns = vec![Vec::new(); 4];
            for (i, (column, number, ts)) in records.into_iter().enumerate() {
                columns[column].push(rec(&format!("r{i}"), number, column, ts));
            }
            (ColumnsSnapshot::new(columns), moves)
        })
    }

    proptest! {
        #[test]
        fn no_number_in_two_columns((remote, moves) in arb_snapshot()) {
            let mut state = overlay();
            for (kart, to, number) in moves {
                state.apply_move(
                    RecordId::new(format!("r{kart}")),
                    0,
                    to,
                    num(number),
                    Performance::Good,
                );
            }

            let grid = reconcile(&remote, &state, &specs(4));
            let mut seen = HashSet::new();
            for column in &grid.columns {
                for number in column.numbers() {
                    prop_assert!(seen.insert(number), "number {} shown twice", number);
                }
            }
        }
    }
}
