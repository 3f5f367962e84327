//! Optimal-performance signal derived from the reconciled grid.
//!
//! Each column is represented by its lead kart. A column is "good" when its
//! lead runs `++` or `+`. The signal freezes while the grid is in a transient
//! state (pending moves or duplicate numbers) so the UI does not flicker.

use crate::reconcile::Reconciliation;
use serde::Serialize;
use tracing::trace;

/// Threshold lookup by column count. Not derived from a formula.
///
/// ```
/// use kartgrid_core::performance::threshold_for;
///
/// assert_eq!(threshold_for(2), 100);
/// assert_eq!(threshold_for(3), 66);
/// assert_eq!(threshold_for(4), 75);
/// assert_eq!(threshold_for(7), 100);
/// ```
pub const fn threshold_for(columns: usize) -> u8 {
    match columns {
        2 => 100,
        3 => 66,
        4 => 75,
        _ => 100,
    }
}

/// `round(good * 100 / total)`, half up. Zero columns → 0.
pub const fn percentage(good: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((good * 200 + total) / (total * 2)) as u8
}

/// What the UI is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PerformanceSignal {
    pub is_optimal: bool,
    pub percentage: u8,
    pub threshold: u8,
}

impl PerformanceSignal {
    /// Live computation over the lead kart of every column.
    pub fn compute(grid: &Reconciliation) -> Self {
        let total = grid.columns.len();
        let good = grid
            .columns
            .iter()
            .filter(|c| c.lead().is_some_and(|lead| lead.base.performance.is_good()))
            .count();
        let percentage = percentage(good, total);
        let threshold = threshold_for(total);
        Self {
            is_optimal: percentage >= threshold,
            percentage,
            threshold,
        }
    }
}

/// Stability-gated aggregator. One per grid.
#[derive(Debug, Default)]
pub struct PerformanceAggregator {
    /// Last `(is_optimal, percentage)` computed while the grid was stable.
    stable: Option<(bool, u8)>,
    last_emitted: Option<PerformanceSignal>,
}

impl PerformanceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new grid. Returns a signal only when it differs from the last
    /// one emitted.
    pub fn update(&mut self, grid: &Reconciliation, any_pending: bool) -> Option<PerformanceSignal> {
        let threshold = threshold_for(grid.columns.len());
        // A number shared across columns can be permanent; only in-column
        // repeats mark a transient store state.
        let transient = any_pending || grid.column_duplicates;

        let (is_optimal, percentage) = if transient {
            trace!(any_pending, duplicates = grid.column_duplicates, "performance frozen");
            self.stable?
        } else {
            let live = PerformanceSignal::compute(grid);
            self.stable = Some((live.is_optimal, live.percentage));
            (live.is_optimal, live.percentage)
        };

        let signal = PerformanceSignal {
            is_optimal,
            percentage,
            threshold,
        };
        if self.last_emitted == Some(signal) {
            return None;
        }
        self.last_emitted = Some(signal);
        Some(signal)
    }

    pub fn last_emitted(&self) -> Option<PerformanceSignal> {
        self.last_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::models::{
        KartNumber, KartRecord, MergedColumn, MergedKartRecord, Performance, RecordId, Timestamp,
    };

    fn grid(leads: &[Option<Performance>]) -> Reconciliation {
        let columns = GridConfig::with_columns(leads.len())
            .column_specs()
            .into_iter()
            .zip(leads)
            .map(|(spec, lead)| {
                let mut column = MergedColumn::new(spec);
                if let Some(performance) = lead {
                    let index = column.spec.index;
                    column.records.push(MergedKartRecord::remote(KartRecord {
                        id: RecordId::new(format!("k{index}")),
                        number: KartNumber::new(index as i64 + 1).unwrap(),
                        performance: *performance,
                        column: index,
                        timestamp: Timestamp(1),
                    }));
                }
                column
            })
            .collect();
        Reconciliation {
            columns,
            duplicates_detected: false,
            column_duplicates: false,
            dropped: 0,
        }
    }

    use Performance::*;

    #[test]
    fn threshold_table_is_verbatim() {
        let cases = [(0, 100), (1, 100), (2, 100), (3, 66), (4, 75), (5, 100)];
        for (columns, expected) in cases {
            assert_eq!(threshold_for(columns), expected, "threshold({columns})");
        }
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(1, 2), 50);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn three_columns_two_good_is_optimal() {
        let signal = PerformanceSignal::compute(&grid(&[Some(VeryGood), Some(Average), Some(Good)]));
        assert_eq!(
            signal,
            PerformanceSignal {
                is_optimal: true,
                percentage: 67,
                threshold: 66
            }
        );
    }

    #[test]
    fn four_columns_one_good_is_not_optimal() {
        let signal = PerformanceSignal::compute(&grid(&[
            Some(VeryGood),
            Some(Poor),
            Some(Average),
            Some(VeryPoor),
        ]));
        assert_eq!(signal.percentage, 25);
        assert_eq!(signal.threshold, 75);
        assert!(!signal.is_optimal);
    }

    #[test]
    fn empty_column_is_not_good() {
        let signal = PerformanceSignal::compute(&grid(&[Some(Good), None]));
        assert_eq!(signal.percentage, 50);
        assert!(!signal.is_optimal);
    }

    #[test]
    fn emits_only_on_change() {
        let mut agg = PerformanceAggregator::new();
        let g = grid(&[Some(Good), Some(Good)]);
        assert!(agg.update(&g, false).is_some());
        assert!(agg.update(&g, false).is_none());

        let worse = grid(&[Some(Good), Some(Poor)]);
        let signal = agg.update(&worse, false).unwrap();
        assert_eq!(signal.percentage, 50);
    }

    #[test]
    fn freezes_while_pending_or_duplicated() {
        let mut agg = PerformanceAggregator::new();
        let good = grid(&[Some(Good), Some(Good)]);
        let bad = grid(&[Some(Poor), Some(Poor)]);

        agg.update(&good, false);
        assert!(agg.update(&bad, true).is_none());

        let mut dup = bad.clone();
        dup.duplicates_detected = true;
        dup.column_duplicates = true;
        assert!(agg.update(&dup, false).is_none());
        assert_eq!(agg.last_emitted().unwrap().percentage, 100);

        let resumed = agg.update(&bad, false).unwrap();
        assert_eq!(resumed.percentage, 0);
        assert!(!resumed.is_optimal);
    }

    #[test]
    fn number_shared_across_columns_does_not_freeze() {
        let mut agg = PerformanceAggregator::new();
        agg.update(&grid(&[Some(Good), Some(Good)]), false);

        let mut shared = grid(&[Some(Poor), Some(Good)]);
        shared.duplicates_detected = true;
        let signal = agg.update(&shared, false).unwrap();
        assert_eq!(signal.percentage, 50);
    }

    #[test]
    fn nothing_emitted_before_first_stable_grid() {
        let mut agg = PerformanceAggregator::new();
        assert!(agg.update(&grid(&[Some(Good)]), true).is_none());
        assert!(agg.last_emitted().is_none());
    }
}
