//! Optimistic overlay: moves the user made that the store has not confirmed.
//!
//! One instance per grid. Only the move orchestrator writes it; the
//! reconciler and the performance aggregator read it.

use crate::clock::{Clock, SystemClock};
use crate::models::{KartNumber, Performance, RecordId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// An in-flight move of one kart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticMove {
    pub kart_id: RecordId,
    pub from_column: usize,
    pub to_column: usize,
    pub number: KartNumber,
    pub performance: Performance,
    pub created_at: Timestamp,
}

impl OptimisticMove {
    fn same_intent(&self, from: usize, to: usize, number: KartNumber, perf: Performance) -> bool {
        self.from_column == from
            && self.to_column == to
            && self.number == number
            && self.performance == perf
    }
}

/// Where the overlay currently shows a kart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPosition {
    pub column: usize,
    pub display_timestamp: Timestamp,
}

/// Map of in-flight moves keyed by kart id.
pub struct OptimisticState {
    moves: HashMap<RecordId, OptimisticMove>,
    clock: Arc<dyn Clock>,
    last_created: Timestamp,
}

impl Default for OptimisticState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptimisticState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticState")
            .field("moves", &self.moves)
            .field("last_created", &self.last_created)
            .finish()
    }
}

impl OptimisticState {
    /// Empty overlay stamped by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            moves: HashMap::new(),
            clock,
            last_created: Timestamp::default(),
        }
    }

    /// Upsert the overlay entry for `kart_id`.
    ///
    /// Identical repeated calls leave the entry untouched. Returns whether the
    /// overlay changed.
    pub fn apply_move(
        &mut self,
        kart_id: RecordId,
        from_column: usize,
        to_column: usize,
        number: KartNumber,
        performance: Performance,
    ) -> bool {
        if let Some(existing) = self.moves.get(&kart_id) {
            if existing.same_intent(from_column, to_column, number, performance) {
                return false;
            }
        }

        // Strictly increasing so later drops always sort first.
        let created_at = self.clock.now().max(self.last_created.next());
        self.last_created = created_at;

        debug!(
            kart = %kart_id,
            from = from_column,
            to = to_column,
            number = %number,
            "overlay apply"
        );
        self.moves.insert(
            kart_id.clone(),
            OptimisticMove {
                kart_id,
                from_column,
                to_column,
                number,
                performance,
                created_at,
            },
        );
        true
    }

    /// Drop the entry after the store accepted the move.
    pub fn confirm(&mut self, kart_id: &RecordId) -> Option<OptimisticMove> {
        let removed = self.moves.remove(kart_id);
        if removed.is_some() {
            debug!(kart = %kart_id, "overlay confirm");
        }
        removed
    }

    /// Drop the entry after the store rejected the move.
    pub fn rollback(&mut self, kart_id: &RecordId) -> Option<OptimisticMove> {
        let removed = self.moves.remove(kart_id);
        if removed.is_some() {
            debug!(kart = %kart_id, "overlay rollback");
        }
        removed
    }

    pub fn position_of(&self, kart_id: &RecordId) -> Option<OverlayPosition> {
        self.moves.get(kart_id).map(|m| OverlayPosition {
            column: m.to_column,
            display_timestamp: m.created_at,
        })
    }

    pub fn is_pending(&self, kart_id: &RecordId) -> bool {
        self.moves.contains_key(kart_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.moves.is_empty()
    }

    pub fn get(&self, kart_id: &RecordId) -> Option<&OptimisticMove> {
        self.moves.get(kart_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptimisticMove> {
        self.moves.values()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Forget every in-flight move (grid teardown).
    pub fn clear(&mut self) {
        self.moves.clear();
    }
}
