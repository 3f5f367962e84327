//! Grid events and the observer registry the presentation layer subscribes to.

use crate::error::{Error, PersistenceError};
use crate::models::{KartNumber, Performance, RecordId};
use crate::performance::PerformanceSignal;
use crate::reconcile::Reconciliation;
use std::collections::BTreeMap;

/// Handle returned by [`Observers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Box<dyn FnMut(&E) + Send>;

/// Ordered observer registry. Callbacks run in subscription order.
pub struct Observers<E> {
    next_id: u64,
    callbacks: BTreeMap<SubscriptionId, Callback<E>>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            callbacks: BTreeMap::new(),
        }
    }
}

impl<E> std::fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.callbacks.len())
            .finish()
    }
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&E) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks.insert(id, Box::new(callback));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn emit(&mut self, event: &E) {
        for callback in self.callbacks.values_mut() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// A user drop, also handed back as the retry action of a failed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub kart_id: RecordId,
    pub from_column: usize,
    pub to_column: usize,
    pub number: KartNumber,
    pub performance: Performance,
}

/// Store operations other than `move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Add,
    Edit,
    Delete,
}

/// Events emitted by a grid session.
#[derive(Debug, Clone)]
pub enum GridEvent {
    /// The displayed grid changed.
    GridChanged(Reconciliation),
    /// The performance signal changed.
    PerformanceChanged(PerformanceSignal),
    /// A drop was applied locally (tactile acknowledgment).
    MoveAcknowledged { kart_id: RecordId, to_column: usize },
    /// The store accepted the move.
    MoveConfirmed { kart_id: RecordId, to_column: usize },
    /// The store rejected the move; the grid has been reverted.
    MoveFailed {
        kart_id: RecordId,
        error: PersistenceError,
        retry: MoveRequest,
    },
    /// An add, edit or delete failed. No automatic retry.
    PersistenceFailed {
        operation: StoreOperation,
        error: Error,
    },
}

impl GridEvent {
    pub fn as_performance(&self) -> Option<PerformanceSignal> {
        match self {
            GridEvent::PerformanceChanged(signal) => Some(*signal),
            _ => None,
        }
    }
}

impl Observers<GridEvent> {
    /// Subscribe a `(is_optimal, percentage, threshold)` callback.
    pub fn on_performance_update(
        &mut self,
        mut callback: impl FnMut(bool, u8, u8) + Send + 'static,
    ) -> SubscriptionId {
        self.subscribe(move |event| {
            if let Some(signal) = event.as_performance() {
                callback(signal.is_optimal, signal.percentage, signal.threshold);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn observers_run_in_order_until_unsubscribed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::<u32>::new();

        let a = {
            let log = log.clone();
            observers.subscribe(move |e| log.lock().unwrap().push(("a", *e)))
        };
        {
            let log = log.clone();
            observers.subscribe(move |e| log.lock().unwrap().push(("b", *e)));
        }

        observers.emit(&1);
        assert!(observers.unsubscribe(a));
        assert!(!observers.unsubscribe(a));
        observers.emit(&2);

        assert_eq!(*log.lock().unwrap(), vec![("a", 1), ("b", 1), ("b", 2)]);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn performance_helper_filters_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::<GridEvent>::new();
        {
            let seen = seen.clone();
            observers.on_performance_update(move |opt, pct, thr| {
                seen.lock().unwrap().push((opt, pct, thr))
            });
        }

        observers.emit(&GridEvent::MoveAcknowledged {
            kart_id: "k".into(),
            to_column: 1,
        });
        observers.emit(&GridEvent::PerformanceChanged(PerformanceSignal {
            is_optimal: true,
            percentage: 67,
            threshold: 66,
        }));

        assert_eq!(*seen.lock().unwrap(), vec![(true, 67, 66)]);
    }
}
