//! In-memory store used by the simulator and the tests.
//!
//! Behaves like the remote document store: every mutation is atomic and is
//! followed by a fresh snapshot to every subscriber. Faults can be injected.

use super::{RemoteStore, StoreResult};
use crate::clock::{Clock, SystemClock};
use crate::error::PersistenceError;
use crate::models::{ColumnsSnapshot, KartNumber, KartRecord, Performance, RecordId, Timestamp};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One `move_kart` invocation as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCall {
    pub from_column: usize,
    pub to_column: usize,
    pub record_id: RecordId,
    pub number: KartNumber,
    pub performance: Performance,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<ColumnsSnapshot>,
    count: usize,
    rows_limit: usize,
}

struct Inner {
    columns: Vec<Vec<KartRecord>>,
    capacity: usize,
    next_id: u64,
    last_stamp: Timestamp,
    subscribers: Vec<Subscriber>,
    failing_moves: usize,
    offline: bool,
    move_calls: Vec<MoveCall>,
}

impl Inner {
    fn stamp(&mut self, clock: &dyn Clock) -> Timestamp {
        let ts = clock.now().max(self.last_stamp.next());
        self.last_stamp = ts;
        ts
    }

    fn check_column(&self, column: usize) -> StoreResult<()> {
        if column < self.columns.len() {
            Ok(())
        } else {
            Err(PersistenceError::Rejected(format!(
                "column {column} does not exist"
            )))
        }
    }

    fn check_room(&self, column: usize) -> StoreResult<()> {
        if self.columns[column].len() >= self.capacity {
            Err(PersistenceError::CapacityExceeded {
                column,
                capacity: self.capacity,
            })
        } else {
            Ok(())
        }
    }

    fn position(&self, column: usize, id: &RecordId) -> StoreResult<usize> {
        self.columns[column]
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| PersistenceError::NotFound {
                record_id: id.to_string(),
                column,
            })
    }

    fn snapshot(&self, count: usize, rows_limit: usize) -> ColumnsSnapshot {
        let columns = (0..count)
            .map(|index| {
                let mut records = self.columns.get(index).cloned().unwrap_or_default();
                records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                records.truncate(rows_limit);
                records
            })
            .collect();
        ColumnsSnapshot::new(columns)
    }

    fn publish(&mut self) {
        let snapshots: Vec<_> = self
            .subscribers
            .iter()
            .map(|s| self.snapshot(s.count, s.rows_limit))
            .collect();
        let mut alive = Vec::with_capacity(self.subscribers.len());
        for (subscriber, snapshot) in self.subscribers.drain(..).zip(snapshots) {
            if subscriber.tx.send(snapshot).is_ok() {
                alive.push(subscriber);
            }
        }
        self.subscribers = alive;
    }
}

/// Process-local [`RemoteStore`].
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    /// Store with `columns` columns of `capacity` rows each.
    pub fn new(columns: usize, capacity: usize) -> Self {
        Self::with_clock(columns, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(columns: usize, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                columns: vec![Vec::new(); columns],
                capacity,
                next_id: 1,
                last_stamp: Timestamp::default(),
                subscribers: Vec::new(),
                failing_moves: 0,
                offline: false,
                move_calls: Vec::new(),
            }),
            clock,
            latency: None,
        }
    }

    /// Delay every write by `latency` before it is applied.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Insert a record directly, bypassing faults. For fixtures.
    pub fn seed(&self, column: usize, number: KartNumber, performance: Performance) -> RecordId {
        let mut inner = self.lock();
        let id = RecordId::new(format!("kart-{}", inner.next_id));
        inner.next_id += 1;
        let timestamp = inner.stamp(self.clock.as_ref());
        if let Some(records) = inner.columns.get_mut(column) {
            records.push(KartRecord {
                id: id.clone(),
                number,
                performance,
                column,
                timestamp,
            });
        }
        inner.publish();
        id
    }

    /// Reject the next `n` move calls.
    pub fn fail_next_moves(&self, n: usize) {
        self.lock().failing_moves = n;
    }

    /// Simulate losing the connection: every write fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn move_calls(&self) -> Vec<MoveCall> {
        self.lock().move_calls.clone()
    }

    /// Full current state, most recent first, no row limit.
    pub fn snapshot(&self) -> ColumnsSnapshot {
        let inner = self.lock();
        inner.snapshot(inner.columns.len(), usize::MAX)
    }

    fn online(inner: &Inner) -> StoreResult<()> {
        if inner.offline {
            Err(PersistenceError::Unavailable("store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn stream_columns(&self, count: usize, rows_limit: usize) -> BoxStream<'static, ColumnsSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        // Receiver is alive, the initial send cannot fail.
        let _ = tx.send(inner.snapshot(count, rows_limit));
        inner.subscribers.push(Subscriber {
            tx,
            count,
            rows_limit,
        });

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|s| (s, rx)) }).boxed()
    }

    async fn add(
        &self,
        column: usize,
        number: KartNumber,
        performance: Performance,
    ) -> StoreResult<RecordId> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        Self::online(&inner)?;
        inner.check_column(column)?;
        inner.check_room(column)?;

        let id = RecordId::new(format!("kart-{}", inner.next_id));
        inner.next_id += 1;
        let timestamp = inner.stamp(self.clock.as_ref());
        inner.columns[column].push(KartRecord {
            id: id.clone(),
            number,
            performance,
            column,
            timestamp,
        });
        debug!(%id, column, %number, "store add");
        inner.publish();
        Ok(id)
    }

    async fn edit(
        &self,
        column: usize,
        record_id: &RecordId,
        number: KartNumber,
        performance: Performance,
    ) -> StoreResult<()> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        Self::online(&inner)?;
        inner.check_column(column)?;
        let at = inner.position(column, record_id)?;

        let record = &mut inner.columns[column][at];
        record.number = number;
        record.performance = performance;
        debug!(id = %record_id, column, %number, "store edit");
        inner.publish();
        Ok(())
    }

    async fn delete(&self, column: usize, record_id: &RecordId) -> StoreResult<()> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        Self::online(&inner)?;
        inner.check_column(column)?;
        let at = inner.position(column, record_id)?;

        inner.columns[column].remove(at);
        debug!(id = %record_id, column, "store delete");
        inner.publish();
        Ok(())
    }

    async fn move_kart(
        &self,
        from_column: usize,
        to_column: usize,
        record_id: &RecordId,
        number: KartNumber,
        performance: Performance,
    ) -> StoreResult<()> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.move_calls.push(MoveCall {
            from_column,
            to_column,
            record_id: record_id.clone(),
            number,
            performance,
        });

        Self::online(&inner)?;
        if inner.failing_moves > 0 {
            inner.failing_moves -= 1;
            warn!(id = %record_id, "store move rejected (injected)");
            return Err(PersistenceError::Rejected("injected failure".into()));
        }

        // Validate everything before touching state.
        inner.check_column(from_column)?;
        inner.check_column(to_column)?;
        let at = inner.position(from_column, record_id)?;
        inner.check_room(to_column)?;

        let mut record = inner.columns[from_column].remove(at);
        record.column = to_column;
        record.number = number;
        record.performance = performance;
        record.timestamp = inner.stamp(self.clock.as_ref());
        inner.columns[to_column].push(record);

        debug!(id = %record_id, from = from_column, to = to_column, "store move");
        inner.publish();
        Ok(())
    }
}
