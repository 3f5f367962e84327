//! Grid session - one mounted kart grid and its event loop.
//!
//! Architecture:
//! - One [`GridSession`] per displayed grid, created on mount and consumed by
//!   [`GridSession::run`] until teardown
//! - The loop is the only writer of the overlay: user commands, remote
//!   snapshots, debounce expiries and store completions are all delivered
//!   as messages and processed to completion one at a time
//! - [`GridHandle`] is the cloneable front the presentation layer talks to

use crate::clock::{Clock, SystemClock};
use crate::config::GridConfig;
use crate::error::{Error, Result, ValidationError};
use crate::events::{GridEvent, MoveRequest, Observers, StoreOperation, SubscriptionId};
use crate::models::{ColumnSpec, ColumnsSnapshot, KartNumber, Performance, RecordId};
use crate::orchestrator::{MoveOrchestrator, MoveOutcome, MovePhase, MoveSignal};
use crate::overlay::OptimisticState;
use crate::performance::{PerformanceAggregator, PerformanceSignal};
use crate::reconcile::{reconcile, Reconciliation};
use crate::store::RemoteStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type BoxedObserver = Box<dyn FnMut(&GridEvent) + Send>;

/// Requests from a [`GridHandle`] to the loop.
enum GridCommand {
    Drop(MoveRequest),
    Subscribe {
        callback: BoxedObserver,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    ReportFailure {
        operation: StoreOperation,
        error: Error,
    },
    Inspect {
        reply: oneshot::Sender<GridState>,
    },
    Teardown,
}

/// Point-in-time view of a session, for hosts and tests.
#[derive(Debug, Clone)]
pub struct GridState {
    /// `None` until the first remote snapshot arrived.
    pub grid: Option<Reconciliation>,
    pub remote: ColumnsSnapshot,
    pub pending: Vec<(RecordId, MovePhase)>,
    pub performance: Option<PerformanceSignal>,
}

/// Loop-owned state. Everything here runs on the session task.
struct GridCore<S: RemoteStore> {
    specs: Vec<ColumnSpec>,
    orchestrator: MoveOrchestrator<S>,
    aggregator: PerformanceAggregator,
    observers: Observers<GridEvent>,
    remote: ColumnsSnapshot,
    grid: Option<Reconciliation>,
}

impl<S: RemoteStore> GridCore<S> {
    fn emit(&mut self, event: GridEvent) {
        self.observers.emit(&event);
    }

    fn refresh(&mut self) {
        // Nothing to show before the store has spoken.
        if self.grid.is_none() && self.remote.columns.is_empty() {
            return;
        }

        let grid = reconcile(&self.remote, self.orchestrator.overlay(), &self.specs);
        let changed = !self
            .grid
            .as_ref()
            .is_some_and(|shown| shown.same_view(&grid));
        self.grid = Some(grid.clone());
        if changed {
            self.emit(GridEvent::GridChanged(grid.clone()));
        }

        let pending = self.orchestrator.overlay().has_pending();
        if let Some(signal) = self.aggregator.update(&grid, pending) {
            debug!(
                optimal = signal.is_optimal,
                percentage = signal.percentage,
                threshold = signal.threshold,
                "performance changed"
            );
            self.emit(GridEvent::PerformanceChanged(signal));
        }
    }

    fn apply_snapshot(&mut self, snapshot: ColumnsSnapshot) {
        debug!(
            columns = snapshot.columns.len(),
            records = snapshot.records().count(),
            "remote snapshot"
        );
        self.remote = snapshot;
        self.refresh();
    }

    fn apply_outcome(&mut self, outcome: MoveOutcome) {
        let event = match outcome {
            MoveOutcome::Acknowledged { kart_id, to_column } => {
                GridEvent::MoveAcknowledged { kart_id, to_column }
            }
            MoveOutcome::Confirmed { kart_id, to_column } => {
                GridEvent::MoveConfirmed { kart_id, to_column }
            }
            MoveOutcome::Failed {
                kart_id,
                error,
                retry,
            } => GridEvent::MoveFailed {
                kart_id,
                error,
                retry,
            },
        };
        self.emit(event);
    }

    fn handle_signal(&mut self, signal: MoveSignal) {
        let remote = &self.remote;
        let outcome = self
            .orchestrator
            .on_signal(signal, |id| remote.column_of(id));
        if let Some(outcome) = outcome {
            self.apply_outcome(outcome);
        }
        self.refresh();
    }

    fn handle_command(&mut self, command: GridCommand) {
        match command {
            GridCommand::Drop(request) => match self.orchestrator.on_drop(request) {
                Ok(outcome) => {
                    self.apply_outcome(outcome);
                    self.refresh();
                }
                Err(e) => debug!(error = %e, "drop ignored"),
            },
            GridCommand::Subscribe {
                mut callback,
                reply,
            } => {
                // Late subscribers start from the current signal.
                if let Some(signal) = self.aggregator.last_emitted() {
                    callback(&GridEvent::PerformanceChanged(signal));
                }
                let id = self.observers.subscribe(callback);
                let _ = reply.send(id);
            }
            GridCommand::Unsubscribe { id, reply } => {
                let _ = reply.send(self.observers.unsubscribe(id));
            }
            GridCommand::ReportFailure { operation, error } => {
                self.emit(GridEvent::PersistenceFailed { operation, error });
            }
            GridCommand::Inspect { reply } => {
                let _ = reply.send(GridState {
                    grid: self.grid.clone(),
                    remote: self.remote.clone(),
                    pending: self.orchestrator.phases(),
                    performance: self.aggregator.last_emitted(),
                });
            }
            GridCommand::Teardown => {}
        }
    }

    fn teardown(&mut self) {
        self.orchestrator.teardown();
        info!("grid torn down");
    }
}

/// A mounted grid. Drive it with [`GridSession::run`].
pub struct GridSession<S: RemoteStore> {
    store: Arc<S>,
    rows_limit: usize,
    core: GridCore<S>,
    commands: mpsc::UnboundedReceiver<GridCommand>,
    signals: mpsc::UnboundedReceiver<MoveSignal>,
}

impl<S: RemoteStore> GridSession<S> {
    /// Mount a grid over `store`.
    pub fn mount(store: Arc<S>, config: GridConfig) -> Result<(Self, GridHandle<S>)> {
        Self::mount_with_clock(store, config, Arc::new(SystemClock))
    }

    /// Mount with an explicit clock for overlay timestamps.
    pub fn mount_with_clock(
        store: Arc<S>,
        config: GridConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, GridHandle<S>)> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let orchestrator = MoveOrchestrator::new(
            Arc::clone(&store),
            OptimisticState::with_clock(clock),
            config.debounce,
            signal_tx,
        );

        let specs = config.column_specs();
        let handle = GridHandle {
            commands: command_tx,
            store: Arc::clone(&store),
            columns: specs.len(),
        };
        let session = Self {
            store,
            rows_limit: config.rows_limit,
            core: GridCore {
                specs,
                orchestrator,
                aggregator: PerformanceAggregator::new(),
                observers: Observers::new(),
                remote: ColumnsSnapshot::default(),
                grid: None,
            },
            commands: command_rx,
            signals: signal_rx,
        };
        Ok((session, handle))
    }

    /// Observers registered before the loop starts.
    pub fn observers_mut(&mut self) -> &mut Observers<GridEvent> {
        &mut self.core.observers
    }

    /// Run the event loop until teardown or until every handle is dropped.
    pub async fn run(self) {
        let Self {
            store,
            rows_limit,
            mut core,
            mut commands,
            mut signals,
        } = self;

        let mut snapshots = store.stream_columns(core.specs.len(), rows_limit);
        let mut stream_open = true;
        info!(columns = core.specs.len(), rows_limit, "grid mounted");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(GridCommand::Teardown) | None => break,
                    Some(command) => core.handle_command(command),
                },
                Some(signal) = signals.recv() => core.handle_signal(signal),
                snapshot = snapshots.next(), if stream_open => match snapshot {
                    Some(snapshot) => core.apply_snapshot(snapshot),
                    None => {
                        warn!("snapshot stream ended");
                        stream_open = false;
                    }
                },
            }
        }

        core.teardown();
    }
}

/// Cloneable front of a running session.
pub struct GridHandle<S: RemoteStore> {
    commands: mpsc::UnboundedSender<GridCommand>,
    store: Arc<S>,
    columns: usize,
}

impl<S: RemoteStore> Clone for GridHandle<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            store: Arc::clone(&self.store),
            columns: self.columns,
        }
    }
}

impl<S: RemoteStore> GridHandle<S> {
    fn check_column(&self, index: usize) -> Result<()> {
        if index < self.columns {
            Ok(())
        } else {
            Err(ValidationError::ColumnOutOfRange {
                index,
                count: self.columns,
            }
            .into())
        }
    }

    fn send(&self, command: GridCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    /// User dropped `kart_id` from `from_column` onto `to_column`.
    pub fn drop_kart(
        &self,
        kart_id: RecordId,
        from_column: usize,
        to_column: usize,
        number: KartNumber,
        performance: Performance,
    ) -> Result<()> {
        self.submit(MoveRequest {
            kart_id,
            from_column,
            to_column,
            number,
            performance,
        })
    }

    /// Re-issue a move handed back by [`GridEvent::MoveFailed`].
    pub fn retry(&self, retry: MoveRequest) -> Result<()> {
        self.submit(retry)
    }

    fn submit(&self, request: MoveRequest) -> Result<()> {
        self.check_column(request.from_column)?;
        self.check_column(request.to_column)?;
        if request.from_column == request.to_column {
            return Err(ValidationError::SelfMove {
                kart_id: request.kart_id.to_string(),
                column: request.to_column,
            }
            .into());
        }
        self.send(GridCommand::Drop(request))
    }

    pub async fn add_kart(
        &self,
        column: usize,
        number: KartNumber,
        performance: Performance,
    ) -> Result<RecordId> {
        self.check_column(column)?;
        let result = self.store.add(column, number, performance).await;
        self.surface(StoreOperation::Add, result)
    }

    pub async fn edit_kart(
        &self,
        column: usize,
        record_id: &RecordId,
        number: KartNumber,
        performance: Performance,
    ) -> Result<()> {
        self.check_column(column)?;
        let result = self.store.edit(column, record_id, number, performance).await;
        self.surface(StoreOperation::Edit, result)
    }

    pub async fn delete_kart(&self, column: usize, record_id: &RecordId) -> Result<()> {
        self.check_column(column)?;
        let result = self.store.delete(column, record_id).await;
        self.surface(StoreOperation::Delete, result)
    }

    fn surface<T>(
        &self,
        operation: StoreOperation,
        result: crate::store::StoreResult<T>,
    ) -> Result<T> {
        result.map_err(|e| {
            let error = Error::from(e);
            warn!(?operation, %error, "store write failed");
            // A closed session has nobody left to notify.
            let _ = self.send(GridCommand::ReportFailure {
                operation,
                error: error.clone(),
            });
            error
        })
    }

    pub async fn subscribe(
        &self,
        callback: impl FnMut(&GridEvent) + Send + 'static,
    ) -> Result<SubscriptionId> {
        let (reply, rx) = oneshot::channel();
        self.send(GridCommand::Subscribe {
            callback: Box::new(callback),
            reply,
        })?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Subscribe an `(is_optimal, percentage, threshold)` callback.
    pub async fn on_performance_update(
        &self,
        mut callback: impl FnMut(bool, u8, u8) + Send + 'static,
    ) -> Result<SubscriptionId> {
        self.subscribe(move |event| {
            if let Some(signal) = event.as_performance() {
                callback(signal.is_optimal, signal.percentage, signal.threshold);
            }
        })
        .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(GridCommand::Unsubscribe { id, reply })?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    pub async fn inspect(&self) -> Result<GridState> {
        let (reply, rx) = oneshot::channel();
        self.send(GridCommand::Inspect { reply })?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Dispose the grid: outstanding debounce timers are cancelled.
    pub fn teardown(&self) -> Result<()> {
        self.send(GridCommand::Teardown)
    }

    pub fn columns(&self) -> usize {
        self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PersistenceError;
    use crate::store::InMemoryStore;
    use std::sync::Mutex;
    use std::time::Duration;

    fn num(n: i64) -> KartNumber {
        KartNumber::new(n).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    async fn mounted(
        store: Arc<InMemoryStore>,
        columns: usize,
    ) -> (GridHandle<InMemoryStore>, Arc<Mutex<Vec<GridEvent>>>) {
        let config = GridConfig::with_columns(columns);
        let (session, handle) =
            GridSession::mount_with_clock(store, config, Arc::new(ManualClock::new(1))).unwrap();
        tokio::spawn(session.run());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        handle
            .subscribe(move |e| sink.lock().unwrap().push(e.clone()))
            .await
            .unwrap();
        settle().await;
        (handle, events)
    }

    #[tokio::test(start_paused = true)]
    async fn first_snapshot_renders_grid() {
        let store = Arc::new(InMemoryStore::new(3, 4));
        store.seed(0, num(1), Performance::VeryGood);
        store.seed(1, num(2), Performance::Average);
        store.seed(2, num(3), Performance::Good);

        let (handle, _events) = mounted(store, 3).await;
        let state = handle.inspect().await.unwrap();
        let grid = state.grid.unwrap();
        assert_eq!(grid.columns.len(), 3);
        assert_eq!(
            state.performance,
            Some(PerformanceSignal {
                is_optimal: true,
                percentage: 67,
                threshold: 66
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drop_shows_immediately_then_confirms() {
        let store = Arc::new(InMemoryStore::new(3, 4));
        let kart = store.seed(0, num(7), Performance::Good);
        let (handle, events) = mounted(store.clone(), 3).await;

        handle
            .drop_kart(kart.clone(), 0, 2, num(7), Performance::Good)
            .unwrap();
        let state = handle.inspect().await.unwrap();
        assert_eq!(state.grid.unwrap().column_of(&kart), Some(2));
        assert_eq!(state.pending.len(), 1);
        assert!(store.move_calls().is_empty());

        settle().await;
        let state = handle.inspect().await.unwrap();
        assert!(state.pending.is_empty());
        assert_eq!(state.remote.column_of(&kart), Some(2));

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, GridEvent::MoveAcknowledged { to_column: 2, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, GridEvent::MoveConfirmed { to_column: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_validates_before_queueing() {
        let store = Arc::new(InMemoryStore::new(2, 4));
        let kart = store.seed(0, num(7), Performance::Good);
        let (handle, _events) = mounted(store, 2).await;

        assert!(matches!(
            handle.drop_kart(kart.clone(), 0, 5, num(7), Performance::Good),
            Err(Error::Validation(ValidationError::ColumnOutOfRange { index: 5, count: 2 }))
        ));
        assert!(matches!(
            handle.drop_kart(kart, 1, 1, num(7), Performance::Good),
            Err(Error::Validation(ValidationError::SelfMove { .. }))
        ));
        assert!(handle.inspect().await.unwrap().pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn add_failure_is_surfaced_without_retry() {
        let store = Arc::new(InMemoryStore::new(2, 4));
        let (handle, events) = mounted(store.clone(), 2).await;

        store.set_offline(true);
        let err = handle.add_kart(0, num(4), Performance::Good).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Persistence(PersistenceError::Unavailable(_))
        ));
        handle.inspect().await.unwrap();

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            GridEvent::PersistenceFailed {
                operation: StoreOperation::Add,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery() {
        let store = Arc::new(InMemoryStore::new(2, 4));
        let kart = store.seed(0, num(3), Performance::Good);
        let (handle, _events) = mounted(store, 2).await;

        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let id = handle
            .subscribe(move |_| *sink.lock().unwrap() += 1)
            .await
            .unwrap();
        // Current performance replayed on subscribe.
        assert_eq!(*count.lock().unwrap(), 1);
        assert!(handle.unsubscribe(id).await.unwrap());

        handle.drop_kart(kart, 0, 1, num(3), Performance::Good).unwrap();
        settle().await;
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_performance_subscriber_gets_current_signal() {
        let store = Arc::new(InMemoryStore::new(3, 4));
        store.seed(0, num(1), Performance::VeryGood);
        store.seed(1, num(2), Performance::Average);
        store.seed(2, num(3), Performance::Good);
        let (handle, events) = mounted(store, 3).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        handle
            .on_performance_update(move |optimal, pct, threshold| {
                sink.lock().unwrap().push((optimal, pct, threshold))
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![(true, 67, 66)]);
        // Replay goes to the new subscriber only.
        let signals = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_performance().is_some())
            .count();
        assert_eq!(signals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_closes_handle() {
        let store = Arc::new(InMemoryStore::new(2, 4));
        let kart = store.seed(0, num(3), Performance::Good);
        let (handle, _events) = mounted(store.clone(), 2).await;

        handle
            .drop_kart(kart.clone(), 0, 1, num(3), Performance::Good)
            .unwrap();
        handle.teardown().unwrap();
        settle().await;

        assert!(store.move_calls().is_empty());
        assert_eq!(store.snapshot().column_of(&kart), Some(0));
        assert!(matches!(handle.inspect().await, Err(Error::SessionClosed)));
    }
}
