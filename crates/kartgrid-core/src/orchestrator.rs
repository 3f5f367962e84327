//! Move orchestration: drop → optimistic apply → debounce → persist →
//! confirm or rollback.
//!
//! # Per-kart state machine
//!
//! ```text
//! Idle → OptimisticApplied → Debouncing → Persisting → Confirmed  → Idle
//!              ↑                  │            │      ↘ RolledBack → Idle
//!              └──── re-drop ─────┴────────────┘
//! ```
//!
//! Timers and store calls run as spawned tasks that report back on the
//! session channel. Every scheduled move carries a generation so that a
//! message from a superseded drop is recognised and ignored.
//!
//! A kart has at most one store call outstanding. A re-drop that comes due
//! while an older call is on the wire waits for it, then persists from the
//! column that call left the kart in.

use crate::error::{Error, PersistenceError, Result, ValidationError};
use crate::events::MoveRequest;
use crate::models::RecordId;
use crate::overlay::OptimisticState;
use crate::store::{RemoteStore, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Phase of one kart's move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovePhase {
    Idle,
    OptimisticApplied,
    Debouncing,
    Persisting,
    Confirmed,
    RolledBack,
}

impl MovePhase {
    /// Legal edges of the state machine.
    pub fn can_transition_to(self, next: MovePhase) -> bool {
        use MovePhase::*;
        matches!(
            (self, next),
            (Idle, OptimisticApplied)
                | (OptimisticApplied, Debouncing)
                | (Debouncing, OptimisticApplied)
                | (Debouncing, Persisting)
                | (Debouncing, Confirmed)
                | (Persisting, OptimisticApplied)
                | (Persisting, Confirmed)
                | (Persisting, RolledBack)
                | (Confirmed, Idle)
                | (RolledBack, Idle)
        )
    }

    fn entered_from(self) -> &'static str {
        use MovePhase::*;
        match self {
            Idle => "Confirmed or RolledBack",
            OptimisticApplied => "Idle, Debouncing or Persisting",
            Debouncing => "OptimisticApplied",
            Persisting => "Debouncing",
            Confirmed => "Debouncing or Persisting",
            RolledBack => "Persisting",
        }
    }
}

/// Messages from timer and store tasks back to the owning loop.
#[derive(Debug)]
pub enum MoveSignal {
    DebounceElapsed {
        kart_id: RecordId,
        generation: u64,
    },
    MoveSettled {
        kart_id: RecordId,
        generation: u64,
        result: StoreResult<()>,
    },
}

/// What the loop should tell observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Acknowledged {
        kart_id: RecordId,
        to_column: usize,
    },
    Confirmed {
        kart_id: RecordId,
        to_column: usize,
    },
    Failed {
        kart_id: RecordId,
        error: PersistenceError,
        retry: MoveRequest,
    },
}

/// A store call that was issued and has not answered yet.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    generation: u64,
    from_column: usize,
    to_column: usize,
}

#[derive(Debug)]
struct TrackedMove {
    phase: MovePhase,
    generation: u64,
    request: MoveRequest,
    /// Column the kart left at the start of the pending chain.
    origin_column: usize,
    timer: Option<AbortHandle>,
    /// At most one call per kart is outstanding, possibly for an older generation.
    in_flight: Option<InFlight>,
    /// Column the store holds the kart in after the last accepted call.
    store_column: Option<usize>,
    /// The debounce elapsed while a call was outstanding.
    queued: bool,
}

impl TrackedMove {
    fn transition(&mut self, next: MovePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: next.entered_from(),
                actual: format!("{:?}", self.phase),
            });
        }
        trace!(kart = %self.request.kart_id, from = ?self.phase, to = ?next, "move phase");
        self.phase = next;
        Ok(())
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Drives every in-flight move of one grid and owns its overlay.
pub struct MoveOrchestrator<S: RemoteStore> {
    store: Arc<S>,
    overlay: OptimisticState,
    debounce: Duration,
    tracked: HashMap<RecordId, TrackedMove>,
    next_generation: u64,
    signals: mpsc::UnboundedSender<MoveSignal>,
    torn_down: bool,
}

impl<S: RemoteStore> MoveOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        overlay: OptimisticState,
        debounce: Duration,
        signals: mpsc::UnboundedSender<MoveSignal>,
    ) -> Self {
        Self {
            store,
            overlay,
            debounce,
            tracked: HashMap::new(),
            next_generation: 1,
            signals,
            torn_down: false,
        }
    }

    pub fn overlay(&self) -> &OptimisticState {
        &self.overlay
    }

    pub fn phase(&self, kart_id: &RecordId) -> MovePhase {
        self.tracked
            .get(kart_id)
            .map(|t| t.phase)
            .unwrap_or(MovePhase::Idle)
    }

    /// Karts with a move in progress and their phase.
    pub fn phases(&self) -> Vec<(RecordId, MovePhase)> {
        let mut phases: Vec<_> = self
            .tracked
            .iter()
            .map(|(id, t)| (id.clone(), t.phase))
            .collect();
        phases.sort_by(|a, b| a.0.cmp(&b.0));
        phases
    }

    pub fn has_timer(&self, kart_id: &RecordId) -> bool {
        self.tracked
            .get(kart_id)
            .is_some_and(|t| t.timer.is_some())
    }

    /// Apply a drop locally and (re)start its debounce timer.
    ///
    /// Must be called from the owning loop before any remote I/O for this
    /// drop. A self-move is rejected without touching state.
    pub fn on_drop(&mut self, request: MoveRequest) -> Result<MoveOutcome> {
        if self.torn_down {
            return Err(Error::SessionClosed);
        }
        if request.from_column == request.to_column {
            return Err(ValidationError::SelfMove {
                kart_id: request.kart_id.to_string(),
                column: request.to_column,
            }
            .into());
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let kart_id = request.kart_id.clone();
        let tracked = self
            .tracked
            .entry(kart_id.clone())
            .or_insert_with(|| TrackedMove {
                phase: MovePhase::Idle,
                generation,
                request: request.clone(),
                origin_column: request.from_column,
                timer: None,
                in_flight: None,
                store_column: None,
                queued: false,
            });
        tracked.cancel_timer();
        tracked.transition(MovePhase::OptimisticApplied)?;
        tracked.generation = generation;
        tracked.queued = false;
        tracked.request = request.clone();

        self.overlay.apply_move(
            kart_id.clone(),
            request.from_column,
            request.to_column,
            request.number,
            request.performance,
        );

        let signals = self.signals.clone();
        let delay = self.debounce;
        let timer_kart = kart_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(MoveSignal::DebounceElapsed {
                kart_id: timer_kart,
                generation,
            });
        });
        tracked.timer = Some(timer.abort_handle());
        tracked.transition(MovePhase::Debouncing)?;

        debug!(kart = %kart_id, to = request.to_column, generation, "drop applied");
        Ok(MoveOutcome::Acknowledged {
            kart_id,
            to_column: request.to_column,
        })
    }

    /// Debounce timer fired. `remote_column` is where the latest snapshot
    /// lists the kart, if anywhere.
    ///
    /// While an earlier call for the kart is still outstanding the move is
    /// queued and persisted once that call settles.
    pub fn on_debounce_elapsed(
        &mut self,
        kart_id: &RecordId,
        generation: u64,
        remote_column: Option<usize>,
    ) -> Option<MoveOutcome> {
        let tracked = self.tracked.get_mut(kart_id)?;
        if tracked.generation != generation || tracked.phase != MovePhase::Debouncing {
            trace!(kart = %kart_id, generation, "stale debounce ignored");
            return None;
        }
        tracked.timer = None;

        if let Some(call) = tracked.in_flight {
            debug!(kart = %kart_id, generation, waiting_on = call.generation, "move queued behind in-flight call");
            tracked.queued = true;
            return None;
        }
        self.persist(kart_id, remote_column)
    }

    /// Issue the store call for the current generation of `kart_id`.
    fn persist(&mut self, kart_id: &RecordId, remote_column: Option<usize>) -> Option<MoveOutcome> {
        let tracked = self.tracked.get_mut(kart_id)?;
        let generation = tracked.generation;

        // Our own settled writes are newer than any snapshot we may hold.
        let from_column = tracked
            .store_column
            .or(remote_column)
            .unwrap_or(tracked.origin_column);
        let to_column = tracked.request.to_column;
        tracked.request.from_column = from_column;

        if from_column == to_column {
            // The store already holds the kart where it was dropped.
            if let Err(e) = tracked.transition(MovePhase::Confirmed) {
                warn!(kart = %kart_id, error = %e, "cannot confirm");
                return None;
            }
            return Some(self.settle_confirmed(kart_id));
        }

        if let Err(e) = tracked.transition(MovePhase::Persisting) {
            warn!(kart = %kart_id, error = %e, "cannot persist");
            return None;
        }
        tracked.in_flight = Some(InFlight {
            generation,
            from_column,
            to_column,
        });

        let request = tracked.request.clone();
        let store = Arc::clone(&self.store);
        let signals = self.signals.clone();
        debug!(kart = %kart_id, from = from_column, to = to_column, generation, "persisting move");
        tokio::spawn(async move {
            let result = store
                .move_kart(
                    request.from_column,
                    request.to_column,
                    &request.kart_id,
                    request.number,
                    request.performance,
                )
                .await;
            // The loop may be gone by now; the result is then dropped.
            let _ = signals.send(MoveSignal::MoveSettled {
                kart_id: request.kart_id,
                generation,
                result,
            });
        });
        None
    }

    /// Store answered a persisted move.
    ///
    /// An answer for a superseded generation only updates where the store
    /// holds the kart, then releases a queued move if there is one.
    pub fn on_move_settled(
        &mut self,
        kart_id: &RecordId,
        generation: u64,
        result: StoreResult<()>,
    ) -> Option<MoveOutcome> {
        let Some(tracked) = self.tracked.get_mut(kart_id) else {
            debug!(kart = %kart_id, generation, "result for untracked kart dropped");
            return None;
        };
        let call = match tracked.in_flight {
            Some(call) if call.generation == generation => call,
            _ => {
                debug!(kart = %kart_id, generation, "result for unknown call ignored");
                return None;
            }
        };
        tracked.in_flight = None;

        if tracked.generation != generation {
            if result.is_ok() {
                tracked.store_column = Some(call.to_column);
            }
            debug!(
                kart = %kart_id,
                generation,
                current = tracked.generation,
                from = call.from_column,
                to = call.to_column,
                accepted = result.is_ok(),
                "superseded call settled"
            );
            if !std::mem::take(&mut tracked.queued) {
                return None;
            }
            return self.persist(kart_id, None);
        }

        match result {
            Ok(()) => {
                if let Err(e) = tracked.transition(MovePhase::Confirmed) {
                    warn!(kart = %kart_id, error = %e, "cannot confirm");
                    return None;
                }
                Some(self.settle_confirmed(kart_id))
            }
            Err(error) => {
                if let Err(e) = tracked.transition(MovePhase::RolledBack) {
                    warn!(kart = %kart_id, error = %e, "cannot roll back");
                    return None;
                }
                let retry = tracked.request.clone();
                self.finish(kart_id);
                self.overlay.rollback(kart_id);
                warn!(kart = %kart_id, %error, "move rejected, rolled back");
                Some(MoveOutcome::Failed {
                    kart_id: kart_id.clone(),
                    error,
                    retry,
                })
            }
        }
    }

    /// Route a signal from a timer or store task.
    pub fn on_signal(
        &mut self,
        signal: MoveSignal,
        remote_column: impl FnOnce(&RecordId) -> Option<usize>,
    ) -> Option<MoveOutcome> {
        match signal {
            MoveSignal::DebounceElapsed {
                kart_id,
                generation,
            } => {
                let column = remote_column(&kart_id);
                self.on_debounce_elapsed(&kart_id, generation, column)
            }
            MoveSignal::MoveSettled {
                kart_id,
                generation,
                result,
            } => self.on_move_settled(&kart_id, generation, result),
        }
    }

    /// Cancel every outstanding timer and forget all in-flight moves.
    pub fn teardown(&mut self) {
        for tracked in self.tracked.values_mut() {
            tracked.cancel_timer();
        }
        debug!(tracked = self.tracked.len(), "orchestrator teardown");
        self.tracked.clear();
        self.overlay.clear();
        self.torn_down = true;
    }

    fn settle_confirmed(&mut self, kart_id: &RecordId) -> MoveOutcome {
        let to_column = self
            .tracked
            .get(kart_id)
            .map(|t| t.request.to_column)
            .unwrap_or_default();
        self.finish(kart_id);
        self.overlay.confirm(kart_id);
        MoveOutcome::Confirmed {
            kart_id: kart_id.clone(),
            to_column,
        }
    }

    fn finish(&mut self, kart_id: &RecordId) {
        if let Some(mut tracked) = self.tracked.remove(kart_id) {
            if let Err(e) = tracked.transition(MovePhase::Idle) {
                warn!(kart = %kart_id, error = %e, "unexpected phase on finish");
            }
        }
    }
}

impl<S: RemoteStore> Drop for MoveOrchestrator<S> {
    fn drop(&mut self) {
        for tracked in self.tracked.values_mut() {
            tracked.cancel_timer();
        }
    }
}
