//! Fixtures shared by the scenario tests.

use kartgrid_core::{
    GridConfig, GridEvent, GridHandle, GridSession, KartNumber, ManualClock, MoveRequest,
    PerformanceSignal, RemoteStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Long enough for any debounce plus store latency used in the scenarios.
pub const SETTLE: Duration = Duration::from_millis(1_000);

pub fn num(n: i64) -> KartNumber {
    KartNumber::new(n).expect("fixture kart number in range")
}

/// Let timers and store calls run to completion (paused clock).
pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

/// Mount and spawn a session with `columns` columns. The recorder is
/// subscribed before the loop starts, so it sees the first snapshot.
pub fn mount<S: RemoteStore>(store: Arc<S>, columns: usize) -> (GridHandle<S>, Recorder) {
    kartgrid_logging::init_for_tests();
    let config = GridConfig::with_columns(columns);
    let (mut session, handle) =
        GridSession::mount_with_clock(store, config, Arc::new(ManualClock::new(1)))
            .expect("valid fixture config");

    let recorder = Recorder::default();
    let sink = Arc::clone(&recorder.events);
    session
        .observers_mut()
        .subscribe(move |event| sink.lock().expect("recorder lock").push(event.clone()));

    tokio::spawn(session.run());
    (handle, recorder)
}

/// Records every event a session emits.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<GridEvent>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<GridEvent> {
        self.events.lock().expect("recorder lock").clone()
    }

    pub fn performance(&self) -> Vec<PerformanceSignal> {
        self.events()
            .iter()
            .filter_map(GridEvent::as_performance)
            .collect()
    }

    pub fn failures(&self) -> Vec<MoveRequest> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GridEvent::MoveFailed { retry, .. } => Some(retry),
                _ => None,
            })
            .collect()
    }

    pub fn confirmations(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, GridEvent::MoveConfirmed { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("recorder lock").clear();
    }
}
