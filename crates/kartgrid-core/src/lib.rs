//! Kartgrid Core - Optimistic Reconciliation for Live Kart Lineups
//!
//! Karts are assigned to columns (lineups) and dragged between them during a
//! live session. A remote, eventually consistent store holds the truth and
//! streams snapshots back; this crate keeps the local grid instantaneous and
//! consistent while confirmations are in flight.
//!
//! # Architecture
//!
//! - **Overlay**: in-flight moves keyed by kart id
//! - **Reconcile**: pure merge of snapshot and overlay, deduplicated by number
//! - **Orchestrator**: per-kart state machine (debounce → persist → confirm/rollback)
//! - **Performance**: stability-gated optimal-lineup signal
//! - **Session**: the single event loop owning all of the above for one grid
//! - **Store**: the remote store contract plus an in-memory implementation
//!
//! # Example
//!
//! ```no_run
//! use kartgrid_core::{GridConfig, GridSession, InMemoryStore, KartNumber, Performance};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GridConfig::default();
//!     let store = Arc::new(InMemoryStore::new(config.columns, config.rows_limit));
//!     let kart = store.seed(0, KartNumber::new(7)?, Performance::Good);
//!
//!     let (session, handle) = GridSession::mount(store, config)?;
//!     tokio::spawn(session.run());
//!
//!     handle
//!         .on_performance_update(|optimal, pct, threshold| {
//!             println!("optimal={optimal} {pct}% (threshold {threshold}%)");
//!         })
//!         .await?;
//!     handle.drop_kart(kart, 0, 1, KartNumber::new(7)?, Performance::Good)?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod overlay;
pub mod performance;
pub mod reconcile;
pub mod session;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GridConfig;
pub use error::{Error, PersistenceError, Result, ValidationError};
pub use events::{GridEvent, MoveRequest, Observers, StoreOperation, SubscriptionId};
pub use models::{
    ColumnSpec, ColumnsSnapshot, KartNumber, KartRecord, MergedColumn, MergedKartRecord, Origin,
    Performance, RecordId, Timestamp, WireKartRecord,
};
pub use orchestrator::{MoveOrchestrator, MoveOutcome, MovePhase};
pub use overlay::{OptimisticMove, OptimisticState, OverlayPosition};
pub use performance::{PerformanceAggregator, PerformanceSignal};
pub use reconcile::{reconcile, Reconciliation};
pub use session::{GridHandle, GridSession, GridState};
pub use store::{InMemoryStore, MoveCall, RemoteStore};
