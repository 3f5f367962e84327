//! Data model for kart lineups.
//!
//! # Core Types
//!
//! - [`KartRecord`] - Authoritative record owned by the remote store
//! - [`ColumnsSnapshot`] - One streamed snapshot of every column
//! - [`MergedKartRecord`] - Reconciler output tagged with its [`Origin`]
//!
//! # Supporting Types
//!
//! - [`KartNumber`] - Validated number in `1..=99`
//! - [`Performance`] - `++`, `+`, `~`, `-`, `--`, `?`
//! - [`WireKartRecord`] - Loose document shape as read off the wire

mod column;
mod kart;
mod merged;

pub use column::{ColumnSpec, ColumnsSnapshot, DEFAULT_PALETTE};
pub use kart::{KartNumber, KartRecord, Performance, RecordId, Timestamp, WireKartRecord};
pub use merged::{MergedColumn, MergedKartRecord, Origin};
