//! Error types for kartgrid.

use thiserror::Error;

/// Result type for kartgrid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kartgrid operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Input rejected before any state was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The remote store refused or failed an operation.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A move state machine was asked to take an illegal transition.
    #[error("invalid move state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// Configuration could not be parsed or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// The grid session has been torn down.
    #[error("grid session is closed")]
    SessionClosed,
}

/// Rejected user input. Never fatal; nothing has been mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Column index outside `0..count`.
    #[error("column {index} out of range (grid has {count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    /// Source and target column are the same.
    #[error("kart {kart_id} dropped onto its own column {column}")]
    SelfMove { kart_id: String, column: usize },

    /// Kart numbers live in `1..=99`.
    #[error("kart number {0} out of range 1..=99")]
    NumberOutOfRange(i64),

    /// Unknown performance symbol.
    #[error("unknown performance symbol {0:?}")]
    UnknownPerformance(String),
}

/// Failures reported by a [`RemoteStore`](crate::store::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The store rejected the write.
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// The record does not exist in the expected column.
    #[error("record {record_id} not found in column {column}")]
    NotFound { record_id: String, column: usize },

    /// The target column is full.
    #[error("column {column} is full ({capacity} rows)")]
    CapacityExceeded { column: usize, capacity: usize },

    /// Network or backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
