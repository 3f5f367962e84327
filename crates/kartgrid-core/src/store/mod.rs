//! The remote document store seam.
//!
//! The store is authoritative. The engine only consumes this contract:
//! a snapshot stream plus atomic add/edit/delete/move.

mod memory;

pub use memory::{InMemoryStore, MoveCall};

use crate::error::PersistenceError;
use crate::models::{ColumnsSnapshot, KartNumber, Performance, RecordId};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

/// Authoritative per-column kart lists.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Stream of snapshots, each holding `count` columns of at most
    /// `rows_limit` records, most recent first.
    fn stream_columns(&self, count: usize, rows_limit: usize) -> BoxStream<'static, ColumnsSnapshot>;

    async fn add(
        &self,
        column: usize,
        number: KartNumber,
        performance: Performance,
    ) -> StoreResult<RecordId>;

    async fn edit(
        &self,
        column: usize,
        record_id: &RecordId,
        number: KartNumber,
        performance: Performance,
    ) -> StoreResult<()>;

    async fn delete(&self, column: usize, record_id: &RecordId) -> StoreResult<()>;

    /// Move a record between columns. All-or-nothing; rejects instead of
    /// partially applying.
    async fn move_kart(
        &self,
        from_column: usize,
        to_column: usize,
        record_id: &RecordId,
        number: KartNumber,
        performance: Performance,
    ) -> StoreResult<()>;
}
