//! Storage collaborator.
//!
//! The orchestrator writes through a single transaction per run: entities
//! are staged into a bulk buffer, flushed, and only become visible to other
//! runs on [`Storage::commit_transaction`]. A rollback discards everything
//! staged since [`Storage::begin_transaction`].

mod local;

pub(crate) use local::write_atomic;
pub use local::LocalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Catalog, CouplingEntity, RecordEntity};

/// Identifies one open transaction.
///
/// `timestamp` tags every record touched by the run; it is also the value of
/// the `transaction:` traceability keyword when publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionToken {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl TransactionToken {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
        }
    }
}

/// Transactional entity store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open the run's transaction. Only one may be open at a time.
    async fn begin_transaction(&self) -> Result<TransactionToken>;

    /// Queue a record; the buffer is flushed once it reaches the bulk size.
    async fn add_entity_to_bulk(&self, entity: RecordEntity) -> Result<()>;

    /// Queue a coupling.
    async fn add_coupling_to_bulk(&self, coupling: CouplingEntity) -> Result<()>;

    /// Flush the bulk buffer into the transaction. Returns the number of
    /// entities flushed.
    async fn send_bulk_data(&self) -> Result<usize>;

    /// Schedule removal of records of `source` not touched by the
    /// transaction. Applied on commit; returns the number scheduled.
    async fn delete_non_fetched_datasets(
        &self,
        source: &str,
        token: &TransactionToken,
    ) -> Result<u64>;

    /// Percentage of previously committed records of `source` not touched by
    /// the transaction. Zero when nothing was known before.
    async fn non_fetched_percentage(&self, source: &str, token: &TransactionToken)
        -> Result<f64>;

    async fn commit_transaction(&self) -> Result<()>;

    async fn rollback_transaction(&self) -> Result<()>;

    async fn get_catalog(&self, id: &str) -> Result<Option<Catalog>>;

    /// Committed identifiers of `source`.
    async fn get_dataset_identifiers(&self, source: &str) -> Result<Vec<String>>;

    /// Non-service records of `source`, including flushed records of the
    /// open transaction.
    async fn get_datasets(&self, source: &str) -> Result<Vec<RecordEntity>>;

    /// Service records of `source`, including flushed records of the open
    /// transaction.
    async fn get_services(&self, source: &str) -> Result<Vec<RecordEntity>>;

    /// Committed couplings of `source`.
    async fn get_couplings(&self, source: &str) -> Result<Vec<CouplingEntity>>;

    /// Timestamp of the last committed run of `source`.
    async fn last_successful_run(&self, source: &str) -> Result<Option<DateTime<Utc>>>;

    /// Record a successful run; takes effect on commit.
    async fn mark_successful_run(&self, source: &str, at: DateTime<Utc>) -> Result<()>;
}
