//! Store contract for persisted job listings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobscout_core::{JobRecord, JobRefresh, PersistedJob};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another row already owns this url or url hash.
    #[error("job already stored for url hash {url_hash}")]
    WriteConflict { url_hash: String },
    /// The store rejected a single row; the surrounding transaction is still usable.
    #[error("write rejected for url hash {url_hash}: {message}")]
    Write { url_hash: String, message: String },
    /// The connection or transaction is gone; nothing further can be written.
    #[error("store connectivity failure: {0}")]
    Connectivity(#[source] BoxError),
    #[error("transaction already finished")]
    TransactionClosed,
}

impl StoreError {
    pub fn connectivity(err: impl Into<BoxError>) -> Self {
        Self::Connectivity(err.into())
    }

    /// True when the whole batch has to be abandoned.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::TransactionClosed)
    }
}

/// Long-lived owner of `PersistedJob` rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn JobStoreTx>, StoreError>;

    /// Active jobs whose `discovered_at` falls in `[from, to]`, newest first.
    async fn discovered_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PersistedJob>, StoreError>;
}

/// One unit of work against the store. Dropping without `commit` discards every write.
#[async_trait]
pub trait JobStoreTx: Send {
    async fn find_by_url_hash(&mut self, url_hash: &str) -> Result<Option<PersistedJob>, StoreError>;

    async fn insert_job(
        &mut self,
        record: &JobRecord,
        url_hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<PersistedJob, StoreError>;

    async fn refresh_job(&mut self, url_hash: &str, refresh: &JobRefresh) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
