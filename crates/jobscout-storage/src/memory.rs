//! In-process job store used for dry runs and tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobscout_core::{JobRecord, JobRefresh, PersistedJob};
use tokio::sync::Mutex;

use crate::jobs::{JobStore, JobStoreTx, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<PersistedJob>,
    next_id: i64,
    rejected_hashes: HashSet<String>,
    conflicting_hashes: HashSet<String>,
    unreachable_hashes: HashSet<String>,
    fail_next_commit: bool,
}

/// Keeps jobs in memory; transactions work on a private copy swapped in on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<PersistedJob> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Makes every insert or refresh of `url_hash` fail as a per-row write error.
    pub async fn reject_writes_for(&self, url_hash: impl Into<String>) {
        self.state.lock().await.rejected_hashes.insert(url_hash.into());
    }

    /// Makes inserting `url_hash` report a unique-constraint conflict, as when a
    /// concurrent writer lands the same row between the lookup and the insert.
    pub async fn conflict_on_insert_for(&self, url_hash: impl Into<String>) {
        self.state.lock().await.conflicting_hashes.insert(url_hash.into());
    }

    /// Makes any statement touching `url_hash` fail as if the connection dropped.
    pub async fn drop_connection_at(&self, url_hash: impl Into<String>) {
        self.state.lock().await.unreachable_hashes.insert(url_hash.into());
    }

    /// Makes the next commit fail as if the connection dropped.
    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn begin(&self) -> Result<Box<dyn JobStoreTx>, StoreError> {
        let state = self.state.lock().await;
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            jobs: state.jobs.clone(),
            next_id: state.next_id,
            rejected_hashes: state.rejected_hashes.clone(),
            conflicting_hashes: state.conflicting_hashes.clone(),
            unreachable_hashes: state.unreachable_hashes.clone(),
            finished: false,
        }))
    }

    async fn discovered_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PersistedJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs = state
            .jobs
            .iter()
            .filter(|job| job.is_active && job.discovered_at >= from && job.discovered_at <= to)
            .cloned()
            .collect::<Vec<_>>();
        jobs.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }
}

struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    jobs: Vec<PersistedJob>,
    next_id: i64,
    rejected_hashes: HashSet<String>,
    conflicting_hashes: HashSet<String>,
    unreachable_hashes: HashSet<String>,
    finished: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_reachable(&self, url_hash: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.unreachable_hashes.contains(url_hash) {
            return Err(StoreError::connectivity("connection reset by peer"));
        }
        Ok(())
    }

    fn ensure_writable(&self, url_hash: &str) -> Result<(), StoreError> {
        self.ensure_reachable(url_hash)?;
        if self.rejected_hashes.contains(url_hash) {
            return Err(StoreError::Write {
                url_hash: url_hash.to_string(),
                message: "rejected by store".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobStoreTx for MemoryTx {
    async fn find_by_url_hash(&mut self, url_hash: &str) -> Result<Option<PersistedJob>, StoreError> {
        self.ensure_reachable(url_hash)?;
        Ok(self.jobs.iter().find(|job| job.url_hash == url_hash).cloned())
    }

    async fn insert_job(
        &mut self,
        record: &JobRecord,
        url_hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<PersistedJob, StoreError> {
        self.ensure_writable(url_hash)?;
        if self.conflicting_hashes.contains(url_hash)
            || self
                .jobs
                .iter()
                .any(|job| job.url_hash == url_hash || job.url == record.url)
        {
            return Err(StoreError::WriteConflict {
                url_hash: url_hash.to_string(),
            });
        }

        self.next_id += 1;
        let job = PersistedJob {
            id: self.next_id,
            url: record.url.clone(),
            url_hash: url_hash.to_string(),
            title: record.title.clone(),
            company: record.company.clone(),
            description: record.description.clone(),
            search_rank: record.search_rank,
            discovered_at: seen_at,
            last_seen_at: seen_at,
            is_active: true,
        };
        self.jobs.push(job.clone());
        Ok(job)
    }

    async fn refresh_job(&mut self, url_hash: &str, refresh: &JobRefresh) -> Result<(), StoreError> {
        self.ensure_writable(url_hash)?;
        let Some(job) = self.jobs.iter_mut().find(|job| job.url_hash == url_hash) else {
            return Err(StoreError::Write {
                url_hash: url_hash.to_string(),
                message: "no job with this url hash".to_string(),
            });
        };
        job.title = refresh.title.clone();
        job.description = refresh.description.clone();
        job.search_rank = refresh.search_rank;
        job.last_seen_at = refresh.seen_at;
        job.is_active = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;
        let mut state = self.state.lock().await;
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(StoreError::connectivity("connection lost during commit"));
        }
        state.jobs = std::mem::take(&mut self.jobs);
        state.next_id = self.next_id;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.jobs.clear();
        Ok(())
    }
}
