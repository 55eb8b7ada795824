use chrono::{DateTime, Duration, Utc};
use jobscout_core::{url_hash, IdentityError, JobRecord, JobRefresh, PersistedJob};
use jobscout_storage::{JobStore, JobStoreTx, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("job store failed, batch rolled back: {0}")]
    Store(#[source] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub new_count: usize,
    pub total_count: usize,
    pub refreshed: usize,
    pub skipped: usize,
}

enum Sighting {
    New,
    Refreshed,
}

#[derive(Debug, Error)]
enum RecordFault {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn reconcile(
    store: &dyn JobStore,
    records: &[JobRecord],
) -> Result<ReconcileOutcome, ReconcileError> {
    reconcile_at(store, records, Utc::now()).await
}

/// Upserts `records` in one transaction, stamping every sighting with `now`.
///
/// Row-level failures skip that record. A connectivity failure rolls the whole
/// batch back.
pub async fn reconcile_at(
    store: &dyn JobStore,
    records: &[JobRecord],
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, ReconcileError> {
    if records.is_empty() {
        return Ok(ReconcileOutcome::default());
    }

    let mut tx = store.begin().await.map_err(ReconcileError::Store)?;
    let mut outcome = ReconcileOutcome {
        total_count: records.len(),
        ..Default::default()
    };

    for record in records {
        match reconcile_record(tx.as_mut(), record, now).await {
            Ok(Sighting::New) => {
                outcome.new_count += 1;
                info!(
                    title = %record.title,
                    company = %record.company,
                    rank = record.search_rank,
                    "new job"
                );
            }
            Ok(Sighting::Refreshed) => {
                outcome.refreshed += 1;
                debug!(url = %record.url, rank = record.search_rank, "refreshed job");
            }
            Err(RecordFault::Identity(err)) => {
                outcome.skipped += 1;
                warn!(url = %record.url, error = %err, "skipping record without identity");
            }
            Err(RecordFault::Store(err)) if err.is_fatal() => {
                error!(url = %record.url, error = %err, "store unavailable, rolling back batch");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                return Err(ReconcileError::Store(err));
            }
            Err(RecordFault::Store(err @ StoreError::WriteConflict { .. })) => {
                outcome.skipped += 1;
                warn!(url = %record.url, error = %err, "job already exists, leaving it untouched");
            }
            Err(RecordFault::Store(err)) => {
                outcome.skipped += 1;
                error!(url = %record.url, error = %err, "error saving job");
            }
        }
    }

    tx.commit().await.map_err(ReconcileError::Store)?;
    Ok(outcome)
}

async fn reconcile_record(
    tx: &mut dyn JobStoreTx,
    record: &JobRecord,
    now: DateTime<Utc>,
) -> Result<Sighting, RecordFault> {
    let hash = url_hash(&record.url)?;
    if tx.find_by_url_hash(&hash).await?.is_some() {
        tx.refresh_job(&hash, &JobRefresh::from_record(record, now))
            .await?;
        return Ok(Sighting::Refreshed);
    }
    tx.insert_job(record, &hash, now).await?;
    Ok(Sighting::New)
}

pub async fn recently_discovered(
    store: &dyn JobStore,
    days: u32,
) -> Result<Vec<PersistedJob>, StoreError> {
    recently_discovered_at(store, days, Utc::now()).await
}

/// Active jobs first discovered within `days` before `now`, newest first.
pub async fn recently_discovered_at(
    store: &dyn JobStore,
    days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<PersistedJob>, StoreError> {
    let from = now
        .checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    store.discovered_between(from, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobscout_storage::MemoryJobStore;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).single().unwrap()
    }

    fn rec(url: &str, title: &str, rank: u32) -> JobRecord {
        let mut record = JobRecord::new(url).with_title(title);
        record.search_rank = rank;
        record.company = "Acme".to_string();
        record
    }

    fn batch() -> Vec<JobRecord> {
        vec![
            rec("https://jobs.example.com/acme/a", "A", 1),
            rec("https://jobs.example.com/acme/b", "B", 2),
            rec("https://jobs.example.com/acme/c", "C", 3),
        ]
    }

    #[tokio::test]
    async fn rerun_is_idempotent_and_advances_last_seen() {
        let store = MemoryJobStore::new();
        let first = reconcile_at(&store, &batch(), at(2, 9)).await.unwrap();
        assert_eq!((first.new_count, first.total_count), (3, 3));

        let second = reconcile_at(&store, &batch(), at(3, 9)).await.unwrap();
        assert_eq!((second.new_count, second.total_count), (0, 3));
        assert_eq!(second.refreshed, 3);

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 3);
        for job in jobs {
            assert_eq!(job.discovered_at, at(2, 9));
            assert_eq!(job.last_seen_at, at(3, 9));
            assert!(job.is_active);
        }
    }

    #[tokio::test]
    async fn refresh_overwrites_rank_but_keeps_company() {
        let store = MemoryJobStore::new();
        reconcile_at(&store, &batch(), at(2, 9)).await.unwrap();

        let mut moved = rec("https://jobs.example.com/acme/c", "C (updated)", 1);
        moved.company = "Someone Else".to_string();
        moved.description = "fresh".to_string();
        reconcile_at(&store, &[moved], at(2, 12)).await.unwrap();

        let job = store
            .jobs()
            .await
            .into_iter()
            .find(|j| j.url.ends_with("/c"))
            .unwrap();
        assert_eq!(job.title, "C (updated)");
        assert_eq!(job.description, "fresh");
        assert_eq!(job.search_rank, 1);
        assert_eq!(job.company, "Acme");
    }

    #[tokio::test]
    async fn case_variant_urls_share_one_row() {
        let store = MemoryJobStore::new();
        let records = vec![
            rec("https://jobs.example.com/acme/role", "lower", 1),
            rec("https://jobs.example.com/Acme/Role/", "mixed", 2),
        ];
        let outcome = reconcile_at(&store, &records, at(2, 9)).await.unwrap();
        assert_eq!(outcome.new_count, 1);
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn rejected_record_is_skipped_and_the_rest_commit() {
        let store = MemoryJobStore::new();
        let bad = url_hash("https://jobs.example.com/acme/b").unwrap();
        store.reject_writes_for(bad).await;

        let outcome = reconcile_at(&store, &batch(), at(2, 9)).await.unwrap();
        assert_eq!(outcome.total_count, 3);
        assert_eq!(outcome.new_count, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn insert_conflict_counts_toward_total_but_not_new() {
        let store = MemoryJobStore::new();
        let raced = url_hash("https://jobs.example.com/acme/b").unwrap();
        store.conflict_on_insert_for(raced).await;

        let outcome = reconcile_at(&store, &batch(), at(2, 9)).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome {
                new_count: 2,
                total_count: 3,
                refreshed: 0,
                skipped: 1,
            }
        );
        let urls = store.jobs().await.into_iter().map(|j| j.url).collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec!["https://jobs.example.com/acme/a", "https://jobs.example.com/acme/c"]
        );
    }

    #[tokio::test]
    async fn lost_connection_mid_batch_rolls_everything_back() {
        let store = MemoryJobStore::new();
        let second = url_hash("https://jobs.example.com/acme/b").unwrap();
        store.drop_connection_at(second).await;

        let err = reconcile_at(&store, &batch(), at(2, 9)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Connectivity(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn empty_url_is_skipped_not_fatal() {
        let store = MemoryJobStore::new();
        let records = vec![rec("  ", "blank", 1), rec("https://jobs.example.com/acme/a", "A", 2)];
        let outcome = reconcile_at(&store, &records, at(2, 9)).await.unwrap();
        assert_eq!(outcome.total_count, 2);
        assert_eq!(outcome.new_count, 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn failed_commit_writes_nothing() {
        let store = MemoryJobStore::new();
        store.fail_next_commit().await;
        let err = reconcile_at(&store, &batch(), at(2, 9)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Connectivity(_))));
        assert!(store.is_empty().await);

        let retry = reconcile_at(&store, &batch(), at(2, 10)).await.unwrap();
        assert_eq!(retry.new_count, 3);
    }

    #[tokio::test]
    async fn empty_batch_reports_zero_without_a_transaction() {
        let store = MemoryJobStore::new();
        store.fail_next_commit().await;
        let outcome = reconcile_at(&store, &[], at(2, 9)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::default());
    }

    #[tokio::test]
    async fn recent_window_is_trailing_days() {
        let store = MemoryJobStore::new();
        reconcile_at(&store, &batch()[..1], at(1, 9)).await.unwrap();
        reconcile_at(&store, &batch()[1..], at(3, 9)).await.unwrap();

        let recent = recently_discovered_at(&store, 1, at(3, 18)).await.unwrap();
        let titles = recent.iter().map(|j| j.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["C", "B"]);

        let wider = recently_discovered_at(&store, 7, at(3, 18)).await.unwrap();
        assert_eq!(wider.len(), 3);
    }

    #[tokio::test]
    async fn oversized_window_reaches_back_to_the_earliest_job() {
        let store = MemoryJobStore::new();
        reconcile_at(&store, &batch(), at(1, 9)).await.unwrap();

        let all = recently_discovered_at(&store, u32::MAX, at(3, 18)).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
