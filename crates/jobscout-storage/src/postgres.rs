//! Postgres-backed job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobscout_core::{JobRecord, JobRefresh, PersistedJob};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

use crate::jobs::{JobStore, JobStoreTx, StoreError};

const JOB_COLUMNS: &str = "id, url, url_hash, title, company, description, search_rank, \
                           discovered_at, last_seen_at, is_active";

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Single-connection pool: one crawl run uses one connection and one transaction.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        Self::connect_with(database_url, 1).await
    }

    /// Pool sized for concurrent readers such as web handlers.
    pub async fn connect_with(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = pool_options(max_connections).connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
}

/// Splits sqlx failures into per-row problems and ones that end the batch.
pub fn classify_sqlx_error(err: sqlx::Error, url_hash: &str) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::WriteConflict {
            url_hash: url_hash.to_string(),
        },
        sqlx::Error::Database(db) => StoreError::Write {
            url_hash: url_hash.to_string(),
            message: db.to_string(),
        },
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::Encode(_) => StoreError::Write {
            url_hash: url_hash.to_string(),
            message: err.to_string(),
        },
        other => StoreError::connectivity(other),
    }
}

fn rank_to_column(rank: u32) -> i32 {
    i32::try_from(rank).unwrap_or(i32::MAX)
}

fn job_from_row(row: &PgRow) -> Result<PersistedJob, sqlx::Error> {
    let rank: Option<i32> = row.try_get("search_rank")?;
    Ok(PersistedJob {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        url_hash: row.try_get("url_hash")?,
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        company: row.try_get::<Option<String>, _>("company")?.unwrap_or_default(),
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        search_rank: rank.and_then(|r| u32::try_from(r).ok()).unwrap_or_default(),
        discovered_at: row.try_get("discovered_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn begin(&self) -> Result<Box<dyn JobStoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(StoreError::connectivity)?;
        Ok(Box::new(PgJobTx { tx: Some(tx) }))
    }

    async fn discovered_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PersistedJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
              FROM jobs
             WHERE discovered_at >= $1
               AND discovered_at <= $2
               AND is_active = TRUE
             ORDER BY discovered_at DESC, id DESC
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::connectivity)?;

        rows.iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::connectivity)
    }
}

struct PgJobTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgJobTx {
    fn open(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionClosed)
    }
}

/// Per-row statements run inside a savepoint so one rejected row does not abort the transaction.
async fn open_savepoint(tx: &mut Transaction<'static, Postgres>) -> Result<(), StoreError> {
    sqlx::query("SAVEPOINT job_write")
        .execute(&mut **tx)
        .await
        .map_err(StoreError::connectivity)?;
    Ok(())
}

async fn close_savepoint<T>(
    tx: &mut Transaction<'static, Postgres>,
    result: Result<T, sqlx::Error>,
    url_hash: &str,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            sqlx::query("RELEASE SAVEPOINT job_write")
                .execute(&mut **tx)
                .await
                .map_err(StoreError::connectivity)?;
            Ok(value)
        }
        Err(err) => {
            let classified = classify_sqlx_error(err, url_hash);
            if !classified.is_fatal() {
                sqlx::query("ROLLBACK TO SAVEPOINT job_write")
                    .execute(&mut **tx)
                    .await
                    .map_err(StoreError::connectivity)?;
            }
            Err(classified)
        }
    }
}

#[async_trait]
impl JobStoreTx for PgJobTx {
    async fn find_by_url_hash(&mut self, url_hash: &str) -> Result<Option<PersistedJob>, StoreError> {
        let tx = self.open()?;
        open_savepoint(tx).await?;
        let result = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE url_hash = $1"))
            .bind(url_hash)
            .fetch_optional(&mut **tx)
            .await
            .and_then(|row| row.as_ref().map(job_from_row).transpose());
        close_savepoint(tx, result, url_hash).await
    }

    async fn insert_job(
        &mut self,
        record: &JobRecord,
        url_hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<PersistedJob, StoreError> {
        let tx = self.open()?;
        open_savepoint(tx).await?;
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (url, url_hash, title, company, description, search_rank,
                              discovered_at, last_seen_at, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, TRUE)
            ON CONFLICT DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&record.url)
        .bind(url_hash)
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.description)
        .bind(rank_to_column(record.search_rank))
        .bind(seen_at)
        .fetch_optional(&mut **tx)
        .await
        .and_then(|row| row.as_ref().map(job_from_row).transpose());
        let inserted = close_savepoint(tx, result, url_hash).await?;

        inserted.ok_or_else(|| StoreError::WriteConflict {
            url_hash: url_hash.to_string(),
        })
    }

    async fn refresh_job(&mut self, url_hash: &str, refresh: &JobRefresh) -> Result<(), StoreError> {
        let tx = self.open()?;
        open_savepoint(tx).await?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET title = $1,
                   description = $2,
                   search_rank = $3,
                   last_seen_at = $4,
                   is_active = TRUE
             WHERE url_hash = $5
            "#,
        )
        .bind(&refresh.title)
        .bind(&refresh.description)
        .bind(rank_to_column(refresh.search_rank))
        .bind(refresh.seen_at)
        .bind(url_hash)
        .execute(&mut **tx)
        .await
        .map(|done| done.rows_affected());
        let updated = close_savepoint(tx, result, url_hash).await?;

        if updated == 0 {
            return Err(StoreError::Write {
                url_hash: url_hash.to_string(),
                message: "no job with this url hash".to_string(),
            });
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await.map_err(StoreError::connectivity)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await.map_err(StoreError::connectivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_end_the_batch() {
        let err = classify_sqlx_error(sqlx::Error::PoolTimedOut, "abc");
        assert!(err.is_fatal());
        let err = classify_sqlx_error(sqlx::Error::PoolClosed, "abc");
        assert!(matches!(err, StoreError::Connectivity(_)));
    }

    #[test]
    fn row_level_failures_are_recoverable() {
        let err = classify_sqlx_error(sqlx::Error::RowNotFound, "abc");
        assert!(!err.is_fatal());
        assert!(matches!(err, StoreError::Write { ref url_hash, .. } if url_hash == "abc"));
    }

    #[test]
    fn ranks_saturate_into_the_integer_column() {
        assert_eq!(rank_to_column(7), 7);
        assert_eq!(rank_to_column(u32::MAX), i32::MAX);
    }

    #[test]
    fn pools_are_sized_per_caller() {
        assert_eq!(pool_options(1).get_max_connections(), 1);
        assert_eq!(pool_options(5).get_max_connections(), 5);
        assert_eq!(pool_options(0).get_max_connections(), 1);
        assert_eq!(pool_options(5).get_acquire_timeout(), Duration::from_secs(10));
    }
}
