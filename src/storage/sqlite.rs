//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the persistence
//! contract for service reference metrics.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Batches
//!
//! Each insert or update batch runs in one transaction. A statement error
//! rolls the whole batch back and reports every position as failed; an
//! update whose row disappeared (e.g. swept by retention) is reported on
//! its own while the rest of the batch commits.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{BatchFailure, HealthStatus, PersistenceDao, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    COLUMN_BEHIND_SERVICE_ID, COLUMN_CALLS, COLUMN_COST_SUM, COLUMN_ENTRY_SERVICE_ID,
    COLUMN_ERRORS, COLUMN_FRONT_SERVICE_ID, COLUMN_ID, COLUMN_TIME_BUCKET, LATENCY_BUCKETS,
    LatencyBucket, MetricCounters, MetricIdentity, ServiceReferenceMetric, TABLE,
};
use crate::util::minute_time_bucket;

/// Column values of one row, converted to SQLite integers
#[derive(Debug, Clone)]
pub struct SqliteValues {
    id: String,
    entry_service_id: i64,
    front_service_id: i64,
    behind_service_id: i64,
    latency: [i64; LATENCY_BUCKETS],
    calls: i64,
    errors: i64,
    cost_sum: i64,
    time_bucket: i64,
}

impl SqliteValues {
    fn from_metric(metric: &ServiceReferenceMetric) -> Self {
        let counters = &metric.counters;
        Self {
            id: metric.id.clone(),
            entry_service_id: i64::from(metric.identity.entry_service_id),
            front_service_id: i64::from(metric.identity.front_service_id),
            behind_service_id: i64::from(metric.identity.behind_service_id),
            latency: counters.latency.map(to_sql),
            calls: to_sql(counters.calls),
            errors: to_sql(counters.errors),
            cost_sum: to_sql(counters.cost_sum),
            time_bucket: metric.identity.time_bucket,
        }
    }
}

/// Insert descriptor of the SQLite backend
#[derive(Debug, Clone)]
pub struct SqliteInsert(SqliteValues);

/// Update descriptor of the SQLite backend
#[derive(Debug, Clone)]
pub struct SqliteUpdate(SqliteValues);

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for optimal performance (WAL mode, etc.)
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use apm_collector::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./apm-collector.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(format!("failed to connect: {}", e)))?;

        info!("SQLite connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn decode(row: &SqliteRow) -> StorageResult<ServiceReferenceMetric> {
        let id: String = row.try_get(COLUMN_ID)?;

        let service_id = |column: &str| -> StorageResult<i32> {
            let value: i64 = row.try_get(column)?;
            i32::try_from(value).map_err(|_| {
                StorageError::Corruption(format!("{column} {value} out of range in row {id}"))
            })
        };
        let counter = |column: &str| -> StorageResult<u64> {
            let value: i64 = row.try_get(column)?;
            u64::try_from(value).map_err(|_| {
                StorageError::Corruption(format!("negative {column} {value} in row {id}"))
            })
        };

        let identity = MetricIdentity {
            entry_service_id: service_id(COLUMN_ENTRY_SERVICE_ID)?,
            front_service_id: service_id(COLUMN_FRONT_SERVICE_ID)?,
            behind_service_id: service_id(COLUMN_BEHIND_SERVICE_ID)?,
            time_bucket: row.try_get(COLUMN_TIME_BUCKET)?,
        };

        let mut latency = [0; LATENCY_BUCKETS];
        for bucket in LatencyBucket::ALL {
            latency[bucket.index()] = counter(bucket.column())?;
        }

        let counters = MetricCounters {
            calls: counter(COLUMN_CALLS)?,
            errors: counter(COLUMN_ERRORS)?,
            cost_sum: counter(COLUMN_COST_SUM)?,
            latency,
        };

        if identity.id() != id {
            return Err(StorageError::Corruption(format!(
                "row {id} does not match its identity columns"
            )));
        }

        Ok(ServiceReferenceMetric {
            id,
            identity,
            counters,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        // Simple ping query to verify connection
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl PersistenceDao for SqliteBackend {
    type InsertOp = SqliteInsert;
    type UpdateOp = SqliteUpdate;

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> StorageResult<Option<ServiceReferenceMetric>> {
        let row = sqlx::query(
            r#"
            SELECT id, entry_service_id, front_service_id, behind_service_id,
                   latency_le_1s, latency_le_3s, latency_le_5s, latency_gt_5s,
                   calls, errors, cost_sum, time_bucket
            FROM service_reference_metric
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    fn prepare_insert(&self, metric: &ServiceReferenceMetric) -> SqliteInsert {
        SqliteInsert(SqliteValues::from_metric(metric))
    }

    fn prepare_update(&self, metric: &ServiceReferenceMetric) -> SqliteUpdate {
        SqliteUpdate(SqliteValues::from_metric(metric))
    }

    #[instrument(skip(self, ops), fields(count = ops.len()))]
    async fn batch_insert(&self, ops: Vec<SqliteInsert>) -> Result<(), BatchFailure> {
        if ops.is_empty() {
            return Ok(());
        }

        let len = ops.len();
        debug!("inserting {} rows into SQLite", len);

        let result: StorageResult<()> = async {
            let mut tx = self.pool.begin().await?;

            for SqliteInsert(values) in ops {
                sqlx::query(
                    r#"
                    INSERT INTO service_reference_metric (
                        id, entry_service_id, front_service_id, behind_service_id,
                        latency_le_1s, latency_le_3s, latency_le_5s, latency_gt_5s,
                        calls, errors, cost_sum, time_bucket
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&values.id)
                .bind(values.entry_service_id)
                .bind(values.front_service_id)
                .bind(values.behind_service_id)
                .bind(values.latency[0])
                .bind(values.latency[1])
                .bind(values.latency[2])
                .bind(values.latency[3])
                .bind(values.calls)
                .bind(values.errors)
                .bind(values.cost_sum)
                .bind(values.time_bucket)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }
        .await;

        result.map_err(|error| BatchFailure::all(len, error))?;
        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self, ops), fields(count = ops.len()))]
    async fn batch_update(&self, ops: Vec<SqliteUpdate>) -> Result<(), BatchFailure> {
        if ops.is_empty() {
            return Ok(());
        }

        let len = ops.len();
        debug!("updating {} rows in SQLite", len);

        let result: StorageResult<Vec<usize>> = async {
            let mut tx = self.pool.begin().await?;
            let mut vanished = Vec::new();

            for (index, SqliteUpdate(values)) in ops.into_iter().enumerate() {
                let done = sqlx::query(
                    r#"
                    UPDATE service_reference_metric SET
                        latency_le_1s = ?, latency_le_3s = ?, latency_le_5s = ?, latency_gt_5s = ?,
                        calls = ?, errors = ?, cost_sum = ?
                    WHERE id = ?
                    "#,
                )
                .bind(values.latency[0])
                .bind(values.latency[1])
                .bind(values.latency[2])
                .bind(values.latency[3])
                .bind(values.calls)
                .bind(values.errors)
                .bind(values.cost_sum)
                .bind(&values.id)
                .execute(&mut *tx)
                .await?;

                if done.rows_affected() == 0 {
                    vanished.push(index);
                }
            }

            tx.commit().await?;
            Ok(vanished)
        }
        .await;

        let vanished = result.map_err(|error| BatchFailure::all(len, error))?;
        if !vanished.is_empty() {
            warn!("{} updated rows no longer exist", vanished.len());
            return Err(BatchFailure {
                failed: vanished,
                error: StorageError::Unavailable("row vanished before update".to_string()),
            });
        }

        debug!("batch update complete");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_history(&self, start_timestamp: i64, end_timestamp: i64) -> StorageResult<u64> {
        let start_bucket = minute_time_bucket(start_timestamp);
        let end_bucket = minute_time_bucket(end_timestamp);

        let result = sqlx::query(
            "DELETE FROM service_reference_metric WHERE time_bucket >= ? AND time_bucket <= ?",
        )
        .bind(start_bucket)
        .bind(end_bucket)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        info!("deleted {} rows of history from {}", deleted, TABLE);

        Ok(deleted)
    }
}

/// SQLite integers are signed; larger counters are clamped
fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or_else(|_| {
        warn!("counter {} exceeds the SQLite integer range, storing {}", value, i64::MAX);
        i64::MAX
    })
}
