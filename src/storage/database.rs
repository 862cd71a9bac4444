//! SQLite record store.
//!
//! Jobs and nodes are stored as JSON documents alongside a few indexed
//! columns. Nodes are append-only; the autoincrement `seq` column preserves
//! completion order across restarts.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::jobs::{Job, JobId};
use crate::mindmap::MindMapNode;

use super::migrations::SchemaMigrator;
use super::{RecordStore, StorageError};

/// SQLite-backed record store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to the database and returns a new store.
    ///
    /// The database file is created if missing. An in-memory URL gets a
    /// single connection that is never recycled, so the data survives for
    /// the life of the pool.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite://cohort.db")
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(30));
        let pool_options = if database_url.contains(":memory:") {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(10).min_connections(1)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Connects and runs migrations.
    pub async fn open(database_url: &str) -> Result<Self, StorageError> {
        let store = Self::connect(database_url).await?;
        store.run_migrations().await?;
        tracing::info!(url = database_url, "Opened SQLite record store");
        Ok(store)
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upgrades the schema to the latest version.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        SchemaMigrator::new(self.pool.clone()).upgrade().await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn save_job(&self, job: &Job) -> Result<bool, StorageError> {
        let record = serde_json::to_string(job)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, status, record, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record,
                updated_at = excluded.updated_at
            WHERE jobs.status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.to_string())
        .bind(record)
        .bind(job.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_node(&self, node: &MindMapNode) -> Result<(), StorageError> {
        let record = serde_json::to_string(node)?;

        let result = sqlx::query(
            r#"
            INSERT INTO nodes (id, job_id, parent_id, agent_id, phase_index, status, record, committed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node.id.to_string())
        .bind(node.job_id.to_string())
        .bind(node.parent.map(|p| p.to_string()))
        .bind(&node.agent_id)
        .bind(i64::from(node.phase.index))
        .bind(node.status.to_string())
        .bind(record)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateNode(node.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_job(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let record: String = row.try_get("record")?;
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    async fn load_nodes(&self, job_id: JobId) -> Result<Vec<MindMapNode>, StorageError> {
        let rows = sqlx::query("SELECT record FROM nodes WHERE job_id = ? ORDER BY seq")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.try_get("record")?;
            nodes.push(serde_json::from_str(&record)?);
        }
        Ok(nodes)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT record FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.try_get("record")?;
            jobs.push(serde_json::from_str(&record)?);
        }
        Ok(jobs)
    }
}
