//! Schema upgrades for the SQLite record store.
//!
//! The applied version lives in SQLite's `user_version` header field. Pending
//! steps from [`schema::SCHEMA_STEPS`] run in a single transaction together
//! with the version bump, so a crash never leaves a half-upgraded file.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use super::schema;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema step '{name}' failed: {source}")]
    Step {
        name: &'static str,
        source: sqlx::Error,
    },

    /// The file was written by a newer build.
    #[error("Schema version {found} is newer than supported version {supported}")]
    NewerThanBinary { found: i64, supported: i64 },
}

/// Brings a database up to [`schema::latest_version`].
pub struct SchemaMigrator {
    pool: SqlitePool,
}

impl SchemaMigrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Version recorded in the database file; 0 for a fresh file.
    pub async fn current_version(&self) -> Result<i64, SchemaError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    /// Applies every step newer than the recorded version.
    ///
    /// Returns the version the database is at afterwards.
    pub async fn upgrade(&self) -> Result<i64, SchemaError> {
        let current = self.current_version().await?;
        let latest = schema::latest_version();
        if current > latest {
            return Err(SchemaError::NewerThanBinary {
                found: current,
                supported: latest,
            });
        }

        let pending: Vec<&schema::SchemaStep> = schema::SCHEMA_STEPS
            .iter()
            .filter(|step| step.version > current)
            .collect();
        if pending.is_empty() {
            return Ok(current);
        }

        let mut tx = self.pool.begin().await?;
        for step in &pending {
            sqlx::query(step.sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| SchemaError::Step {
                    name: step.name,
                    source,
                })?;
        }
        // PRAGMA statements take no bind parameters.
        let bump = format!("PRAGMA user_version = {}", latest);
        sqlx::query(&bump).execute(&mut *tx).await?;
        tx.commit().await?;

        info!(from = current, to = latest, steps = pending.len(), "Upgraded record store schema");
        Ok(latest)
    }
}
