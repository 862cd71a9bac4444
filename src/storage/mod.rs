//! Durable storage for jobs and mind-map nodes.
//!
//! The orchestrator writes through the [`RecordStore`] trait. Two backends
//! are provided:
//! - **MemoryStore**: process-local maps, the default when no database is configured
//! - **SqliteStore**: SQLite via sqlx, with schema versions managed by [`SchemaMigrator`]
//!
//! Node records are insert-only and are returned in the order they were
//! appended, which is the job's completion order. A job row that has reached
//! a terminal status is never overwritten.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cohort_forge::storage::{RecordStore, SqliteStore};
//!
//! let store = SqliteStore::open("sqlite://cohort.db").await?;
//! store.save_job(&job).await?;
//! store.append_node(&node).await?;
//!
//! let nodes = store.load_nodes(job.id).await?;
//! ```

pub mod database;
pub mod memory;
pub mod migrations;
pub mod schema;

use async_trait::async_trait;
use thiserror::Error;

use crate::jobs::{Job, JobId};
use crate::mindmap::{MindMapNode, NodeId};

pub use database::SqliteStore;
pub use memory::MemoryStore;
pub use migrations::{SchemaError, SchemaMigrator};

/// Errors raised by record stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema upgrade error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A node record with this id was already appended.
    #[error("Node {0} is already stored")]
    DuplicateNode(NodeId),
}

/// Persistence seam for job and node records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or updates a job record.
    ///
    /// Returns `false` when the stored record is already terminal and was
    /// left untouched.
    async fn save_job(&self, job: &Job) -> Result<bool, StorageError>;

    /// Appends a committed node. Nodes are never updated.
    async fn append_node(&self, node: &MindMapNode) -> Result<(), StorageError>;

    async fn load_job(&self, job_id: JobId) -> Result<Option<Job>, StorageError>;

    /// Nodes of one job in the order they were appended.
    async fn load_nodes(&self, job_id: JobId) -> Result<Vec<MindMapNode>, StorageError>;

    /// All stored jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError>;
}
