//! Database schema constants.
//!
//! This module contains the SQL schema definitions for the SQLite record
//! store. Job and node payloads are stored as JSON text; the extra columns
//! exist for lookups and ordering.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    record TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL schema for creating the nodes table.
///
/// `seq` is the insertion order, which is the job's completion order.
pub const CREATE_NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    job_id TEXT NOT NULL,
    parent_id TEXT,
    agent_id TEXT NOT NULL,
    phase_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    record TEXT NOT NULL,
    committed_at TEXT NOT NULL
)
"#;

/// Index for loading one job's nodes in completion order.
pub const CREATE_NODES_JOB_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_nodes_job ON nodes(job_id, seq)";

/// Index for listing jobs by status.
pub const CREATE_JOBS_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)";

/// One versioned change to the record store schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaStep {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema steps in ascending version order.
pub const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "create_jobs",
        sql: CREATE_JOBS_TABLE,
    },
    SchemaStep {
        version: 2,
        name: "create_nodes",
        sql: CREATE_NODES_TABLE,
    },
    SchemaStep {
        version: 3,
        name: "index_nodes_by_job",
        sql: CREATE_NODES_JOB_INDEX,
    },
    SchemaStep {
        version: 4,
        name: "index_jobs_by_status",
        sql: CREATE_JOBS_STATUS_INDEX,
    },
];

/// The schema version this build writes.
pub fn latest_version() -> i64 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}
