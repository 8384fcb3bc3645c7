//! Error types for the submission dashboard.

use std::path::PathBuf;
use thiserror::Error;

/// Why a single grading payload could not be decoded.
///
/// These never leave the item they belong to: the flattener turns them into
/// an `Unavailable` grading result.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The feedback cell is NULL or the column does not exist.
    #[error("grading payload is missing")]
    Missing,

    /// The feedback cell holds only whitespace.
    #[error("grading payload is empty")]
    Empty,

    /// The feedback cell is not valid JSON.
    #[error("grading payload is not valid JSON: {source}")]
    Malformed {
        #[source]
        source: serde_json::Error,
    },

    /// Valid JSON, but not an object.
    #[error("grading payload is not a JSON object")]
    NotAnObject,
}

impl DecodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Missing => "missing",
            DecodeError::Empty => "empty",
            DecodeError::Malformed { .. } => "malformed",
            DecodeError::NotAnObject => "not_an_object",
        }
    }
}

/// Errors that abort the current request.
#[derive(Debug, Error)]
pub enum DashboardError {
    // === Connection Errors ===
    /// The database file could not be opened or did not answer a ping.
    #[error("failed to open database {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// An extra schema could not be attached.
    #[error("failed to attach {alias} from {path}: {source}")]
    Attach {
        alias: String,
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    // === Query Errors ===
    /// A read query failed after the connection was established.
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// The requested table does not exist.
    #[error("table not found: {schema}.{table}")]
    TableNotFound { schema: String, table: String },

    /// The table exists but has no `id` column to key submissions on.
    #[error("table {schema}.{table} has no id column")]
    MissingIdColumn { schema: String, table: String },

    // === Export Errors ===
    /// CSV serialization failed.
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    /// Writing the export file failed.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DashboardError {
    /// Stable error code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            DashboardError::Connection { .. } | DashboardError::Attach { .. } => "db_open_failed",
            DashboardError::Query(_) => "db_query_failed",
            DashboardError::TableNotFound { .. } => "not_found",
            DashboardError::MissingIdColumn { .. } => "not_a_submission_table",
            DashboardError::Csv(_) | DashboardError::Write { .. } => "export_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
