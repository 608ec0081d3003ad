//! Error types
//!
//! Each lifecycle stage has its own error type so callers can tell which stage
//! of creating or using a database failed. `CreateError` wraps the stage errors
//! for the creation entry points.

use std::path::PathBuf;

use thiserror::Error;

use crate::database::Database;

/// Failure to check a connection out of the pool
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The handle (or session factory) has been closed
    #[error("database '{0}' is closed")]
    Closed(String),

    /// The pool could not produce a connection before the checkout timeout
    #[error("connection pool failure: {0}")]
    Pool(#[from] r2d2::Error),

    /// The engine refused to open or configure a connection
    #[error("engine failure: {0}")]
    Engine(#[from] rusqlite::Error),
}

/// Failure while building the initial schema
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to allocate transient storage: {0}")]
    Storage(#[source] std::io::Error),

    #[error("failed to read schema script '{name}': {source}")]
    Script {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schema statement #{index} failed ({statement}): {source}")]
    Statement {
        index: usize,
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to open engine connection: {0}")]
    Connection(#[from] ConnectionError),
}

/// Failure to bind the session factory to a provisioned schema
#[derive(Debug, Error)]
pub enum BindError {
    #[error("entity table '{table}' does not exist in the schema")]
    MissingTable { table: String },

    #[error("column '{column}' of entity table '{table}' does not exist in the schema")]
    MissingColumn { table: String, column: String },

    #[error("dialect {dialect} requires engine version {required}, found {found}")]
    UnsupportedDialect {
        dialect: String,
        required: String,
        found: String,
    },

    #[error("failed to inspect schema: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failure while writing a dump file
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to write dump to '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to export database content: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failure while rebuilding a database from a dump file
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("dump file '{0}' not found")]
    NotFound(PathBuf),

    #[error("dump file '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to replay dump '{path}': {source}")]
    EngineFailure {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failure inside an entity session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session factory is closed")]
    Closed,

    #[error("entity table '{0}' is not registered with the session factory")]
    Unmapped(&'static str),

    #[error("entity from table '{0}' has no identifier yet")]
    Transient(&'static str),

    #[error("entity table '{0}' has no business key column")]
    NoBusinessKey(&'static str),

    #[error("query failed: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failure of one of the creation entry points, tagged by stage
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("failed to provision database: {0}")]
    Provision(#[from] ProvisionError),

    #[error("failed to restore database: {0}")]
    Restore(#[from] RestoreError),

    /// Binding failed after the schema was materialized.
    ///
    /// The handle is handed back so raw connections stay available; it has no
    /// session factory.
    #[error("failed to bind session factory: {source}")]
    Bind {
        #[source]
        source: BindError,
        database: Box<Database>,
    },

    #[error("failed to set up connection pool: {0}")]
    Connection(#[from] ConnectionError),
}

impl CreateError {
    /// Take the provisioned handle out of a bind failure
    pub fn into_database(self) -> Option<Database> {
        match self {
            CreateError::Bind { database, .. } => Some(*database),
            _ => None,
        }
    }
}
