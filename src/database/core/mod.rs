//! Core database infrastructure
//!
//! This module provides the foundational components every instance is built from:
//! - `DatabaseConn` / `EngineUri`: raw engine connections and instance addressing
//! - `ConnectionPool` / `Connection`: pooled connections with deferred commit
//! - `SchemaProvisioner` / `SchemaScript`: initial schema creation
//! - `TransientStorage`: per-instance scratch directory
//! - `InstanceSequence`: unique instance identities

mod connection;
mod pool;
mod schema;
mod sequence;

pub use connection::{quote_identifier, table_count, table_exists, table_names, DatabaseConn, EngineUri};
pub use pool::{Connection, ConnectionPool, EngineConnectionManager};
pub use schema::{SchemaProvisioner, SchemaScript, TransientStorage};
pub use sequence::InstanceSequence;
