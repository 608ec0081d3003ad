#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! memdb - process-local embedded database instances
//!
//! memdb manages the full lifecycle of an embedded SQLite instance used as a
//! persistence backend: provisioning a fresh schema, binding an entity session
//! factory on top of it, serving pooled connections, dumping and restoring the
//! complete state, and tearing everything down including its transient files.
//! It can be used as both a library and a command-line tool.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `cli` | The `memdb` binary | `clap`, `tracing-subscriber`, `serde_json` |
//!
//! The library itself has no optional parts:
//!
//! ```toml
//! # Library only
//! memdb = { version = "0.1", default-features = false }
//!
//! # Default (CLI binary)
//! memdb = "0.1"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: Instance lifecycle
//!   - `core`: Connections, pool, schema provisioning, identities
//!   - `persistence`: Entity mapping and sessions
//!   - `dump`: Compressed script export and restore
//!   - `handle`: The `Database` handle
//!
//! - **[`config`]**: Configuration management
//!
//! - **[`error`]**: Error types for each lifecycle stage
//!
//! # Quick Start
//!
//! ## Entity sessions
//!
//! ```rust,ignore
//! use memdb::{Database, EntityRegistry};
//!
//! let db = Database::builder()
//!     .entities(EntityRegistry::new().with::<Flow>())
//!     .create_empty()?;
//!
//! let factory = db.session_factory().unwrap();
//! let mut session = factory.open_session()?;
//! let mut flow = Flow::new("a-test-flow", "A test flow");
//! session.insert(&mut flow)?;
//! session.commit()?;
//! ```
//!
//! ## Dump and restore
//!
//! ```rust,ignore
//! use memdb::Database;
//!
//! let db = Database::empty()?;
//! db.dump("snapshot.sql.gz")?;
//! db.close();
//!
//! let restored = Database::from_dump("snapshot.sql.gz")?;
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use memdb::{Database, DatabaseConfig};
//!
//! let config = DatabaseConfig::new(&None)?;
//! let db = Database::builder().config(config).create_empty()?;
//! ```

pub mod config;
pub mod database;
pub mod error;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, DatabaseConfig, StorageMode};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    Connection, Database, DatabaseBuilder, Dialect, DumpStats, Entity, EntityRegistry,
    HandleState, InstanceSequence, SchemaScript, SchemaSource, Session, SessionFactory,
    TeardownReport,
};

// =============================================================================
// Errors
// =============================================================================

pub use error::{
    BindError, ConnectionError, CreateError, DumpError, ProvisionError, RestoreError,
    SessionError,
};
