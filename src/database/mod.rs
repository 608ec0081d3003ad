//! Database module
//!
//! This module provides the lifecycle of one embedded database instance, organized into:
//!
//! - **core**: Engine infrastructure (connections, pool, schema provisioning, identities)
//! - **persistence**: Entity mapping and the session factory bound to the pool
//! - **dump**: Compressed script export and replay
//! - **handle**: The `Database` handle that ties the above together
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # Engine URI and raw DatabaseConn wrapper
//! │   ├── pool        # r2d2 pool with deferred commit
//! │   ├── schema      # Schema scripts, provisioner, transient storage
//! │   └── sequence    # Instance identities
//! │
//! ├── persistence/    # Entity sessions
//! │   ├── entity      # Entity trait and registry
//! │   └── session     # Insert/find/update/delete through a pooled connection
//! │
//! ├── dump            # gzip SQL script export / restore
//! └── handle          # Database, DatabaseBuilder, teardown
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use memdb::database::Database;
//!
//! let db = Database::empty()?;
//!
//! let mut conn = db.create_connection()?;
//! conn.execute("INSERT INTO tbl_actors (name) VALUES ('someone')", [])?;
//! conn.commit()?;
//! drop(conn);
//!
//! db.dump("/tmp/snapshot.sql.gz")?;
//! db.close();
//!
//! let copy = Database::from_dump("/tmp/snapshot.sql.gz")?;
//! println!("{} tables", copy.table_names()?.len());
//! ```

pub mod core;
pub mod dump;
pub mod handle;
pub mod persistence;

// Engine infrastructure
pub use core::{
    Connection, ConnectionPool, DatabaseConn, EngineUri, InstanceSequence, SchemaProvisioner,
    SchemaScript, TransientStorage,
};

// Entity persistence
pub use persistence::{
    bind, Dialect, Entity, EntityMapping, EntityRegistry, Session, SessionFactory,
};

// Dump and restore
pub use dump::{DumpStats, SCRIPT_HEADER};

// Handle
pub use handle::{Database, DatabaseBuilder, HandleState, SchemaSource, TeardownReport};
