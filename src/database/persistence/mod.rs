//! Persistence binding
//!
//! Binds a session factory to a provisioned instance. The factory hands out
//! [`Session`]s that persist registered [`Entity`] types through the pool.
//!
//! ```rust,ignore
//! use memdb::database::{Database, EntityRegistry};
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

mod entity;
#[cfg(test)]
pub(crate) mod fixtures;
mod session;

pub use entity::{Entity, EntityMapping, EntityRegistry};
pub use session::Session;

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::database::core::{quote_identifier, ConnectionPool};
use crate::error::{BindError, SessionError};

/// SQL flavor sessions generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Generated identifiers are read back with `INSERT ... RETURNING`
    #[default]
    Sqlite,
    /// Generated identifiers are read back with `last_insert_rowid()`
    SqliteLegacy,
}

impl Dialect {
    /// Oldest engine version the dialect's statements run on
    pub fn min_engine_version(&self) -> i32 {
        match self {
            Dialect::Sqlite => 3_035_000,
            Dialect::SqliteLegacy => 3_007_011,
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::SqliteLegacy => write!(f, "sqlite-legacy"),
        }
    }
}

fn format_version(number: i32) -> String {
    format!(
        "{}.{}.{}",
        number / 1_000_000,
        (number / 1_000) % 1_000,
        number % 1_000
    )
}

/// Bind a session factory to a provisioned instance
///
/// Checks the dialect against the engine version and every registered entity
/// mapping against the schema.
pub fn bind(
    pool: &ConnectionPool,
    dialect: Dialect,
    registry: EntityRegistry,
) -> Result<SessionFactory, BindError> {
    let engine_version = rusqlite::version_number();
    if engine_version < dialect.min_engine_version() {
        return Err(BindError::UnsupportedDialect {
            dialect: dialect.to_string(),
            required: format_version(dialect.min_engine_version()),
            found: rusqlite::version().to_string(),
        });
    }

    {
        let conn = pool.acquire()?;
        for mapping in registry.mappings() {
            let sql = format!("PRAGMA table_info({})", quote_identifier(mapping.table));
            let mut stmt = conn.prepare(&sql)?;
            let existing = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<HashSet<String>>>()?;

            if existing.is_empty() {
                return Err(BindError::MissingTable {
                    table: mapping.table.to_string(),
                });
            }
            for column in mapping.all_columns() {
                if !existing.contains(column) {
                    return Err(BindError::MissingColumn {
                        table: mapping.table.to_string(),
                        column: column.to_string(),
                    });
                }
            }
            debug!("mapped entity table {}", mapping.table);
        }
    }

    info!(
        "bound session factory to {} ({} entity types, dialect {})",
        pool.uri(),
        registry.len(),
        dialect
    );

    Ok(SessionFactory {
        pool: RwLock::new(Some(pool.clone())),
        dialect,
        registry,
        open: AtomicBool::new(true),
    })
}

/// Entry point for entity sessions on one instance
pub struct SessionFactory {
    pool: RwLock<Option<ConnectionPool>>,
    dialect: Dialect,
    registry: EntityRegistry,
    open: AtomicBool,
}

impl SessionFactory {
    /// Open a session on a fresh pooled connection
    pub fn open_session(&self) -> Result<Session<'_>, SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        let pool = self
            .pool
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(SessionError::Closed)?;
        let conn = pool.acquire()?;
        Ok(Session::new(self, conn))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Stop handing out sessions and release the factory's pool reference
    ///
    /// Returns false if the factory was already closed.
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        match self.pool.write() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        true
    }
}
