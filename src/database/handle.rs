//! Database handle
//!
//! [`Database`] owns one engine instance and everything attached to it:
//!
//! - an anchor connection that keeps the instance alive,
//! - the connection pool callers check connections out of,
//! - the session factory for entity persistence,
//! - the transient directory the instance may write files into.
//!
//! Every creation mode runs through [`DatabaseBuilder::build`]. Closing is
//! idempotent and also happens when the handle is dropped.

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{DatabaseConfig, StorageMode};
use crate::database::core::{
    table_exists, table_names, Connection, ConnectionPool, DatabaseConn, EngineUri,
    InstanceSequence, SchemaProvisioner, SchemaScript, TransientStorage,
};
use crate::database::dump::{self, DumpStats};
use crate::database::persistence::{self, Dialect, EntityRegistry, SessionFactory};
use crate::error::{ConnectionError, CreateError, DumpError, ProvisionError, RestoreError};

/// Where a new instance's schema and data come from
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Run a schema-definition script against an empty instance
    Script(SchemaScript),
    /// Replay a compressed dump file
    Dump(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    /// Schema materialized, no session factory bound
    Provisioned,
    /// Session factory bound and serving
    Open,
    Closed,
}

/// Outcome of each teardown step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub factory_closed: bool,
    pub engine_shut_down: bool,
    pub pool_closed: bool,
    pub storage_removed: bool,
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Configures and runs the construction pipeline
pub struct DatabaseBuilder {
    config: DatabaseConfig,
    sequence: InstanceSequence,
    schema: SchemaScript,
    entities: EntityRegistry,
    dialect: Dialect,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        DatabaseBuilder {
            config: DatabaseConfig::default(),
            sequence: InstanceSequence::process(),
            schema: SchemaScript::bundled(),
            entities: EntityRegistry::new(),
            dialect: Dialect::default(),
        }
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: DatabaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Draw identities from `sequence` instead of the process-wide one
    ///
    /// Identities from separate sequences may repeat. Each handle still gets
    /// its own engine instance.
    pub fn sequence(mut self, sequence: InstanceSequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Schema script used by [`DatabaseBuilder::create_empty`]
    pub fn schema(mut self, schema: SchemaScript) -> Self {
        self.schema = schema;
        self
    }

    pub fn entities(mut self, entities: EntityRegistry) -> Self {
        self.entities = entities;
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Create an instance from the configured schema script
    pub fn create_empty(self) -> Result<Database, CreateError> {
        let script = self.schema.clone();
        self.build(SchemaSource::Script(script))
    }

    /// Create an instance from a dump file
    pub fn create_from_dump(self, path: impl AsRef<Path>) -> Result<Database, CreateError> {
        self.build(SchemaSource::Dump(path.as_ref().to_path_buf()))
    }

    /// Run the construction pipeline
    ///
    /// identity, transient storage, anchor connection, schema or dump replay,
    /// connection pool, session factory. A failure before binding tears down
    /// whatever was built and leaves no storage behind. A bind failure returns
    /// the provisioned handle inside [`CreateError::Bind`].
    pub fn build(self, source: SchemaSource) -> Result<Database, CreateError> {
        let DatabaseBuilder {
            config,
            sequence,
            entities,
            dialect,
            ..
        } = self;

        let identity = sequence.next_identity(&config.name_prefix);

        // restored in-memory instances write no files of their own
        let needs_storage =
            matches!(source, SchemaSource::Script(_)) || config.storage == StorageMode::File;
        let storage = if needs_storage {
            let storage = TransientStorage::allocate(&config.storage_root(), &identity)
                .map_err(ProvisionError::Storage)?;
            Some(storage)
        } else {
            None
        };

        let uri = match (&config.storage, &storage) {
            (StorageMode::File, Some(storage)) => {
                EngineUri::file(storage.path().join(format!("{}.sqlite3", identity)))
            }
            _ => EngineUri::private_memory(&identity),
        };

        let (anchor, pool) = match materialize(&uri, &config, &source) {
            Ok(built) => built,
            Err(e) => {
                error!("failed to create database {}: {}", identity, e);
                if let Some(storage) = storage {
                    if let Err(e) = storage.remove() {
                        warn!("failed to remove transient storage of {}: {}", identity, e);
                    }
                }
                return Err(e);
            }
        };

        let mut db = Database {
            identity,
            uri,
            config,
            anchor: Mutex::new(Some(anchor)),
            pool: RwLock::new(Some(pool.clone())),
            session_factory: None,
            storage_path: storage.as_ref().map(|s| s.path().to_path_buf()),
            storage: Mutex::new(storage),
            closed: AtomicBool::new(false),
        };

        match persistence::bind(&pool, dialect, entities) {
            Ok(factory) => {
                db.session_factory = Some(factory);
                info!("database {} is open at {}", db.identity, db.uri);
                Ok(db)
            }
            Err(source) => {
                warn!("database {} provisioned but not bound: {}", db.identity, source);
                Err(CreateError::Bind {
                    source,
                    database: Box::new(db),
                })
            }
        }
    }
}

/// Bring the instance into existence and fill it from `source`
fn materialize(
    uri: &EngineUri,
    config: &DatabaseConfig,
    source: &SchemaSource,
) -> Result<(DatabaseConn, ConnectionPool), CreateError> {
    let open_anchor = || {
        DatabaseConn::open(uri, config.busy_timeout()).map_err(ConnectionError::from)
    };

    let anchor = match source {
        SchemaSource::Script(script) => {
            let anchor = open_anchor().map_err(ProvisionError::from)?;
            let statements = SchemaProvisioner::new(&anchor.conn).provision(script)?;
            info!(
                "provisioned {} from {} ({} statements)",
                uri,
                script.name(),
                statements
            );
            anchor
        }
        SchemaSource::Dump(path) => {
            let script = dump::read_dump(path)?;
            let anchor = open_anchor().map_err(RestoreError::from)?;
            dump::replay(&anchor.conn, &script, path)?;
            info!("restored {} from {}", uri, path.display());
            anchor
        }
    };

    let pool = ConnectionPool::new(uri, config)?;
    Ok((anchor, pool))
}

/// One live database instance
pub struct Database {
    identity: String,
    uri: EngineUri,
    config: DatabaseConfig,
    anchor: Mutex<Option<DatabaseConn>>,
    pool: RwLock<Option<ConnectionPool>>,
    session_factory: Option<SessionFactory>,
    storage: Mutex<Option<TransientStorage>>,
    storage_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl Database {
    /// Create an instance with the bundled schema and default settings
    pub fn empty() -> Result<Database, CreateError> {
        DatabaseBuilder::new().create_empty()
    }

    /// Create an instance from a dump file with default settings
    pub fn from_dump(path: impl AsRef<Path>) -> Result<Database, CreateError> {
        DatabaseBuilder::new().create_from_dump(path)
    }

    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Check a connection out of the pool
    ///
    /// The connection has a transaction open; changes become visible to other
    /// connections only after [`Connection::commit`].
    pub fn create_connection(&self) -> Result<Connection, ConnectionError> {
        self.pool()?.acquire()
    }

    /// Write the full content of the instance to a compressed dump file
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<DumpStats, DumpError> {
        let conn = self.create_connection()?;
        dump::write_dump(&conn, path.as_ref(), self.config.dump_compression_level)
    }

    /// Close the handle; repeated calls do nothing
    pub fn close(&self) {
        self.teardown();
    }

    /// Close the handle and report each teardown step
    ///
    /// Only the first call tears anything down and returns a report; later
    /// calls return `None`. Step failures are logged and do not stop the
    /// following steps.
    pub fn teardown(&self) -> Option<TeardownReport> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let mut report = TeardownReport::default();

        if let Some(factory) = &self.session_factory {
            report.factory_closed = factory.close();
        }

        let pool = match self.pool.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = &pool {
            pool.shutdown();
        }
        match take(&self.anchor) {
            Some(anchor) => match anchor.close() {
                Ok(()) => report.engine_shut_down = true,
                Err(e) => {
                    warn!("failed to shut down engine instance {}: {}", self.uri, e);
                    report.failures.push(format!("engine shutdown: {}", e));
                }
            },
            None => report.engine_shut_down = true,
        }

        drop(pool);
        report.pool_closed = true;

        match take(&self.storage) {
            Some(storage) => match storage.remove() {
                Ok(()) => report.storage_removed = true,
                Err(e) => {
                    warn!("failed to remove transient storage of {}: {}", self.identity, e);
                    report.failures.push(format!("storage removal: {}", e));
                }
            },
            None => report.storage_removed = true,
        }

        info!("closed database {}", self.identity);
        Some(report)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> HandleState {
        if self.is_closed() {
            HandleState::Closed
        } else if self.session_factory.is_some() {
            HandleState::Open
        } else {
            HandleState::Provisioned
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn uri(&self) -> &EngineUri {
        &self.uri
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Session factory, absent when binding failed
    pub fn session_factory(&self) -> Option<&SessionFactory> {
        self.session_factory.as_ref()
    }

    /// Transient storage directory, if the instance has one
    pub fn storage_location(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Schema version recorded in `tbl_db_version`, if the schema has one
    pub fn version(&self) -> Result<Option<i64>, ConnectionError> {
        let conn = self.create_connection()?;
        if !table_exists(&conn, "tbl_db_version")? {
            return Ok(None);
        }
        let version = conn.query_row("SELECT MAX(version) FROM tbl_db_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?;
        Ok(version)
    }

    /// Names of all user tables, in creation order
    pub fn table_names(&self) -> Result<Vec<String>, ConnectionError> {
        let conn = self.create_connection()?;
        Ok(table_names(&conn)?)
    }

    fn pool(&self) -> Result<ConnectionPool, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(self.identity.clone()));
        }
        self.pool
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| ConnectionError::Closed(self.identity.clone()))
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("identity", &self.identity)
            .field("uri", &self.uri.to_string())
            .field("state", &self.state())
            .field("storage", &self.storage_path)
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}
