//! Connection pool
//!
//! Pooled connections come out of the pool with a transaction already open, so
//! nothing a caller does is visible to other connections until it commits.
//! Dropping a connection rolls back whatever was not committed and returns it
//! to the pool.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::config::DatabaseConfig;
use crate::database::core::connection::{DatabaseConn, EngineUri};
use crate::error::ConnectionError;

/// r2d2 manager that opens engine connections for one instance
#[derive(Debug)]
pub struct EngineConnectionManager {
    uri: EngineUri,
    busy_timeout: Duration,
    shut_down: Arc<AtomicBool>,
}

impl EngineConnectionManager {
    fn refused(&self) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            Some(format!("instance {} has been shut down", self.uri)),
        )
    }
}

impl r2d2::ManageConnection for EngineConnectionManager {
    type Connection = rusqlite::Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        trace!("opening pooled connection to {}", self.uri);
        let db = DatabaseConn::open(&self.uri, self.busy_timeout)?;
        Ok(db.conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(self.refused());
        }
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        // a connection that could not be rolled back must not be reused
        self.shut_down.load(Ordering::SeqCst) || !conn.is_autocommit()
    }
}

/// Bounded pool of connections to one engine instance
#[derive(Clone)]
pub struct ConnectionPool {
    pool: r2d2::Pool<EngineConnectionManager>,
    shut_down: Arc<AtomicBool>,
    uri: EngineUri,
}

impl ConnectionPool {
    /// Create a pool for the instance behind `uri`
    ///
    /// No connection is opened until the first checkout.
    pub fn new(uri: &EngineUri, config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let shut_down = Arc::new(AtomicBool::new(false));
        let manager = EngineConnectionManager {
            uri: uri.clone(),
            busy_timeout: config.busy_timeout(),
            shut_down: shut_down.clone(),
        };

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_max_size)
            .min_idle(Some(0))
            .max_lifetime(None)
            .connection_timeout(config.connection_timeout())
            .test_on_check_out(true)
            .build(manager)?;

        Ok(ConnectionPool {
            pool,
            shut_down,
            uri: uri.clone(),
        })
    }

    /// Check out a connection with a transaction open
    ///
    /// Blocks until a connection is free or the checkout timeout expires.
    pub fn acquire(&self) -> Result<Connection, ConnectionError> {
        if self.is_shut_down() {
            return Err(ConnectionError::Closed(self.uri.to_string()));
        }
        let inner = self.pool.get()?;
        Connection::begin(inner)
    }

    /// Refuse all further physical connections
    ///
    /// Connections already checked out stay usable until they are dropped.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of open physical connections and how many of them are idle
    pub fn state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }

    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }

    pub fn uri(&self) -> &EngineUri {
        &self.uri
    }
}

/// A pooled connection with automatic commit disabled
///
/// Dereferences to [`rusqlite::Connection`]. Call [`Connection::commit`] to make
/// changes visible; anything left uncommitted is rolled back on drop.
pub struct Connection {
    inner: r2d2::PooledConnection<EngineConnectionManager>,
}

impl Connection {
    fn begin(inner: r2d2::PooledConnection<EngineConnectionManager>) -> Result<Self, ConnectionError> {
        inner.execute_batch("BEGIN DEFERRED")?;
        Ok(Connection { inner })
    }

    /// Commit the current transaction and start a new one
    pub fn commit(&mut self) -> rusqlite::Result<()> {
        if !self.inner.is_autocommit() {
            self.inner.execute_batch("COMMIT")?;
        }
        self.inner.execute_batch("BEGIN DEFERRED")
    }

    /// Discard the current transaction and start a new one
    pub fn rollback(&mut self) -> rusqlite::Result<()> {
        if !self.inner.is_autocommit() {
            self.inner.execute_batch("ROLLBACK")?;
        }
        self.inner.execute_batch("BEGIN DEFERRED")
    }

    /// Whether a transaction is currently open
    pub fn in_transaction(&self) -> bool {
        !self.inner.is_autocommit()
    }
}

impl Deref for Connection {
    type Target = rusqlite::Connection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.inner.is_autocommit() {
            if let Err(e) = self.inner.execute_batch("ROLLBACK") {
                warn!("failed to roll back pooled connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static NEXT: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

    fn setup_pool(max_size: u32) -> (DatabaseConn, ConnectionPool) {
        let n = NEXT.fetch_add(1, Ordering::SeqCst);
        let uri = EngineUri::memory(&format!("pool_test_{}_{}", std::process::id(), n));
        let anchor = DatabaseConn::open(&uri, Duration::from_secs(1)).unwrap();
        anchor
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let config = DatabaseConfig {
            pool_max_size: max_size,
            connection_timeout_secs: 1,
            busy_timeout_ms: 200,
            ..Default::default()
        };
        (anchor, ConnectionPool::new(&uri, &config).unwrap())
    }

    #[test]
    fn test_pool_is_lazy() {
        let (_anchor, pool) = setup_pool(4);
        assert_eq!(pool.state().0, 0);
        let _conn = pool.acquire().unwrap();
        assert_eq!(pool.state().0, 1);
    }

    #[test]
    fn test_autocommit_disabled() {
        let (_anchor, pool) = setup_pool(4);
        let conn = pool.acquire().unwrap();
        assert!(conn.in_transaction());
    }

    #[test]
    fn test_uncommitted_rolled_back_on_drop() {
        let (anchor, pool) = setup_pool(4);
        {
            let conn = pool.acquire().unwrap();
            conn.execute("INSERT INTO items (name) VALUES ('lost')", [])
                .unwrap();
        }
        assert_eq!(anchor.table_count("items").unwrap(), 0);

        let mut conn = pool.acquire().unwrap();
        conn.execute("INSERT INTO items (name) VALUES ('kept')", [])
            .unwrap();
        conn.commit().unwrap();
        assert!(conn.in_transaction());
        drop(conn);
        assert_eq!(anchor.table_count("items").unwrap(), 1);
    }

    #[test]
    fn test_rollback() {
        let (anchor, pool) = setup_pool(4);
        let mut conn = pool.acquire().unwrap();
        conn.execute("INSERT INTO items (name) VALUES ('undo')", [])
            .unwrap();
        conn.rollback().unwrap();
        drop(conn);
        assert_eq!(anchor.table_count("items").unwrap(), 0);
    }

    #[test]
    fn test_connections_are_reused() {
        let (_anchor, pool) = setup_pool(4);
        for _ in 0..10 {
            let conn = pool.acquire().unwrap();
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
            assert_eq!(one, 1);
        }
        assert_eq!(pool.state(), (1, 1));
    }

    #[test]
    fn test_saturated_pool_times_out() {
        let (_anchor, pool) = setup_pool(1);
        let _held = pool.acquire().unwrap();
        match pool.acquire() {
            Err(ConnectionError::Pool(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected checkout to time out"),
        }
    }

    #[test]
    fn test_shutdown_refuses_checkout() {
        let (_anchor, pool) = setup_pool(2);
        let held = pool.acquire().unwrap();
        pool.shutdown();
        assert!(matches!(pool.acquire(), Err(ConnectionError::Closed(_))));

        // connections already handed out keep working until dropped
        let count: i64 = held
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
