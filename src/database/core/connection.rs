//! Engine connection management
//!
//! This module provides the raw connection wrapper and the URI scheme used to
//! address one engine instance from many connections.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

/// Address of one engine instance
///
/// In-memory instances live in SQLite's `memdb` VFS under a shared name, so
/// every connection opened with the same URI sees the same pages. The instance
/// exists while at least one connection is open; the owning handle keeps an
/// anchor connection for that reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUri {
    Memory { name: String },
    File { path: PathBuf },
}

/// memdb names are process-global, so every instance takes a fresh slot
static NEXT_MEMORY_SLOT: AtomicU64 = AtomicU64::new(1);

impl EngineUri {
    /// A memory URI no other instance in this process has used
    ///
    /// The name combines `identity` with a private slot number, so handles
    /// whose identities collide still get separate instances.
    pub fn private_memory(identity: &str) -> Self {
        let slot = NEXT_MEMORY_SLOT.fetch_add(1, Ordering::SeqCst);
        EngineUri::memory(&format!("{}-{}", identity, slot))
    }

    pub fn memory(name: &str) -> Self {
        EngineUri::Memory {
            name: name.to_string(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        EngineUri::File { path: path.into() }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, EngineUri::Memory { .. })
    }

    /// The filename handed to the engine
    pub fn target(&self) -> String {
        match self {
            // memdb only shares an instance between connections when the name starts with '/'
            EngineUri::Memory { name } => format!("file:/{}?vfs=memdb", name),
            EngineUri::File { path } => path.to_string_lossy().to_string(),
        }
    }

    /// Database file on disk, if any
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            EngineUri::Memory { .. } => None,
            EngineUri::File { path } => Some(path.as_path()),
        }
    }
}

impl Display for EngineUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.target())
    }
}

/// Raw engine connection wrapper
///
/// `DatabaseConn` opens a connection to an [`EngineUri`] and applies the
/// settings every connection to an instance must share.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a connection to the instance behind `uri`
    ///
    /// Opening the first connection to an in-memory URI creates the instance.
    pub fn open(uri: &EngineUri, busy_timeout: Duration) -> rusqlite::Result<Self> {
        let conn = Connection::open_with_flags(uri.target(), Self::flags())?;
        let db = DatabaseConn { conn };
        db.configure(uri, busy_timeout)?;
        Ok(db)
    }

    pub(crate) fn flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }

    /// Apply per-connection settings
    pub(crate) fn configure_connection(
        conn: &Connection,
        uri: &EngineUri,
        busy_timeout: Duration,
    ) -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;

        if !uri.is_memory() {
            // WAL lets readers proceed while a writer holds uncommitted changes
            let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            conn.execute_batch("PRAGMA synchronous=NORMAL")?;
        }

        // Store temp tables in memory
        conn.execute_batch("PRAGMA temp_store=MEMORY")?;

        // Enable foreign keys
        conn.execute_batch("PRAGMA foreign_keys=ON")?;

        Ok(())
    }

    fn configure(&self, uri: &EngineUri, busy_timeout: Duration) -> rusqlite::Result<()> {
        Self::configure_connection(&self.conn, uri, busy_timeout)
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> rusqlite::Result<usize> {
        self.conn.execute(sql, [])
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> rusqlite::Result<bool> {
        table_exists(&self.conn, table_name)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> rusqlite::Result<u64> {
        table_count(&self.conn, table_name)
    }

    /// Close the connection, reporting any error the engine raises
    pub fn close(self) -> rusqlite::Result<()> {
        self.conn.close().map_err(|(_, e)| e)
    }
}

/// Check if a table exists in the database
pub fn table_exists(conn: &Connection, table_name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Get the row count for a table
pub fn table_count(conn: &Connection, table_name: &str) -> rusqlite::Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
    conn.query_row(&query, [], |row| row.get(0))
}

/// Names of all user tables, in creation order
pub fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type='table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
         ORDER BY rowid",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Quote an identifier for use in generated SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    static NEXT: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

    fn memory_uri() -> EngineUri {
        let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        EngineUri::memory(&format!("conn_test_{}_{}", std::process::id(), n))
    }

    #[test]
    fn test_memory_uri_target() {
        let uri = EngineUri::memory("memdb7");
        assert_eq!(uri.target(), "file:/memdb7?vfs=memdb");
        assert!(uri.is_memory());
        assert!(uri.file_path().is_none());
    }

    #[test]
    fn test_private_memory_uris_differ() {
        let a = EngineUri::private_memory("memdb1");
        let b = EngineUri::private_memory("memdb1");
        assert_ne!(a, b);
        assert!(a.target().starts_with("file:/memdb1-"));
    }

    #[test]
    fn test_connections_share_memory_instance() {
        let uri = memory_uri();
        let a = DatabaseConn::open(&uri, Duration::from_secs(1)).unwrap();
        a.execute("CREATE TABLE shared (id INTEGER PRIMARY KEY)")
            .unwrap();

        let b = DatabaseConn::open(&uri, Duration::from_secs(1)).unwrap();
        assert!(b.table_exists("shared").unwrap());
    }

    #[test]
    fn test_memory_instance_is_private() {
        let a = DatabaseConn::open(&memory_uri(), Duration::from_secs(1)).unwrap();
        a.execute("CREATE TABLE private_table (id INTEGER)").unwrap();

        let b = DatabaseConn::open(&memory_uri(), Duration::from_secs(1)).unwrap();
        assert!(!b.table_exists("private_table").unwrap());
    }

    #[test]
    fn test_file_backed_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let uri = EngineUri::file(dir.path().join("db.sqlite3"));
        let db = DatabaseConn::open(&uri, Duration::from_secs(1)).unwrap();

        let mode: String = db
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        db.close().unwrap();
    }

    #[test]
    fn test_table_count_and_names() {
        let db = DatabaseConn::open(&memory_uri(), Duration::from_secs(1)).unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .unwrap();
        db.execute("CREATE TABLE \"odd name\" (id INTEGER)").unwrap();
        db.execute("CREATE TABLE sqliteXnotes (id INTEGER)").unwrap();
        db.execute("INSERT INTO test_table (id) VALUES (1), (2), (3)")
            .unwrap();

        assert_eq!(db.table_count("test_table").unwrap(), 3);
        assert_eq!(db.table_count("odd name").unwrap(), 0);
        assert_eq!(
            table_names(&db.conn).unwrap(),
            vec![
                "test_table".to_string(),
                "odd name".to_string(),
                "sqliteXnotes".to_string()
            ]
        );
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("flows"), "\"flows\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
