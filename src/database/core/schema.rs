//! Schema provisioning
//!
//! This module runs the schema-definition script that builds a fresh instance
//! and manages the transient directory an instance may write files into.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Connection};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::ProvisionError;

const BUNDLED_SCHEMA: &str = include_str!("../../../resources/schema.sql");

/// Longest statement excerpt carried in a provisioning error
const STATEMENT_EXCERPT_LEN: usize = 120;

#[derive(Debug, Clone)]
enum ScriptSource {
    Embedded(&'static str),
    Text(String),
    File(PathBuf),
}

/// A named, readable stream of schema-definition statements
#[derive(Debug, Clone)]
pub struct SchemaScript {
    name: String,
    source: ScriptSource,
}

impl SchemaScript {
    /// The schema script shipped with this crate
    pub fn bundled() -> Self {
        SchemaScript {
            name: "schema.sql".to_string(),
            source: ScriptSource::Embedded(BUNDLED_SCHEMA),
        }
    }

    /// A script held in memory
    pub fn from_sql(name: &str, sql: impl Into<String>) -> Self {
        SchemaScript {
            name: name.to_string(),
            source: ScriptSource::Text(sql.into()),
        }
    }

    /// A script read from a file when provisioning runs
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        SchemaScript {
            name: path.to_string_lossy().to_string(),
            source: ScriptSource::File(path),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the script as a byte stream
    pub fn open(&self) -> std::io::Result<Box<dyn Read + '_>> {
        match &self.source {
            ScriptSource::Embedded(sql) => Ok(Box::new(sql.as_bytes())),
            ScriptSource::Text(sql) => Ok(Box::new(sql.as_bytes())),
            ScriptSource::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
        }
    }

    fn read_all(&self) -> std::io::Result<String> {
        let mut sql = String::new();
        self.open()?.read_to_string(&mut sql)?;
        Ok(sql)
    }
}

impl Default for SchemaScript {
    fn default() -> Self {
        SchemaScript::bundled()
    }
}

/// Private directory tied to one instance's lifetime
#[derive(Debug)]
pub struct TransientStorage {
    dir: TempDir,
}

impl TransientStorage {
    /// Create a fresh directory under `root`
    pub fn allocate(root: &Path, identity: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("_{}_", identity))
            .tempdir_in(root)?;
        info!(
            "files of {} will be stored in {} and deleted on close",
            identity,
            dir.path().display()
        );
        Ok(TransientStorage { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory and everything in it
    pub fn remove(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Runs schema scripts against a raw connection
pub struct SchemaProvisioner<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaProvisioner<'a> {
    /// Create a new provisioner for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Execute every statement of `script` in document order
    ///
    /// Stops at the first failing statement. Statements that already ran are
    /// not rolled back. Returns the number of statements executed.
    pub fn provision(&self, script: &SchemaScript) -> Result<usize, ProvisionError> {
        let sql = script.read_all().map_err(|source| ProvisionError::Script {
            name: script.name().to_string(),
            source,
        })?;

        let mut batch = Batch::new(self.conn, &sql);
        let mut executed = 0;
        loop {
            let index = executed + 1;
            let mut stmt = match batch.next() {
                Ok(Some(stmt)) => stmt,
                Ok(None) => break,
                Err(source) => {
                    let (statement, source) = prepare_failure(source);
                    return Err(ProvisionError::Statement {
                        index,
                        statement,
                        source,
                    });
                }
            };

            let mut rows = stmt.raw_query();
            let result = loop {
                match rows.next() {
                    Ok(Some(_)) => continue,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            drop(rows);

            if let Err(source) = result {
                return Err(ProvisionError::Statement {
                    index,
                    statement: excerpt(stmt.expanded_sql().unwrap_or_default()),
                    source,
                });
            }
            executed += 1;
        }

        debug!("executed {} statements from {}", executed, script.name());
        Ok(executed)
    }
}

/// Split a prepare error into the failing statement and an engine error
/// that no longer carries the rest of the script
fn prepare_failure(source: rusqlite::Error) -> (String, rusqlite::Error) {
    match source {
        rusqlite::Error::SqlInputError {
            error, msg, sql, ..
        } => (
            excerpt(leading_statement(&sql).to_string()),
            rusqlite::Error::SqliteFailure(error, Some(msg)),
        ),
        other => ("<unparsable>".to_string(), other),
    }
}

/// Text of the first statement in `sql`, up to its terminating semicolon
fn leading_statement(sql: &str) -> &str {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b';' => return sql[..i].trim(),
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    sql.trim()
}

fn excerpt(sql: String) -> String {
    let sql = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if sql.chars().count() <= STATEMENT_EXCERPT_LEN {
        sql
    } else {
        let cut: String = sql.chars().take(STATEMENT_EXCERPT_LEN).collect();
        format!("{}...", cut)
    }
}
