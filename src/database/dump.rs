//! Dump and restore
//!
//! A dump is a gzip-compressed SQL script that rebuilds an instance from
//! nothing. Layout, in order:
//!
//! ```text
//! -- memdb script v1
//! -- exported <timestamp>
//! CREATE TABLE ...;            one per user table, in creation order
//! INSERT INTO ... VALUES ...;  every row of that table
//! DELETE FROM sqlite_sequence; generated-identifier counters
//! INSERT INTO sqlite_sequence ...;
//! CREATE INDEX / VIEW / TRIGGER ...;
//! ```
//!
//! The export reads inside a single transaction, so the script is as
//! consistent as the engine's snapshot of that transaction. Virtual tables
//! are not exported.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::database::core::{quote_identifier, table_exists};
use crate::error::{DumpError, RestoreError};

/// First line of every dump script
pub const SCRIPT_HEADER: &str = "-- memdb script v1";

/// What a dump contained
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpStats {
    pub tables: usize,
    pub rows: u64,
    pub schema_objects: usize,
    pub compressed_bytes: u64,
}

/// Write the script that rebuilds the database behind `conn`
pub fn export_script<W: Write>(
    conn: &Connection,
    out: &mut W,
    destination: &Path,
) -> Result<DumpStats, DumpError> {
    let io_err = |source: std::io::Error| DumpError::Io {
        path: destination.to_path_buf(),
        source,
    };
    let mut stats = DumpStats::default();

    writeln!(out, "{}", SCRIPT_HEADER).map_err(io_err)?;
    writeln!(out, "-- exported {}", chrono::Utc::now().to_rfc3339()).map_err(io_err)?;

    let tables: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type='table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
               AND sql NOT LIKE 'CREATE VIRTUAL%'
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for (name, sql) in &tables {
        writeln!(out, "{};", sql).map_err(io_err)?;
        stats.rows += export_rows(conn, name, out).map_err(|e| match e {
            ExportError::Io(source) => io_err(source),
            ExportError::Engine(e) => DumpError::Engine(e),
        })?;
        stats.tables += 1;
    }

    if table_exists(conn, "sqlite_sequence")? {
        writeln!(out, "DELETE FROM sqlite_sequence;").map_err(io_err)?;
        let mut stmt = conn.prepare("SELECT name, seq FROM sqlite_sequence")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            writeln!(
                out,
                "INSERT INTO sqlite_sequence (name, seq) VALUES ({}, {});",
                sql_literal(row.get_ref(0)?),
                sql_literal(row.get_ref(1)?)
            )
            .map_err(io_err)?;
        }
    }

    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE type IN ('index', 'view', 'trigger') AND sql IS NOT NULL
         ORDER BY rowid",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let sql: String = row.get(0)?;
        writeln!(out, "{};", sql).map_err(io_err)?;
        stats.schema_objects += 1;
    }

    Ok(stats)
}

enum ExportError {
    Io(std::io::Error),
    Engine(rusqlite::Error),
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<rusqlite::Error> for ExportError {
    fn from(e: rusqlite::Error) -> Self {
        ExportError::Engine(e)
    }
}

fn export_rows<W: Write>(conn: &Connection, table: &str, out: &mut W) -> Result<u64, ExportError> {
    let columns: Vec<String> = {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt.query_map([], |row| row.get(1))?;
        names.collect::<rusqlite::Result<_>>()?
    };
    if columns.is_empty() {
        return Ok(0);
    }

    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {}", column_list, quote_identifier(table));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut count = 0;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(sql_literal(row.get_ref(i)?));
        }
        writeln!(
            out,
            "INSERT INTO {} ({}) VALUES ({});",
            quote_identifier(table),
            column_list,
            values.join(", ")
        )?;
        count += 1;
    }
    Ok(count)
}

/// Render a value as a SQL literal the engine reads back unchanged
fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => {
            if f.is_nan() {
                "NULL".to_string()
            } else if f.is_infinite() {
                let literal = if f > 0.0 { "9e999" } else { "-9e999" };
                literal.to_string()
            } else {
                format!("{:?}", f)
            }
        }
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => format!("'{}'", text.replace('\'', "''")),
            // not valid UTF-8: replay the exact stored bytes
            Err(_) => format!("CAST(X'{}' AS TEXT)", hex(bytes)),
        },
        ValueRef::Blob(bytes) => format!("X'{}'", hex(bytes)),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Export `conn` to a compressed dump at `destination`
///
/// The file is written next to the destination and renamed into place once
/// complete, so a failed dump never leaves a truncated file behind.
pub fn write_dump(
    conn: &Connection,
    destination: &Path,
    compression_level: u32,
) -> Result<DumpStats, DumpError> {
    let io_err = |source: std::io::Error| DumpError::Io {
        path: destination.to_path_buf(),
        source,
    };

    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;

    let mut stats = {
        let mut encoder = GzEncoder::new(
            BufWriter::new(tmp.as_file_mut()),
            Compression::new(compression_level),
        );
        let stats = export_script(conn, &mut encoder, destination)?;
        let writer = encoder.finish().map_err(io_err)?;
        writer.into_inner().map_err(|e| io_err(e.into_error()))?;
        stats
    };

    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(destination).map_err(|e| io_err(e.error))?;

    stats.compressed_bytes = std::fs::metadata(destination).map_err(io_err)?.len();
    info!(
        "dumped {} tables ({} rows) to {}",
        stats.tables,
        stats.rows,
        destination.display()
    );
    Ok(stats)
}

/// Read and decompress a dump script
pub fn read_dump(source: &Path) -> Result<String, RestoreError> {
    let corrupt = |reason: String| RestoreError::Corrupt {
        path: source.to_path_buf(),
        reason,
    };

    let file = File::open(source).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RestoreError::NotFound(source.to_path_buf()),
        _ => corrupt(format!("unreadable: {}", e)),
    })?;

    let mut script = String::new();
    GzDecoder::new(BufReader::new(file))
        .read_to_string(&mut script)
        .map_err(|e| corrupt(format!("not a compressed script: {}", e)))?;

    match script.lines().next() {
        Some(line) if line.trim_end() == SCRIPT_HEADER => Ok(script),
        _ => Err(corrupt("missing script header".to_string())),
    }
}

/// Replay a dump script on a raw connection to an empty instance
///
/// Runs in one transaction with foreign key enforcement suspended, since rows
/// are inserted table by table.
pub fn replay(conn: &Connection, script: &str, source: &Path) -> Result<(), RestoreError> {
    let engine_err = |source_err: rusqlite::Error| RestoreError::EngineFailure {
        path: source.to_path_buf(),
        source: source_err,
    };

    conn.execute_batch("PRAGMA foreign_keys=OFF")
        .map_err(engine_err)?;
    let result = conn
        .unchecked_transaction()
        .and_then(|tx| {
            tx.execute_batch(script)?;
            tx.commit()
        })
        .map_err(engine_err);
    conn.execute_batch("PRAGMA foreign_keys=ON")
        .map_err(engine_err)?;
    result?;

    debug!("replayed {} bytes of script from {}", script.len(), source.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::table_names;

    fn sample_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL,
                 weight REAL,
                 payload BLOB
             );
             CREATE TABLE tags (item INTEGER REFERENCES items (id), tag TEXT);
             CREATE INDEX idx_tags_item ON tags (item);
             CREATE VIEW heavy AS SELECT name FROM items WHERE weight > 1;
             INSERT INTO items (name, weight, payload) VALUES ('it''s', 2.5, X'00FF10');
             INSERT INTO items (name, weight, payload) VALUES ('second', NULL, NULL);
             INSERT INTO items (name, weight) VALUES ('third', 0.1);
             DELETE FROM items WHERE name = 'third';
             INSERT INTO tags VALUES (1, 'a'), (2, 'b');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_sql_literal() {
        assert_eq!(sql_literal(ValueRef::Null), "NULL");
        assert_eq!(sql_literal(ValueRef::Integer(-7)), "-7");
        assert_eq!(sql_literal(ValueRef::Real(1.0)), "1.0");
        assert_eq!(sql_literal(ValueRef::Real(f64::INFINITY)), "9e999");
        assert_eq!(sql_literal(ValueRef::Text(b"it's")), "'it''s'");
        assert_eq!(sql_literal(ValueRef::Blob(&[0x00, 0xab])), "X'00AB'");
        assert_eq!(
            sql_literal(ValueRef::Text(&[0xff, 0x61])),
            "CAST(X'FF61' AS TEXT)"
        );
    }

    #[test]
    fn test_non_utf8_text_survives_replay() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (body TEXT);
             INSERT INTO notes VALUES (CAST(X'FF61' AS TEXT));",
        )
        .unwrap();

        let mut out = Vec::new();
        export_script(&conn, &mut out, Path::new("mem")).unwrap();
        let script = String::from_utf8(out).unwrap();

        let restored = Connection::open_in_memory().unwrap();
        replay(&restored, &script, Path::new("mem")).unwrap();
        let (kind, raw): (String, String) = restored
            .query_row("SELECT typeof(body), hex(body) FROM notes", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(kind, "text");
        assert_eq!(raw, "FF61");
    }

    #[test]
    fn test_tables_named_like_internal_ones_are_exported() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE sqliteXnotes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO sqliteXnotes VALUES (1, 'kept');",
        )
        .unwrap();

        let mut out = Vec::new();
        let stats = export_script(&conn, &mut out, Path::new("mem")).unwrap();
        assert_eq!(stats.tables, 1);
        assert_eq!(stats.rows, 1);

        let restored = Connection::open_in_memory().unwrap();
        replay(&restored, &String::from_utf8(out).unwrap(), Path::new("mem")).unwrap();
        let body: String = restored
            .query_row("SELECT body FROM sqliteXnotes WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(body, "kept");
    }

    #[test]
    fn test_export_script_layout() {
        let conn = sample_db();
        let mut out = Vec::new();
        let stats = export_script(&conn, &mut out, Path::new("mem")).unwrap();
        let script = String::from_utf8(out).unwrap();

        assert!(script.starts_with(SCRIPT_HEADER));
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.schema_objects, 2);

        let create = script.find("CREATE TABLE items").unwrap();
        let insert = script.find("INSERT INTO \"items\"").unwrap();
        let index = script.find("CREATE INDEX idx_tags_item").unwrap();
        assert!(create < insert && insert < index);
        assert!(script.contains("INSERT INTO sqlite_sequence (name, seq) VALUES ('items', 3);"));
    }

    #[test]
    fn test_dump_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql.gz");

        let conn = sample_db();
        let stats = write_dump(&conn, &path, 6).unwrap();
        assert!(stats.compressed_bytes > 0);
        assert_eq!(stats.compressed_bytes, std::fs::metadata(&path).unwrap().len());

        let script = read_dump(&path).unwrap();
        let restored = Connection::open_in_memory().unwrap();
        replay(&restored, &script, &path).unwrap();

        assert_eq!(
            table_names(&restored).unwrap(),
            vec!["items".to_string(), "tags".to_string()]
        );
        let (name, weight, payload): (String, f64, Vec<u8>) = restored
            .query_row(
                "SELECT name, weight, payload FROM items WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(name, "it's");
        assert_eq!(weight, 2.5);
        assert_eq!(payload, vec![0x00, 0xFF, 0x10]);

        // the deleted row's identifier is not handed out again
        restored
            .execute("INSERT INTO items (name) VALUES ('fourth')", [])
            .unwrap();
        assert_eq!(restored.last_insert_rowid(), 4);

        let heavy: i64 = restored
            .query_row("SELECT COUNT(*) FROM heavy", [], |row| row.get(0))
            .unwrap();
        assert_eq!(heavy, 1);
    }

    #[test]
    fn test_unwritable_destination() {
        let conn = sample_db();
        let result = write_dump(&conn, Path::new("/nonexistent/dir/dump.gz"), 6);
        assert!(matches!(result, Err(DumpError::Io { .. })));
    }

    #[test]
    fn test_read_missing_dump() {
        let result = read_dump(Path::new("/nonexistent/dump.gz"));
        assert!(matches!(result, Err(RestoreError::NotFound(_))));
    }

    #[test]
    fn test_read_corrupt_dump() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("plain.sql");
        std::fs::write(&plain, "CREATE TABLE x (id INTEGER);").unwrap();
        assert!(matches!(
            read_dump(&plain),
            Err(RestoreError::Corrupt { .. })
        ));

        let foreign = dir.path().join("foreign.gz");
        let mut encoder = GzEncoder::new(File::create(&foreign).unwrap(), Compression::default());
        encoder.write_all(b"SELECT 1;").unwrap();
        encoder.finish().unwrap();
        assert!(matches!(
            read_dump(&foreign),
            Err(RestoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_replay_failure() {
        let conn = Connection::open_in_memory().unwrap();
        let script = format!("{}\nCREATE TABLE a (id INTEGER);\nINSERT INTO nope VALUES (1);\n", SCRIPT_HEADER);
        let result = replay(&conn, &script, Path::new("bad.gz"));
        assert!(matches!(result, Err(RestoreError::EngineFailure { .. })));

        // the transaction was rolled back as a whole
        assert!(table_names(&conn).unwrap().is_empty());
    }
}
