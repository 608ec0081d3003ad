use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use memdb::database::core::table_count;
use memdb::{format_size, Database, DatabaseConfig};
use serde::Serialize;

/// Arguments for the Inspect command
#[derive(Args)]
pub struct InspectArgs {
    /// Dump file to restore
    #[clap(name = "DUMP")]
    pub dump: PathBuf,

    /// Output as JSON
    #[clap(long)]
    pub json: bool,

    /// Pretty-print JSON output
    #[clap(long)]
    pub pretty: bool,
}

#[derive(Debug, Serialize)]
struct TableInfo {
    name: String,
    rows: u64,
}

#[derive(Debug, Serialize)]
struct DumpInfo {
    path: String,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_version: Option<i64>,
    total_rows: u64,
    tables: Vec<TableInfo>,
}

pub fn run(config: &DatabaseConfig, args: InspectArgs) -> Result<()> {
    let InspectArgs { dump, json, pretty } = args;

    let size_bytes = std::fs::metadata(&dump)
        .map_err(|e| anyhow!("Cannot read dump file '{}': {}", dump.display(), e))?
        .len();

    let db = Database::builder()
        .config(config.clone())
        .create_from_dump(&dump)
        .map_err(|e| anyhow!("Failed to restore dump: {}", e))?;

    let schema_version = db.version()?;
    let mut tables = Vec::new();
    {
        let names = db.table_names()?;
        let conn = db.create_connection()?;
        for name in names {
            let rows = table_count(&conn, &name)?;
            tables.push(TableInfo { name, rows });
        }
    }
    db.close();

    let info = DumpInfo {
        path: dump.to_string_lossy().to_string(),
        size_bytes,
        schema_version,
        total_rows: tables.iter().map(|t| t.rows).sum(),
        tables,
    };

    if json {
        return super::print_json(&info, pretty);
    }

    println!("Dump:           {}", info.path);
    println!("Size:           {}", format_size(info.size_bytes));
    if let Some(version) = info.schema_version {
        println!("Schema Version: {}", version);
    }
    println!(
        "Tables:         {} ({} rows)",
        info.tables.len(),
        info.total_rows
    );
    println!();
    for table in &info.tables {
        println!("  {:<40} {:>10}", table.name, table.rows);
    }
    Ok(())
}
