use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use memdb::{format_size, Database, DatabaseConfig, SchemaScript};

/// Arguments for the Create command
#[derive(Args)]
pub struct CreateArgs {
    /// Dump file to write
    #[clap(short, long)]
    pub output: PathBuf,

    /// Schema script to provision with instead of the bundled one
    #[clap(short, long)]
    pub schema: Option<PathBuf>,

    /// Output summary as JSON
    #[clap(long)]
    pub json: bool,
}

pub fn run(config: &DatabaseConfig, args: CreateArgs) -> Result<()> {
    let CreateArgs {
        output,
        schema,
        json,
    } = args;

    let script = match schema {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow!("schema script '{}' not found", path.display()));
            }
            SchemaScript::from_file(path)
        }
        None => SchemaScript::bundled(),
    };

    let db = Database::builder()
        .config(config.clone())
        .schema(script)
        .create_empty()
        .map_err(|e| anyhow!("Failed to create database: {}", e))?;

    let stats = db
        .dump(&output)
        .map_err(|e| anyhow!("Failed to write dump: {}", e))?;
    db.close();

    if json {
        return super::print_json(&stats, false);
    }

    println!(
        "Created {} ({} tables, {} rows, {})",
        output.display(),
        stats.tables,
        stats.rows,
        format_size(stats.compressed_bytes)
    );
    Ok(())
}
