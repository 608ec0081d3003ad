use anyhow::Result;
use clap::Args;
use memdb::DatabaseConfig;
use serde::Serialize;
use std::path::Path;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    config_file_exists: bool,
    settings: &'a DatabaseConfig,
}

pub fn run(config: &DatabaseConfig, args: ConfigArgs) -> Result<()> {
    let ConfigArgs { json } = args;

    let config_file = DatabaseConfig::config_file_path();
    let info = ConfigInfo {
        config_file_exists: Path::new(&config_file).exists(),
        config_file,
        settings: config,
    };

    if json {
        return super::print_json(&info, true);
    }

    println!("Configuration:");
    println!("==============");
    println!();
    println!(
        "Config file:        {}{}",
        info.config_file,
        if info.config_file_exists {
            ""
        } else {
            " (not present, using defaults)"
        }
    );
    println!();
    println!("{}", config.summary());
    println!();
    println!("Environment variables with prefix MEMDB_ override file settings,");
    println!("e.g. MEMDB_POOL_MAX_SIZE=4 or MEMDB_STORAGE=file.");
    Ok(())
}
