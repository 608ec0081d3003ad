use clap::{Parser, Subcommand};
use memdb::DatabaseConfig;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::create::CreateArgs;
use commands::inspect::InspectArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.memdb/memdb.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database and write it to a dump file.
    Create(CreateArgs),

    /// Restore a dump file and report its tables and row counts.
    Inspect(InspectArgs),

    /// Show the effective configuration.
    Config(ConfigArgs),
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level INFO or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match DatabaseConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Create(args) => commands::create::run(&config, args),
        Commands::Inspect(args) => commands::inspect::run(&config, args),
        Commands::Config(args) => commands::config::run(&config, args),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
