//! VineDB CLI
//!
//! Command-line tools for exercising a VineDB engine.
//!
//! # Commands
//!
//! - `stress` - Run the concurrent stress harness and verify the indexes
//! - `demo` - Run a scripted workload and print index contents
//! - `config` - Print the default configuration
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// VineDB command-line tools.
#[derive(Parser)]
#[command(name = "vinedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the concurrent stress harness against an in-memory database
    Stress {
        /// Number of update transactions
        #[arg(short, long, default_value = "10000")]
        operations: usize,

        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Number of distinct records
        #[arg(short, long, default_value = "100")]
        records: usize,

        /// Run version cleanup every N commits (0 = never)
        #[arg(long, default_value = "64")]
        cleanup_interval: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a scripted workload
    Demo {
        /// Scenario to run (tags, graph, unique, nested)
        #[arg(short, long, default_value = "tags")]
        scenario: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the default configuration as JSON
    Config,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Stress {
            operations,
            threads,
            records,
            cleanup_interval,
            format,
        } => {
            let format = format.parse::<commands::OutputFormat>()?;
            commands::stress::run(operations, threads, records, cleanup_interval, format)?;
        }
        Commands::Demo { scenario, format } => {
            let format = format.parse::<commands::OutputFormat>()?;
            commands::demo::run(&scenario, format)?;
        }
        Commands::Config => {
            let config = vinedb_core::Config::default();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("VineDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("VineDB Core v{}", vinedb_core::VERSION);
        }
    }

    Ok(())
}
