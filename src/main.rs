//! Collection Reader CLI - stream documents out of SQL tables and MongoDB collections

mod commands;

use clap::{Parser, Subcommand};
use collection_reader::config::default_config_path;
use collection_reader::output::OutputFormat;
use collection_reader::BackendKind;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "collection-reader")]
#[command(version)]
#[command(about = "Stream documents from SQL tables and MongoDB collections")]
#[command(long_about = r#"
Collection Reader pulls documents out of a store and emits them as
normalized records (id, text, language), in ascending id order.

Example usage:
  collection-reader init --backend mongo
  collection-reader check --config reader.toml
  collection-reader read --config reader.toml --format jsonl > corpus.jsonl
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template configuration file
    Init {
        /// Backend to configure (sql, mongo)
        #[arg(short, long, default_value = "mongo")]
        backend: BackendKind,

        /// Where to write the configuration
        #[arg(short, long, default_value_os_t = default_config_path())]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Connect to the source and report what would be read
    Check {
        /// Path to the configuration file
        #[arg(short, long, default_value_os_t = default_config_path())]
        config: PathBuf,
    },

    /// Read every matching document and write it to stdout
    Read {
        /// Path to the configuration file
        #[arg(short, long, default_value_os_t = default_config_path())]
        config: PathBuf,

        /// Output format (jsonl, text)
        #[arg(short, long, default_value = "jsonl")]
        format: OutputFormat,

        /// Override the configured maximum number of documents
        #[arg(short, long)]
        limit: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { backend, path, force } => commands::run_init(backend, &path, force),
        Commands::Check { config } => commands::run_check(&config),
        Commands::Read { config, format, limit } => commands::run_read(&config, format, limit),
    }
}
