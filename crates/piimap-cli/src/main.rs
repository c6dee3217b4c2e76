//! piimap - drive the OpenPIIMap caching engine from the command line.
//!
//! Commands:
//! - `piimap install` - precache the site and activate the configured version
//! - `piimap fetch <url>` - fetch through the worker's strategies
//! - `piimap status` - list cache partitions and the last sync time
//! - `piimap sync` - refresh the critical data endpoints
//! - `piimap clear` - delete every cache and re-install
//! - `piimap cache-country`, `piimap cache-search` - store page-supplied records
//! - `piimap item <key>` - read a stored JSON record
//! - `piimap message <json>` - post a raw protocol message
//! - `piimap config` - print or save the effective configuration

mod commands;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use piimap_core::Config;

// ============================================================================
// Constants
// ============================================================================

/// File name prefix of the daily log files written under `log_dir`
const LOG_FILE_PREFIX: &str = "piimap.log";

/// Offline caching engine for OpenPIIMap
#[derive(Parser)]
#[command(name = "piimap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file path (defaults to ~/.config/piimap/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Report the platform as offline (sync is skipped)
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the site and activate the configured version
    Install,

    /// Fetch a URL through the worker
    Fetch {
        /// Absolute or origin-relative URL
        url: String,

        /// Accept header to send (e.g. text/html for a navigation)
        #[arg(long)]
        accept: Option<String>,

        /// Print response headers to stderr
        #[arg(short = 'i', long)]
        include_headers: bool,
    },

    /// Show cache partitions, connectivity and the last sync time
    Status,

    /// Refresh the critical data endpoints
    Sync,

    /// Delete every cache partition
    Clear {
        /// Leave the caches empty instead of re-installing
        #[arg(long)]
        no_reinstall: bool,
    },

    /// Store a country record (JSON object with an `id`)
    CacheCountry {
        /// Country record as JSON
        record: String,
    },

    /// Store search results for a query
    CacheSearch {
        query: String,

        /// Results as JSON
        results: String,
    },

    /// Read a stored JSON record
    Item {
        /// Absolute or origin-relative key, e.g. /countries/DE
        key: String,
    },

    /// Post a raw protocol message, e.g. '{"type":"SYNC_DATA"}'
    Message {
        json: String,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the default config file
        #[arg(long)]
        save: bool,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; with `log_dir` set they are also written to daily
/// files there. The returned guard must live until exit to flush the file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    config
        .with_env_overrides()
        .context("Invalid configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let _guard = init_tracing(config.log_dir.as_deref());
    info!(version = config.version, origin = %config.origin, "piimap starting");

    let online = !cli.offline;
    let context = || commands::Context::new(config.clone(), online);

    match cli.command {
        Commands::Install => commands::install(&context()?).await,
        Commands::Fetch {
            url,
            accept,
            include_headers,
        } => commands::fetch(&context()?, &url, accept.as_deref(), include_headers).await,
        Commands::Status => commands::status(&context()?).await,
        Commands::Sync => commands::sync(&context()?).await,
        Commands::Clear { no_reinstall } => commands::clear(&context()?, !no_reinstall).await,
        Commands::CacheCountry { record } => commands::cache_country(&context()?, &record).await,
        Commands::CacheSearch { query, results } => {
            commands::cache_search(&context()?, query, &results).await
        }
        Commands::Item { key } => commands::item(&context()?, &key).await,
        Commands::Message { json } => commands::message(&context()?, &json).await,
        Commands::Config { save } => commands::show_config(&config, save),
    }
}
