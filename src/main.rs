//! # Movie Catalog CLI (`movies`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `movies init` | Create the movie collection indexes |
//! | `movies serve` | Start the HTTP API |
//! | `movies upload <file>` | Validate and ingest a CSV file |
//! | `movies fetch` | Run a filtered, paginated query |
//! | `movies indexes` | List indexes on the movie collection |
//!
//! ## Examples
//!
//! ```bash
//! movies --config ./config/movies.toml serve
//! movies upload ./data/movies.csv
//! movies fetch --filter '{"languages":"Français"}' --page 1 --size 10
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use movie_catalog::logging::{init_logging, LogOutput};
use movie_catalog::{config, indexes, ingest, query, server};

/// Movie catalog: CSV ingestion and paginated movie queries.
///
/// Every setting has a default and can be overridden from the environment,
/// so `--config` is optional.
#[derive(Parser)]
#[command(name = "movies", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the movie collection indexes if they are missing.
    ///
    /// Safe to run repeatedly and alongside a running server.
    Init,

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` (or `MOVIES_BIND`) and bootstraps indexes
    /// on start.
    Serve,

    /// Ingest a CSV file through the same validation as the upload endpoint.
    Upload {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Query movies and print the response as JSON.
    Fetch {
        /// Filter parameters as a JSON object, e.g. `{"languages":"English"}`.
        #[arg(long)]
        filter: Option<String>,

        /// Sort parameters as a JSON object, e.g. `{"vote_average":-1}`.
        #[arg(long)]
        sort: Option<String>,

        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: i64,

        /// Page size.
        #[arg(long, default_value_t = 20)]
        size: i64,
    },

    /// List indexes on the movie collection.
    Indexes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let output = match cli.command {
        Commands::Serve => LogOutput::Stdout,
        _ => LogOutput::Stderr,
    };
    let _log_guard = init_logging(output);

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            indexes::run_init(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Upload { path } => {
            ingest::run_upload(&cfg, &path).await?;
        }
        Commands::Fetch {
            filter,
            sort,
            page,
            size,
        } => {
            query::run_fetch(&cfg, filter.as_deref(), sort.as_deref(), page, size).await?;
        }
        Commands::Indexes => {
            indexes::run_list(&cfg).await?;
        }
    }

    Ok(())
}
