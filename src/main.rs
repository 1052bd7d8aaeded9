//! # Stockwatch CLI (`stockwatch`)
//!
//! ## Usage
//!
//! ```bash
//! stockwatch --config ./config/stockwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stockwatch ingest <FILE>` | Process an uploaded xlsx/CSV stock sheet |
//! | `stockwatch show` | Print the report for the last successful upload |
//! | `stockwatch export` | Write the report as JSON |
//! | `stockwatch archive latest` | Name or download the most recent archived upload |
//! | `stockwatch archive restore` | Rebuild state from the most recent archived upload |
//! | `stockwatch reference` | Show the loaded reference tables |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stockwatch::{archive, config, export, ingest, logging, reference, show};

/// Stockwatch CLI: weekly retail stock-level reporting.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/stockwatch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "stockwatch",
    about = "Stockwatch: weekly retail stock-level reporting",
    version,
    long_about = "Stockwatch reads a weekly Retailer/SKU/Store/Quantity spreadsheet, \
    normalizes it against reference tables, buckets stock into out-of-stock, critical, \
    and in-stock levels, and reports out-of-stock situations and rates per retailer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/stockwatch.toml`. A missing file at the default
    /// path means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_CONFIG: &str = "./config/stockwatch.toml";

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Process an uploaded stock sheet.
    ///
    /// Validates the columns, normalizes SKUs and stores, aggregates, and
    /// replaces the saved state. The original file is then archived. A
    /// rejected file changes nothing.
    Ingest {
        /// Path to the `.xlsx` or `.csv` file.
        file: PathBuf,
    },

    /// Print the report for the last successful upload.
    Show,

    /// Export the report as JSON.
    Export {
        /// Output file path. Prints to stdout if omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Inspect or restore from the upload archive.
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
    },

    /// Show the loaded reference tables.
    Reference,
}

/// Archive subcommands.
#[derive(Subcommand)]
enum ArchiveAction {
    /// Name the most recent archived upload.
    Latest {
        /// Also download it to this path.
        #[arg(long)]
        download: Option<PathBuf>,
    },
    /// Run the pipeline on the most recent archived upload.
    ///
    /// The restored file is not archived again.
    Restore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.config == std::path::Path::new(DEFAULT_CONFIG) && !cli.config.exists() {
        config::Config::default()
    } else {
        config::load_config(&cli.config)?
    };
    logging::init_logging(cfg.logging.json);

    match cli.command {
        Commands::Ingest { file } => {
            ingest::run_ingest(&cfg, &file).await?;
        }
        Commands::Show => {
            show::run_show(&cfg)?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref())?;
        }
        Commands::Archive { action } => match action {
            ArchiveAction::Latest { download } => {
                archive::run_archive_latest(&cfg, download.as_deref()).await?;
            }
            ArchiveAction::Restore => {
                ingest::run_restore(&cfg).await?;
            }
        },
        Commands::Reference => {
            reference::print_reference(&cfg)?;
        }
    }

    Ok(())
}
