//! zimdb: convert ZIM archives into SQLite databases

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zimdb::config::{Config, LogFormat};

#[derive(Parser)]
#[command(name = "zimdb")]
#[command(about = "Convert ZIM archives into SQLite databases")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a ZIM archive into a SQLite database
    Convert {
        /// Path to the ZIM file
        input: PathBuf,

        /// Path of the database to create
        output: PathBuf,

        /// Number of parallel workers
        #[arg(short = 'n', long)]
        num_cores: Option<usize>,

        /// Store images as found in the archive
        #[arg(long)]
        include_images: bool,

        /// Store grayscale, resized, size-capped JPEG images (implies --include-images)
        #[arg(long)]
        compress_images: bool,

        /// Rows per write transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Replace the output database if it exists
        #[arg(long)]
        overwrite: bool,

        /// Quiet mode (no progress output)
        #[arg(short, long)]
        quiet: bool,

        /// Write a JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show information about a ZIM archive
    Info {
        /// Path to the ZIM file
        input: PathBuf,

        /// Walk every entry and count kinds and namespaces
        #[arg(long)]
        scan: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    // RUST_LOG wins over the configured level and -v
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(config.logging.level.raised_by(verbose).as_str()),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Convert {
            input,
            output,
            num_cores,
            include_images,
            compress_images,
            batch_size,
            overwrite,
            quiet,
            report,
        } => {
            let options = commands::convert::ConvertOptions {
                input,
                output,
                num_cores,
                include_images,
                compress_images,
                batch_size,
                overwrite,
                quiet,
                report,
            };
            let code = commands::convert::convert(config, options).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Info { input, scan } => commands::info::show_info(input, scan),
        Commands::Init { path } => commands::init::init_config(path),
    }
}
