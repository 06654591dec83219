use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};
use zimdb::config::{Config, ImageMode};
use zimdb::convert::ConversionCoordinator;

/// Exit status of an interrupted conversion
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Command line options of `zimdb convert`
pub struct ConvertOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub num_cores: Option<usize>,
    pub include_images: bool,
    pub compress_images: bool,
    pub batch_size: Option<usize>,
    pub overwrite: bool,
    pub quiet: bool,
    pub report: Option<PathBuf>,
}

/// Run a conversion and return the process exit code.
pub async fn convert(mut config: Config, options: ConvertOptions) -> Result<i32> {
    if let Some(num_cores) = options.num_cores {
        config.convert.num_cores = num_cores;
    }
    if let Some(batch_size) = options.batch_size {
        config.convert.batch_size = batch_size;
    }
    if options.include_images || options.compress_images {
        config.images.mode = ImageMode::from_flags(options.include_images, options.compress_images);
    }
    config.validate()?;

    info!(
        "Converting {} -> {} ({} workers, images: {})",
        options.input.display(),
        options.output.display(),
        config.convert.num_cores,
        config.images.mode
    );

    let report = ConversionCoordinator::new(&options.input, &options.output, config)
        .with_overwrite(options.overwrite)
        .with_quiet(options.quiet)
        .with_signal_handler(true)
        .run()
        .await
        .with_context(|| format!("Failed to convert {}", options.input.display()))?;

    if !options.quiet {
        report.print_summary();
    }

    if let Some(path) = &options.report {
        report.save(path)?;
        info!("Report written to {}", path.display());
    }

    if report.is_complete() {
        Ok(0)
    } else {
        warn!("Conversion interrupted; {} has no metadata row", options.output.display());
        Ok(INTERRUPTED_EXIT_CODE)
    }
}
