//! Conversion coordinator that drives a run from container to database

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{Config, TOOL_VERSION};
use crate::zim::Archive;

use super::images::ImageProcessor;
use super::progress::{ConversionProgress, ConversionReport, ShardStats};
use super::redirect::RedirectResolver;
use super::shard::{ShardPlan, ShardWorker};
use super::types::{ConvertError, OutputRow, RunState};
use super::writer::{DatabaseWriter, RunMetadata, WriterError};

/// Coordinator for one container → database conversion
pub struct ConversionCoordinator {
    input: PathBuf,
    output: PathBuf,
    config: Config,
    overwrite: bool,
    quiet: bool,
    handle_signals: bool,
    cancel: Arc<AtomicBool>,
    state: RunState,
}

impl ConversionCoordinator {
    /// Create a coordinator; the container is not touched until [`run`](Self::run).
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>, config: Config) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            config,
            overwrite: false,
            quiet: false,
            handle_signals: false,
            cancel: Arc::new(AtomicBool::new(false)),
            state: RunState::Opening,
        }
    }

    /// Replace an existing output file
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set quiet mode (no progress output)
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Cancel the run on Ctrl-C
    pub fn with_signal_handler(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Use an externally owned cancel flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        info!("Conversion state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the conversion.
    ///
    /// Returns a report for completed and interrupted runs alike; check
    /// [`ConversionReport::state`]. Fatal failures come back as errors.
    pub async fn run(mut self) -> Result<ConversionReport, ConvertError> {
        let started_at = Utc::now();
        let convert = self.config.convert.clone();
        let image_mode = self.config.images.mode;

        // Opening: nothing is written until the container is known to be good
        let archive = Archive::open_with_cache(&self.input, convert.cluster_cache_size)
            .map_err(ConvertError::ContainerOpen)?;
        let entry_count = archive.entry_count();
        let source_file = archive.source_name().to_string();
        info!(
            "Opened {} (format {}.{}, {} entries, {} clusters)",
            source_file,
            archive.header().major_version,
            archive.header().minor_version,
            entry_count,
            archive.header().cluster_count
        );
        drop(archive);

        let images = Arc::new(ImageProcessor::from_config(&self.config.images).map_err(ConvertError::ImageSetup)?);
        self.prepare_output()?;

        let writer = DatabaseWriter::open(&self.output, convert.batch_size, image_mode.includes_images())?;
        let progress = Arc::new(ConversionProgress::new(u64::from(entry_count), self.quiet));
        let (tx, rx) = mpsc::channel::<OutputRow>(convert.channel_capacity);

        let writer_cancel = self.cancel.clone();
        let writer_task = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            let mut rx = rx;
            match writer.drain(&mut rx) {
                Ok(()) => Ok(writer),
                Err(e) => {
                    // stop the workers; they see the closed channel too
                    writer_cancel.store(true, Ordering::Relaxed);
                    Err(e)
                }
            }
        });

        let signal_task = self.handle_signals.then(|| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing in-flight entries");
                    cancel.store(true, Ordering::Relaxed);
                }
            })
        });

        // Distributing
        self.transition(RunState::Distributing);
        let plan = ShardPlan::split(entry_count, convert.num_cores);
        info!(
            "Distributing {} entries over {} shards (images: {})",
            entry_count,
            plan.len(),
            image_mode
        );

        let worker = ShardWorker {
            archive_path: self.input.clone(),
            cluster_cache_size: convert.cluster_cache_size,
            resolver: RedirectResolver::new(convert.max_redirect_hops),
            images,
            cancel: self.cancel.clone(),
            progress: progress.clone(),
        };

        let mut workers = JoinSet::new();
        for (shard_id, range) in plan.shards().iter().cloned().enumerate() {
            let worker = worker.clone();
            let tx = tx.clone();
            workers.spawn_blocking(move || worker.run(shard_id, range, tx));
        }
        drop(tx);

        let mut totals = ShardStats::default();
        let mut worker_error: Option<ConvertError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(stats)) => totals.merge(&stats),
                Ok(Err(e)) => {
                    error!("Worker failed: {}", e);
                    self.cancel.store(true, Ordering::Relaxed);
                    worker_error.get_or_insert(ConvertError::Worker(e.to_string()));
                }
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    self.cancel.store(true, Ordering::Relaxed);
                    worker_error.get_or_insert(ConvertError::Worker(e.to_string()));
                }
            }
        }

        // Writing: all senders are gone, the writer drains and commits
        self.transition(RunState::Writing);
        let drained: Result<DatabaseWriter, WriterError> = writer_task
            .await
            .map_err(|e| ConvertError::Worker(format!("writer task failed: {}", e)))?;

        if let Some(task) = signal_task {
            task.abort();
        }

        let writer = match drained {
            Ok(writer) => writer,
            Err(e) => {
                error!("Writer failed: {}", e);
                self.transition(RunState::Aborted);
                progress.abandon();
                return Err(e.into());
            }
        };

        if let Some(e) = worker_error {
            self.transition(RunState::Aborted);
            progress.abandon();
            writer.abort()?;
            return Err(e);
        }

        // a cancel raised after every shard finished leaves the run complete
        let interrupted = totals.cancelled;
        let writer_stats = if interrupted {
            let stats = writer.abort()?;
            self.transition(RunState::Aborted);
            progress.abandon();
            stats
        } else {
            let metadata = RunMetadata {
                source_file: source_file.clone(),
                tool_version: TOOL_VERSION.to_string(),
                generated_at: Utc::now(),
            };
            let stats = writer.finish(&metadata)?;
            self.transition(RunState::Completed);
            progress.finish(stats.articles_written, stats.images_written);
            stats
        };

        let report = ConversionReport::new(
            source_file,
            self.output.display().to_string(),
            self.state,
            convert.num_cores,
            image_mode,
            u64::from(entry_count),
            &totals,
            &writer_stats,
            started_at,
            progress.elapsed_seconds(),
        );

        info!(
            "Conversion {}: {} articles, {} images, {} skipped",
            report.state,
            report.articles_written,
            report.images_written,
            report.skipped_total()
        );
        Ok(report)
    }

    /// Refuse or clear an existing output file.
    fn prepare_output(&self) -> Result<(), ConvertError> {
        if !self.output.exists() {
            return Ok(());
        }
        if !self.overwrite {
            return Err(ConvertError::OutputExists(self.output.display().to_string()));
        }

        warn!("Removing existing output {}", self.output.display());
        std::fs::remove_file(&self.output)?;
        let journal = PathBuf::from(format!("{}-journal", self.output.display()));
        if journal.exists() {
            std::fs::remove_file(&journal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::ZimBuilder;
    use tempfile::TempDir;

    fn small_zim(dir: &Path) -> PathBuf {
        let path = dir.join("small.zim");
        ZimBuilder::new()
            .article("A/One", "One", "<p>one</p>")
            .article("A/Two", "Two", "<p>two</p>")
            .redirect("A/Uno", "Uno", "A/One")
            .write(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_run_completes() {
        let dir = TempDir::new().unwrap();
        let zim = small_zim(dir.path());
        let out = dir.path().join("out.db");

        let report = ConversionCoordinator::new(&zim, &out, Config::default())
            .with_quiet(true)
            .run()
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.articles_written, 2);
        assert_eq!(report.redirects_resolved, 1);
        assert_eq!(report.entries_processed, 3);
    }

    #[tokio::test]
    async fn test_existing_output_is_refused() {
        let dir = TempDir::new().unwrap();
        let zim = small_zim(dir.path());
        let out = dir.path().join("out.db");
        std::fs::write(&out, b"keep me").unwrap();

        let err = ConversionCoordinator::new(&zim, &out, Config::default())
            .with_quiet(true)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::OutputExists(_)));
        assert_eq!(std::fs::read(&out).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_output() {
        let dir = TempDir::new().unwrap();
        let zim = small_zim(dir.path());
        let out = dir.path().join("out.db");
        std::fs::write(&out, b"stale").unwrap();

        let report = ConversionCoordinator::new(&zim, &out, Config::default())
            .with_quiet(true)
            .with_overwrite(true)
            .run()
            .await
            .unwrap();
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_bad_container_leaves_existing_output_alone() {
        let dir = TempDir::new().unwrap();
        let zim = dir.path().join("bad.zim");
        std::fs::write(&zim, b"definitely not a zim file").unwrap();
        let out = dir.path().join("out.db");
        std::fs::write(&out, b"keep me").unwrap();

        let err = ConversionCoordinator::new(&zim, &out, Config::default())
            .with_quiet(true)
            .with_overwrite(true)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::ContainerOpen(_)));
        assert_eq!(std::fs::read(&out).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_aborts() {
        let dir = TempDir::new().unwrap();
        let zim = small_zim(dir.path());
        let out = dir.path().join("out.db");

        let coordinator = ConversionCoordinator::new(&zim, &out, Config::default()).with_quiet(true);
        coordinator.cancel_flag().store(true, Ordering::Relaxed);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.entries_processed, 0);
        assert!(out.exists());
    }
}
