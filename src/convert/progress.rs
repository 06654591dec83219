//! Progress tracking and run reporting

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::config::ImageMode;

use super::types::{RunState, SkipReason};
use super::writer::WriterStats;

/// Counters local to one shard worker, merged by the distributor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub entries_seen: u64,
    pub articles_emitted: u64,
    pub images_emitted: u64,
    pub redirects_resolved: u64,
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Stopped by the cancel flag before the end of its range
    #[serde(default)]
    pub cancelled: bool,
}

impl ShardStats {
    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn merge(&mut self, other: &ShardStats) {
        self.entries_seen += other.entries_seen;
        self.articles_emitted += other.articles_emitted;
        self.images_emitted += other.images_emitted;
        self.redirects_resolved += other.redirects_resolved;
        for (reason, count) in &other.skipped {
            *self.skipped.entry(*reason).or_default() += count;
        }
        self.cancelled |= other.cancelled;
    }
}

/// Progress bar over the container's entries, shared by all workers
pub struct ConversionProgress {
    /// Progress bar (None if running in quiet mode)
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
}

impl ConversionProgress {
    pub fn new(total_entries: u64, quiet: bool) -> Self {
        let progress_bar = if !quiet {
            let pb = ProgressBar::new(total_entries);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        Self {
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// Hidden progress, for tests and quiet runs
    pub fn hidden() -> Self {
        Self::new(0, true)
    }

    /// Advance by one entry, showing the url last handled.
    pub fn entry_done(&self, url: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(1);
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                pb.position() as f64 / elapsed
            } else {
                0.0
            };
            pb.set_message(format!("{:.0} entries/s | {}", rate, truncate_str(url, 30)));
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn finish(&self, articles: u64, images: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_with_message(format!("Done! {} articles, {} images", articles, images));
        }
    }

    pub fn abandon(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.abandon_with_message("Interrupted");
        }
    }
}

/// Truncate to at most `max_chars` characters, marking the cut with "...".
fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Summary of a finished (or interrupted) conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    pub source_file: String,
    pub output_file: String,
    pub state: RunState,
    pub num_cores: usize,
    pub image_mode: ImageMode,
    pub entries_total: u64,
    pub entries_processed: u64,
    pub articles_written: u64,
    pub images_written: u64,
    pub redirects_resolved: u64,
    #[serde(default)]
    pub redirects_written: u64,
    pub duplicates_ignored: u64,
    pub batches_committed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dangling_image_refs: Option<u64>,
    pub skipped: BTreeMap<SkipReason, u64>,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub entries_per_second: f64,
}

impl ConversionReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_file: String,
        output_file: String,
        state: RunState,
        num_cores: usize,
        image_mode: ImageMode,
        entries_total: u64,
        shards: &ShardStats,
        writer: &WriterStats,
        started_at: DateTime<Utc>,
        elapsed_seconds: f64,
    ) -> Self {
        let entries_per_second = if elapsed_seconds > 0.0 {
            shards.entries_seen as f64 / elapsed_seconds
        } else {
            0.0
        };
        Self {
            source_file,
            output_file,
            state,
            num_cores,
            image_mode,
            entries_total,
            entries_processed: shards.entries_seen,
            articles_written: writer.articles_written,
            images_written: writer.images_written,
            redirects_resolved: shards.redirects_resolved,
            redirects_written: writer.redirects_written,
            duplicates_ignored: writer.duplicates_ignored,
            batches_committed: writer.batches_committed,
            dangling_image_refs: writer.dangling_image_refs,
            skipped: shards.skipped.clone(),
            started_at,
            elapsed_seconds,
            entries_per_second,
        }
    }

    pub fn skipped(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Write the report as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\nConversion Summary");
        println!("==================");
        println!("Source:              {}", self.source_file);
        println!("Output:              {}", self.output_file);
        println!("State:               {}", self.state);
        println!("Workers:             {}", self.num_cores);
        println!("Images:              {}", self.image_mode);
        println!("Entries processed:   {}/{}", self.entries_processed, self.entries_total);
        println!("Articles written:    {}", self.articles_written);
        println!("Images written:      {}", self.images_written);
        println!("Redirects resolved:  {}", self.redirects_resolved);
        println!("Redirect titles:     {}", self.redirects_written);
        println!("Duplicates ignored:  {}", self.duplicates_ignored);
        if let Some(dangling) = self.dangling_image_refs {
            println!("Missing images:      {}", dangling);
        }
        println!("Skipped:             {}", self.skipped_total());
        for (reason, count) in &self.skipped {
            println!("  {:<26} {}", reason.as_str(), count);
        }
        println!("Elapsed time:        {:.1}s", self.elapsed_seconds);
        println!("Processing rate:     {:.1} entries/s", self.entries_per_second);
    }
}
