//! Work distribution: index-range shards and the per-shard worker

use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::zim::{Archive, ContainerEntry, ContainerError};

use super::classify::classify;
use super::images::ImageProcessor;
use super::links::{build_article, normalize_title};
use super::progress::{ConversionProgress, ShardStats};
use super::redirect::{RedirectResolver, Resolution};
use super::types::{EntryKind, OutputRow, RedirectAlias, SkipReason};

/// Contiguous split of the entry index space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    shards: Vec<Range<u32>>,
}

impl ShardPlan {
    /// Split `[0, entry_count)` into `num_cores` contiguous ranges whose
    /// sizes differ by at most one. Empty ranges are left out.
    pub fn split(entry_count: u32, num_cores: usize) -> Self {
        let parts = num_cores.max(1) as u64;
        let total = u64::from(entry_count);
        let base = total / parts;
        let extra = total % parts;

        let mut shards = Vec::new();
        let mut start = 0u64;
        for i in 0..parts {
            let len = base + u64::from(i < extra);
            if len == 0 {
                continue;
            }
            // start + len <= entry_count, so both fit in u32
            shards.push(start as u32..(start + len) as u32);
            start += len;
        }
        Self { shards }
    }

    pub fn shards(&self) -> &[Range<u32>] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Everything a worker needs besides its range
#[derive(Clone)]
pub struct ShardWorker {
    pub archive_path: PathBuf,
    pub cluster_cache_size: usize,
    pub resolver: RedirectResolver,
    pub images: Arc<ImageProcessor>,
    pub cancel: Arc<AtomicBool>,
    pub progress: Arc<ConversionProgress>,
}

impl ShardWorker {
    /// Process one shard on the calling (blocking) thread.
    ///
    /// Opens a private archive handle, so only errors opening it are
    /// returned; per-entry failures are counted in the stats.
    pub fn run(
        &self,
        shard_id: usize,
        range: Range<u32>,
        tx: mpsc::Sender<OutputRow>,
    ) -> Result<ShardStats, ContainerError> {
        let archive = Archive::open_with_cache(&self.archive_path, self.cluster_cache_size)?;
        let mut stats = ShardStats::default();

        debug!("Shard {} started on entries {}..{}", shard_id, range.start, range.end);

        for index in range {
            if self.cancel.load(Ordering::Relaxed) {
                info!("Shard {} stopping at entry {}: cancelled", shard_id, index);
                stats.cancelled = true;
                break;
            }

            stats.entries_seen += 1;
            let row = match archive.entry_at(index) {
                Ok(entry) => {
                    let row = self.process_entry(&archive, &entry, &mut stats);
                    self.progress.entry_done(&entry.url);
                    row
                }
                Err(e) => {
                    warn!("Skipping entry {}: {}", index, e);
                    stats.skip(SkipReason::EntryRead);
                    self.progress.entry_done("");
                    None
                }
            };

            if let Some(row) = row {
                // blocks while the writer is behind
                if tx.blocking_send(row).is_err() {
                    warn!("Shard {} stopping: writer is gone", shard_id);
                    break;
                }
            }
        }

        debug!(
            "Shard {} finished: {} entries, {} articles, {} images, {} skipped, {} bytes read",
            shard_id,
            stats.entries_seen,
            stats.articles_emitted,
            stats.images_emitted,
            stats.skipped_total(),
            archive.bytes_read()
        );
        Ok(stats)
    }

    fn process_entry(
        &self,
        archive: &Archive,
        entry: &ContainerEntry,
        stats: &mut ShardStats,
    ) -> Option<OutputRow> {
        match classify(entry) {
            EntryKind::Ignorable => {
                stats.skip(SkipReason::Ignorable);
                None
            }
            EntryKind::Article | EntryKind::Redirect => match self.resolver.resolve(entry, archive) {
                Ok(Resolution::Terminal) => {
                    let payload = self.payload(archive, entry, stats)?;
                    stats.articles_emitted += 1;
                    Some(OutputRow::Article(build_article(entry, &payload)))
                }
                Ok(Resolution::Redirected { source, canonical, hops }) => {
                    debug!("{} -> {} ({} hops)", source, canonical, hops);
                    stats.redirects_resolved += 1;
                    Some(OutputRow::Redirect(RedirectAlias {
                        source_url: source,
                        title: normalize_title(&entry.title),
                        target_url: canonical,
                    }))
                }
                Ok(Resolution::Dropped(reason)) => {
                    warn!("Dropping redirect {}: {}", entry.url, reason);
                    stats.skip(reason);
                    None
                }
                Err(e) => {
                    warn!("Skipping {}: redirect chain unreadable: {}", entry.url, e);
                    stats.skip(SkipReason::EntryRead);
                    None
                }
            },
            EntryKind::Image => {
                if !self.images.mode().includes_images() {
                    stats.skip(SkipReason::ImagesDisabled);
                    return None;
                }
                let payload = self.payload(archive, entry, stats)?;
                let mimetype = entry.mimetype.as_deref().unwrap_or("application/octet-stream");
                match self.images.process(&entry.url, mimetype, payload) {
                    Ok(asset) => {
                        stats.images_emitted += 1;
                        Some(OutputRow::Image(asset))
                    }
                    Err(e) => {
                        warn!("Skipping image {}: {}", entry.url, e);
                        stats.skip(SkipReason::ImageProcessing);
                        None
                    }
                }
            }
        }
    }

    fn payload(&self, archive: &Archive, entry: &ContainerEntry, stats: &mut ShardStats) -> Option<Vec<u8>> {
        match archive.read_payload(entry) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Skipping {}: {}", entry.url, e);
                stats.skip(SkipReason::EntryRead);
                None
            }
        }
    }
}
