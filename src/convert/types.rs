//! Row types and error taxonomy for the conversion pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::zim::ContainerError;

use super::images::ImageProcessingError;
use super::writer::WriterError;

/// Classification of a container entry, decided once per entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Article,
    Image,
    Redirect,
    Ignorable,
}

/// An article ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArticle {
    /// Canonical, namespace-qualified url
    pub url: String,
    pub title: String,
    /// HTML content
    pub content: String,
    /// Referenced image urls, in first-reference order without duplicates
    pub image_refs: Vec<String>,
}

/// An image ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub url: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

impl ImageAsset {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Title under which a redirect makes its target findable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectAlias {
    /// Url of the redirect entry itself
    pub source_url: String,
    pub title: String,
    /// Canonical url of the article the chain ends at
    pub target_url: String,
}

/// Unit of work handed to the database writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRow {
    Article(ResolvedArticle),
    Image(ImageAsset),
    Redirect(RedirectAlias),
}

impl OutputRow {
    pub fn url(&self) -> &str {
        match self {
            OutputRow::Article(a) => &a.url,
            OutputRow::Image(i) => &i.url,
            OutputRow::Redirect(r) => &r.source_url,
        }
    }
}

/// Why an entry produced no row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Namespace or mimetype not consumed by the reader
    Ignorable,
    /// Image entry while images are disabled
    ImagesDisabled,
    /// Directory record or payload could not be read
    EntryRead,
    /// Redirect chain revisits a url
    RedirectCycle,
    /// Redirect chain longer than the hop limit
    RedirectDepthExceeded,
    /// Redirect chain ends in something other than an article
    RedirectTargetNotArticle,
    /// Image could not be processed
    ImageProcessing,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Ignorable => "ignorable",
            SkipReason::ImagesDisabled => "images_disabled",
            SkipReason::EntryRead => "entry_read",
            SkipReason::RedirectCycle => "redirect_cycle",
            SkipReason::RedirectDepthExceeded => "redirect_depth_exceeded",
            SkipReason::RedirectTargetNotArticle => "redirect_target_not_article",
            SkipReason::ImageProcessing => "image_processing",
        }
    }

    /// Whether the skip represents lost data rather than intentional filtering.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SkipReason::EntryRead | SkipReason::ImageProcessing
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Opening,
    Distributing,
    Writing,
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Opening => "opening",
            RunState::Distributing => "distributing",
            RunState::Writing => "writing",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        })
    }
}

/// Fatal errors of a conversion run
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Cannot open container: {0}")]
    ContainerOpen(#[source] ContainerError),

    #[error("Output database already exists: {0} (use --overwrite to replace it)")]
    OutputExists(String),

    #[error("Writer failed: {0}")]
    Writer(#[from] WriterError),

    #[error("Image processor setup failed: {0}")]
    ImageSetup(#[source] ImageProcessingError),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
