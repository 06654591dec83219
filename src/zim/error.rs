//! Container reader errors

use thiserror::Error;

/// Errors raised while opening or reading a ZIM container.
///
/// The `Open*` family is fatal for a conversion run; everything else is
/// scoped to a single entry or cluster and is counted and skipped.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Failed to open container: {0}")]
    OpenIo(#[source] std::io::Error),

    #[error("Container truncated: {0}")]
    Truncated(String),

    #[error("Unrecognized container header: {0}")]
    BadHeader(String),

    #[error("Unsupported container version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Entry {index} could not be read: {reason}")]
    EntryRead { index: u32, reason: String },

    #[error("Entry index {index} out of range (entry count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("Cluster {cluster} could not be read: {reason}")]
    Cluster { cluster: u32, reason: String },

    #[error("Unsupported cluster compression {0}")]
    UnsupportedCompression(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Whether this error prevents the container from being used at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ContainerError::OpenIo(_)
                | ContainerError::Truncated(_)
                | ContainerError::BadHeader(_)
                | ContainerError::UnsupportedVersion { .. }
        )
    }

    pub(crate) fn entry(index: u32, reason: impl Into<String>) -> Self {
        ContainerError::EntryRead {
            index,
            reason: reason.into(),
        }
    }

    pub(crate) fn cluster(cluster: u32, reason: impl Into<String>) -> Self {
        ContainerError::Cluster {
            cluster,
            reason: reason.into(),
        }
    }
}
