//! ZIM container reader
//!
//! Read-only access to the archive format used by offline encyclopedia
//! distributions (Kiwix). Entries are addressed by their position in the
//! url-ordered directory; payloads live in clusters that may be stored
//! uncompressed or compressed with zstd, xz or bzip2.
//!
//! ```text
//! ┌────────┬───────────┬──────────┬────────────┬──────────┬──────────────┬──────────┐
//! │ header │ mime list │ url ptrs │ title ptrs │ dirents  │ cluster ptrs │ clusters │
//! └────────┴───────────┴──────────┴────────────┴──────────┴──────────────┴──────────┘
//! ```

pub mod archive;
#[cfg(any(test, feature = "test-util"))]
pub mod builder;
pub mod cluster;
pub mod dirent;
pub mod error;
pub mod header;

pub use archive::{Archive, EntryLookup, DEFAULT_CLUSTER_CACHE};
#[cfg(any(test, feature = "test-util"))]
pub use builder::ZimBuilder;
pub use cluster::Compression;
pub use dirent::{ContainerEntry, EntryBody};
pub use error::ContainerError;
pub use header::Header;
