//! ZIM to SQLite conversion
//!
//! ```text
//!                   ┌──────────── ShardPlan::split ────────────┐
//!                   ▼                    ▼                     ▼
//!             ShardWorker 0        ShardWorker 1   ...   ShardWorker n-1
//!             (own Archive)        (own Archive)         (own Archive)
//!          classify → resolve → build_article / ImageProcessor
//!                   │                    │                     │
//!                   └──────── bounded mpsc<OutputRow> ─────────┘
//!                                        ▼
//!                                 DatabaseWriter
//!                       batched INSERT OR IGNORE transactions
//! ```
//!
//! Workers run on the blocking pool, one per shard. The writer is the only
//! owner of the output connection. A shared cancel flag stops workers
//! between entries; whatever reached the writer is still committed.

mod classify;
mod coordinator;
mod images;
mod links;
mod progress;
mod redirect;
mod shard;
mod types;
mod writer;

pub use classify::classify;
pub use coordinator::ConversionCoordinator;
pub use images::{
    BuiltinTransform, CompressionLimits, ExternalTransform, ImageProcessingError, ImageProcessor,
    ImageTransform, COMPRESSED_MIMETYPE,
};
pub use links::{build_article, image_refs, normalize_title, resolve_link};
pub use progress::{ConversionProgress, ConversionReport, ShardStats};
pub use redirect::{RedirectResolver, Resolution};
pub use shard::{ShardPlan, ShardWorker};
pub use types::{
    ConvertError, EntryKind, ImageAsset, OutputRow, RedirectAlias, ResolvedArticle, RunState,
    SkipReason,
};
pub use writer::{DatabaseWriter, RunMetadata, WriterError, WriterStats};
