//! zimdb: convert ZIM archives into SQLite databases
//!
//! - ZIM container reading with bzip2/xz/zstd clusters (`zim`)
//! - Namespace classification and redirect resolution
//! - Optional image inclusion with grayscale JPEG compression
//! - Parallel shard workers feeding a single batched SQLite writer

pub mod config;
pub mod convert;
pub mod zim;

pub use config::Config;
pub use convert::{ConversionCoordinator, ConversionReport, ConvertError, RunState};
