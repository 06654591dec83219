//! Image inclusion and compression configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do with image entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Leave images out of the output
    Skip,
    /// Store the original bytes
    Original,
    /// Store a grayscale, resized, size-capped JPEG
    Compress,
}

impl ImageMode {
    /// Resolve the two CLI switches; compression wins when both are set.
    pub fn from_flags(include_originals: bool, compress: bool) -> Self {
        match (include_originals, compress) {
            (_, true) => ImageMode::Compress,
            (true, false) => ImageMode::Original,
            (false, false) => ImageMode::Skip,
        }
    }

    pub fn includes_images(self) -> bool {
        !matches!(self, ImageMode::Skip)
    }
}

impl fmt::Display for ImageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageMode::Skip => "skip",
            ImageMode::Original => "original",
            ImageMode::Compress => "compress",
        })
    }
}

/// Which implementation performs compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    /// In-process decoding and encoding
    Builtin,
    /// ImageMagick-compatible command line tool
    External,
}

/// Image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub mode: ImageMode,
    pub backend: ImageBackend,
    /// Program invoked by the external backend
    pub external_program: String,
    /// Maximum output width in pixels
    pub max_width: u32,
    /// Maximum output height in pixels
    pub max_height: u32,
    /// Byte ceiling for compressed images
    pub target_bytes: usize,
    /// First JPEG quality tried
    pub start_quality: u8,
    /// Lowest JPEG quality tried
    pub min_quality: u8,
    /// Quality decrement between attempts
    pub quality_step: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            mode: ImageMode::Skip,
            backend: ImageBackend::Builtin,
            external_program: "convert".to_string(),
            max_width: 800,
            max_height: 600,
            target_bytes: 50_000,
            start_quality: 85,
            min_quality: 10,
            quality_step: 10,
        }
    }
}
