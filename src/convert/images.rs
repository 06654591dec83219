//! Image processing
//!
//! In `Original` mode image payloads are stored untouched. In `Compress` mode
//! each image becomes a grayscale JPEG no larger than the configured frame,
//! re-encoded at decreasing quality until it fits the byte ceiling.
//!
//! The compression itself sits behind [`ImageTransform`] so it can run either
//! in-process ([`BuiltinTransform`]) or through an ImageMagick-compatible
//! command line tool ([`ExternalTransform`]).

use std::io::Write;
use std::process::{Command, Stdio};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GrayImage;
use thiserror::Error;
use tracing::debug;

use crate::config::{ImageBackend, ImageConfig, ImageMode};

use super::types::ImageAsset;

/// Mimetype of every compressed image
pub const COMPRESSED_MIMETYPE: &str = "image/jpeg";

/// Image processing errors
#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Image tool '{program}' is not available: {reason}")]
    ToolUnavailable { program: String, reason: String },

    #[error("Image tool failed: {0}")]
    ToolFailed(String),

    #[error("Unsupported image type: {0}")]
    Unsupported(String),

    #[error("Compressed image is {size} bytes at minimum quality, over the {target} byte ceiling")]
    OverBudget { size: usize, target: usize },
}

/// Bounds applied in `Compress` mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub target_bytes: usize,
    pub start_quality: u8,
    pub min_quality: u8,
    pub quality_step: u8,
}

impl CompressionLimits {
    pub fn from_config(config: &ImageConfig) -> Self {
        Self {
            max_width: config.max_width,
            max_height: config.max_height,
            target_bytes: config.target_bytes,
            start_quality: config.start_quality,
            min_quality: config.min_quality,
            quality_step: config.quality_step,
        }
    }

    /// JPEG qualities to try, highest first, always ending at `min_quality`.
    pub fn qualities(&self) -> Vec<u8> {
        let floor = self.min_quality.min(self.start_quality);
        let step = self.quality_step.max(1);
        let mut out = Vec::new();
        let mut q = self.start_quality;
        loop {
            out.push(q);
            if q <= floor {
                break;
            }
            q = q.saturating_sub(step).max(floor);
        }
        out
    }

    /// Output dimensions for a `width`×`height` source: scaled down to fit
    /// the frame with the aspect ratio kept, never scaled up.
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if width <= self.max_width && height <= self.max_height {
            return (width, height);
        }
        let scale = f64::min(
            f64::from(self.max_width) / f64::from(width),
            f64::from(self.max_height) / f64::from(height),
        );
        let w = ((f64::from(width) * scale).round() as u32).clamp(1, self.max_width);
        let h = ((f64::from(height) * scale).round() as u32).clamp(1, self.max_height);
        (w, h)
    }

    /// Encode at decreasing quality until the output fits `target_bytes`.
    pub fn search<F>(&self, mut encode: F) -> Result<Vec<u8>, ImageProcessingError>
    where
        F: FnMut(u8) -> Result<Vec<u8>, ImageProcessingError>,
    {
        let mut last_size = 0;
        for quality in self.qualities() {
            let out = encode(quality)?;
            if out.len() <= self.target_bytes {
                debug!("Encoded image at quality {} ({} bytes)", quality, out.len());
                return Ok(out);
            }
            last_size = out.len();
        }
        Err(ImageProcessingError::OverBudget {
            size: last_size,
            target: self.target_bytes,
        })
    }
}

impl Default for CompressionLimits {
    fn default() -> Self {
        Self::from_config(&ImageConfig::default())
    }
}

/// Something that turns image bytes into a grayscale JPEG within limits
pub trait ImageTransform: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    fn compress(&self, data: &[u8], limits: &CompressionLimits) -> Result<Vec<u8>, ImageProcessingError>;
}

/// In-process transform using the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTransform;

impl BuiltinTransform {
    fn prepare(data: &[u8], limits: &CompressionLimits) -> Result<GrayImage, ImageProcessingError> {
        let img = image::load_from_memory(data).map_err(|e| ImageProcessingError::Decode(e.to_string()))?;
        let gray = img.to_luma8();
        let (width, height) = limits.fit(gray.width(), gray.height());
        if (width, height) == gray.dimensions() {
            Ok(gray)
        } else {
            Ok(image::imageops::resize(&gray, width, height, FilterType::Triangle))
        }
    }
}

impl ImageTransform for BuiltinTransform {
    fn name(&self) -> &str {
        "builtin"
    }

    fn compress(&self, data: &[u8], limits: &CompressionLimits) -> Result<Vec<u8>, ImageProcessingError> {
        let gray = Self::prepare(data, limits)?;
        limits.search(|quality| {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode_image(&gray)
                .map_err(|e| ImageProcessingError::Encode(e.to_string()))?;
            Ok(out)
        })
    }
}

/// Transform delegated to an ImageMagick-compatible `convert` program
#[derive(Debug, Clone)]
pub struct ExternalTransform {
    program: String,
}

impl ExternalTransform {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check that the program can be started.
    pub fn probe(&self) -> Result<(), ImageProcessingError> {
        Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, e: std::io::Error) -> ImageProcessingError {
        ImageProcessingError::ToolUnavailable {
            program: self.program.clone(),
            reason: e.to_string(),
        }
    }

    fn run(&self, data: &[u8], limits: &CompressionLimits, quality: u8) -> Result<Vec<u8>, ImageProcessingError> {
        let geometry = format!("{}x{}>", limits.max_width, limits.max_height);
        let quality = quality.to_string();
        let mut child = Command::new(&self.program)
            .args(["-", "-colorspace", "Gray", "-resize", geometry.as_str(), "-quality", quality.as_str(), "jpg:-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.unavailable(e))?;

        // stdin is fed from its own thread while stdout is drained
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ImageProcessingError::ToolFailed("stdin not captured".to_string()))?;
        let input = data.to_vec();
        let feeder = std::thread::spawn(move || stdin.write_all(&input));

        let output = child
            .wait_with_output()
            .map_err(|e| ImageProcessingError::ToolFailed(e.to_string()))?;
        let fed = feeder
            .join()
            .map_err(|_| ImageProcessingError::ToolFailed("stdin writer panicked".to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImageProcessingError::ToolFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = fed {
            return Err(ImageProcessingError::ToolFailed(format!("writing input: {}", e)));
        }
        if output.stdout.is_empty() {
            return Err(ImageProcessingError::ToolFailed(format!("{} produced no output", self.program)));
        }
        Ok(output.stdout)
    }
}

impl ImageTransform for ExternalTransform {
    fn name(&self) -> &str {
        &self.program
    }

    fn compress(&self, data: &[u8], limits: &CompressionLimits) -> Result<Vec<u8>, ImageProcessingError> {
        limits.search(|quality| self.run(data, limits, quality))
    }
}

/// Applies the configured image mode to image entries
pub struct ImageProcessor {
    mode: ImageMode,
    limits: CompressionLimits,
    transform: Box<dyn ImageTransform>,
}

impl ImageProcessor {
    /// Build a processor from configuration. The external tool is probed up
    /// front when it will be needed.
    pub fn from_config(config: &ImageConfig) -> Result<Self, ImageProcessingError> {
        let transform: Box<dyn ImageTransform> = match config.backend {
            ImageBackend::Builtin => Box::new(BuiltinTransform),
            ImageBackend::External => {
                let external = ExternalTransform::new(config.external_program.clone());
                if config.mode == ImageMode::Compress {
                    external.probe()?;
                }
                Box::new(external)
            }
        };
        Ok(Self {
            mode: config.mode,
            limits: CompressionLimits::from_config(config),
            transform,
        })
    }

    pub fn with_transform(mode: ImageMode, limits: CompressionLimits, transform: Box<dyn ImageTransform>) -> Self {
        Self {
            mode,
            limits,
            transform,
        }
    }

    pub fn mode(&self) -> ImageMode {
        self.mode
    }

    pub fn limits(&self) -> &CompressionLimits {
        &self.limits
    }

    /// Turn an image entry into a storable asset.
    ///
    /// Callers check [`ImageMode::includes_images`] first; outside `Compress`
    /// mode the payload is passed through.
    pub fn process(&self, url: &str, mimetype: &str, data: Vec<u8>) -> Result<ImageAsset, ImageProcessingError> {
        match self.mode {
            ImageMode::Skip | ImageMode::Original => Ok(ImageAsset {
                url: url.to_string(),
                mimetype: mimetype.to_string(),
                data,
            }),
            ImageMode::Compress => {
                if mimetype.starts_with("image/svg") {
                    return Err(ImageProcessingError::Unsupported(mimetype.to_string()));
                }
                let compressed = self.transform.compress(&data, &self.limits)?;
                debug!(
                    "Compressed {} with {}: {} -> {} bytes",
                    url,
                    self.transform.name(),
                    data.len(),
                    compressed.len()
                );
                Ok(ImageAsset {
                    url: url.to_string(),
                    mimetype: COMPRESSED_MIMETYPE.to_string(),
                    data: compressed,
                })
            }
        }
    }
}

impl std::fmt::Debug for ImageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcessor")
            .field("mode", &self.mode)
            .field("limits", &self.limits)
            .field("transform", &self.transform.name())
            .finish()
    }
}
