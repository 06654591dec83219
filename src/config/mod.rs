//! Configuration for zimdb

mod convert;
mod images;
mod logging;

pub use convert::ConvertConfig;
pub use images::{ImageBackend, ImageConfig, ImageMode};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tool version recorded in every output database
pub const TOOL_VERSION: &str = concat!("zimdb ", env!("CARGO_PKG_VERSION"));

/// Upper bound on workers; beyond this the single writer is the bottleneck
pub const MAX_CORES: usize = 256;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Conversion pipeline configuration
    #[serde(default)]
    pub convert: ConvertConfig,
    /// Image handling configuration
    #[serde(default)]
    pub images: ImageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every validation error and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Conversion
        if self.convert.num_cores == 0 {
            errors.push("num_cores must be at least 1".to_string());
        }
        if self.convert.num_cores > MAX_CORES {
            errors.push(format!("num_cores must be <= {}", MAX_CORES));
        }
        if self.convert.batch_size == 0 {
            errors.push("batch_size must be positive".to_string());
        }
        if self.convert.channel_capacity == 0 {
            errors.push("channel_capacity must be positive".to_string());
        }
        if self.convert.max_redirect_hops == 0 {
            errors.push("max_redirect_hops must be positive".to_string());
        }
        if self.convert.cluster_cache_size == 0 {
            errors.push("cluster_cache_size must be positive".to_string());
        }

        // Images
        let images = &self.images;
        if images.max_width == 0 || images.max_height == 0 {
            errors.push("image max_width and max_height must be positive".to_string());
        }
        if images.target_bytes == 0 {
            errors.push("image target_bytes must be positive".to_string());
        }
        if !(1..=100).contains(&images.start_quality) {
            errors.push("image start_quality must be between 1 and 100".to_string());
        }
        if !(1..=100).contains(&images.min_quality) {
            errors.push("image min_quality must be between 1 and 100".to_string());
        }
        if images.min_quality > images.start_quality {
            errors.push(format!(
                "image min_quality ({}) must not exceed start_quality ({})",
                images.min_quality, images.start_quality
            ));
        }
        if images.quality_step == 0 {
            errors.push("image quality_step must be positive".to_string());
        }
        if images.backend == ImageBackend::External && images.external_program.trim().is_empty() {
            errors.push("external_program must be set for the external image backend".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(valid_config().validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn validate_rejects_zero_cores() {
        let mut cfg = valid_config();
        cfg.convert.num_cores = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("num_cores must be at least 1"));
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut cfg = valid_config();
        cfg.convert.batch_size = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size must be positive"));
    }

    #[test]
    fn validate_rejects_inverted_quality_range() {
        let mut cfg = valid_config();
        cfg.images.start_quality = 20;
        cfg.images.min_quality = 50;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must not exceed start_quality"));
    }

    #[test]
    fn validate_rejects_empty_external_program() {
        let mut cfg = valid_config();
        cfg.images.backend = ImageBackend::External;
        cfg.images.external_program = "  ".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("external_program"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = valid_config();
        cfg.convert.num_cores = 0;
        cfg.convert.channel_capacity = 0;
        cfg.images.quality_step = 0;
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("num_cores"));
        assert!(msg.contains("channel_capacity"));
        assert!(msg.contains("quality_step"));
    }

    #[test]
    fn default_convert_config_values() {
        let cfg = ConvertConfig::default();
        assert_eq!(cfg.num_cores, 1);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.max_redirect_hops, 8);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[convert]\nnum_cores = 4\n\n[images]\nmode = \"original\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.convert.num_cores, 4);
        assert_eq!(cfg.convert.batch_size, 500);
        assert_eq!(cfg.images.mode, ImageMode::Original);
        assert_eq!(cfg.logging.level, LogLevel::Info);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[convert]\nnum_cores = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn toml_roundtrip_of_defaults() {
        let rendered = valid_config().to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.convert.channel_capacity, 1024);
        assert_eq!(parsed.images.target_bytes, 50_000);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/zimdb.toml")).unwrap();
        assert_eq!(cfg.convert.num_cores, 1);
    }
}
