use anyhow::Result;
use std::path::PathBuf;
use zimdb::config::Config;

pub fn init_config(path: PathBuf) -> Result<()> {
    let config = Config::default();
    let config_path = path.join("config.toml");
    if config_path.exists() {
        anyhow::bail!("Configuration file already exists: {}", config_path.display());
    }

    let toml_content = format!(
        r#"# zimdb Configuration

[convert]
# parallel workers, one contiguous shard of entries each
num_cores = {}
# rows per write transaction
batch_size = {}
# rows buffered between the workers and the writer
channel_capacity = {}
max_redirect_hops = {}
# decompressed clusters cached per worker
cluster_cache_size = {}

[images]
# skip, original or compress
mode = "{}"
# builtin or external (ImageMagick-compatible program)
backend = "builtin"
external_program = "{}"
max_width = {}
max_height = {}
target_bytes = {}
start_quality = {}
min_quality = {}
quality_step = {}

[logging]
# text or json
format = "text"
level = "{}"
"#,
        config.convert.num_cores,
        config.convert.batch_size,
        config.convert.channel_capacity,
        config.convert.max_redirect_hops,
        config.convert.cluster_cache_size,
        config.images.mode,
        config.images.external_program,
        config.images.max_width,
        config.images.max_height,
        config.images.target_bytes,
        config.images.start_quality,
        config.images.min_quality,
        config.images.quality_step,
        config.logging.level,
    );

    std::fs::create_dir_all(&path)?;
    std::fs::write(&config_path, toml_content)?;
    println!("Created configuration file: {}", config_path.display());

    Ok(())
}
