use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::reference::{builtin_ignored_skus, builtin_ignored_stores, builtin_sku_aliases};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Target directory for the `dir` backend.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// S3-compatible endpoint (MinIO, LocalStack). Uses path-style requests.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            key_prefix: default_key_prefix(),
            dir: None,
            bucket: None,
            region: None,
            endpoint_url: None,
        }
    }
}

fn default_backend() -> String {
    "disabled".to_string()
}
fn default_key_prefix() -> String {
    "stock_data_".to_string()
}

impl ArchiveConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceConfig {
    #[serde(default = "builtin_sku_aliases")]
    pub sku_aliases: BTreeMap<String, String>,
    #[serde(default = "builtin_ignored_skus")]
    pub ignored_skus: Vec<String>,
    #[serde(default = "builtin_ignored_stores")]
    pub ignored_stores: Vec<String>,
    #[serde(default)]
    pub listing_totals: BTreeMap<String, u64>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            sku_aliases: builtin_sku_aliases(),
            ignored_skus: builtin_ignored_skus(),
            ignored_stores: builtin_ignored_stores(),
            listing_totals: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate archive
    if config.archive.key_prefix.is_empty() {
        anyhow::bail!("archive.key_prefix must not be empty");
    }

    match config.archive.backend.as_str() {
        "disabled" => {}
        "dir" => {
            if config.archive.dir.is_none() {
                anyhow::bail!("archive.dir must be set when backend is 'dir'");
            }
        }
        "s3" => {
            if config.archive.bucket.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("archive.bucket must be set when backend is 's3'");
            }
            if config.archive.region.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("archive.region must be set when backend is 's3'");
            }
            if let Some(ref endpoint) = config.archive.endpoint_url {
                let rest = endpoint
                    .strip_prefix("https://")
                    .or_else(|| endpoint.strip_prefix("http://"))
                    .unwrap_or(endpoint);
                if rest.trim_end_matches('/').contains('/') {
                    anyhow::bail!(
                        "archive.endpoint_url must be scheme://host[:port] without a path, got '{}'",
                        endpoint
                    );
                }
            }
        }
        other => anyhow::bail!(
            "Unknown archive backend: '{}'. Must be disabled, dir, or s3.",
            other
        ),
    }

    // Validate reference: aliasing must be idempotent
    for (raw, canonical) in &config.reference.sku_aliases {
        if let Some(next) = config.reference.sku_aliases.get(canonical) {
            if next != canonical {
                anyhow::bail!(
                    "reference.sku_aliases: '{}' maps to '{}', which is itself aliased to '{}'",
                    raw,
                    canonical,
                    next
                );
            }
        }
    }

    Ok(config)
}
