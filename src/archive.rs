//! Archive of uploaded spreadsheets.
//!
//! Every successfully processed upload is stored verbatim under a
//! timestamp-qualified name:
//!
//! ```text
//! <key_prefix><YYYYMMDD>_<HHMMSS><ext>      e.g. stock_data_20241014_091500.xlsx
//! ```
//!
//! The only read path is "the most recent archived file": list everything
//! under the prefix, keep names that match the pattern exactly, and take the
//! greatest timestamp. Anything else under the prefix is ignored.
//!
//! Archival is best-effort. Callers log [`ArchiveError`]s and carry on.
//!
//! # Backends
//!
//! | `backend` | Store |
//! |-----------|-------|
//! | `disabled` | no archival |
//! | `dir` | [`DirArchive`], a local directory |
//! | `s3` | [`S3Archive`], an S3 bucket (or MinIO/LocalStack via `endpoint_url`) |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::info;

use crate::archive_s3::S3Archive;
use crate::config::{ArchiveConfig, Config};
use crate::error::ArchiveError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// An object store holding archived uploads.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Human-readable location, for messages (`s3://bucket`, a directory).
    fn location(&self) -> String;

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ArchiveError>;

    /// All keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArchiveError>;
}

/// Build the store named by `[archive] backend`, or `None` when disabled.
pub fn open_store(config: &ArchiveConfig) -> Result<Option<Box<dyn ArchiveStore>>> {
    match config.backend.as_str() {
        "disabled" => Ok(None),
        "dir" => {
            let dir = config
                .dir
                .clone()
                .context("archive.dir must be set when backend is 'dir'")?;
            Ok(Some(Box::new(DirArchive::new(dir))))
        }
        "s3" => Ok(Some(Box::new(S3Archive::from_config(config)?))),
        other => anyhow::bail!("Unknown archive backend: '{}'", other),
    }
}

/// Archive name for an upload made at `at`.
///
/// The extension is taken from the uploaded file name (`.xlsx` if it has
/// none).
pub fn archive_key(prefix: &str, at: DateTime<Utc>, file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "xlsx".to_string());
    format!("{}{}.{}", prefix, at.format(TIMESTAMP_FORMAT), ext)
}

/// Timestamp of an archive key, or `None` if the key does not follow the
/// naming convention.
pub fn archive_timestamp(prefix: &str, key: &str) -> Option<NaiveDateTime> {
    let rest = key.strip_prefix(prefix)?;
    if rest.len() < TIMESTAMP_LEN || !rest.is_char_boundary(TIMESTAMP_LEN) {
        return None;
    }
    let (stamp, ext) = rest.split_at(TIMESTAMP_LEN);

    let shape_ok = stamp.char_indices().all(|(i, c)| {
        if i == 8 {
            c == '_'
        } else {
            c.is_ascii_digit()
        }
    });
    if !shape_ok {
        return None;
    }

    let ext_ok = ext
        .strip_prefix('.')
        .map(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(false);
    if !ext_ok {
        return None;
    }

    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// The key with the greatest timestamp among those matching the convention.
pub fn latest_key<'a>(prefix: &str, keys: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    keys.into_iter()
        .filter_map(|k| archive_timestamp(prefix, k).map(|ts| (ts, k)))
        .max()
        .map(|(_, k)| k)
}

/// Store `bytes` under a fresh timestamped key and return the key.
pub async fn archive_upload(
    store: &dyn ArchiveStore,
    prefix: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<String, ArchiveError> {
    let key = archive_key(prefix, Utc::now(), file_name);
    store.put(&key, bytes).await?;
    info!(key = %key, location = %store.location(), "archived upload");
    Ok(key)
}

/// Fetch the most recent archived upload, or `None` when nothing matches.
pub async fn fetch_latest(
    store: &dyn ArchiveStore,
    prefix: &str,
) -> Result<Option<(String, Vec<u8>)>, ArchiveError> {
    let keys = store.list(prefix).await?;
    let latest = match latest_key(prefix, keys.iter().map(String::as_str)) {
        Some(k) => k.to_string(),
        None => return Ok(None),
    };
    let bytes = store.get(&latest).await?;
    Ok(Some((latest, bytes)))
}

/// `stockwatch archive latest`: name (and optionally download) the most
/// recent archived upload.
pub async fn run_archive_latest(config: &Config, download: Option<&Path>) -> Result<()> {
    let store = match open_store(&config.archive)? {
        Some(s) => s,
        None => {
            println!("Archive is disabled.");
            return Ok(());
        }
    };

    let prefix = &config.archive.key_prefix;
    match download {
        None => {
            let keys = store
                .list(prefix)
                .await
                .with_context(|| format!("Failed to list {}", store.location()))?;
            match latest_key(prefix, keys.iter().map(String::as_str)) {
                Some(key) => println!("{}", key),
                None => println!("No archived file found under '{}'.", prefix),
            }
        }
        Some(path) => {
            match fetch_latest(store.as_ref(), prefix)
                .await
                .with_context(|| format!("Failed to fetch from {}", store.location()))?
            {
                Some((key, bytes)) => {
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent)?;
                        }
                    }
                    std::fs::write(path, &bytes)?;
                    println!("{} -> {} ({} bytes)", key, path.display(), bytes.len());
                }
                None => println!("No archived file found under '{}'.", prefix),
            }
        }
    }
    Ok(())
}

// ============ Directory backend ============

/// Archive in a local directory. Keys may contain `/`, which become
/// subdirectories.
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl ArchiveStore for DirArchive {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        let (dir_part, _) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let dir = self.path_for(dir_part);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let key = if dir_part.is_empty() {
                name
            } else {
                format!("{}/{}", dir_part, name)
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArchiveError> {
        Ok(tokio::fs::read(self.path_for(key)).await?)
    }
}
