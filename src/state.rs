//! Persisted derived state.
//!
//! Four CSV files under `[state] dir`: the retained normalized records and
//! the three stock buckets. A successful run replaces all four; a failed run
//! touches none of them. Each file is written to `<name>.tmp` first, and the
//! renames only start once every temporary file is complete.
//!
//! "Last updated" is the modification date of `out_of_stock.csv`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::aggregate::{self, Aggregation};
use crate::config::Config;
use crate::models::{BucketRow, StockLevel, StockRecord, TableRow};
use crate::reference::ReferenceData;

pub const RECORDS_FILE: &str = "stock_data.csv";

/// Bucket contents plus the records they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedState {
    pub records: Vec<StockRecord>,
    pub out_of_stock: Vec<BucketRow>,
    pub critical: Vec<BucketRow>,
    pub in_stock: Vec<BucketRow>,
    pub last_updated: Option<NaiveDate>,
}

impl SavedState {
    /// Rebuild the full aggregation. The buckets are taken as persisted;
    /// summary, means, and drill-down come from the persisted records.
    pub fn into_aggregation(self, reference: &ReferenceData) -> Aggregation {
        let mut retailers: Vec<String> = Vec::new();
        for record in &self.records {
            if !retailers.contains(&record.retailer) {
                retailers.push(record.retailer.clone());
            }
        }

        let (situations, missing_reference) =
            aggregate::summarize(&retailers, &self.out_of_stock, reference);
        let means = aggregate::mean_quantity_map(&self.records);
        let mean_by_sku = aggregate::sku_means(&means);
        let mean_by_retailer = aggregate::retailer_means(&mean_by_sku);
        let out_of_stock_stores = aggregate::out_of_stock_sightings(&self.records);

        Aggregation {
            retailers,
            records: self.records,
            out_of_stock: self.out_of_stock,
            critical: self.critical,
            in_stock: self.in_stock,
            situations,
            missing_reference,
            mean_by_sku,
            mean_by_retailer,
            out_of_stock_stores,
        }
    }
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.state.dir.clone())
    }

    fn bucket_path(&self, level: StockLevel) -> PathBuf {
        self.dir.join(format!("{}.csv", level.name()))
    }

    fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    /// Replace all four state files with the contents of `aggregation`.
    pub fn save(&self, aggregation: &Aggregation) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state dir: {}", self.dir.display()))?;

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        let result = (|| -> Result<()> {
            let target = self.records_path();
            let tmp = tmp_path(&target);
            staged.push((tmp.clone(), target));
            write_csv(&tmp, &aggregation.records)?;

            for level in StockLevel::ALL {
                let target = self.bucket_path(level);
                let tmp = tmp_path(&target);
                staged.push((tmp.clone(), target));
                write_csv(&tmp, aggregation.bucket(level))?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            for (tmp, _) in &staged {
                let _ = std::fs::remove_file(tmp);
            }
            return Err(e);
        }

        for (tmp, target) in &staged {
            std::fs::rename(tmp, target)
                .with_context(|| format!("Failed to replace {}", target.display()))?;
        }
        info!(dir = %self.dir.display(), files = staged.len(), "state files replaced");
        Ok(())
    }

    /// Load the last saved state, or `None` if any of the four files is absent.
    pub fn load(&self) -> Result<Option<SavedState>> {
        let paths = [
            self.records_path(),
            self.bucket_path(StockLevel::OutOfStock),
            self.bucket_path(StockLevel::Critical),
            self.bucket_path(StockLevel::InStock),
        ];
        if !paths.iter().all(|p| p.exists()) {
            return Ok(None);
        }

        Ok(Some(SavedState {
            records: read_csv(&paths[0])?,
            out_of_stock: read_csv(&paths[1])?,
            critical: read_csv(&paths[2])?,
            in_stock: read_csv(&paths[3])?,
            last_updated: self.last_updated(),
        }))
    }

    /// Local modification date of the out-of-stock file.
    pub fn last_updated(&self) -> Option<NaiveDate> {
        let modified = std::fs::metadata(self.bucket_path(StockLevel::OutOfStock))
            .and_then(|m| m.modified())
            .ok()?;
        Some(DateTime::<Local>::from(modified).date_naive())
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Header row is always written, even for an empty table.
fn write_csv<T: Serialize + TableRow>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(T::COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, result) in reader.deserialize().enumerate() {
        let row: T = result
            .with_context(|| format!("{}: bad row {}", path.display(), i + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use tempfile::TempDir;

    fn sample_aggregation() -> Aggregation {
        let records = vec![
            StockRecord::new("Currys", "Air", "04901: LEEDS", 0),
            StockRecord::new("Currys", "Air", "04902: YORK", 3),
            StockRecord::new("Currys", "Solo & Printer", "04901: LEEDS", 1),
            StockRecord::new("Argos", "Air", "Hull, East", 0),
        ];
        let reference = ReferenceData::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![("Currys".to_string(), 10)],
        );
        aggregate(records, &reference).unwrap()
    }

    #[test]
    fn saved_state_rebuilds_the_same_aggregation() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("state"));
        let aggregation = sample_aggregation();
        store.save(&aggregation).unwrap();

        let saved = store.load().unwrap().expect("state present");
        assert!(saved.last_updated.is_some());

        let reference = ReferenceData::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![("Currys".to_string(), 10)],
        );
        let rebuilt = saved.into_aggregation(&reference);
        assert_eq!(rebuilt, aggregation);
    }

    #[test]
    fn files_carry_literal_headers_even_when_empty() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store.save(&sample_aggregation()).unwrap();

        let in_stock = std::fs::read_to_string(tmp.path().join("in_stock.csv")).unwrap();
        assert!(in_stock.starts_with("Retailer,SKU,Number of Stores,Average Quantity\n"));
        let records = std::fs::read_to_string(tmp.path().join(RECORDS_FILE)).unwrap();
        assert!(records.starts_with("Retailer,SKU,Store,Quantity\n"));

        let empty = aggregate(Vec::new(), &ReferenceData::builtin()).unwrap();
        store.save(&empty).unwrap();
        let critical = std::fs::read_to_string(tmp.path().join("critical_stock.csv")).unwrap();
        assert_eq!(critical, "Retailer,SKU,Number of Stores,Average Quantity\n");
        assert!(store.load().unwrap().unwrap().records.is_empty());
    }

    #[test]
    fn save_replaces_previous_files_and_leaves_no_temporaries() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store.save(&sample_aggregation()).unwrap();

        let replacement = aggregate(
            vec![StockRecord::new("Ryman", "Solo", "S1", 2)],
            &ReferenceData::builtin(),
        )
        .unwrap();
        store.save(&replacement).unwrap();

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.records, replacement.records);
        assert!(saved.out_of_stock.is_empty());

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_files_mean_no_state() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert!(store.load().unwrap().is_none());
        assert!(store.last_updated().is_none());
    }
}
