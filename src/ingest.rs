//! Upload orchestration.
//!
//! Coordinates one run: read spreadsheet → normalize → aggregate → replace
//! state files → archive the original bytes → print the report. Every
//! fatal check happens before the state files are touched, so a rejected
//! upload leaves the previous state as it was. Archival is best-effort and
//! runs only after the state has been replaced.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::aggregate::{aggregate_retailers, first_retailers, Aggregation};
use crate::archive::{self, open_store};
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::StockRecord;
use crate::normalize::normalize;
use crate::reference::ReferenceData;
use crate::report::assemble;
use crate::sheet;
use crate::state::StateStore;

/// Normalize and aggregate a freshly read record set.
///
/// The retailer cap is fixed on the raw upload order before normalization
/// drops any rows.
pub fn run_pipeline(
    raw: Vec<StockRecord>,
    reference: &ReferenceData,
) -> Result<Aggregation, PipelineError> {
    let allowed = first_retailers(&raw);
    let total = raw.len();
    let (records, stats) = normalize(raw, reference);
    info!(
        rows = total,
        kept = records.len(),
        aliased = stats.aliased,
        ignored_sku = stats.ignored_sku,
        ignored_store = stats.ignored_store,
        "normalized upload"
    );
    aggregate_retailers(records, &allowed, reference)
}

/// Parse, aggregate, and persist one spreadsheet. Nothing is written when
/// any step fails.
fn process_bytes(config: &Config, bytes: &[u8]) -> Result<StateStore> {
    let reference = ReferenceData::from_config(&config.reference);
    let raw = sheet::read_records(bytes)?;
    let aggregation = run_pipeline(raw, &reference)?;

    let store = StateStore::from_config(config);
    store.save(&aggregation)?;

    let report = assemble(aggregation, store.last_updated());
    print!("{}", report.render());
    Ok(store)
}

/// `stockwatch ingest <FILE>`.
pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .map_err(|e| PipelineError::InputParse(format!("{}: {}", path.display(), e)))?;
    info!(file = %path.display(), bytes = bytes.len(), "ingesting upload");

    process_bytes(config, &bytes)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    archive_best_effort(config, &file_name, &bytes).await;
    Ok(())
}

async fn archive_best_effort(config: &Config, file_name: &str, bytes: &[u8]) {
    let store = match open_store(&config.archive) {
        Ok(Some(store)) => store,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "archive unavailable; upload not archived");
            return;
        }
    };
    if let Err(e) =
        archive::archive_upload(store.as_ref(), &config.archive.key_prefix, file_name, bytes).await
    {
        warn!(error = %e, location = %store.location(), "archiving upload failed");
    }
}

/// `stockwatch archive restore`: rebuild state from the latest archived
/// upload without archiving it again.
pub async fn run_restore(config: &Config) -> Result<()> {
    let store = match open_store(&config.archive)? {
        Some(s) => s,
        None => {
            println!("Archive is disabled.");
            return Ok(());
        }
    };

    let prefix = &config.archive.key_prefix;
    let latest = archive::fetch_latest(store.as_ref(), prefix)
        .await
        .with_context(|| format!("Failed to fetch from {}", store.location()))?;

    match latest {
        Some((key, bytes)) => {
            info!(key = %key, "restoring from archive");
            process_bytes(config, &bytes)
                .with_context(|| format!("Failed to restore from {}", key))?;
        }
        None => println!("No archived file found under '{}'.", prefix),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::sheet::tests::xlsx_from_rows;
    use tempfile::TempDir;

    fn config_for(tmp: &TempDir) -> Config {
        let toml = format!(
            r#"
[state]
dir = "{}"

[archive]
backend = "dir"
dir = "{}"

[reference.listing_totals]
Currys = 10
"#,
            tmp.path().join("state").display(),
            tmp.path().join("archive").display()
        );
        parse_config(&toml).unwrap()
    }

    #[test]
    fn pipeline_normalizes_before_aggregating() {
        let raw = vec![
            StockRecord::new("Currys", "226-802600101", "S1", 0),
            StockRecord::new("Currys", "Air", "S2", 0),
            StockRecord::new("Currys", "Air", "WEBSITE TOOLSTATION", 0),
        ];
        let agg = run_pipeline(raw, &ReferenceData::builtin()).unwrap();
        assert_eq!(agg.out_of_stock.len(), 1);
        assert_eq!(agg.out_of_stock[0].sku, "Air");
        assert_eq!(agg.out_of_stock[0].store_count, 2);
    }

    #[test]
    fn retailer_cap_follows_raw_upload_order() {
        let mut raw = vec![StockRecord::new("R0", "Air", "WEBSITE TOOLSTATION", 0)];
        for i in 1..=5 {
            raw.push(StockRecord::new(&format!("R{}", i), "Air", "S1", 0));
        }
        let agg = run_pipeline(raw, &ReferenceData::builtin()).unwrap();
        assert_eq!(agg.retailers, vec!["R1", "R2", "R3", "R4"]);
        assert!(agg.records.iter().all(|r| r.retailer != "R5"));
        assert!(agg.out_of_stock.iter().all(|r| r.retailer != "R5"));
    }

    #[tokio::test]
    async fn ingest_saves_state_and_archives_the_upload() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        let file = tmp.path().join("week41.xlsx");
        std::fs::write(
            &file,
            xlsx_from_rows(&[
                vec!["Retailer", "SKU", "Store", "Quantity"],
                vec!["Currys", "Air", "S1", "0"],
                vec!["Currys", "Air", "S2", "4"],
            ]),
        )
        .unwrap();

        run_ingest(&config, &file).await.unwrap();

        let saved = StateStore::from_config(&config).load().unwrap().unwrap();
        assert_eq!(saved.records.len(), 2);
        let archived: Vec<_> = std::fs::read_dir(tmp.path().join("archive"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].starts_with("stock_data_"));
        assert!(archived[0].ends_with(".xlsx"));
    }

    #[tokio::test]
    async fn rejected_upload_is_neither_saved_nor_archived() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        let file = tmp.path().join("bad.csv");
        std::fs::write(&file, "Retailer,SKU,Quantity\nCurrys,Air,0\n").unwrap();

        let err = run_ingest(&config, &file).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InputFormat { .. })
        ));
        assert!(StateStore::from_config(&config).load().unwrap().is_none());
        assert!(!tmp.path().join("archive").exists());
    }

    #[tokio::test]
    async fn restore_rebuilds_state_from_latest_archive() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        let archive_dir = tmp.path().join("archive");
        std::fs::create_dir_all(&archive_dir).unwrap();
        std::fs::write(
            archive_dir.join("stock_data_20240101_000000.csv"),
            "Retailer,SKU,Store,Quantity\nCurrys,Air,S1,0\n",
        )
        .unwrap();
        std::fs::write(
            archive_dir.join("stock_data_20240301_000000.csv"),
            "Retailer,SKU,Store,Quantity\nArgos,Solo,S1,3\n",
        )
        .unwrap();

        run_restore(&config).await.unwrap();

        let saved = StateStore::from_config(&config).load().unwrap().unwrap();
        assert_eq!(saved.records, vec![StockRecord::new("Argos", "Solo", "S1", 3)]);
        // restoring does not add another archive entry
        assert_eq!(std::fs::read_dir(&archive_dir).unwrap().count(), 2);
    }
}
