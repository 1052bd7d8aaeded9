//! Grouping and measures over normalized stock records.
//!
//! Everything here is recomputed from scratch on each run. Group keys are
//! kept in `BTreeMap`s so every output table comes out sorted by
//! (Retailer, SKU) regardless of upload order.
//!
//! # Measures
//!
//! | Measure | Grouping | Population |
//! |---------|----------|------------|
//! | Number of Stores | (Retailer, SKU) | rows in one [`StockLevel`] partition, distinct Store values |
//! | Average Quantity | (Retailer, SKU) | **all** rows of the group, regardless of partition |
//! | Number of Situations | Retailer | sum of out-of-stock Number of Stores |
//! | Out of Stock Rate (%) | Retailer | situations / reference listing total × 100, one decimal |
//!
//! A store with two SKUs out of stock counts as two situations: the rate
//! measures stock-out events, not affected stores.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::models::{
    BucketRow, RetailerMeanRow, RetailerSummary, SkuMeanRow, StockLevel, StockRecord, StoreSkuRow,
};
use crate::reference::ReferenceData;

/// Only the first five distinct retailers (by first appearance) are reported.
pub const MAX_RETAILERS: usize = 5;

/// Full aggregator output for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Retained retailers, in first-appearance order.
    pub retailers: Vec<String>,
    /// Normalized records belonging to the retained retailers.
    pub records: Vec<StockRecord>,
    pub out_of_stock: Vec<BucketRow>,
    pub critical: Vec<BucketRow>,
    pub in_stock: Vec<BucketRow>,
    pub situations: Vec<RetailerSummary>,
    /// Retailers with situations but no usable reference listing total.
    pub missing_reference: Vec<String>,
    pub mean_by_sku: Vec<SkuMeanRow>,
    pub mean_by_retailer: Vec<RetailerMeanRow>,
    pub out_of_stock_stores: Vec<StoreSkuRow>,
}

impl Aggregation {
    pub fn bucket(&self, level: StockLevel) -> &[BucketRow] {
        match level {
            StockLevel::OutOfStock => &self.out_of_stock,
            StockLevel::Critical => &self.critical,
            StockLevel::InStock => &self.in_stock,
        }
    }
}

/// Run the aggregator over a normalized record set, capping it to the
/// first retailers of that same set.
///
/// Fails without producing anything if any record has an empty Retailer,
/// SKU, or Store.
pub fn aggregate(
    records: Vec<StockRecord>,
    reference: &ReferenceData,
) -> Result<Aggregation, PipelineError> {
    let allowed = first_retailers(&records);
    aggregate_retailers(records, &allowed, reference)
}

/// Run the aggregator keeping only `allowed` retailers.
///
/// `allowed` is taken from the raw upload, before normalization, so a
/// retailer whose rows were all filtered out still holds its slot.
pub fn aggregate_retailers(
    records: Vec<StockRecord>,
    allowed: &[String],
    reference: &ReferenceData,
) -> Result<Aggregation, PipelineError> {
    validate(&records)?;

    let (retailers, records) = retain_retailers(records, allowed);
    info!(
        retailers = retailers.len(),
        rows = records.len(),
        "aggregating stock records"
    );

    let means = mean_quantity_map(&records);
    let out_of_stock = bucket_rows(&records, StockLevel::OutOfStock, &means);
    let critical = bucket_rows(&records, StockLevel::Critical, &means);
    let in_stock = bucket_rows(&records, StockLevel::InStock, &means);

    let (situations, missing_reference) = summarize(&retailers, &out_of_stock, reference);
    let mean_by_sku = sku_means(&means);
    let mean_by_retailer = retailer_means(&mean_by_sku);
    let out_of_stock_stores = out_of_stock_sightings(&records);

    Ok(Aggregation {
        retailers,
        records,
        out_of_stock,
        critical,
        in_stock,
        situations,
        missing_reference,
        mean_by_sku,
        mean_by_retailer,
        out_of_stock_stores,
    })
}

/// Every record must carry a Retailer, SKU, and Store.
pub fn validate(records: &[StockRecord]) -> Result<(), PipelineError> {
    for record in records {
        let empty = [
            ("Retailer", &record.retailer),
            ("SKU", &record.sku),
            ("Store", &record.store),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        if let Some((column, _)) = empty {
            return Err(PipelineError::MissingField {
                column,
                retailer: record.retailer.clone(),
                sku: record.sku.clone(),
                store: record.store.clone(),
            });
        }
    }
    Ok(())
}

/// The first [`MAX_RETAILERS`] distinct retailers, in first-appearance order.
pub fn first_retailers(records: &[StockRecord]) -> Vec<String> {
    let mut retailers: Vec<String> = Vec::new();
    for record in records {
        if retailers.len() == MAX_RETAILERS {
            break;
        }
        if !retailers.contains(&record.retailer) {
            retailers.push(record.retailer.clone());
        }
    }
    retailers
}

/// Keep records of the `allowed` retailers. Returns the allowed retailers
/// that still have rows, in `allowed` order, with the kept records.
pub fn retain_retailers(
    records: Vec<StockRecord>,
    allowed: &[String],
) -> (Vec<String>, Vec<StockRecord>) {
    let keep: HashSet<&str> = allowed.iter().map(String::as_str).collect();
    let total = records.len();
    let retained: Vec<StockRecord> = records
        .into_iter()
        .filter(|r| keep.contains(r.retailer.as_str()))
        .collect();
    if retained.len() < total {
        info!(
            dropped = total - retained.len(),
            "excluded rows beyond the first {} retailers", MAX_RETAILERS
        );
    }

    let present: HashSet<&str> = retained.iter().map(|r| r.retailer.as_str()).collect();
    let retailers = allowed
        .iter()
        .filter(|r| present.contains(r.as_str()))
        .cloned()
        .collect();
    (retailers, retained)
}

type GroupKey = (String, String);

/// Mean quantity per (Retailer, SKU) over every row of the group.
pub fn mean_quantity_map(records: &[StockRecord]) -> BTreeMap<GroupKey, f64> {
    // i128 holds the sum of any realistic number of i64 quantities
    let mut sums: BTreeMap<GroupKey, (i128, u64)> = BTreeMap::new();
    for record in records {
        let entry = sums
            .entry((record.retailer.clone(), record.sku.clone()))
            .or_insert((0, 0));
        entry.0 += i128::from(record.quantity);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum as f64 / count as f64))
        .collect()
}

/// Distinct-store counts for one partition, with full-population means.
pub fn bucket_rows(
    records: &[StockRecord],
    level: StockLevel,
    means: &BTreeMap<GroupKey, f64>,
) -> Vec<BucketRow> {
    let mut stores: BTreeMap<GroupKey, BTreeSet<&str>> = BTreeMap::new();
    for record in records.iter().filter(|r| StockLevel::of(r.quantity) == level) {
        stores
            .entry((record.retailer.clone(), record.sku.clone()))
            .or_default()
            .insert(record.store.as_str());
    }

    stores
        .into_iter()
        .map(|(key, stores)| {
            let mean_quantity = means.get(&key).copied().unwrap_or(0.0);
            let (retailer, sku) = key;
            BucketRow {
                retailer,
                sku,
                store_count: stores.len() as u64,
                mean_quantity,
            }
        })
        .collect()
}

/// Situations and rate per retailer, from the out-of-stock bucket.
///
/// Every retained retailer gets a row; retailers with nothing out of stock
/// have zero situations. Returns the rows plus the names of retailers whose
/// reference total is absent or zero.
pub fn summarize(
    retailers: &[String],
    out_of_stock: &[BucketRow],
    reference: &ReferenceData,
) -> (Vec<RetailerSummary>, Vec<String>) {
    let mut situations: BTreeMap<&str, u64> =
        retailers.iter().map(|r| (r.as_str(), 0u64)).collect();
    for row in out_of_stock {
        *situations.entry(row.retailer.as_str()).or_insert(0) += row.store_count;
    }

    let mut missing = Vec::new();
    let rows = situations
        .into_iter()
        .map(|(retailer, count)| {
            let total_listings = reference.listing_total(retailer);
            let rate_percent = match total_listings {
                Some(total) if total > 0 => Some(round1(count as f64 / total as f64 * 100.0)),
                _ => {
                    missing.push(retailer.to_string());
                    None
                }
            };
            RetailerSummary {
                retailer: retailer.to_string(),
                situations: count,
                total_listings,
                rate_percent,
            }
        })
        .collect();

    if !missing.is_empty() {
        warn!(retailers = ?missing, "no reference listing total; rate left empty");
    }
    (rows, missing)
}

pub fn sku_means(means: &BTreeMap<GroupKey, f64>) -> Vec<SkuMeanRow> {
    means
        .iter()
        .map(|((retailer, sku), mean)| SkuMeanRow {
            retailer: retailer.clone(),
            sku: sku.clone(),
            mean_quantity: *mean,
        })
        .collect()
}

/// Sum of per-SKU means for each retailer.
pub fn retailer_means(by_sku: &[SkuMeanRow]) -> Vec<RetailerMeanRow> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for row in by_sku {
        *totals.entry(row.retailer.as_str()).or_insert(0.0) += row.mean_quantity;
    }
    totals
        .into_iter()
        .map(|(retailer, total)| RetailerMeanRow {
            retailer: retailer.to_string(),
            total_mean_quantity: total,
        })
        .collect()
}

/// Deduplicated (Retailer, Store, SKU) triples for every out-of-stock row.
pub fn out_of_stock_sightings(records: &[StockRecord]) -> Vec<StoreSkuRow> {
    records
        .iter()
        .filter(|r| StockLevel::of(r.quantity) == StockLevel::OutOfStock)
        .map(|r| StoreSkuRow {
            retailer: r.retailer.clone(),
            store: r.store.clone(),
            sku: r.sku.clone(),
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
