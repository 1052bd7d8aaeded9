//! Core data models used throughout stockwatch.
//!
//! [`StockRecord`] is the one input type: a single (retailer, store, SKU)
//! observation from an uploaded snapshot. Every other type here is a derived
//! row produced by the aggregator and shaped by the report assembler.
//!
//! Derived rows serialize with the literal column names that exports and the
//! persisted state files depend on ("Number of Stores", not `store_count`).
//! The same names are exposed through [`TableRow::COLUMNS`] for text
//! rendering, so there is exactly one place to change them.

use serde::{Deserialize, Serialize};

/// Header names that must be present in every uploaded sheet.
pub const REQUIRED_COLUMNS: [&str; 4] = ["Retailer", "SKU", "Store", "Quantity"];

/// One stock observation. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    #[serde(rename = "Retailer")]
    pub retailer: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "Store")]
    pub store: String,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
}

impl StockRecord {
    pub fn new(retailer: &str, sku: &str, store: &str, quantity: i64) -> Self {
        Self {
            retailer: retailer.to_string(),
            sku: sku.to_string(),
            store: store.to_string(),
            quantity,
        }
    }
}

/// The three disjoint quantity partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StockLevel {
    /// Quantity ≤ 0.
    OutOfStock,
    /// Quantity = 1.
    Critical,
    /// Quantity ≥ 2.
    InStock,
}

impl StockLevel {
    pub const ALL: [StockLevel; 3] = [
        StockLevel::OutOfStock,
        StockLevel::Critical,
        StockLevel::InStock,
    ];

    /// Classify a quantity. Total over `i64`.
    pub fn of(quantity: i64) -> Self {
        match quantity {
            q if q <= 0 => StockLevel::OutOfStock,
            1 => StockLevel::Critical,
            _ => StockLevel::InStock,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StockLevel::OutOfStock => "Out of Stock (0 units or less)",
            StockLevel::Critical => "Critical Stock Levels (1 unit)",
            StockLevel::InStock => "In Stock (2 or more units)",
        }
    }

    /// Stable machine name, also the persisted file stem.
    pub fn name(self) -> &'static str {
        match self {
            StockLevel::OutOfStock => "out_of_stock",
            StockLevel::Critical => "critical_stock",
            StockLevel::InStock => "in_stock",
        }
    }
}

/// A row of a [`StockLevel`] bucket, keyed by (Retailer, SKU).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRow {
    #[serde(rename = "Retailer")]
    pub retailer: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    /// Distinct stores in this partition, never the row count.
    #[serde(rename = "Number of Stores")]
    pub store_count: u64,
    /// Mean quantity over every row of the (Retailer, SKU) group, across all
    /// partitions.
    #[serde(rename = "Average Quantity")]
    pub mean_quantity: f64,
}

/// Out-of-stock situations and rate for one retailer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerSummary {
    #[serde(rename = "Retailer")]
    pub retailer: String,
    #[serde(rename = "Number of Situations")]
    pub situations: u64,
    #[serde(rename = "Total Listings")]
    pub total_listings: Option<u64>,
    #[serde(rename = "Out of Stock Rate (%)")]
    pub rate_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuMeanRow {
    #[serde(rename = "Retailer")]
    pub retailer: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "Average Quantity")]
    pub mean_quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerMeanRow {
    #[serde(rename = "Retailer")]
    pub retailer: String,
    #[serde(rename = "Total Average Quantity")]
    pub total_mean_quantity: f64,
}

/// An out-of-stock (Retailer, Store, SKU) sighting, for drill-down.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreSkuRow {
    #[serde(rename = "Retailer")]
    pub retailer: String,
    #[serde(rename = "Store")]
    pub store: String,
    #[serde(rename = "SKU")]
    pub sku: String,
}

/// A row that can be rendered as a column of text cells.
pub trait TableRow {
    /// Literal column names, group keys first then the measure.
    const COLUMNS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

impl TableRow for StockRecord {
    const COLUMNS: &'static [&'static str] = &REQUIRED_COLUMNS;

    fn cells(&self) -> Vec<String> {
        vec![
            self.retailer.clone(),
            self.sku.clone(),
            self.store.clone(),
            self.quantity.to_string(),
        ]
    }
}

impl TableRow for BucketRow {
    const COLUMNS: &'static [&'static str] =
        &["Retailer", "SKU", "Number of Stores", "Average Quantity"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.retailer.clone(),
            self.sku.clone(),
            self.store_count.to_string(),
            format!("{:.2}", self.mean_quantity),
        ]
    }
}

impl TableRow for RetailerSummary {
    const COLUMNS: &'static [&'static str] = &[
        "Retailer",
        "Number of Situations",
        "Total Listings",
        "Out of Stock Rate (%)",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.retailer.clone(),
            self.situations.to_string(),
            self.total_listings
                .map(|t| t.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
            self.rate_percent
                .map(|r| format!("{:.1}", r))
                .unwrap_or_else(|| "n/a".to_string()),
        ]
    }
}

impl TableRow for SkuMeanRow {
    const COLUMNS: &'static [&'static str] = &["Retailer", "SKU", "Average Quantity"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.retailer.clone(),
            self.sku.clone(),
            format!("{:.2}", self.mean_quantity),
        ]
    }
}

impl TableRow for RetailerMeanRow {
    const COLUMNS: &'static [&'static str] = &["Retailer", "Total Average Quantity"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.retailer.clone(),
            format!("{:.2}", self.total_mean_quantity),
        ]
    }
}

impl TableRow for StoreSkuRow {
    const COLUMNS: &'static [&'static str] = &["Retailer", "Store", "SKU"];

    fn cells(&self) -> Vec<String> {
        vec![self.retailer.clone(), self.store.clone(), self.sku.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_levels_partition_every_quantity() {
        for q in -5..=5 {
            let hits = [q <= 0, q == 1, q >= 2];
            assert_eq!(hits.iter().filter(|h| **h).count(), 1, "quantity {}", q);
            let expected = StockLevel::ALL[hits.iter().position(|h| *h).unwrap()];
            assert_eq!(StockLevel::of(q), expected);
        }
        assert_eq!(StockLevel::of(i64::MIN), StockLevel::OutOfStock);
        assert_eq!(StockLevel::of(i64::MAX), StockLevel::InStock);
    }

    #[test]
    fn serialized_field_names_match_table_columns() {
        let row = BucketRow {
            retailer: "Currys".to_string(),
            sku: "Air".to_string(),
            store_count: 3,
            mean_quantity: 1.5,
        };
        let json = serde_json::to_value(&row).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for col in BucketRow::COLUMNS {
            assert!(keys.contains(col), "missing {}", col);
        }

        let summary = RetailerSummary {
            retailer: "Currys".to_string(),
            situations: 2,
            total_listings: None,
            rate_percent: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        for col in RetailerSummary::COLUMNS {
            assert!(json.get(*col).is_some(), "missing {}", col);
        }
        assert!(json["Out of Stock Rate (%)"].is_null());
    }

    #[test]
    fn absent_rate_renders_as_na() {
        let summary = RetailerSummary {
            retailer: "Argos".to_string(),
            situations: 4,
            total_listings: None,
            rate_percent: None,
        };
        assert_eq!(summary.cells(), vec!["Argos", "4", "n/a", "n/a"]);
    }
}
