//! Report assembly: named tables for display and export.
//!
//! The assembler adds no measures of its own. It takes an [`Aggregation`],
//! groups the out-of-stock sightings by retailer for drill-down, attaches
//! the "last updated" date and any warnings, and exposes everything as
//! [`Table`]s with the literal column names from [`crate::models`].

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregate::Aggregation;
use crate::models::{
    BucketRow, RetailerMeanRow, RetailerSummary, SkuMeanRow, StockLevel, StoreSkuRow, TableRow,
};

/// A rendered table: stable machine name, display title, columns, rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: &'static str,
    pub title: &'static str,
    pub columns: &'static [&'static str],
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn from_rows<R: TableRow>(name: &'static str, title: &'static str, rows: &[R]) -> Self {
        Self {
            name,
            title,
            columns: R::COLUMNS,
            rows: rows.iter().map(|r| r.cells()).collect(),
        }
    }

    /// Fixed-width text rendering, one line per row.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = w))
            .collect();
        let _ = writeln!(out, "  {}", header.join("  ").trim_end());
        let rule = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        let _ = writeln!(out, "  {}", "-".repeat(rule));
        if self.rows.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<width$}", c, width = w))
                .collect();
            let _ = writeln!(out, "  {}", cells.join("  ").trim_end());
        }
        out
    }
}

/// Everything shown or exported after a run.
#[derive(Debug, Clone, Serialize)]
pub struct StockReport {
    pub last_updated: Option<NaiveDate>,
    pub out_of_stock: Vec<BucketRow>,
    pub critical_stock: Vec<BucketRow>,
    pub in_stock: Vec<BucketRow>,
    pub situations: Vec<RetailerSummary>,
    pub mean_quantity_by_sku: Vec<SkuMeanRow>,
    pub mean_quantity_by_retailer: Vec<RetailerMeanRow>,
    /// Out-of-stock (Retailer, Store, SKU) triples keyed by retailer.
    pub out_of_stock_stores: BTreeMap<String, Vec<StoreSkuRow>>,
    pub warnings: Vec<String>,
}

pub fn assemble(aggregation: Aggregation, last_updated: Option<NaiveDate>) -> StockReport {
    let mut out_of_stock_stores: BTreeMap<String, Vec<StoreSkuRow>> = BTreeMap::new();
    for row in aggregation.out_of_stock_stores {
        out_of_stock_stores
            .entry(row.retailer.clone())
            .or_default()
            .push(row);
    }

    let mut warnings = Vec::new();
    if !aggregation.missing_reference.is_empty() {
        warnings.push(format!(
            "No reference listing total for: {}",
            aggregation.missing_reference.join(", ")
        ));
    }

    StockReport {
        last_updated,
        out_of_stock: aggregation.out_of_stock,
        critical_stock: aggregation.critical,
        in_stock: aggregation.in_stock,
        situations: aggregation.situations,
        mean_quantity_by_sku: aggregation.mean_by_sku,
        mean_quantity_by_retailer: aggregation.mean_by_retailer,
        out_of_stock_stores,
        warnings,
    }
}

impl StockReport {
    pub fn bucket(&self, level: StockLevel) -> &[BucketRow] {
        match level {
            StockLevel::OutOfStock => &self.out_of_stock,
            StockLevel::Critical => &self.critical_stock,
            StockLevel::InStock => &self.in_stock,
        }
    }

    /// All tables in display order. The drill-down table flattens the
    /// per-retailer groups back into rows, still ordered by retailer.
    pub fn tables(&self) -> Vec<Table> {
        let mut tables: Vec<Table> = StockLevel::ALL
            .iter()
            .map(|level| Table::from_rows(level.name(), level.title(), self.bucket(*level)))
            .collect();

        tables.push(Table::from_rows(
            "situations",
            "Out of Stock Situations",
            &self.situations,
        ));
        tables.push(Table::from_rows(
            "mean_quantity_by_sku",
            "Average Quantity by SKU",
            &self.mean_quantity_by_sku,
        ));
        tables.push(Table::from_rows(
            "mean_quantity_by_retailer",
            "Average Quantity by Retailer",
            &self.mean_quantity_by_retailer,
        ));

        let sightings: Vec<StoreSkuRow> = self
            .out_of_stock_stores
            .values()
            .flat_map(|rows| rows.iter().cloned())
            .collect();
        tables.push(Table::from_rows(
            "out_of_stock_stores",
            "Out of Stock Stores",
            &sightings,
        ));
        tables
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.tables().into_iter().find(|t| t.name == name)
    }

    /// Full text report: last-updated line, warnings, then every table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self.last_updated {
            Some(date) => {
                let _ = writeln!(out, "Last updated: {}", date.format("%Y-%m-%d"));
            }
            None => {
                let _ = writeln!(out, "Last updated: unknown");
            }
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "Warning: {}", warning);
        }
        for table in self.tables() {
            let _ = writeln!(out);
            out.push_str(&table.render());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::models::StockRecord;
    use crate::reference::ReferenceData;

    fn sample_report() -> StockReport {
        let records = vec![
            StockRecord::new("Currys", "Air", "S1", 0),
            StockRecord::new("Currys", "Air", "S2", 1),
            StockRecord::new("Currys", "Solo", "S1", 0),
            StockRecord::new("Argos", "Air", "Leeds", 0),
            StockRecord::new("Argos", "Solo", "Leeds", 6),
        ];
        let reference = ReferenceData::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![("Currys".to_string(), 20)],
        );
        let aggregation = aggregate(records, &reference).unwrap();
        assemble(aggregation, NaiveDate::from_ymd_opt(2024, 10, 14))
    }

    #[test]
    fn tables_use_literal_column_names() {
        let report = sample_report();
        let names: Vec<&str> = report.tables().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "out_of_stock",
                "critical_stock",
                "in_stock",
                "situations",
                "mean_quantity_by_sku",
                "mean_quantity_by_retailer",
                "out_of_stock_stores",
            ]
        );

        let bucket = report.table("out_of_stock").unwrap();
        assert_eq!(
            bucket.columns,
            &["Retailer", "SKU", "Number of Stores", "Average Quantity"]
        );
        let situations = report.table("situations").unwrap();
        assert_eq!(situations.columns[0], "Retailer");
        assert_eq!(situations.columns[1], "Number of Situations");
        assert_eq!(report.table("out_of_stock_stores").unwrap().columns, &["Retailer", "Store", "SKU"]);
    }

    #[test]
    fn drill_down_groups_sightings_by_retailer() {
        let report = sample_report();
        assert_eq!(
            report.out_of_stock_stores.keys().collect::<Vec<_>>(),
            vec!["Argos", "Currys"]
        );
        let currys = &report.out_of_stock_stores["Currys"];
        assert_eq!(currys.len(), 2);
        assert!(currys.iter().all(|r| r.retailer == "Currys" && r.store == "S1"));
    }

    #[test]
    fn missing_reference_becomes_a_warning() {
        let report = sample_report();
        assert_eq!(
            report.warnings,
            vec!["No reference listing total for: Argos".to_string()]
        );
        let rendered = report.render();
        assert!(rendered.contains("Warning: No reference listing total for: Argos"));
        assert!(rendered.contains("Last updated: 2024-10-14"));
        assert!(rendered.contains("Out of Stock (0 units or less)"));
        assert!(rendered.contains("Critical Stock Levels (1 unit)"));
        assert!(rendered.contains("In Stock (2 or more units)"));
    }

    #[test]
    fn render_pads_columns_and_marks_empty_tables() {
        let table = Table {
            name: "t",
            title: "Title",
            columns: &["Retailer", "Number of Stores"],
            rows: vec![vec!["Toolstation".to_string(), "3".to_string()]],
        };
        let text = table.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Title");
        assert_eq!(lines[1], "  Retailer     Number of Stores");
        assert_eq!(lines[3], "  Toolstation  3");

        let empty = Table {
            rows: Vec::new(),
            ..table
        };
        assert!(empty.render().contains("(none)"));
    }

    #[test]
    fn json_export_keys_rows_by_column_name() {
        let report = sample_report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["last_updated"], "2024-10-14");
        let first = &json["out_of_stock"][0];
        assert_eq!(first["Retailer"], "Argos");
        assert_eq!(first["Number of Stores"], 1);
        assert!(json["situations"][0]["Out of Stock Rate (%)"].is_null());
        assert_eq!(json["situations"][1]["Out of Stock Rate (%)"], 10.0);
    }
}
