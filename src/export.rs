//! Export the current report as JSON.
//!
//! Produces one object with every report table. Table rows are keyed by
//! their literal column names (`"Number of Stores"`, `"Out of Stock Rate (%)"`),
//! so the output can be loaded straight into a dataframe or a spreadsheet.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::show::{load_report, NO_DATA};

/// Export the persisted report as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let report = match load_report(config)? {
        Some(report) => report,
        None => bail!("{}", NO_DATA),
    };
    let json = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} out-of-stock, {} critical, {} in-stock rows to {}",
                report.out_of_stock.len(),
                report.critical_stock.len(),
                report.in_stock.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
