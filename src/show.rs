//! `stockwatch show`: print the report for the last successful upload.

use anyhow::Result;

use crate::config::Config;
use crate::reference::ReferenceData;
use crate::report::{assemble, StockReport};
use crate::state::StateStore;

pub const NO_DATA: &str = "No data uploaded yet. Please upload a data sheet.";

/// Rebuild the report from the persisted state files, or `None` before the
/// first upload.
pub fn load_report(config: &Config) -> Result<Option<StockReport>> {
    let store = StateStore::from_config(config);
    let saved = match store.load()? {
        Some(saved) => saved,
        None => return Ok(None),
    };
    let reference = ReferenceData::from_config(&config.reference);
    let last_updated = saved.last_updated;
    Ok(Some(assemble(saved.into_aggregation(&reference), last_updated)))
}

pub fn run_show(config: &Config) -> Result<()> {
    match load_report(config)? {
        Some(report) => print!("{}", report.render()),
        None => println!("{}", NO_DATA),
    }
    Ok(())
}
