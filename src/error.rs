//! Error taxonomy for the stock pipeline and the archive store.
//!
//! [`PipelineError`] covers everything that aborts a run before any derived
//! state is written. [`ArchiveError`] is reported but never aborts a run:
//! archival is best-effort and not transactional with the pipeline.
//!
//! A missing reference listing total is not an error at all. It surfaces as
//! a warning on the report (see [`crate::report::StockReport::warnings`]).

use thiserror::Error;

use crate::models::REQUIRED_COLUMNS;

/// Fatal validation and parse failures. Any of these stops the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// One or more of the required columns is absent from the header row.
    #[error(
        "The file must have the columns: {} (missing: {})",
        REQUIRED_COLUMNS.join(", "),
        missing.join(", ")
    )]
    InputFormat { missing: Vec<String> },

    /// The file could not be read or is not a valid spreadsheet.
    #[error("could not read spreadsheet: {0}")]
    InputParse(String),

    /// A Quantity cell that is not integer-coercible.
    #[error("row {row}: Quantity '{value}' is not an integer")]
    InvalidQuantity { row: usize, value: String },

    /// A required field is empty after normalization.
    #[error(
        "required field {column} is empty (Retailer='{retailer}', SKU='{sku}', Store='{store}')"
    )]
    MissingField {
        column: &'static str,
        retailer: String,
        sku: String,
        store: String,
    },
}

/// Failures talking to the archive store.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive credentials unavailable: {0}")]
    Credentials(String),

    #[error("archive request failed: {0}")]
    Request(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ArchiveError {
    fn from(e: reqwest::Error) -> Self {
        ArchiveError::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_format_message_names_required_and_missing_columns() {
        let err = PipelineError::InputFormat {
            missing: vec!["Store".to_string(), "Quantity".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("The file must have the columns: Retailer, SKU, Store, Quantity"));
        assert!(msg.contains("missing: Store, Quantity"));
    }
}
