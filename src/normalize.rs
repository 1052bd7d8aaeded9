//! SKU canonicalization and noise filtering.
//!
//! Three steps, always in this order:
//!
//! 1. replace each SKU with its canonical alias, if it has one;
//! 2. drop records whose (aliased) SKU is ignored;
//! 3. drop records whose store, trimmed and upper-cased, is ignored.
//!
//! Aliasing before filtering matters: a raw label such as
//! `"DX SUMUP 3G CARD PAYMENT DEVICE PK1 DNO"` is on the ignore list, but it
//! aliases to `"3G"`, which is not, so those rows are kept under `"3G"`.

use tracing::debug;

use crate::models::StockRecord;
use crate::reference::ReferenceData;

/// Counts of what the normalizer removed, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeStats {
    pub aliased: usize,
    pub ignored_sku: usize,
    pub ignored_store: usize,
}

/// Normalize a record set against the reference tables.
///
/// Store and SKU values are otherwise left untouched, including empty ones.
pub fn normalize(
    records: Vec<StockRecord>,
    reference: &ReferenceData,
) -> (Vec<StockRecord>, NormalizeStats) {
    let mut stats = NormalizeStats::default();

    let mut out = Vec::with_capacity(records.len());
    for mut record in records {
        let canonical = reference.canonical_sku(&record.sku);
        if canonical != record.sku {
            record.sku = canonical.to_string();
            stats.aliased += 1;
        }

        if reference.is_ignored_sku(&record.sku) {
            stats.ignored_sku += 1;
            continue;
        }
        if reference.is_ignored_store(&record.store) {
            stats.ignored_store += 1;
            continue;
        }
        out.push(record);
    }

    debug!(
        aliased = stats.aliased,
        ignored_sku = stats.ignored_sku,
        ignored_store = stats.ignored_store,
        kept = out.len(),
        "normalized records"
    );
    (out, stats)
}
