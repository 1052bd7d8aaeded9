//! Reference data: SKU aliases, ignore lists, and listing totals.
//!
//! The built-in tables below are what ships with the crate. A `[reference]`
//! section in the config file replaces any of them field by field. Once
//! loaded, [`ReferenceData`] is immutable for the life of the process.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;

use crate::config::{Config, ReferenceConfig};

/// Raw SKU label → canonical display name.
pub const BUILTIN_SKU_ALIASES: &[(&str, &str)] = &[
    ("226-800604901", "Air Bundle"),
    ("226-802600101", "Air"),
    ("226-802604501", "POS Lite"),
    ("226-802610001", "Solo"),
    ("226-802620001", "Solo & Printer"),
    ("226-902600701", "3G"),
    ("386803    :  SP6 SP6 POS L &SOLO", "POS Lite"),
    ("537815    :  SP6 SP6 SUMUP  SOLO", "Solo"),
    ("604611    :  SP6 SUMUP AIR", "Air"),
    ("660513    :  SP6 AIR BUNDL E", "Air Bundle"),
    ("626938    :  SP6 SUMUPSOLL OPRNTER", "Solo & Printer"),
    ("613971    :  SP6 SP6 SUMUP  3G+ PK", "3G PK"),
    ("SUMUP AIR CRADLE BUNDLE PK1", "Air Bundle"),
    ("SUMUP SOLO                PK1", "Solo"),
    ("SUMUP 3G PAYMENT KIT/PRINTER PK1 DNO", "3G PK"),
    ("DX SUMUP AIR CARD PAYMENT DEVICE PK1", "Air"),
    ("DX SUMUP 3G CARD PAYMENT DEVICE PK1 DNO", "3G"),
    (
        "3593051055-SumUp Air Card Reader-A Smarter Way to Get Paid",
        "Air",
    ),
    ("3597012311-SumUp Solo Smart Card Terminal-", "Solo"),
    ("3597012312-SumUp AirPlus Cradle Bundle-", "Air Bundle"),
    ("3597012314-SumUp POS Lite Solo Bundle-", "POS Lite"),
    (
        "1250000000-SumUp Solo+ Printer-Payment Card Reader",
        "Solo & Printer",
    ),
    ("SUMUP AIR CARD READER EACH", "Air"),
    ("SUMUP SOLO SMART CARD TERMINAL EACH", "Solo"),
    ("SOLO & PRINTER BUNDLE RETAIL UK EACH", "Solo & Printer"),
    ("POS LITE & SOLO BUNDLE UK EACH", "POS Lite"),
    ("226-RDR-SUL-004", "Solo Lite"),
    ("226-BUN-SUL-003", "Solo Lite Bundle"),
    ("SUM UP AIR CONTACTLESS CARD READER", "Air"),
    ("SUMUP SOLO SMART CARD TERMINAL", "Solo"),
];

/// Discontinued SKUs, matched after aliasing.
///
/// Several entries are raw labels whose alias ("3G", "3G PK") is not itself
/// ignored, so rows carrying them survive the filter under the canonical
/// name. Alias first, filter second.
pub const BUILTIN_IGNORED_SKUS: &[&str] = &[
    "SUMUP 3G PAYMENT KIT/PRINTER PK1 DNO",
    "DX SUMUP 3G CARD PAYMENT DEVICE PK1 DNO",
    "613971    :  SP6 SP6 SUMUP  3G+ PK",
    "226-902600701",
    "3597012300-SumUp Air Cradle-Docking Station White",
    "3597012310-SumUp Air Reader and Cradle-Bundle White",
    "3597016543-SumUp 3G + Wifi Payment Reader-Standalone Card White",
    "3597016544-SumUp 3G Payment Kit-",
    "3597012301-Solo SumUp Card Reader-",
    "3597012313-Sumup Point of Sale Lite-",
    "SUMUP AIR CHARGING CRADLE CHARGER EACH",
    "SUMUP 3G+ WIFI CARD READER PAYMENT KIT EACH",
    "SUMUP 3G+ WIFI CARD READER EACH",
];

/// Online, virtual, returns, and closed stores.
pub const BUILTIN_IGNORED_STORES: &[&str] = &[
    // Currys
    "04944: CURRYS ONLINE 'OMS VIRTUAL'",
    "04947: PCW ONLINE OMS VIRTUAL",
    "04985: IRELAND ONLINE SMALLBOX DIRECT",
    "07272: ONLINE CSC INVESTIGATIONS",
    "05088: PCWB DIRECT SALE 'OMS VIRTUAL'",
    "05089: PCWB ONLINE CUSTOMER RETURNS",
    "07099: NEWARK RDC",
    "07800: NATIONAL RETURNS",
    "04943: CURRYS TELESALES 'OMS VIRTUAL'",
    // Toolstation
    "(CLOSED) BOURNEMOUTH TOOLSTATION",
    "(CLOSED) BRIDGWATER TOOLSTATION",
    "(CLOSED) DUMFRIES TOOLSTATION",
    "(CLOSED) EDMONTON TOOLSTATION",
    "(CLOSED) HOLMES CHAPEL TOOLSTATION",
    "(CLOSED) BRIMSDOWN TOOLSTATION",
    "(CLOSED) NUNEATON TOOLSTATION",
    "(CLOSED) STIRCHLEY TOOLSTATION",
    "(CLOSED) SLOUGH TOOLSTATION",
    "(CLOSED) TAUNTON TOOLSTATION",
    "(CLOSED) FOLKESTONE TOOLSTATION",
    "(CLOSED) HOVE DAVIGDOR ROAD TOOLSTATION",
    "(CLOSED) WIMBLEDON TOOLSTATION",
    "(CLOSED) HEREFORD TOOLSTATION",
    "(CLOSED) HUNTINGDON TOOLSTATION",
    "(CLOSED) SHEPTON MALLET TOOLSTATION",
    "(CLOSED) MALVERN TOOLSTATION",
    "(CLOSED) CHADWELL HEATH TOOLSTATION",
    "(CLOSED) STOCKPORT TOOLSTATION",
    "(CLOSED) PERRY BARR TOOLSTATION",
    "(CLOSED) BOREHAMWOOD TOOLSTATION",
    "(CLOSED) CARDIFF OCEAN WAY TOOLSTATION",
    "(CLOSED) OXFORD BOTLEY TOOLSTATION",
    "(CLOSED) KINGSTON UPON THAMES TOOLSTATION",
    "(CLOSED) BICESTER TOOLSTATION",
    "(CLOSED) EXETER TOOLSTATION",
    "(CLOSED) CLEARANCE CORNER TOOLSTATION",
    "CONTACT CENTRE TOOLSTATION",
    "WEBSITE TOOLSTATION",
    // Screwfix
    "WWW.SCREWFIX.COM",
    "SCREWFIX LIVE",
    "SCREWFIX.IE",
];

pub fn builtin_sku_aliases() -> BTreeMap<String, String> {
    BUILTIN_SKU_ALIASES
        .iter()
        .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
        .collect()
}

pub fn builtin_ignored_skus() -> Vec<String> {
    BUILTIN_IGNORED_SKUS.iter().map(|s| s.to_string()).collect()
}

pub fn builtin_ignored_stores() -> Vec<String> {
    BUILTIN_IGNORED_STORES.iter().map(|s| s.to_string()).collect()
}

/// Store key used for ignore matching: trimmed and upper-cased.
pub fn store_key(store: &str) -> String {
    store.trim().to_uppercase()
}

/// Process-wide, read-only lookup tables.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    sku_aliases: HashMap<String, String>,
    ignored_skus: HashSet<String>,
    /// Already passed through [`store_key`].
    ignored_stores: HashSet<String>,
    listing_totals: BTreeMap<String, u64>,
}

impl ReferenceData {
    pub fn new(
        sku_aliases: impl IntoIterator<Item = (String, String)>,
        ignored_skus: impl IntoIterator<Item = String>,
        ignored_stores: impl IntoIterator<Item = String>,
        listing_totals: impl IntoIterator<Item = (String, u64)>,
    ) -> Self {
        Self {
            sku_aliases: sku_aliases.into_iter().collect(),
            ignored_skus: ignored_skus.into_iter().collect(),
            ignored_stores: ignored_stores.into_iter().map(|s| store_key(&s)).collect(),
            listing_totals: listing_totals.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ReferenceConfig) -> Self {
        Self::new(
            config.sku_aliases.clone(),
            config.ignored_skus.clone(),
            config.ignored_stores.clone(),
            config.listing_totals.clone(),
        )
    }

    /// Built-in aliases and ignore lists, no listing totals.
    pub fn builtin() -> Self {
        Self::new(
            builtin_sku_aliases(),
            builtin_ignored_skus(),
            builtin_ignored_stores(),
            BTreeMap::new(),
        )
    }

    /// Canonical name for `sku`, or `sku` itself when it has no alias.
    pub fn canonical_sku<'a>(&'a self, sku: &'a str) -> &'a str {
        self.sku_aliases.get(sku).map(String::as_str).unwrap_or(sku)
    }

    pub fn is_ignored_sku(&self, sku: &str) -> bool {
        self.ignored_skus.contains(sku)
    }

    pub fn is_ignored_store(&self, store: &str) -> bool {
        self.ignored_stores.contains(&store_key(store))
    }

    pub fn listing_total(&self, retailer: &str) -> Option<u64> {
        self.listing_totals.get(retailer).copied()
    }

    pub fn listing_totals(&self) -> &BTreeMap<String, u64> {
        &self.listing_totals
    }

    pub fn alias_count(&self) -> usize {
        self.sku_aliases.len()
    }

    pub fn ignored_sku_count(&self) -> usize {
        self.ignored_skus.len()
    }

    pub fn ignored_store_count(&self) -> usize {
        self.ignored_stores.len()
    }
}

/// Print a summary of the loaded reference tables (`stockwatch reference`).
pub fn print_reference(config: &Config) -> Result<()> {
    let reference = ReferenceData::from_config(&config.reference);

    println!("{:<24} {:>8}", "TABLE", "ENTRIES");
    println!("{:<24} {:>8}", "sku_aliases", reference.alias_count());
    println!("{:<24} {:>8}", "ignored_skus", reference.ignored_sku_count());
    println!(
        "{:<24} {:>8}",
        "ignored_stores",
        reference.ignored_store_count()
    );
    println!(
        "{:<24} {:>8}",
        "listing_totals",
        reference.listing_totals().len()
    );

    if !reference.listing_totals().is_empty() {
        println!();
        println!("{:<24} {:>8}", "RETAILER", "LISTINGS");
        for (retailer, total) in reference.listing_totals() {
            println!("{:<24} {:>8}", retailer, total);
        }
    }

    Ok(())
}
