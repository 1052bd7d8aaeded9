//! # Stockwatch
//!
//! Weekly retail stock-level reporting.
//!
//! Stockwatch takes a retailer stock spreadsheet (one row per Retailer × SKU
//! × Store, with a Quantity), cleans it against reference tables, buckets
//! every (Retailer, SKU) pair into out-of-stock / critical / in-stock, and
//! reports out-of-stock situations and rates against each retailer's total
//! listings. Each successful upload replaces the persisted state and is
//! archived for later restore.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ Spreadsheet │──▶│ Normalizer │──▶│ Aggregator │──▶│  Report  │
//! │  xlsx/csv   │   │ alias+drop │   │ buckets+KPI│   │ Assembler│
//! └─────────────┘   └────────────┘   └─────┬──────┘   └────┬─────┘
//!                                          │               │
//!                      ┌───────────────────┤               ▼
//!                      ▼                   ▼          ┌──────────┐
//!                 ┌──────────┐       ┌──────────┐     │ CLI/JSON │
//!                 │  State   │       │ Archive  │     └──────────┘
//!                 │ (CSV x4) │       │ dir / S3 │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! stockwatch ingest week41.xlsx     # process an upload
//! stockwatch show                   # report for the last upload
//! stockwatch export --output r.json # same report as JSON
//! stockwatch archive restore        # rebuild from the latest archive
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, stock levels, report row types |
//! | [`reference`] | SKU aliases, ignore lists, listing totals |
//! | [`sheet`] | xlsx / CSV reading and column validation |
//! | [`normalize`] | Alias and filter records |
//! | [`aggregate`] | Buckets, situations, rates, means |
//! | [`report`] | Named tables for display and export |
//! | [`state`] | Persisted state files |
//! | [`archive`] | Upload archive (directory backend) |
//! | [`archive_s3`] | Upload archive (S3 backend) |
//! | [`ingest`] | Upload and restore orchestration |
//! | [`error`] | Pipeline and archive errors |

pub mod aggregate;
pub mod archive;
pub mod archive_s3;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod reference;
pub mod report;
pub mod sheet;
pub mod show;
pub mod state;
