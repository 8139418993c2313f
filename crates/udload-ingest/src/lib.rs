//! UDLoad Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Turns a working directory of uploaded archives, workbooks and CSV files
//! into typed tables, then runs the report script over them.
//!
//! # Stages
//!
//! - **Archives** ([`archive`]): unpack `.zip`/`.tar(.gz)` in place,
//!   detecting the encoding of zip entry names
//! - **Spreadsheets** ([`spreadsheet`]): one CSV per sheet, in parallel
//! - **Loading** ([`loader`]): map headers through the field mapping
//!   ([`schema`]), coerce values ([`coerce`]) and bulk load each data
//!   directory ([`discovery`]) into its `*_UD` table
//! - **Script** ([`script`]): the report script on one session
//!
//! [`pipeline::Pipeline`] sequences the stages and reports a
//! [`pipeline::RunResult`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use udload_ingest::config::AppConfig;
//! use udload_ingest::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let result = Pipeline::new(config)?.run(Path::new("./uploads/run-42")).await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod coerce;
pub mod config;
pub mod db;
pub mod discovery;
pub mod encoding;
pub mod error;
pub mod fsutil;
pub mod loader;
pub mod pipeline;
pub mod report;
pub mod run_log;
pub mod schema;
pub mod script;
pub mod spreadsheet;
pub mod table;

pub use error::{IngestError, Result};
pub use pipeline::{run_blocking, Pipeline, RunResult, RunState};
