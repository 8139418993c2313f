//! UDLoad Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the UDLoad workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`UdloadError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: the field-mapping value objects ([`types::FieldDefinition`],
//!   [`types::DeclaredType`]) every stage of the pipeline reads
//!
//! # Example
//!
//! ```no_run
//! use udload_common::types::{DeclaredType, FieldDefinition};
//!
//! fn define() -> udload_common::Result<FieldDefinition> {
//!     FieldDefinition::new("CELL_ID", ["Cell ID", "小区ID"], DeclaredType::String)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, UdloadError};
