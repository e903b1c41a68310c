//! Sluice Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, naming rules, and error handling for the Sluice workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the common error type and result alias
//! - **Types**: records, write dispositions, and column types
//! - **Naming**: how source field names become destination identifiers
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::types::{records_from_value, WriteDisposition};
//!
//! fn parse() -> sluice_common::Result<()> {
//!     let records = records_from_value(serde_json::json!([{"id": 1}, {"id": 2}]))?;
//!     let disposition: WriteDisposition = "merge".parse()?;
//!     assert_eq!(records.len(), 2);
//!     assert_eq!(disposition, WriteDisposition::Merge);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod naming;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SluiceError};
pub use types::{ColumnType, Record, WriteDisposition};
