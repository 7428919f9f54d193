#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Population grid processing.
//!
//! Restricts the national population grid to a city bounding box,
//! reduces it to a bounded number of weighted sample points, and
//! summarizes the density distribution. The [`ingest`] module loads the
//! grid and commerce inputs from disk; everything else is pure and
//! in-memory.

pub mod filter;
pub mod ingest;
pub mod sample;
pub mod summary;

use thiserror::Error;

pub use filter::filter;
pub use sample::sample;
pub use summary::{PopulationSummary, summarize};

/// Errors that can occur while loading grid or commerce inputs.
#[derive(Debug, Error)]
pub enum GridError {
    /// File could not be opened or read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data conversion error.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
