//! Error types shared by the fake-factor crates.

use std::path::PathBuf;

use thiserror::Error;

/// Fake-factor error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Arrow array or schema error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet read/write error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Histogram key absent from the template store.
    #[error("histogram not found in template store: {0}")]
    MissingHistogram(String),

    /// Event table lacks a required column.
    #[error("missing field '{field}' in {table}")]
    MissingField {
        /// Column name.
        field: String,
        /// Table description (usually a file path).
        table: String,
    },

    /// Two histograms with different binning were combined.
    #[error("incompatible binning: {0}")]
    IncompatibleBinning(String),

    /// Per-event category index outside the configured category list.
    #[error("invalid category index {value} at row {row} (leg {leg}, {n_categories} categories)")]
    InvalidCategoryIndex {
        /// Raw value read from the event.
        value: f64,
        /// Row number in the input table.
        row: usize,
        /// Leg number (1 or 2).
        leg: u8,
        /// Number of categories configured for the leg.
        n_categories: usize,
    },

    /// Upstream classifier ordering disagrees with the configured categories.
    #[error("category ordering mismatch for {channel}: table declares {declared:?}, configured {configured:?}")]
    CategoryMismatch {
        /// Channel name.
        channel: String,
        /// Ordering declared in the event table metadata.
        declared: Vec<String>,
        /// Ordering from the configuration.
        configured: Vec<String>,
    },

    /// Invalid or inconsistent fake-factor function archive.
    #[error("invalid fake-factor archive {path}: {reason}")]
    InvalidArchive {
        /// Archive path (or `<memory>`).
        path: String,
        /// Human readable reason.
        reason: String,
    },

    /// Shift not known to the evaluator.
    #[error("unknown systematic shift: {0}")]
    UnknownShift(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Expected input file is missing.
    #[error("expected file {path} does not exist ({hint})")]
    MissingInput {
        /// Missing path.
        path: PathBuf,
        /// Which option controls the location.
        hint: String,
    },

    /// Refusing to overwrite an existing output path.
    #[error("output path {0} already exists, refusing to overwrite")]
    OutputExists(PathBuf),

    /// One or more dispatched files failed; successful siblings are kept.
    #[error("{} of {total} files failed:\n  {}", .failures.len(), .failures.join("\n  "))]
    FilesFailed {
        /// Number of dispatched files.
        total: usize,
        /// One `path: error` line per failed file.
        failures: Vec<String>,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
