//! # ff-io
//!
//! Parquet-backed storage for the fake-factor tools.
//!
//! - [`template_store`]: read-only histogram template store addressed by
//!   composite keys.
//! - [`event_table`]: column-oriented event tables (primary, friend and
//!   output), joined by row position.
//! - [`parquet_io`]: low-level Parquet read/write helpers shared by both.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event_table;
pub mod parquet_io;
pub mod template_store;

pub use event_table::EventTable;
pub use parquet_io::PartialFile;
pub use template_store::{TemplateKey, TemplateStore};
