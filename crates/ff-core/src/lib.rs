//! # ff-core
//!
//! Core types for data-driven fake-factor estimation.
//!
//! This crate holds everything the other crates agree on: the error type,
//! the flow-aware [`Histogram`], detector [`Channel`]s and their legs, the
//! category schemes used to index composition fractions, the process-group
//! composition of each fraction, the systematic shift vocabulary, and the
//! per-channel feature schema fed into the fake-factor function.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod category;
pub mod channel;
pub mod composition;
pub mod error;
pub mod features;
pub mod histogram;
pub mod systematics;

pub use category::{CategoryKey, CategoryScheme};
pub use channel::{Channel, Leg};
pub use composition::{FractionGroup, ProcessGroups};
pub use error::{Error, Result};
pub use features::FeatureSchema;
pub use histogram::Histogram;
pub use systematics::{Shift, ShiftDirection, SystematicSource};

/// Crate version, shared by the CLI `version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
