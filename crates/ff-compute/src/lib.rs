//! # ff-compute
//!
//! Fake-factor computation for friend-table production.
//!
//! - [`fractions`]: composition fractions per (channel, category) from
//!   control-region templates.
//! - [`fake_factor`]: fake-factor function archives, load-time shift
//!   validation and evaluation.
//! - [`augment`]: the per-file worker producing `ff<leg>_*` columns.
//! - [`dispatch`]: input discovery and the fixed-size worker pool.
//! - [`config`]: YAML analysis configuration and run paths.
//! - [`diagnostics`]: the sink receiving locally corrected values.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod augment;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod fake_factor;
pub mod fractions;

#[cfg(test)]
pub(crate) mod testing;

pub use augment::{AugmentationWorker, AugmentedTable, FileReport};
pub use config::{AnalysisConfig, RunPaths, load_analysis_config};
pub use diagnostics::{DiagnosticSink, TracingSink};
pub use dispatch::{Dispatcher, InputFile, RunSummary, discover_inputs, prepare_output_dir};
pub use fake_factor::{FakeFactorEvaluator, FakeFactorFunction, clamp_fake_factor};
pub use fractions::{ChannelSpec, CompositionFractions, FractionEngine};
