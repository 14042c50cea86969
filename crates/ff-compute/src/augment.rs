//! Per-file augmentation: primary + friend table in, fake-factor table out.
//!
//! For every row and every leg of the channel the worker resolves the
//! category, looks up the composition fractions at the bin of the
//! category-defining observable, assembles the feature vector and evaluates
//! the nominal fake factor plus every systematic variation. Values outside
//! `[0, 999]` are written as 0 and reported to the diagnostic sink.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ff_core::features::FeatureSource;
use ff_core::{Channel, Error, FeatureSchema, Leg, Result, Shift};
use ff_io::{EventTable, PartialFile};

use crate::config::RunPaths;
use crate::diagnostics::{ClampRecord, DiagnosticSink};
use crate::fake_factor::{FakeFactorEvaluator, clamp_fake_factor};
use crate::fractions::CompositionFractions;

/// Outcome of one processed file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    /// Entry name (`<entry>/<entry>.parquet`).
    pub entry: String,
    /// Detected channel.
    pub channel: Channel,
    /// Rows written.
    pub rows: usize,
    /// Values replaced by 0.
    pub clamped: usize,
    /// Final output path.
    pub output: PathBuf,
}

/// Output table of one file before it is written.
#[derive(Debug, Clone)]
pub struct AugmentedTable {
    /// Fake-factor columns, one row per input row.
    pub table: EventTable,
    /// Number of values replaced by 0.
    pub clamped: usize,
}

enum FeatureColumn<'t> {
    Field(&'t [f64]),
    Fraction(ff_core::FractionGroup),
}

/// Shared, read-only state of all workers of a run.
pub struct AugmentationWorker {
    fractions: Arc<CompositionFractions>,
    evaluators: BTreeMap<Channel, Arc<dyn FakeFactorEvaluator>>,
    expressions: BTreeMap<Channel, String>,
    paths: RunPaths,
    sink: Arc<dyn DiagnosticSink>,
}

impl AugmentationWorker {
    /// Worker over precomputed fractions and loaded evaluators.
    pub fn new(
        fractions: Arc<CompositionFractions>,
        paths: RunPaths,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            fractions,
            evaluators: BTreeMap::new(),
            expressions: BTreeMap::new(),
            paths,
            sink,
        }
    }

    /// Register the evaluator and the category-defining observable of a channel.
    pub fn with_channel(
        mut self,
        channel: Channel,
        expression: impl Into<String>,
        evaluator: Arc<dyn FakeFactorEvaluator>,
    ) -> Self {
        self.evaluators.insert(channel, evaluator);
        self.expressions.insert(channel, expression.into());
        self
    }

    /// Run paths.
    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Augment the input table of `entry` and write the output table.
    ///
    /// The output directory `<output>/<entry>` must not exist yet. A file that
    /// fails after creating it leaves neither the directory nor a partial table.
    pub fn process(&self, entry: &str) -> Result<FileReport> {
        let channel = Channel::from_filename(entry)?;
        tracing::debug!(entry, %channel, "processing");

        let primary_path = RunPaths::table_path(&self.paths.directory, entry);
        let friend_path = RunPaths::table_path(self.paths.friend_dir(channel)?, entry);
        let primary = EventTable::read_parquet(&primary_path)?;
        let friend = EventTable::read_parquet(&friend_path)?;
        let events = primary.join_friend(friend)?;
        self.check_declared_categories(channel, &events)?;

        let out_dir = self.paths.output_directory.join(entry);
        create_output_dir(&out_dir)?;
        let written = self.write_output(channel, &events, entry, &out_dir);
        if written.is_err() {
            let _ = std::fs::remove_dir_all(&out_dir);
        }
        let (target, rows, clamped) = written?;

        tracing::debug!(entry, rows, clamped, output = %target.display(), "finished");
        Ok(FileReport { entry: entry.to_string(), channel, rows, clamped, output: target })
    }

    /// Augment and write into `out_dir`, which this file owns.
    fn write_output(
        &self,
        channel: Channel,
        events: &EventTable,
        entry: &str,
        out_dir: &Path,
    ) -> Result<(PathBuf, usize, usize)> {
        let AugmentedTable { table, clamped } = self.augment_table(channel, events, entry)?;
        let rows = table.n_rows();
        let partial = PartialFile::new(out_dir.join(format!("{entry}.parquet")));
        table.write_parquet(partial.path())?;
        Ok((partial.commit()?, rows, clamped))
    }

    fn check_declared_categories(&self, channel: Channel, events: &EventTable) -> Result<()> {
        let key = format!("{}.classes", channel.category_index_field());
        let Some(declared) = events.metadata(&key) else {
            return Ok(());
        };
        let declared: Vec<String> =
            declared.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        let scheme = self
            .fractions
            .channel(channel)
            .ok_or_else(|| Error::Config(format!("no fractions computed for {channel}")))?
            .scheme();
        scheme.validate_declared(&declared)
    }

    /// Build the output table of `events` in memory.
    ///
    /// Columns per leg: `ff<leg>_nom`, then `ff<leg>_<source>_<up|down>` in
    /// source order. The `tree` metadata names the output tree.
    pub fn augment_table(
        &self,
        channel: Channel,
        events: &EventTable,
        file: &str,
    ) -> Result<AugmentedTable> {
        let evaluator = self
            .evaluators
            .get(&channel)
            .ok_or_else(|| Error::Config(format!("no fake-factor function loaded for {channel}")))?;
        let expression = self
            .expressions
            .get(&channel)
            .ok_or_else(|| Error::Config(format!("no expression configured for {channel}")))?;
        let scheme = self
            .fractions
            .channel(channel)
            .ok_or_else(|| Error::Config(format!("no fractions computed for {channel}")))?
            .scheme();

        let n_rows = events.n_rows();
        let observable = events.column(expression)?;
        let category_index = events.column(&channel.category_index_field())?;
        let shifts = Shift::for_channel(channel);

        let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
        let mut clamped = 0usize;
        for &leg in channel.legs() {
            let schema = FeatureSchema::for_leg(channel, leg);
            let inputs: Vec<FeatureColumn<'_>> = schema
                .iter()
                .map(|(_, source)| match source {
                    FeatureSource::Field(name) => events.column(name).map(FeatureColumn::Field),
                    FeatureSource::Fraction(group) => Ok(FeatureColumn::Fraction(*group)),
                })
                .collect::<Result<_>>()?;

            let mut nominal = Vec::with_capacity(n_rows);
            let mut shifted: Vec<Vec<f64>> = vec![Vec::with_capacity(n_rows); shifts.len()];
            let mut features = Vec::with_capacity(inputs.len());

            for row in 0..n_rows {
                let key = scheme.resolve(leg, category_index[row], row)?;
                let set = self.fractions.get(channel, key)?;
                let cell = set.find_bin(observable[row]);

                features.clear();
                for input in &inputs {
                    features.push(match input {
                        FeatureColumn::Field(values) => values[row],
                        FeatureColumn::Fraction(group) => set.fraction(*group, cell)?,
                    });
                }

                let raw = evaluator.value(&features, None)?;
                nominal.push(self.checked(raw, file, row, leg, "nominal", &features, &mut clamped));
                for (shift, out) in shifts.iter().zip(shifted.iter_mut()) {
                    let raw = evaluator.value(&features, Some(*shift))?;
                    let name = shift.name();
                    out.push(self.checked(raw, file, row, leg, &name, &features, &mut clamped));
                }
            }

            columns.push((format!("ff{leg}_nom"), nominal));
            for (shift, values) in shifts.iter().zip(shifted) {
                columns.push((format!("ff{leg}_{}", shift.name()), values));
            }
        }

        let table = EventTable::from_columns(file, columns)?.with_metadata("tree", channel.tree_name());
        Ok(AugmentedTable { table, clamped })
    }

    #[allow(clippy::too_many_arguments)]
    fn checked(
        &self,
        raw: f64,
        file: &str,
        row: usize,
        leg: Leg,
        variation: &str,
        features: &[f64],
        clamped: &mut usize,
    ) -> f64 {
        let (value, was_clamped) = clamp_fake_factor(raw);
        if was_clamped {
            *clamped += 1;
            self.sink.value_clamped(&ClampRecord {
                file: file.to_string(),
                row,
                leg,
                variation: variation.to_string(),
                raw,
                features: features.to_vec(),
            });
        }
        value
    }
}

/// Create the per-file output directory; it must not exist yet.
fn create_output_dir(dir: &Path) -> Result<()> {
    match std::fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::OutputExists(dir.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
