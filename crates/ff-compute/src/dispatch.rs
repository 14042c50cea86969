//! Input discovery and the per-file worker pool.

use std::path::Path;

use rayon::prelude::*;

use ff_core::{Channel, Error, Result};

use crate::augment::{AugmentationWorker, FileReport};
use crate::config::RunPaths;

/// One input entry scheduled for augmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Entry name; the table lives at `<entry>/<entry>.parquet`.
    pub entry: String,
    /// Channel decoded from the name.
    pub channel: Channel,
}

/// Enumerate input entries of `era` under `paths.directory`, sorted by name.
///
/// Entries must contain `Run<era>` and either `Single` or `Tau`. Every
/// selected entry must have its primary and friend table on disk; the first
/// missing file aborts discovery.
pub fn discover_inputs(paths: &RunPaths, era: &str) -> Result<Vec<InputFile>> {
    let tag = format!("Run{era}");
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&paths.directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.contains(&tag) && (name.contains("Single") || name.contains("Tau")) {
            names.push(name);
        }
    }
    names.sort();

    let mut inputs = Vec::with_capacity(names.len());
    for name in names {
        let channel = Channel::from_filename(&name)?;
        let primary = RunPaths::table_path(&paths.directory, &name);
        if !primary.is_file() {
            return Err(Error::MissingInput { path: primary, hint: "--directory".into() });
        }
        let friend = RunPaths::table_path(paths.friend_dir(channel)?, &name);
        if !friend.is_file() {
            return Err(Error::MissingInput {
                path: friend,
                hint: format!("--{channel}-friend-directory"),
            });
        }
        inputs.push(InputFile { entry: name, channel });
    }
    tracing::info!(
        directory = %paths.directory.display(),
        era,
        files = inputs.len(),
        "input files discovered"
    );
    Ok(inputs)
}

/// Create the output root; it must not exist yet.
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Err(Error::OutputExists(dir.to_path_buf()));
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Totals of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Per-file reports in input order.
    pub files: Vec<FileReport>,
}

impl RunSummary {
    /// Rows written across all files.
    pub fn rows(&self) -> usize {
        self.files.iter().map(|f| f.rows).sum()
    }

    /// Values clamped across all files.
    pub fn clamped(&self) -> usize {
        self.files.iter().map(|f| f.clamped).sum()
    }
}

/// Fixed-size worker pool over input files.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    num_threads: usize,
}

impl Dispatcher {
    /// Pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads: num_threads.max(1) }
    }

    /// Process every input and wait for all of them.
    ///
    /// A failing file does not stop its siblings; once all tasks have
    /// finished, any failures are returned together as
    /// [`Error::FilesFailed`] and the outputs of successful files are kept.
    pub fn run(&self, worker: &AugmentationWorker, inputs: &[InputFile]) -> Result<RunSummary> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| Error::Config(format!("failed to create thread pool: {e}")))?;
        tracing::info!(files = inputs.len(), threads = self.num_threads, "dispatching");

        let results: Vec<(&InputFile, Result<FileReport>)> = pool.install(|| {
            inputs.par_iter().map(|input| (input, worker.process(&input.entry))).collect()
        });

        let mut summary = RunSummary::default();
        let mut failures = Vec::new();
        for (input, result) in results {
            match result {
                Ok(report) => summary.files.push(report),
                Err(e) => {
                    tracing::error!(entry = %input.entry, error = %e, "file failed");
                    failures.push(format!("{}: {e}", input.entry));
                }
            }
        }
        if !failures.is_empty() {
            return Err(Error::FilesFailed { total: inputs.len(), failures });
        }
        Ok(summary)
    }
}
