//! Fake-factor friend-table CLI

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

use ff_compute::{
    AnalysisConfig, AugmentationWorker, ChannelSpec, CompositionFractions, Dispatcher,
    FakeFactorFunction, FractionEngine, RunPaths, TracingSink, discover_inputs,
    load_analysis_config, prepare_output_dir,
};
use ff_core::Channel;
use ff_io::TemplateStore;

#[derive(Parser)]
#[command(name = "fakefactors")]
#[command(about = "Fake-factor estimation of jet -> tau misidentification backgrounds")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Also write the log to this file. `apply` defaults to
    /// `<era>_calculate_fake_factors.log`.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AnalysisArgs {
    /// Experiment era, e.g. 2016
    #[arg(long)]
    era: String,

    /// Key of the analysis variant in the configuration file
    #[arg(short = 'c', long)]
    config: String,

    /// YAML configuration file
    #[arg(long, default_value = "fake-factors/config.yaml")]
    config_file: PathBuf,

    /// Control-region template archive. Defaults to `fake-factors/<era>_ff_yields.parquet`.
    #[arg(long)]
    templates: Option<PathBuf>,
}

impl AnalysisArgs {
    fn templates_path(&self) -> PathBuf {
        self.templates
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("fake-factors/{}_ff_yields.parquet", self.era)))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute fake factors for every input file and write friend tables
    Apply {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Directory with the primary event tables
        #[arg(long)]
        directory: PathBuf,

        /// Friend tables of the et channel
        #[arg(long)]
        et_friend_directory: Option<PathBuf>,

        /// Friend tables of the mt channel
        #[arg(long)]
        mt_friend_directory: Option<PathBuf>,

        /// Friend tables of the tt channel
        #[arg(long)]
        tt_friend_directory: Option<PathBuf>,

        /// Fake-factor archive (JSON) of the et channel
        #[arg(long)]
        et_fake_factor_file: Option<PathBuf>,

        /// Fake-factor archive (JSON) of the mt channel
        #[arg(long)]
        mt_fake_factor_file: Option<PathBuf>,

        /// Fake-factor archive (JSON) of the tt channel
        #[arg(long)]
        tt_fake_factor_file: Option<PathBuf>,

        /// Number of worker threads
        #[arg(long, default_value = "32")]
        num_threads: usize,
    },

    /// Compute composition fractions only and write them as JSON
    Fractions {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match (&cli.log_file, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Commands::Apply { analysis, .. }) => {
            Some(PathBuf::from(format!("{}_calculate_fake_factors.log", analysis.era)))
        }
        (None, _) => None,
    };
    init_logging(cli.log_level, log_file.as_deref())?;

    match cli.command {
        Commands::Apply {
            analysis,
            directory,
            et_friend_directory,
            mt_friend_directory,
            tt_friend_directory,
            et_fake_factor_file,
            mt_fake_factor_file,
            tt_fake_factor_file,
            num_threads,
        } => {
            let mut paths = RunPaths { directory, ..RunPaths::default() };
            for (channel, friends, archive) in [
                (Channel::Et, et_friend_directory, et_fake_factor_file),
                (Channel::Mt, mt_friend_directory, mt_fake_factor_file),
                (Channel::Tt, tt_friend_directory, tt_fake_factor_file),
            ] {
                if let Some(dir) = friends {
                    paths.friend_directories.insert(channel, dir);
                }
                if let Some(file) = archive {
                    paths.fake_factor_files.insert(channel, file);
                }
            }
            cmd_apply(&analysis, paths, num_threads)
        }
        Commands::Fractions { analysis, output } => cmd_fractions(&analysis, output.as_ref()),
        Commands::Version => {
            println!("fakefactors {}", ff_core::VERSION);
            Ok(())
        }
    }
}

fn init_logging(level: tracing::Level, log_file: Option<&Path>) -> Result<()> {
    let filter = LevelFilter::from_level(level);
    let stderr = tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr);
    let file = match log_file {
        Some(path) => {
            let f = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(f)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry().with(filter).with(stderr).with(file).init();
    Ok(())
}

fn compute_fractions(
    analysis: &AnalysisArgs,
    config: &AnalysisConfig,
    sink: &TracingSink,
) -> Result<CompositionFractions> {
    let templates_path = analysis.templates_path();
    let store = TemplateStore::open(&templates_path)?;
    tracing::info!(path = %templates_path.display(), histograms = store.len(), "templates loaded");

    let specs: Vec<ChannelSpec> = config
        .channels()
        .into_iter()
        .map(|ch| config.channel_spec(ch))
        .collect::<ff_core::Result<_>>()?;
    let fractions = FractionEngine::new(&store, analysis.era.as_str(), sink)
        .compute(&specs)
        .context("composition fractions")?;
    tracing::info!(channels = specs.len(), rescaled = sink.rescaled(), "fractions determined");
    Ok(fractions)
}

fn cmd_apply(analysis: &AnalysisArgs, mut paths: RunPaths, num_threads: usize) -> Result<()> {
    let config = load_analysis_config(&analysis.config_file, &analysis.config)?;
    paths.output_directory = config.outputdir.clone();

    let inputs = discover_inputs(&paths, &analysis.era)?;
    let needed: BTreeSet<Channel> = inputs.iter().map(|i| i.channel).collect();
    for &channel in &needed {
        config.require(channel)?;
    }

    let sink = Arc::new(TracingSink::new());
    let fractions = Arc::new(compute_fractions(analysis, &config, &sink)?);

    let mut worker = AugmentationWorker::new(fractions, paths.clone(), sink.clone());
    for &channel in &needed {
        let archive = paths.fake_factor_file(channel)?;
        let function = FakeFactorFunction::load(archive, channel)
            .with_context(|| format!("loading {channel} fake factors"))?;
        worker = worker.with_channel(channel, config.require(channel)?.expression.clone(), Arc::new(function));
    }

    prepare_output_dir(&paths.output_directory)?;
    tracing::info!(output = %paths.output_directory.display(), "created output directory");

    let summary = Dispatcher::new(num_threads).run(&worker, &inputs)?;
    tracing::info!(
        files = summary.files.len(),
        rows = summary.rows(),
        rescaled_bins = sink.rescaled(),
        clamped_values = sink.clamped(),
        "friend tables written"
    );
    Ok(())
}

fn cmd_fractions(analysis: &AnalysisArgs, output: Option<&PathBuf>) -> Result<()> {
    let config = load_analysis_config(&analysis.config_file, &analysis.config)?;
    let sink = TracingSink::new();
    let fractions = compute_fractions(analysis, &config, &sink)?;
    write_json(output, fractions.to_json())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
