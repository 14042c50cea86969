//! Analysis configuration (YAML) and run paths.
//!
//! The configuration file maps analysis-variant keys to a block holding the
//! output directory and, per channel, the observable used for fraction bin
//! lookup:
//!
//! ```yaml
//! smhtt2016:
//!   outputdir: output/ff_friends
//!   mt: { expression: mt_max_score }
//!   tt:
//!     expression: tt_max_score
//!     categories: { leg1: [tt1_ggh, tt1_misc], leg2: [tt2_ggh, tt2_misc] }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use ff_core::{CategoryScheme, Channel, Error, ProcessGroups, Result};

use crate::fractions::ChannelSpec;

/// Category override of one channel block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CategoryOverride {
    /// Lepton-tau: one ordered list.
    Flat(Vec<String>),
    /// Tau-tau: one list per leg.
    PerLeg {
        /// Leg 1 categories.
        leg1: Vec<String>,
        /// Leg 2 categories.
        leg2: Vec<String>,
    },
}

/// Per-channel block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelSelection {
    /// Category-defining observable.
    pub expression: String,
    /// Optional category lists replacing the defaults.
    #[serde(default)]
    pub categories: Option<CategoryOverride>,
}

/// One analysis variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisConfig {
    /// Output root directory.
    pub outputdir: PathBuf,
    /// Electron-tau block.
    #[serde(default)]
    pub et: Option<ChannelSelection>,
    /// Muon-tau block.
    #[serde(default)]
    pub mt: Option<ChannelSelection>,
    /// Tau-tau block.
    #[serde(default)]
    pub tt: Option<ChannelSelection>,
}

/// Read the variant `key` from the YAML file at `path`.
pub fn load_analysis_config(path: &Path, key: &str) -> Result<AnalysisConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read configuration {}: {e}", path.display()))
    })?;
    parse_analysis_config(&text, key)
}

/// Parse the variant `key` from YAML text.
pub fn parse_analysis_config(text: &str, key: &str) -> Result<AnalysisConfig> {
    let mut variants: BTreeMap<String, serde_yaml_ng::Value> = serde_yaml_ng::from_str(text)?;
    let block = variants.remove(key).ok_or_else(|| {
        let known: Vec<&String> = variants.keys().collect();
        Error::Config(format!("configuration key '{key}' not found (available: {known:?})"))
    })?;
    Ok(serde_yaml_ng::from_value(block)?)
}

impl AnalysisConfig {
    /// Block of `channel`, if configured.
    pub fn selection(&self, channel: Channel) -> Option<&ChannelSelection> {
        match channel {
            Channel::Et => self.et.as_ref(),
            Channel::Mt => self.mt.as_ref(),
            Channel::Tt => self.tt.as_ref(),
        }
    }

    /// Block of `channel`; a missing block is a configuration error.
    pub fn require(&self, channel: Channel) -> Result<&ChannelSelection> {
        self.selection(channel)
            .ok_or_else(|| Error::Config(format!("no '{channel}' block in analysis configuration")))
    }

    /// Channels with a block, in canonical order.
    pub fn channels(&self) -> Vec<Channel> {
        Channel::ALL.into_iter().filter(|c| self.selection(*c).is_some()).collect()
    }

    /// Category scheme of `channel`, honoring overrides.
    pub fn category_scheme(&self, channel: Channel) -> Result<CategoryScheme> {
        match (self.require(channel)?.categories.clone(), channel.is_lepton_tau()) {
            (None, _) => Ok(CategoryScheme::default_for(channel)),
            (Some(CategoryOverride::Flat(cats)), true) => CategoryScheme::lepton_tau(channel, cats),
            (Some(CategoryOverride::PerLeg { leg1, leg2 }), false) => {
                CategoryScheme::tau_tau(leg1, leg2)
            }
            (Some(_), true) => {
                Err(Error::Config(format!("{channel} categories must be a single list")))
            }
            (Some(_), false) => {
                Err(Error::Config(format!("{channel} categories need 'leg1' and 'leg2' lists")))
            }
        }
    }

    /// Fraction-engine input for `channel`.
    pub fn channel_spec(&self, channel: Channel) -> Result<ChannelSpec> {
        Ok(ChannelSpec {
            channel,
            expression: self.require(channel)?.expression.clone(),
            categories: self.category_scheme(channel)?,
            groups: ProcessGroups::default_for(channel),
        })
    }
}

/// Filesystem locations of one run.
#[derive(Debug, Clone, Default)]
pub struct RunPaths {
    /// Root of the primary event tables.
    pub directory: PathBuf,
    /// Friend table root per channel.
    pub friend_directories: BTreeMap<Channel, PathBuf>,
    /// Fake-factor archive per channel.
    pub fake_factor_files: BTreeMap<Channel, PathBuf>,
    /// Output root.
    pub output_directory: PathBuf,
}

impl RunPaths {
    /// Friend root of `channel`.
    pub fn friend_dir(&self, channel: Channel) -> Result<&Path> {
        self.friend_directories.get(&channel).map(PathBuf::as_path).ok_or_else(|| {
            Error::Config(format!("no friend directory given for {channel} (--{channel}-friend-directory)"))
        })
    }

    /// Fake-factor archive of `channel`.
    pub fn fake_factor_file(&self, channel: Channel) -> Result<&Path> {
        self.fake_factor_files.get(&channel).map(PathBuf::as_path).ok_or_else(|| {
            Error::Config(format!("no fake-factor file given for {channel} (--{channel}-fake-factor-file)"))
        })
    }

    /// `<root>/<entry>/<entry>.parquet`.
    pub fn table_path(root: &Path, entry: &str) -> PathBuf {
        root.join(entry).join(format!("{entry}.parquet"))
    }
}
