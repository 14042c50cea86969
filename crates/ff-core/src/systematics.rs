//! Systematic uncertainty sources of the fake-factor function.
//!
//! Sources are structured rather than string-keyed: a normalization
//! uncertainty per fake process, a statistical uncertainty per
//! (process, decay-mode bucket, jet bucket) and, for tau-tau, an uncertainty
//! on the composition fraction of a process. [`SystematicSource::name`] gives
//! the canonical string used in archives and output branch names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::composition::FractionGroup;
use crate::error::{Error, Result};

/// Process whose jet → tau fake rate is parametrized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FakeProcess {
    /// Multijet.
    Qcd,
    /// W+jets.
    W,
    /// ttbar.
    Tt,
    /// Drell-Yan.
    Dy,
}

impl FakeProcess {
    /// Lowercase tag used in source names.
    pub fn as_str(self) -> &'static str {
        match self {
            FakeProcess::Qcd => "qcd",
            FakeProcess::W => "w",
            FakeProcess::Tt => "tt",
            FakeProcess::Dy => "dy",
        }
    }

    /// Composition fraction weighting this process.
    pub fn fraction_group(self) -> FractionGroup {
        match self {
            FakeProcess::Qcd => FractionGroup::Qcd,
            FakeProcess::W => FractionGroup::W,
            FakeProcess::Tt => FractionGroup::Tt,
            FakeProcess::Dy => FractionGroup::Dy,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "qcd" => Some(FakeProcess::Qcd),
            "w" => Some(FakeProcess::W),
            "tt" => Some(FakeProcess::Tt),
            "dy" => Some(FakeProcess::Dy),
            _ => None,
        }
    }
}

/// One systematic uncertainty source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SystematicSource {
    /// Overall normalization of a process' fake factor (`ff_<p>_syst`).
    Syst(FakeProcess),
    /// Fit statistics in one (decay mode, njets) bucket (`ff_<p>_dm<d>_njet<n>_stat`).
    Stat {
        /// Process.
        process: FakeProcess,
        /// Decay-mode bucket (0 or 1).
        decay_mode: u8,
        /// Jet-multiplicity bucket (0 or 1).
        njets: u8,
    },
    /// Composition fraction of a process (`ff_<p>_frac_syst`).
    FracSyst(FakeProcess),
}

impl SystematicSource {
    /// Canonical name, e.g. `ff_qcd_dm0_njet1_stat`.
    pub fn name(self) -> String {
        match self {
            SystematicSource::Syst(p) => format!("ff_{}_syst", p.as_str()),
            SystematicSource::Stat { process, decay_mode, njets } => {
                format!("ff_{}_dm{decay_mode}_njet{njets}_stat", process.as_str())
            }
            SystematicSource::FracSyst(p) => format!("ff_{}_frac_syst", p.as_str()),
        }
    }

    /// Sources defined for `channel`, in output order.
    ///
    /// Lepton-tau channels carry 15 sources, tau-tau carries 10.
    pub fn for_channel(channel: Channel) -> Vec<SystematicSource> {
        use FakeProcess::*;
        let stat = |process| {
            [(0, 0), (0, 1), (1, 0), (1, 1)]
                .into_iter()
                .map(move |(decay_mode, njets)| SystematicSource::Stat { process, decay_mode, njets })
        };
        let mut out = Vec::new();
        match channel {
            Channel::Et | Channel::Mt => {
                for p in [Qcd, W, Tt] {
                    out.push(SystematicSource::Syst(p));
                    out.extend(stat(p));
                }
            }
            Channel::Tt => {
                out.push(SystematicSource::Syst(Qcd));
                out.extend(stat(Qcd));
                out.push(SystematicSource::Syst(W));
                out.push(SystematicSource::Syst(Tt));
                out.extend([W, Tt, Dy].map(SystematicSource::FracSyst));
            }
        }
        out
    }
}

impl fmt::Display for SystematicSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for SystematicSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || Error::UnknownShift(s.to_string());
        let rest = s.strip_prefix("ff_").ok_or_else(unknown)?;
        let (proc_tag, tail) = rest.split_once('_').ok_or_else(unknown)?;
        let process = FakeProcess::parse(proc_tag).ok_or_else(unknown)?;
        if tail == "syst" {
            return Ok(SystematicSource::Syst(process));
        }
        if tail == "frac_syst" {
            return Ok(SystematicSource::FracSyst(process));
        }
        // dm<d>_njet<n>_stat
        let body = tail.strip_suffix("_stat").ok_or_else(unknown)?;
        let (dm, nj) = body.split_once('_').ok_or_else(unknown)?;
        let decay_mode = dm.strip_prefix("dm").and_then(|d| d.parse::<u8>().ok());
        let njets = nj.strip_prefix("njet").and_then(|n| n.parse::<u8>().ok());
        match (decay_mode, njets) {
            (Some(decay_mode @ 0..=1), Some(njets @ 0..=1)) => {
                Ok(SystematicSource::Stat { process, decay_mode, njets })
            }
            _ => Err(unknown()),
        }
    }
}

/// Shift direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShiftDirection {
    /// +1 sigma.
    Up,
    /// -1 sigma.
    Down,
}

impl ShiftDirection {
    /// Both directions, up first.
    pub const BOTH: [ShiftDirection; 2] = [ShiftDirection::Up, ShiftDirection::Down];

    /// `up` / `down`.
    pub fn as_str(self) -> &'static str {
        match self {
            ShiftDirection::Up => "up",
            ShiftDirection::Down => "down",
        }
    }

    /// +1.0 for up, -1.0 for down.
    pub fn sign(self) -> f64 {
        match self {
            ShiftDirection::Up => 1.0,
            ShiftDirection::Down => -1.0,
        }
    }
}

/// A (source, direction) pair: one alternate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shift {
    /// Uncertainty source.
    pub source: SystematicSource,
    /// Direction.
    pub direction: ShiftDirection,
}

impl Shift {
    /// Construct a shift.
    pub fn new(source: SystematicSource, direction: ShiftDirection) -> Self {
        Self { source, direction }
    }

    /// `<source>_<up|down>`, as understood by fake-factor archives.
    pub fn name(self) -> String {
        format!("{}_{}", self.source.name(), self.direction.as_str())
    }

    /// All shifts of `channel`, in output order (per source: up, then down).
    pub fn for_channel(channel: Channel) -> Vec<Shift> {
        SystematicSource::for_channel(channel)
            .into_iter()
            .flat_map(|s| ShiftDirection::BOTH.map(|d| Shift::new(s, d)))
            .collect()
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Shift {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (source, direction) = if let Some(src) = s.strip_suffix("_up") {
            (src, ShiftDirection::Up)
        } else if let Some(src) = s.strip_suffix("_down") {
            (src, ShiftDirection::Down)
        } else {
            return Err(Error::UnknownShift(s.to_string()));
        };
        Ok(Shift::new(source.parse()?, direction))
    }
}
