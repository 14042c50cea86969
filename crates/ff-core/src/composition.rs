//! Process groups that make up the composition fractions of a channel.

use std::fmt;

use crate::channel::Channel;
use crate::error::{Error, Result};

/// One fraction (or the data reference) in the control-region composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FractionGroup {
    /// Observed data; the denominator of every fraction.
    Data,
    /// Multijet background, derived as data minus everything else.
    Qcd,
    /// W+jets with jet → tau fakes.
    W,
    /// ttbar with jet → tau fakes.
    Tt,
    /// Drell-Yan with jet → tau fakes (tau-tau only).
    Dy,
    /// Processes with genuine taus or leptons.
    Real,
}

impl FractionGroup {
    /// Name used in logs and dumps.
    pub fn as_str(self) -> &'static str {
        match self {
            FractionGroup::Data => "data",
            FractionGroup::Qcd => "QCD",
            FractionGroup::W => "W",
            FractionGroup::Tt => "TT",
            FractionGroup::Dy => "DY",
            FractionGroup::Real => "real",
        }
    }
}

impl fmt::Display for FractionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from fraction group to the physical processes summed into it.
///
/// Must contain [`FractionGroup::Data`] and [`FractionGroup::Qcd`]; the QCD
/// entry's process list is ignored because QCD is always derived.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessGroups {
    groups: Vec<(FractionGroup, Vec<String>)>,
}

impl ProcessGroups {
    /// Build from an explicit list, validating the required groups.
    pub fn new(groups: Vec<(FractionGroup, Vec<String>)>) -> Result<Self> {
        for required in [FractionGroup::Data, FractionGroup::Qcd] {
            if !groups.iter().any(|(g, _)| *g == required) {
                return Err(Error::Config(format!("process groups lack required group {required}")));
            }
        }
        for (i, (g, procs)) in groups.iter().enumerate() {
            if groups[..i].iter().any(|(h, _)| h == g) {
                return Err(Error::Config(format!("duplicate process group {g}")));
            }
            if *g != FractionGroup::Qcd && procs.is_empty() {
                return Err(Error::Config(format!("process group {g} has no processes")));
            }
        }
        Ok(Self { groups })
    }

    /// Standard composition used for the fake-factor fractions.
    pub fn default_for(channel: Channel) -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut groups = vec![
            (FractionGroup::Data, owned(&["data_obs"])),
            (FractionGroup::Qcd, owned(&["QCD"])),
        ];
        match channel {
            Channel::Et | Channel::Mt => {
                groups.push((FractionGroup::W, owned(&["W", "VVJ", "ZJ"])));
                groups.push((FractionGroup::Tt, owned(&["TTJ"])));
            }
            Channel::Tt => {
                groups.push((FractionGroup::W, owned(&["W", "VVJ"])));
                groups.push((FractionGroup::Tt, owned(&["TTJ"])));
                groups.push((FractionGroup::Dy, owned(&["ZJ"])));
            }
        }
        groups.push((FractionGroup::Real, owned(&["ZTT", "ZL", "TTT", "VVT"])));
        Self { groups }
    }

    /// Groups in configuration order (data and QCD included).
    pub fn iter(&self) -> impl Iterator<Item = (FractionGroup, &[String])> + '_ {
        self.groups.iter().map(|(g, p)| (*g, p.as_slice()))
    }

    /// Fraction groups, i.e. everything except data.
    pub fn fraction_groups(&self) -> impl Iterator<Item = FractionGroup> + '_ {
        self.groups.iter().map(|(g, _)| *g).filter(|g| *g != FractionGroup::Data)
    }

    /// Whether `group` is part of this composition.
    pub fn contains(&self, group: FractionGroup) -> bool {
        self.groups.iter().any(|(g, _)| *g == group)
    }
}
