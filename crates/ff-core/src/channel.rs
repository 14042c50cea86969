//! Detector channels and the tau legs that receive a fake factor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Detector final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Electron + hadronic tau.
    Et,
    /// Muon + hadronic tau.
    Mt,
    /// Two hadronic taus.
    Tt,
}

/// One of the two decay objects of an event, numbered as in the ntuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Leg {
    /// Leading object (`*_1` branches).
    One,
    /// Subleading object (`*_2` branches).
    Two,
}

impl Leg {
    /// Branch suffix number.
    pub fn number(self) -> u8 {
        match self {
            Leg::One => 1,
            Leg::Two => 2,
        }
    }

    /// The other leg of the pair.
    pub fn other(self) -> Leg {
        match self {
            Leg::One => Leg::Two,
            Leg::Two => Leg::One,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl Channel {
    /// All channels in canonical order.
    pub const ALL: [Channel; 3] = [Channel::Et, Channel::Mt, Channel::Tt];

    /// Short name used in keys and branch names.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Et => "et",
            Channel::Mt => "mt",
            Channel::Tt => "tt",
        }
    }

    /// Legs that receive a fake factor.
    pub fn legs(self) -> &'static [Leg] {
        match self {
            Channel::Et | Channel::Mt => &[Leg::Two],
            Channel::Tt => &[Leg::One, Leg::Two],
        }
    }

    /// Whether this is a lepton + tau channel.
    pub fn is_lepton_tau(self) -> bool {
        !matches!(self, Channel::Tt)
    }

    /// Event field holding the classifier category index.
    pub fn category_index_field(self) -> String {
        format!("{}_max_index", self.as_str())
    }

    /// Logical table name inside primary, friend and output files.
    pub fn tree_name(self) -> String {
        format!("{}_nominal/ntuple", self.as_str())
    }

    /// Detect the channel from a dataset file or directory name.
    ///
    /// `SingleElectron` → et, `SingleMuon` → mt, `Tau` → tt.
    pub fn from_filename(name: &str) -> Result<Channel> {
        if name.contains("SingleElectron") {
            Ok(Channel::Et)
        } else if name.contains("SingleMuon") {
            Ok(Channel::Mt)
        } else if name.contains("Tau") {
            Ok(Channel::Tt)
        } else {
            Err(Error::Config(format!("filename {name} does not match assumed naming scheme")))
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "et" => Ok(Channel::Et),
            "mt" => Ok(Channel::Mt),
            "tt" => Ok(Channel::Tt),
            other => Err(Error::Config(format!("unknown channel '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_from_filename() {
        assert_eq!(
            Channel::from_filename("SingleElectron_Run2016B_03Feb2017ver2v2_13TeV_MINIAOD").unwrap(),
            Channel::Et
        );
        assert_eq!(Channel::from_filename("SingleMuon_Run2016H").unwrap(), Channel::Mt);
        assert_eq!(Channel::from_filename("Tau_Run2016C_03Feb2017v1").unwrap(), Channel::Tt);
        assert!(Channel::from_filename("MuonEG_Run2016B").is_err());
    }

    #[test]
    fn legs_per_channel() {
        assert_eq!(Channel::Et.legs(), &[Leg::Two]);
        assert_eq!(Channel::Tt.legs(), &[Leg::One, Leg::Two]);
        assert_eq!(Leg::One.other(), Leg::Two);
        assert_eq!(Channel::Mt.category_index_field(), "mt_max_index");
        assert_eq!(Channel::Tt.tree_name(), "tt_nominal/ntuple");
    }

    #[test]
    fn parse_roundtrip() {
        for ch in Channel::ALL {
            assert_eq!(ch.as_str().parse::<Channel>().unwrap(), ch);
        }
        assert!("em".parse::<Channel>().is_err());
    }
}
