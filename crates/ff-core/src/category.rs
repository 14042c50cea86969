//! Category schemes: which fraction set an event uses, per leg.
//!
//! Each event carries a classifier index (`<ch>_max_index`). For lepton-tau
//! channels the index selects from one ordered list. For tau-tau each leg has
//! its own list of equal length; the same index selects from the list of the
//! leg being evaluated. Lookups go through an explicit [`CategoryKey`] so
//! that no index arithmetic on a flat list is needed.

use crate::channel::{Channel, Leg};
use crate::error::{Error, Result};

/// Resolved (leg, category position) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryKey {
    /// Leg being evaluated.
    pub leg: Leg,
    /// Position in that leg's category list.
    pub index: usize,
}

/// Ordered category lists for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryScheme {
    channel: Channel,
    legs: Vec<(Leg, Vec<String>)>,
}

impl CategoryScheme {
    /// Single list shared by the tau leg of a lepton-tau channel.
    pub fn lepton_tau(channel: Channel, categories: Vec<String>) -> Result<Self> {
        if !channel.is_lepton_tau() {
            return Err(Error::Config(format!("{channel} is not a lepton-tau channel")));
        }
        if categories.is_empty() {
            return Err(Error::Config(format!("empty category list for {channel}")));
        }
        Ok(Self { channel, legs: vec![(Leg::Two, categories)] })
    }

    /// One list per leg for the tau-tau channel; both must have the same length.
    pub fn tau_tau(leg1: Vec<String>, leg2: Vec<String>) -> Result<Self> {
        if leg1.is_empty() || leg1.len() != leg2.len() {
            return Err(Error::Config(format!(
                "tt category lists must be non-empty and of equal length (leg1: {}, leg2: {})",
                leg1.len(),
                leg2.len()
            )));
        }
        Ok(Self { channel: Channel::Tt, legs: vec![(Leg::One, leg1), (Leg::Two, leg2)] })
    }

    /// Categories used by the analysis when not overridden by configuration.
    pub fn default_for(channel: Channel) -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match channel {
            Channel::Et | Channel::Mt => Self {
                channel,
                legs: vec![(
                    Leg::Two,
                    owned(&["ggh", "qqh", "ztt", "zll", "w", "tt", "ss", "misc"]),
                )],
            },
            Channel::Tt => Self {
                channel,
                legs: vec![
                    (Leg::One, owned(&["tt1_ggh", "tt1_qqh", "tt1_ztt", "tt1_noniso", "tt1_misc"])),
                    (Leg::Two, owned(&["tt2_ggh", "tt2_qqh", "tt2_ztt", "tt2_noniso", "tt2_misc"])),
                ],
            },
        }
    }

    /// Channel this scheme belongs to.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Category list of `leg`, if the leg receives a fake factor.
    pub fn categories(&self, leg: Leg) -> Option<&[String]> {
        self.legs.iter().find(|(l, _)| *l == leg).map(|(_, c)| c.as_slice())
    }

    /// All (key, name) pairs in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (CategoryKey, &str)> + '_ {
        self.legs.iter().flat_map(|(leg, cats)| {
            cats.iter()
                .enumerate()
                .map(move |(index, name)| (CategoryKey { leg: *leg, index }, name.as_str()))
        })
    }

    /// Name of the category behind `key`.
    pub fn name(&self, key: CategoryKey) -> Option<&str> {
        self.categories(key.leg).and_then(|c| c.get(key.index)).map(String::as_str)
    }

    /// Resolve a raw per-event index for `leg`.
    ///
    /// The value must be finite, integral and inside the leg's list.
    pub fn resolve(&self, leg: Leg, raw: f64, row: usize) -> Result<CategoryKey> {
        let n_categories = self.categories(leg).map(<[String]>::len).unwrap_or(0);
        let invalid = || Error::InvalidCategoryIndex {
            value: raw,
            row,
            leg: leg.number(),
            n_categories,
        };
        if !raw.is_finite() || raw.fract() != 0.0 || raw < 0.0 {
            return Err(invalid());
        }
        let index = raw as usize;
        if index >= n_categories {
            return Err(invalid());
        }
        Ok(CategoryKey { leg, index })
    }

    /// Check a classifier ordering declared by the event table.
    ///
    /// Tau-tau categories are compared without their `tt<leg>_` prefix.
    pub fn validate_declared(&self, declared: &[String]) -> Result<()> {
        for (leg, cats) in &self.legs {
            let prefix = format!("{}{}_", self.channel.as_str(), leg.number());
            let labels: Vec<String> = cats
                .iter()
                .map(|c| c.strip_prefix(prefix.as_str()).unwrap_or(c).to_string())
                .collect();
            if labels.as_slice() != declared {
                return Err(Error::CategoryMismatch {
                    channel: self.channel.to_string(),
                    declared: declared.to_vec(),
                    configured: labels,
                });
            }
        }
        Ok(())
    }
}
