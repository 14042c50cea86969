//! Per-channel feature vector layout of the fake-factor function.

use crate::channel::{Channel, Leg};
use crate::composition::FractionGroup;

/// Source of one feature-vector entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureSource {
    /// Event field read from the input table.
    Field(String),
    /// Composition fraction at the event's bin.
    Fraction(FractionGroup),
}

/// Ordered feature layout for one (channel, leg).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    entries: Vec<(String, FeatureSource)>,
}

impl FeatureSchema {
    /// Layout used when evaluating `leg` in `channel`.
    ///
    /// Lepton-tau: `pt_2, decayMode_2, njets, m_vis, mt_1, iso_1, frac_qcd,
    /// frac_w, frac_tt`. Tau-tau: `pt_<leg>, pt_<other>, decayMode_<leg>,
    /// njets, m_vis, frac_qcd, frac_w, frac_tt, frac_dy`.
    pub fn for_leg(channel: Channel, leg: Leg) -> Self {
        let field = |name: String| (name.clone(), FeatureSource::Field(name));
        let fraction = |name: &str, group| (name.to_string(), FeatureSource::Fraction(group));
        let mut entries = Vec::with_capacity(9);
        if channel.is_lepton_tau() {
            entries.push(field(format!("pt_{leg}")));
            entries.push(field(format!("decayMode_{leg}")));
            entries.push(field("njets".into()));
            entries.push(field("m_vis".into()));
            entries.push(field("mt_1".into()));
            entries.push(field("iso_1".into()));
        } else {
            entries.push(field(format!("pt_{leg}")));
            entries.push(field(format!("pt_{}", leg.other())));
            entries.push(field(format!("decayMode_{leg}")));
            entries.push(field("njets".into()));
            entries.push(field("m_vis".into()));
        }
        entries.push(fraction("frac_qcd", FractionGroup::Qcd));
        entries.push(fraction("frac_w", FractionGroup::W));
        entries.push(fraction("frac_tt", FractionGroup::Tt));
        if !channel.is_lepton_tau() {
            entries.push(fraction("frac_dy", FractionGroup::Dy));
        }
        Self { entries }
    }

    /// Leg-independent input names as declared by fake-factor archives.
    ///
    /// Kinematic entries are named by role (`tau_pt`, `tau_decayMode`, ...)
    /// so that one archive serves both tau-tau legs.
    pub fn archive_inputs(channel: Channel) -> Vec<&'static str> {
        if channel.is_lepton_tau() {
            vec![
                "tau_pt",
                "tau_decayMode",
                "njets",
                "mvis",
                "mt",
                "lep_iso",
                "frac_qcd",
                "frac_w",
                "frac_tt",
            ]
        } else {
            vec![
                "tau_pt",
                "other_pt",
                "tau_decayMode",
                "njets",
                "mvis",
                "frac_qcd",
                "frac_w",
                "frac_tt",
                "frac_dy",
            ]
        }
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureSource)> + '_ {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Event fields required by this schema.
    pub fn fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().filter_map(|(_, s)| match s {
            FeatureSource::Field(f) => Some(f.as_str()),
            FeatureSource::Fraction(_) => None,
        })
    }
}
