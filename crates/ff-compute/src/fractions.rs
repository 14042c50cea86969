//! Composition fractions from control-region templates.
//!
//! For every (channel, category) the templates of each process group are
//! summed, QCD is derived as data minus all other groups, and every group is
//! divided by data. Bins are then corrected so that, in every cell including
//! under/overflow, the fractions are non-negative and sum to one.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use ff_core::{
    CategoryKey, CategoryScheme, Channel, Error, FractionGroup, Histogram, ProcessGroups, Result,
};
use ff_io::{TemplateKey, TemplateStore};

use crate::diagnostics::{DiagnosticSink, RescaleReason, RescaleRecord};

/// What to compute for one channel.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    /// Channel.
    pub channel: Channel,
    /// Observable the templates are binned in.
    pub expression: String,
    /// Categories per leg.
    pub categories: CategoryScheme,
    /// Process composition of each fraction.
    pub groups: ProcessGroups,
}

impl ChannelSpec {
    /// Channel setup with the standard categories and composition.
    pub fn standard(channel: Channel, expression: impl Into<String>) -> Self {
        Self {
            channel,
            expression: expression.into(),
            categories: CategoryScheme::default_for(channel),
            groups: ProcessGroups::default_for(channel),
        }
    }
}

/// Fractions of one (channel, category).
#[derive(Debug, Clone)]
pub struct FractionSet {
    category: String,
    data: Histogram,
    fractions: BTreeMap<FractionGroup, Histogram>,
}

impl FractionSet {
    /// Category name.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Raw data template; defines the binning used for lookups.
    pub fn data(&self) -> &Histogram {
        &self.data
    }

    /// Cell of the observable value.
    pub fn find_bin(&self, value: f64) -> usize {
        self.data.find_bin(value)
    }

    /// Fraction histogram of `group`, if part of the composition.
    pub fn histogram(&self, group: FractionGroup) -> Option<&Histogram> {
        self.fractions.get(&group)
    }

    /// Fraction of `group` at `cell`.
    pub fn fraction(&self, group: FractionGroup, cell: usize) -> Result<f64> {
        self.fractions.get(&group).map(|h| h.bin_content(cell)).ok_or_else(|| {
            Error::Validation(format!("category '{}' has no {group} fraction", self.category))
        })
    }

    /// Groups with their fraction histograms.
    pub fn iter(&self) -> impl Iterator<Item = (FractionGroup, &Histogram)> + '_ {
        self.fractions.iter().map(|(g, h)| (*g, h))
    }
}

/// Fractions of one channel, addressed by [`CategoryKey`].
#[derive(Debug, Clone)]
pub struct ChannelFractions {
    scheme: CategoryScheme,
    sets: BTreeMap<CategoryKey, FractionSet>,
}

impl ChannelFractions {
    /// Category scheme the fractions were computed for.
    pub fn scheme(&self) -> &CategoryScheme {
        &self.scheme
    }

    /// Fraction set of a resolved category.
    pub fn get(&self, key: CategoryKey) -> Option<&FractionSet> {
        self.sets.get(&key)
    }
}

/// Immutable fractions for all channels of a run.
#[derive(Debug, Clone, Default)]
pub struct CompositionFractions {
    channels: BTreeMap<Channel, ChannelFractions>,
}

impl CompositionFractions {
    /// Fractions of `channel`.
    pub fn channel(&self, channel: Channel) -> Option<&ChannelFractions> {
        self.channels.get(&channel)
    }

    /// Fraction set for (channel, key).
    pub fn get(&self, channel: Channel, key: CategoryKey) -> Result<&FractionSet> {
        self.channels.get(&channel).and_then(|c| c.get(key)).ok_or_else(|| {
            Error::Validation(format!(
                "no fractions for {channel}, leg {}, category #{}",
                key.leg, key.index
            ))
        })
    }

    /// Channels with fractions.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    /// Nested `channel → category → group → cells` dump.
    pub fn to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        for (channel, cf) in &self.channels {
            let mut cats = serde_json::Map::new();
            for set in cf.sets.values() {
                let mut groups = serde_json::Map::new();
                for (group, h) in &set.fractions {
                    groups.insert(group.to_string(), json!(h.bin_content));
                }
                cats.insert(
                    set.category.clone(),
                    json!({
                        "bin_edges": set.data.bin_edges,
                        "data": set.data.bin_content,
                        "fractions": groups,
                    }),
                );
            }
            out.insert(channel.to_string(), Value::Object(cats));
        }
        Value::Object(out)
    }
}

/// Computes [`CompositionFractions`] from a template store.
pub struct FractionEngine<'a> {
    store: &'a TemplateStore,
    era: String,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> FractionEngine<'a> {
    /// Engine reading templates of `era` from `store`.
    pub fn new(
        store: &'a TemplateStore,
        era: impl Into<String>,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self { store, era: era.into(), sink }
    }

    /// Fractions for every channel and category of `specs`.
    ///
    /// A missing template is fatal.
    pub fn compute(&self, specs: &[ChannelSpec]) -> Result<CompositionFractions> {
        let mut channels = BTreeMap::new();
        for spec in specs {
            let mut sets = BTreeMap::new();
            for (key, category) in spec.categories.iter() {
                let set = self.compute_category(spec, category)?;
                sets.insert(key, set);
            }
            tracing::debug!(channel = %spec.channel, categories = sets.len(), "fractions computed");
            channels
                .insert(spec.channel, ChannelFractions { scheme: spec.categories.clone(), sets });
        }
        Ok(CompositionFractions { channels })
    }

    fn template(&self, spec: &ChannelSpec, category: &str, process: &str) -> Result<&Histogram> {
        let key = TemplateKey::new(spec.channel, category, process, &self.era, &spec.expression);
        self.store.get(&key.render())
    }

    fn compute_category(&self, spec: &ChannelSpec, category: &str) -> Result<FractionSet> {
        // Sum every group except QCD.
        let mut summed: BTreeMap<FractionGroup, Histogram> = BTreeMap::new();
        for (group, processes) in spec.groups.iter() {
            if group == FractionGroup::Qcd {
                continue;
            }
            let mut acc: Option<Histogram> = None;
            for process in processes {
                let h = self.template(spec, category, process)?;
                match acc.as_mut() {
                    Some(a) => a.add(h, 1.0)?,
                    None => acc = Some(h.clone()),
                }
            }
            if let Some(mut h) = acc {
                h.name = group.to_string();
                summed.insert(group, h);
            }
        }
        let data = summed.remove(&FractionGroup::Data).ok_or_else(|| {
            Error::Config(format!("no data processes configured for {}", spec.channel))
        })?;

        // QCD = data - sum of all other groups.
        let mut qcd = data.clone();
        qcd.name = FractionGroup::Qcd.to_string();
        for h in summed.values() {
            qcd.add(h, -1.0)?;
        }
        summed.insert(FractionGroup::Qcd, qcd);

        for h in summed.values_mut() {
            h.divide(&data)?;
        }

        for cell in 0..data.n_cells() {
            self.correct_cell(spec.channel, category, cell, data.bin_content(cell), &mut summed);
        }

        Ok(FractionSet { category: category.to_string(), data, fractions: summed })
    }

    fn correct_cell(
        &self,
        channel: Channel,
        category: &str,
        cell: usize,
        data: f64,
        fractions: &mut BTreeMap<FractionGroup, Histogram>,
    ) {
        let qcd_before = fractions[&FractionGroup::Qcd].bin_content(cell);
        let mut reasons = Vec::new();

        if data == 0.0 {
            for (group, h) in fractions.iter_mut() {
                h.set_bin_content(cell, if *group == FractionGroup::Qcd { 1.0 } else { 0.0 });
            }
            reasons.push(RescaleReason::EmptyData);
        } else if qcd_before < 0.0 {
            let norm = 1.0 - qcd_before;
            for (group, h) in fractions.iter_mut() {
                if *group == FractionGroup::Qcd {
                    h.set_bin_content(cell, 0.0);
                } else {
                    h.set_bin_content(cell, h.bin_content(cell) / norm);
                }
            }
            reasons.push(RescaleReason::NegativeQcd);
        }

        if fractions.values().any(|h| h.bin_content(cell) < 0.0) {
            for h in fractions.values_mut() {
                if h.bin_content(cell) < 0.0 {
                    h.set_bin_content(cell, 0.0);
                }
            }
            let total: f64 = fractions.values().map(|h| h.bin_content(cell)).sum();
            for (group, h) in fractions.iter_mut() {
                let v = if total > 0.0 {
                    h.bin_content(cell) / total
                } else if *group == FractionGroup::Qcd {
                    1.0
                } else {
                    0.0
                };
                h.set_bin_content(cell, v);
            }
            reasons.push(RescaleReason::NegativeGroup);
        }

        for reason in reasons {
            self.sink.fraction_rescaled(&RescaleRecord {
                channel,
                category: category.to_string(),
                cell,
                reason,
                qcd_before,
                values: fractions.iter().map(|(g, h)| (*g, h.bin_content(cell))).collect(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::testing::RecordingSink;
    use approx::assert_abs_diff_eq;

    const ERA: &str = "2016";
    const EXPR: &str = "m_vis";

    fn put(store: &mut TemplateStore, ch: Channel, cat: &str, proc: &str, bins: &[f64]) {
        // Cells: underflow 0, bins, overflow 0.
        let mut cells = vec![0.0];
        cells.extend_from_slice(bins);
        cells.push(0.0);
        let edges: Vec<f64> = (0..=bins.len()).map(|i| i as f64 * 10.0).collect();
        let key = TemplateKey::new(ch, cat, proc, ERA, EXPR).render();
        store.insert(key, Histogram::from_cells(proc, edges, cells).unwrap());
    }

    fn two_group_spec() -> ChannelSpec {
        ChannelSpec {
            channel: Channel::Mt,
            expression: EXPR.into(),
            categories: CategoryScheme::lepton_tau(Channel::Mt, vec!["w".into()]).unwrap(),
            groups: ProcessGroups::new(vec![
                (FractionGroup::Data, vec!["data_obs".into()]),
                (FractionGroup::Qcd, vec![]),
                (FractionGroup::Real, vec!["ZTT".into()]),
            ])
            .unwrap(),
        }
    }

    fn assert_bounded(fractions: &CompositionFractions) {
        for ch in fractions.channels() {
            let cf = fractions.channel(ch).unwrap();
            for set in cf.sets.values() {
                for cell in 0..set.data().n_cells() {
                    let mut sum = 0.0;
                    for (g, h) in set.iter() {
                        let v = h.bin_content(cell);
                        assert!(v >= 0.0, "{ch}/{}/{g} cell {cell}: {v}", set.category());
                        sum += v;
                    }
                    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn negative_qcd_is_zeroed_and_rest_rescaled() {
        let mut store = TemplateStore::new();
        put(&mut store, Channel::Mt, "w", "data_obs", &[10.0, 10.0]);
        put(&mut store, Channel::Mt, "w", "ZTT", &[12.0, 4.0]);
        let sink = RecordingSink::default();

        let fr = FractionEngine::new(&store, ERA, &sink).compute(&[two_group_spec()]).unwrap();
        let key = CategoryKey { leg: ff_core::Leg::Two, index: 0 };
        let set = fr.get(Channel::Mt, key).unwrap();

        assert_abs_diff_eq!(set.fraction(FractionGroup::Qcd, 1).unwrap(), 0.0);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Real, 1).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Qcd, 2).unwrap(), 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Real, 2).unwrap(), 0.4, epsilon = 1e-12);
        assert_bounded(&fr);

        let rescaled = sink.rescaled.lock().unwrap();
        let neg: Vec<&RescaleRecord> =
            rescaled.iter().filter(|r| r.reason == RescaleReason::NegativeQcd).collect();
        assert_eq!(neg.len(), 1);
        assert_eq!(neg[0].cell, 1);
        assert_eq!(neg[0].category, "w");
        assert_abs_diff_eq!(neg[0].qcd_before, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn empty_data_cells_go_to_qcd() {
        let mut store = TemplateStore::new();
        put(&mut store, Channel::Mt, "w", "data_obs", &[0.0, 5.0]);
        put(&mut store, Channel::Mt, "w", "ZTT", &[1.0, 1.0]);
        let sink = RecordingSink::default();

        let fr = FractionEngine::new(&store, ERA, &sink).compute(&[two_group_spec()]).unwrap();
        let set = fr.get(Channel::Mt, CategoryKey { leg: ff_core::Leg::Two, index: 0 }).unwrap();
        assert_abs_diff_eq!(set.fraction(FractionGroup::Qcd, 1).unwrap(), 1.0);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Real, 1).unwrap(), 0.0);
        // Underflow and overflow are empty too.
        assert_abs_diff_eq!(set.fraction(FractionGroup::Qcd, 0).unwrap(), 1.0);
        assert_bounded(&fr);
    }

    #[test]
    fn negative_mc_group_is_renormalized() {
        let mut store = TemplateStore::new();
        put(&mut store, Channel::Mt, "w", "data_obs", &[10.0]);
        put(&mut store, Channel::Mt, "w", "W", &[-2.0]);
        put(&mut store, Channel::Mt, "w", "ZTT", &[4.0]);
        let sink = RecordingSink::default();
        let spec = ChannelSpec {
            groups: ProcessGroups::new(vec![
                (FractionGroup::Data, vec!["data_obs".into()]),
                (FractionGroup::Qcd, vec![]),
                (FractionGroup::W, vec!["W".into()]),
                (FractionGroup::Real, vec!["ZTT".into()]),
            ])
            .unwrap(),
            ..two_group_spec()
        };

        let fr = FractionEngine::new(&store, ERA, &sink).compute(&[spec]).unwrap();
        let set = fr.get(Channel::Mt, CategoryKey { leg: ff_core::Leg::Two, index: 0 }).unwrap();
        // QCD raw = (10 + 2 - 4) / 10 = 0.8, W = -0.2 -> 0, renormalized over 1.2.
        assert_abs_diff_eq!(set.fraction(FractionGroup::W, 1).unwrap(), 0.0);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Qcd, 1).unwrap(), 0.8 / 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Real, 1).unwrap(), 0.4 / 1.2, epsilon = 1e-12);
        assert_bounded(&fr);
        assert!(
            sink.rescaled.lock().unwrap().iter().any(|r| r.reason == RescaleReason::NegativeGroup)
        );
    }

    #[test]
    fn standard_composition_sums_processes() {
        let mut store = TemplateStore::new();
        let ch = Channel::Tt;
        for (_, cat) in CategoryScheme::default_for(ch).iter() {
            put(&mut store, ch, cat, "data_obs", &[100.0, 50.0]);
            for p in ["W", "VVJ", "TTJ", "ZJ"] {
                put(&mut store, ch, cat, p, &[5.0, 2.5]);
            }
            for p in ["ZTT", "ZL", "TTT", "VVT"] {
                put(&mut store, ch, cat, p, &[10.0, 5.0]);
            }
        }
        let sink = RecordingSink::default();
        let fr = FractionEngine::new(&store, ERA, &sink)
            .compute(&[ChannelSpec::standard(ch, EXPR)])
            .unwrap();
        let set = fr.get(ch, CategoryKey { leg: ff_core::Leg::Two, index: 3 }).unwrap();
        assert_eq!(set.category(), "tt2_noniso");
        assert_abs_diff_eq!(set.fraction(FractionGroup::W, 1).unwrap(), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Tt, 1).unwrap(), 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Dy, 1).unwrap(), 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Real, 1).unwrap(), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(set.fraction(FractionGroup::Qcd, 1).unwrap(), 0.4, epsilon = 1e-12);
        assert_bounded(&fr);

        let dump = fr.to_json();
        assert!(dump["tt"]["tt1_ggh"]["fractions"]["QCD"].is_array());
    }

    #[test]
    fn missing_template_is_fatal() {
        let mut store = TemplateStore::new();
        put(&mut store, Channel::Mt, "w", "data_obs", &[10.0]);
        let sink = RecordingSink::default();
        let err = FractionEngine::new(&store, ERA, &sink).compute(&[two_group_spec()]).unwrap_err();
        match err {
            Error::MissingHistogram(key) => assert_eq!(key, "#mt#mt_w#ZTT#smhtt#Run2016#m_vis#125#"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
