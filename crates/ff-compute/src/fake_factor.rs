//! Fake-factor function archives and their evaluation.
//!
//! An archive is a JSON document holding one fitted function per channel.
//! The function is a fraction-weighted sum of per-process components:
//!
//! ```text
//! ff = Σ_p  frac_p · base_p(pt, dm, njets) · Π_k corr_pk(x_k)
//! ```
//!
//! where `base_p` is tabulated in transverse-momentum bins for each
//! (decay-mode bucket, jet bucket) pair and the `corr_pk` are binned
//! corrections in other inputs. Shift names are resolved to evaluation paths
//! once, at load time; the evaluator never parses strings per event.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use ff_core::features::FeatureSchema;
use ff_core::systematics::FakeProcess;
use ff_core::{Channel, Error, Result, Shift, ShiftDirection, SystematicSource};

/// Lower bound of a valid fake factor.
pub const FF_MIN: f64 = 0.0;
/// Upper bound of a valid fake factor.
pub const FF_MAX: f64 = 999.0;

/// Replace values outside `[FF_MIN, FF_MAX]` (and NaN) by 0.
///
/// Returns the value to store and whether it was clamped.
pub fn clamp_fake_factor(raw: f64) -> (f64, bool) {
    if (FF_MIN..=FF_MAX).contains(&raw) { (raw, false) } else { (0.0, true) }
}

/// A fitted fake-factor function.
///
/// Returns unclamped values; callers validate the range.
pub trait FakeFactorEvaluator: Send + Sync {
    /// Channel the function was fitted for.
    fn channel(&self) -> Channel;

    /// Evaluate at `features`, optionally under a systematic shift.
    fn value(&self, features: &[f64], shift: Option<Shift>) -> Result<f64>;
}

#[derive(Debug, Deserialize)]
struct ArchiveDoc {
    name: String,
    channel: Channel,
    inputs: Vec<String>,
    shifts: Vec<String>,
    components: Vec<ComponentDoc>,
    #[serde(default)]
    frac_syst: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct ComponentDoc {
    process: FakeProcess,
    syst: f64,
    pt_edges: Vec<f64>,
    bins: Vec<BinDoc>,
    #[serde(default)]
    corrections: Vec<CorrectionDoc>,
}

#[derive(Debug, Deserialize)]
struct BinDoc {
    decay_mode: u8,
    njets: u8,
    values: Vec<f64>,
    stat_errors: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct CorrectionDoc {
    input: String,
    edges: Vec<f64>,
    values: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Table {
    values: Vec<f64>,
    stat_errors: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Correction {
    input: usize,
    edges: Vec<f64>,
    values: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Component {
    process: FakeProcess,
    fraction_input: usize,
    syst: f64,
    pt_edges: Vec<f64>,
    // Indexed by decay-mode bucket * 2 + jet bucket.
    tables: [Table; 4],
    corrections: Vec<Correction>,
}

/// Resolved evaluation path of one shift.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ShiftPath {
    Norm { component: usize, sign: f64 },
    Stat { component: usize, bucket: usize, sign: f64 },
    Fraction { component: usize, delta: f64 },
}

#[derive(Debug, Clone, Copy)]
struct InputSlots {
    pt: usize,
    decay_mode: usize,
    njets: usize,
    frac_qcd: usize,
}

/// A fake-factor function loaded from an archive.
#[derive(Debug, Clone)]
pub struct FakeFactorFunction {
    name: String,
    channel: Channel,
    slots: InputSlots,
    n_inputs: usize,
    components: Vec<Component>,
    shifts: HashMap<Shift, ShiftPath>,
}

impl FakeFactorFunction {
    /// Load the archive at `path` and check it was fitted for `channel`.
    pub fn load(path: &Path, channel: Channel) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::InvalidArchive {
            path: path.display().to_string(),
            reason: format!("cannot open: {e}"),
        })?;
        let f = Self::from_json_str(&text, &path.display().to_string())?;
        if f.channel != channel {
            return Err(Error::InvalidArchive {
                path: path.display().to_string(),
                reason: format!("fitted for {}, expected {channel}", f.channel),
            });
        }
        tracing::debug!(
            path = %path.display(),
            name = %f.name,
            shifts = f.shifts.len(),
            "fake-factor function loaded"
        );
        Ok(f)
    }

    /// Parse and validate an archive document.
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self> {
        let doc: ArchiveDoc = serde_json::from_str(text).map_err(|e| Error::InvalidArchive {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
        Self::compile(doc).map_err(|reason| Error::InvalidArchive { path: origin.to_string(), reason })
    }

    /// Archive name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shifts this function can evaluate.
    pub fn shifts(&self) -> BTreeSet<Shift> {
        self.shifts.keys().copied().collect()
    }

    fn compile(doc: ArchiveDoc) -> std::result::Result<Self, String> {
        let channel = doc.channel;
        let expected = FeatureSchema::archive_inputs(channel);
        if doc.inputs != expected {
            return Err(format!("inputs {:?} do not match {channel} schema {expected:?}", doc.inputs));
        }
        let slot = |name: &str| {
            doc.inputs.iter().position(|i| i == name).ok_or_else(|| format!("missing input {name}"))
        };
        let slots = InputSlots {
            pt: slot("tau_pt")?,
            decay_mode: slot("tau_decayMode")?,
            njets: slot("njets")?,
            frac_qcd: slot("frac_qcd")?,
        };

        let mut components: Vec<Component> = Vec::with_capacity(doc.components.len());
        for c in doc.components {
            if components.iter().any(|k| k.process == c.process) {
                return Err(format!("duplicate component {}", c.process.as_str()));
            }
            components.push(compile_component(c, &doc.inputs)?);
        }

        let declared: BTreeSet<SystematicSource> = doc
            .shifts
            .iter()
            .map(|s| s.parse::<SystematicSource>().map_err(|e| e.to_string()))
            .collect::<std::result::Result<_, _>>()?;
        let required: BTreeSet<SystematicSource> =
            SystematicSource::for_channel(channel).into_iter().collect();
        if declared != required {
            let missing: Vec<String> = required.difference(&declared).map(|s| s.name()).collect();
            let extra: Vec<String> = declared.difference(&required).map(|s| s.name()).collect();
            return Err(format!("declared shifts differ from {channel} set (missing {missing:?}, extra {extra:?})"));
        }

        let mut shifts = HashMap::with_capacity(declared.len() * 2);
        for source in declared {
            for direction in ShiftDirection::BOTH {
                let path = resolve_shift(source, direction, &components, &doc.frac_syst)?;
                shifts.insert(Shift::new(source, direction), path);
            }
        }

        Ok(Self {
            name: doc.name,
            channel,
            slots,
            n_inputs: doc.inputs.len(),
            components,
            shifts,
        })
    }
}

fn compile_component(
    c: ComponentDoc,
    inputs: &[String],
) -> std::result::Result<Component, String> {
    let tag = c.process.as_str();
    let fraction_name = format!("frac_{tag}");
    let fraction_input = inputs
        .iter()
        .position(|i| *i == fraction_name)
        .ok_or_else(|| format!("component {tag} has no {fraction_name} input"))?;
    check_edges(&c.pt_edges).map_err(|e| format!("component {tag}: pt_edges {e}"))?;
    let n_bins = c.pt_edges.len() - 1;

    let mut tables: [Option<Table>; 4] = Default::default();
    for b in c.bins {
        if b.decay_mode > 1 || b.njets > 1 {
            return Err(format!("component {tag}: bucket dm{} njet{} out of range", b.decay_mode, b.njets));
        }
        if b.values.len() != n_bins || b.stat_errors.len() != n_bins {
            return Err(format!(
                "component {tag}: bucket dm{} njet{} needs {n_bins} values and stat errors",
                b.decay_mode, b.njets
            ));
        }
        let slot = &mut tables[bucket(b.decay_mode, b.njets)];
        if slot.is_some() {
            return Err(format!("component {tag}: duplicate bucket dm{} njet{}", b.decay_mode, b.njets));
        }
        *slot = Some(Table { values: b.values, stat_errors: b.stat_errors });
    }
    let [t0, t1, t2, t3] = tables;
    let tables = match (t0, t1, t2, t3) {
        (Some(a), Some(b), Some(c), Some(d)) => [a, b, c, d],
        _ => return Err(format!("component {tag}: all four dm/njet buckets are required")),
    };

    let mut corrections = Vec::with_capacity(c.corrections.len());
    for k in c.corrections {
        let input = inputs
            .iter()
            .position(|i| *i == k.input)
            .ok_or_else(|| format!("component {tag}: unknown correction input {}", k.input))?;
        check_edges(&k.edges).map_err(|e| format!("component {tag}: correction edges {e}"))?;
        if k.values.len() != k.edges.len() - 1 {
            return Err(format!("component {tag}: correction in {} has wrong value count", k.input));
        }
        corrections.push(Correction { input, edges: k.edges, values: k.values });
    }

    Ok(Component { process: c.process, fraction_input, syst: c.syst, pt_edges: c.pt_edges, tables, corrections })
}

fn resolve_shift(
    source: SystematicSource,
    direction: ShiftDirection,
    components: &[Component],
    frac_syst: &BTreeMap<String, f64>,
) -> std::result::Result<ShiftPath, String> {
    let find = |p: FakeProcess| {
        components
            .iter()
            .position(|c| c.process == p)
            .ok_or_else(|| format!("shift {source} needs a {} component", p.as_str()))
    };
    let sign = direction.sign();
    Ok(match source {
        SystematicSource::Syst(p) => ShiftPath::Norm { component: find(p)?, sign },
        SystematicSource::Stat { process, decay_mode, njets } => {
            ShiftPath::Stat { component: find(process)?, bucket: bucket(decay_mode, njets), sign }
        }
        SystematicSource::FracSyst(p) => {
            let rel = frac_syst
                .get(p.as_str())
                .copied()
                .ok_or_else(|| format!("shift {source} needs frac_syst.{}", p.as_str()))?;
            ShiftPath::Fraction { component: find(p)?, delta: sign * rel }
        }
    })
}

fn check_edges(edges: &[f64]) -> std::result::Result<(), String> {
    if edges.len() < 2
        || edges.iter().any(|e| !e.is_finite())
        || edges.windows(2).any(|w| w[1] <= w[0])
    {
        return Err(format!("must be at least two finite, strictly increasing values, got {edges:?}"));
    }
    Ok(())
}

fn bucket(decay_mode: u8, njets: u8) -> usize {
    decay_mode as usize * 2 + njets as usize
}

/// Bin index with values outside the edges taken by the nearest bin.
fn nearest_bin(edges: &[f64], x: f64) -> usize {
    edges.partition_point(|&e| e <= x).saturating_sub(1).min(edges.len() - 2)
}

impl FakeFactorEvaluator for FakeFactorFunction {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn value(&self, features: &[f64], shift: Option<Shift>) -> Result<f64> {
        if features.len() != self.n_inputs {
            return Err(Error::Validation(format!(
                "{}: expected {} features, got {}",
                self.name,
                self.n_inputs,
                features.len()
            )));
        }
        let path = match shift {
            Some(s) => Some(*self.shifts.get(&s).ok_or_else(|| Error::UnknownShift(s.name()))?),
            None => None,
        };

        let pt = features[self.slots.pt];
        let dm_bucket = u8::from(features[self.slots.decay_mode] != 0.0);
        let nj_bucket = u8::from(features[self.slots.njets] != 0.0);
        let event_bucket = bucket(dm_bucket, nj_bucket);

        // Fraction of QCD absorbs any fraction shift of another process.
        let mut qcd_fraction_delta = 0.0;
        if let Some(ShiftPath::Fraction { component, delta }) = path {
            let c = &self.components[component];
            qcd_fraction_delta = -features[c.fraction_input] * delta;
        }

        let mut total = 0.0;
        for (i, c) in self.components.iter().enumerate() {
            let table = &c.tables[event_bucket];
            let pt_bin = nearest_bin(&c.pt_edges, pt);
            let mut base = table.values[pt_bin];
            if let Some(ShiftPath::Stat { component, bucket: b, sign }) = path
                && component == i
                && b == event_bucket
            {
                base += sign * table.stat_errors[pt_bin];
            }

            let mut value = base;
            for k in &c.corrections {
                value *= k.values[nearest_bin(&k.edges, features[k.input])];
            }
            if let Some(ShiftPath::Norm { component, sign }) = path
                && component == i
            {
                value *= 1.0 + sign * c.syst;
            }

            let mut fraction = features[c.fraction_input];
            match path {
                Some(ShiftPath::Fraction { component, delta }) if component == i => {
                    fraction *= 1.0 + delta;
                }
                _ => {}
            }
            if c.fraction_input == self.slots.frac_qcd {
                fraction += qcd_fraction_delta;
            }
            total += fraction * value;
        }
        Ok(total)
    }
}
