//! Diagnostic records for locally corrected values.
//!
//! Neither a negative QCD fraction nor an out-of-range fake factor is an
//! error: both are corrected in place and reported to a [`DiagnosticSink`]
//! injected by the owner of the run.

use std::sync::atomic::{AtomicU64, Ordering};

use ff_core::{Channel, FractionGroup, Leg};

/// Why the fractions of a bin were rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescaleReason {
    /// Data minus MC was negative; QCD set to zero and the rest rescaled.
    NegativeQcd,
    /// A non-QCD group was negative; zeroed and the rest renormalized.
    NegativeGroup,
    /// The data bin was empty; the bin is attributed entirely to QCD.
    EmptyData,
}

/// One corrected fraction bin.
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleRecord {
    /// Channel.
    pub channel: Channel,
    /// Category name.
    pub category: String,
    /// Cell index (0 = underflow).
    pub cell: usize,
    /// What triggered the correction.
    pub reason: RescaleReason,
    /// QCD fraction before the correction.
    pub qcd_before: f64,
    /// Fractions after the correction.
    pub values: Vec<(FractionGroup, f64)>,
}

/// One fake factor replaced by 0 because it fell outside `[0, 999]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampRecord {
    /// Input file.
    pub file: String,
    /// Row in the input table.
    pub row: usize,
    /// Leg being evaluated.
    pub leg: Leg,
    /// `nominal` or the shift name, e.g. `ff_qcd_syst_up`.
    pub variation: String,
    /// Raw evaluator output.
    pub raw: f64,
    /// Feature vector passed to the evaluator.
    pub features: Vec<f64>,
}

/// Receiver of diagnostic records, shared by all workers of a run.
pub trait DiagnosticSink: Send + Sync {
    /// A fraction bin was corrected.
    fn fraction_rescaled(&self, record: &RescaleRecord);

    /// A fake factor was clamped.
    fn value_clamped(&self, record: &ClampRecord);
}

/// Sink that logs through `tracing` and counts records.
#[derive(Debug, Default)]
pub struct TracingSink {
    rescaled: AtomicU64,
    clamped: AtomicU64,
}

impl TracingSink {
    /// New sink with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of corrected fraction bins so far.
    pub fn rescaled(&self) -> u64 {
        self.rescaled.load(Ordering::Relaxed)
    }

    /// Number of clamped fake factors so far.
    pub fn clamped(&self) -> u64 {
        self.clamped.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for TracingSink {
    fn fraction_rescaled(&self, record: &RescaleRecord) {
        self.rescaled.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            channel = %record.channel,
            category = %record.category,
            cell = record.cell,
            reason = ?record.reason,
            qcd_before = record.qcd_before,
            "corrected composition fractions"
        );
        for (group, value) in &record.values {
            tracing::debug!(group = %group, value, "rescaled fraction");
        }
    }

    fn value_clamped(&self, record: &ClampRecord) {
        self.clamped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            file = %record.file,
            row = record.row,
            leg = record.leg.number(),
            variation = %record.variation,
            raw = record.raw,
            features = ?record.features,
            "fake factor outside [0, 999], set to 0"
        );
    }
}
