//! Flow-aware 1D histogram used for control-region templates and fractions.
//!
//! Bin contents are stored in "cell" layout: index `0` is the underflow,
//! indices `1..=n_bins` are the regular bins and `n_bins + 1` is the overflow.
//! All index-based accessors use this layout.

use crate::error::{Error, Result};

/// A 1D histogram with explicit underflow/overflow cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Bin edges (length = n_bins + 1, strictly increasing).
    pub bin_edges: Vec<f64>,
    /// Cell contents (length = n_bins + 2, including under/overflow).
    pub bin_content: Vec<f64>,
}

impl Histogram {
    /// Create an empty histogram over `bin_edges`.
    pub fn new(name: impl Into<String>, bin_edges: Vec<f64>) -> Result<Self> {
        validate_edges(&bin_edges)?;
        let n_cells = bin_edges.len() + 1;
        Ok(Self { name: name.into(), bin_edges, bin_content: vec![0.0; n_cells] })
    }

    /// Create a histogram from edges and cell contents (flows included).
    pub fn from_cells(
        name: impl Into<String>,
        bin_edges: Vec<f64>,
        bin_content: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        validate_edges(&bin_edges)?;
        if bin_content.len() != bin_edges.len() + 1 {
            return Err(Error::IncompatibleBinning(format!(
                "'{name}': {} cells for {} edges (expected {})",
                bin_content.len(),
                bin_edges.len(),
                bin_edges.len() + 1
            )));
        }
        Ok(Self { name, bin_edges, bin_content })
    }

    /// Number of regular bins.
    pub fn n_bins(&self) -> usize {
        self.bin_edges.len() - 1
    }

    /// Number of cells including under/overflow.
    pub fn n_cells(&self) -> usize {
        self.bin_content.len()
    }

    /// Content of cell `i` (0 = underflow). Out-of-range indices read as 0.
    pub fn bin_content(&self, i: usize) -> f64 {
        self.bin_content.get(i).copied().unwrap_or(0.0)
    }

    /// Set the content of cell `i`. Out-of-range indices are ignored.
    pub fn set_bin_content(&mut self, i: usize, value: f64) {
        if let Some(c) = self.bin_content.get_mut(i) {
            *c = value;
        }
    }

    /// Zero all cells, keeping the binning.
    pub fn reset(&mut self) {
        self.bin_content.iter_mut().for_each(|c| *c = 0.0);
    }

    /// An empty copy with the same binning under a new name.
    pub fn empty_like(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bin_edges: self.bin_edges.clone(),
            bin_content: vec![0.0; self.bin_content.len()],
        }
    }

    /// Accumulate `scale * other` cell by cell.
    pub fn add(&mut self, other: &Histogram, scale: f64) -> Result<()> {
        self.check_compatible(other)?;
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += scale * b;
        }
        Ok(())
    }

    /// Divide cell by cell by `denominator`. Cells with a zero denominator become 0.
    pub fn divide(&mut self, denominator: &Histogram) -> Result<()> {
        self.check_compatible(denominator)?;
        for (a, &d) in self.bin_content.iter_mut().zip(&denominator.bin_content) {
            *a = if d == 0.0 { 0.0 } else { *a / d };
        }
        Ok(())
    }

    /// Cell index for `value`.
    ///
    /// Values below the first edge map to the underflow cell `0`; values at or
    /// above the last edge, and NaN, map to the overflow cell `n_bins + 1`.
    pub fn find_bin(&self, value: f64) -> usize {
        let edges = &self.bin_edges;
        if value < edges[0] {
            return 0;
        }
        if !(value < edges[edges.len() - 1]) {
            return edges.len();
        }
        // First edge strictly greater than `value`; in range this is in 1..n_edges.
        edges.partition_point(|&e| e <= value)
    }

    /// Sum of all regular bins (flows excluded).
    pub fn integral(&self) -> f64 {
        self.bin_content[1..=self.n_bins()].iter().sum()
    }

    fn check_compatible(&self, other: &Histogram) -> Result<()> {
        if self.bin_edges != other.bin_edges {
            return Err(Error::IncompatibleBinning(format!(
                "'{}' ({} bins) vs '{}' ({} bins)",
                self.name,
                self.n_bins(),
                other.name,
                other.n_bins()
            )));
        }
        Ok(())
    }
}

fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::IncompatibleBinning(format!(
            "need at least 2 bin edges, got {}",
            edges.len()
        )));
    }
    if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::IncompatibleBinning(format!(
            "bin edges must be finite and strictly increasing: {edges:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hist(cells: &[f64]) -> Histogram {
        let edges: Vec<f64> = (0..cells.len() - 1).map(|i| i as f64).collect();
        Histogram::from_cells("h", edges, cells.to_vec()).unwrap()
    }

    #[test]
    fn find_bin_edge_cases() {
        let h = Histogram::new("h", vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(h.find_bin(-0.5), 0);
        assert_eq!(h.find_bin(0.0), 1);
        assert_eq!(h.find_bin(0.99), 1);
        assert_eq!(h.find_bin(1.0), 2);
        assert_eq!(h.find_bin(2.99), 3);
        assert_eq!(h.find_bin(3.0), 4);
        assert_eq!(h.find_bin(f64::NAN), 4);
        assert_eq!(h.find_bin(f64::NEG_INFINITY), 0);
    }

    #[test]
    fn add_with_scale() {
        let mut a = hist(&[1.0, 2.0, 3.0, 4.0]);
        let b = hist(&[1.0, 1.0, 1.0, 1.0]);
        a.add(&b, -2.0).unwrap();
        assert_eq!(a.bin_content, vec![-1.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn divide_zero_denominator_gives_zero() {
        let mut a = hist(&[5.0, 6.0, 3.0, 0.0]);
        let d = hist(&[0.0, 3.0, 4.0, 0.0]);
        a.divide(&d).unwrap();
        assert_eq!(a.bin_content(0), 0.0);
        assert_relative_eq!(a.bin_content(1), 2.0);
        assert_relative_eq!(a.bin_content(2), 0.75);
        assert_eq!(a.bin_content(3), 0.0);
    }

    #[test]
    fn incompatible_binning_rejected() {
        let mut a = Histogram::new("a", vec![0.0, 1.0, 2.0]).unwrap();
        let b = Histogram::new("b", vec![0.0, 2.0]).unwrap();
        let err = a.add(&b, 1.0).unwrap_err();
        assert!(err.to_string().contains("incompatible binning"));
    }

    #[test]
    fn invalid_edges_rejected() {
        assert!(Histogram::new("h", vec![1.0]).is_err());
        assert!(Histogram::new("h", vec![0.0, 0.0, 1.0]).is_err());
        assert!(Histogram::from_cells("h", vec![0.0, 1.0], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn set_get_and_integral() {
        let mut h = Histogram::new("h", vec![0.0, 1.0, 2.0]).unwrap();
        h.set_bin_content(0, 7.0);
        h.set_bin_content(1, 2.0);
        h.set_bin_content(2, 3.0);
        h.set_bin_content(99, 1.0);
        assert_eq!(h.n_cells(), 4);
        assert_eq!(h.bin_content(99), 0.0);
        assert_relative_eq!(h.integral(), 5.0);
        h.reset();
        assert!(h.bin_content.iter().all(|&c| c == 0.0));
    }
}
