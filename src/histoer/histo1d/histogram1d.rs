use crate::analysis::variables::Binning;
use crate::error::{YieldError, YieldResult};

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Histogram {
    pub name: String,
    pub bins: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub range: (f64, f64),
    pub overflow: f64,
    pub underflow: f64,
    pub bin_width: f64,
    pub entries: u64,
}

impl Histogram {
    // Create a new Histogram with specified min, max, and number of bins
    pub fn new(name: &str, number_of_bins: usize, range: (f64, f64)) -> Self {
        Histogram {
            name: name.to_string(),
            bins: vec![0.0; number_of_bins],
            sumw2: vec![0.0; number_of_bins],
            range,
            overflow: 0.0,
            underflow: 0.0,
            bin_width: (range.1 - range.0) / number_of_bins as f64,
            entries: 0,
        }
    }

    pub fn from_binning(name: &str, binning: &Binning) -> Self {
        Self::new(name, binning.bins, (binning.min, binning.max))
    }

    /// Empty copy with the same binning under a new name.
    pub fn empty_like(&self, name: &str) -> Self {
        Self::new(name, self.bins.len(), self.range)
    }

    pub fn reset(&mut self) {
        self.bins = vec![0.0; self.bins.len()];
        self.sumw2 = vec![0.0; self.sumw2.len()];
        self.overflow = 0.0;
        self.underflow = 0.0;
        self.entries = 0;
    }

    pub fn number_of_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.bins.len() == other.bins.len() && self.range == other.range
    }

    pub fn check_binning(&self, other: &Histogram) -> YieldResult<()> {
        if self.same_binning(other) {
            Ok(())
        } else {
            Err(YieldError::BinningMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
            })
        }
    }

    // Get the bin edges
    pub fn get_bin_edges(&self) -> Vec<f64> {
        (0..=self.bins.len())
            .map(|i| self.range.0 + i as f64 * self.bin_width)
            .collect()
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.range.0 + (bin as f64 * self.bin_width) + self.bin_width * 0.5
    }

    pub fn bin_error(&self, bin: usize) -> f64 {
        self.sumw2[bin].sqrt()
    }

    // Get the bin index for a given x position.
    pub fn get_bin_index(&self, x: f64) -> Option<usize> {
        if self.bins.is_empty() || x < self.range.0 || x >= self.range.1 || x.is_nan() {
            return None;
        }

        let bin_index: usize = ((x - self.range.0) / self.bin_width).floor() as usize;

        Some(bin_index.min(self.bins.len() - 1))
    }

    /// Bin index clamped into the histogram, so window edges outside the
    /// range still map onto the first or last bin. An empty histogram maps
    /// everything onto 0.
    pub fn clamped_bin_index(&self, x: f64) -> usize {
        if x < self.range.0 {
            0
        } else {
            self.get_bin_index(x)
                .unwrap_or_else(|| self.bins.len().saturating_sub(1))
        }
    }

    // Get the bin centers between the start and end x values (inclusive)
    pub fn get_bin_centers_between(&self, start_x: f64, end_x: f64) -> Vec<f64> {
        if self.bins.is_empty() {
            return Vec::new();
        }
        let start_bin = self.clamped_bin_index(start_x);
        let end_bin = self.clamped_bin_index(end_x);

        (start_bin..=end_bin).map(|bin| self.bin_center(bin)).collect()
    }

    // Get the bin counts between the start and end x values (inclusive)
    pub fn get_bin_counts_between(&self, start_x: f64, end_x: f64) -> Vec<f64> {
        if self.bins.is_empty() {
            return Vec::new();
        }
        let start_bin = self.clamped_bin_index(start_x);
        let end_bin = self.clamped_bin_index(end_x);

        (start_bin..=end_bin).map(|bin| self.bins[bin]).collect()
    }
}
