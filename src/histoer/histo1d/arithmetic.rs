use super::histogram1d::Histogram;
use crate::error::YieldResult;

impl Histogram {
    /// Multiply contents by `factor`; errors scale with it.
    pub fn scale(&mut self, factor: f64) {
        for (content, w2) in self.bins.iter_mut().zip(self.sumw2.iter_mut()) {
            *content *= factor;
            *w2 *= factor * factor;
        }
        self.underflow *= factor;
        self.overflow *= factor;
    }

    /// `self += coefficient * other`, errors added in quadrature.
    pub fn add(&mut self, other: &Histogram, coefficient: f64) -> YieldResult<()> {
        self.check_binning(other)?;

        let c2 = coefficient * coefficient;
        for bin in 0..self.bins.len() {
            self.bins[bin] += coefficient * other.bins[bin];
            self.sumw2[bin] += c2 * other.sumw2[bin];
        }
        self.underflow += coefficient * other.underflow;
        self.overflow += coefficient * other.overflow;
        self.entries += other.entries;

        Ok(())
    }

    /// Scale to unit in-range area. An empty histogram is left as is and
    /// `false` is returned.
    pub fn normalize_area(&mut self) -> bool {
        let area = self.integral();
        if area > 0.0 {
            self.scale(1.0 / area);
            true
        } else {
            log::warn!("Histogram {} has no area to normalize", self.name);
            false
        }
    }
}
