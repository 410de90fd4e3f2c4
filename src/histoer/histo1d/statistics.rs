use super::histogram1d::Histogram;

impl Histogram {
    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Integral and error over bins `first..=last` (clamped to the histogram).
    /// With `width` set each bin is multiplied by the bin width.
    pub fn integral_and_error(&self, first: usize, last: usize, width: bool) -> (f64, f64) {
        if self.bins.is_empty() || first > last || first >= self.bins.len() {
            return (0.0, 0.0);
        }
        let last = last.min(self.bins.len() - 1);
        let factor = if width { self.bin_width } else { 1.0 };

        let mut integral = 0.0;
        let mut variance = 0.0;
        for bin in first..=last {
            integral += self.bins[bin] * factor;
            variance += self.sumw2[bin] * factor * factor;
        }

        (integral, variance.sqrt())
    }

    /// Width-weighted integral of a time window: bins from the one holding
    /// `lo` up to, but excluding, the one holding `hi`.
    /// Edges below the range clamp to the first bin; an upper edge at or
    /// past the range end includes the last bin.
    pub fn window_integral(&self, lo: f64, hi: f64) -> (f64, f64) {
        let first = self.clamped_bin_index(lo);
        let end = if hi >= self.range.1 {
            self.bins.len()
        } else if hi < self.range.0 {
            0
        } else {
            self.clamped_bin_index(hi)
        };
        if end == 0 {
            return (0.0, 0.0);
        }
        self.integral_and_error(first, end - 1, true)
    }

    /// Index of the first bin holding the largest content.
    pub fn maximum_bin(&self) -> usize {
        let mut max_bin = 0;
        for (bin, &content) in self.bins.iter().enumerate() {
            if content > self.bins[max_bin] {
                max_bin = bin;
            }
        }
        max_bin
    }

    // Calculate the statistics for the histogram within the specified x range.
    pub fn get_statistics(&self, start_x: f64, end_x: f64) -> (f64, f64, f64) {
        if self.bins.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let start_bin = self.clamped_bin_index(start_x);
        let end_bin = self.clamped_bin_index(end_x);

        let mut sum_product = 0.0;
        let mut total_count = 0.0;

        for bin in start_bin..=end_bin {
            sum_product += self.bins[bin] * self.bin_center(bin);
            total_count += self.bins[bin];
        }

        if total_count <= 0.0 {
            return (0.0, 0.0, 0.0);
        }

        let mean = sum_product / total_count;

        let mut sum_squared_diff = 0.0;
        for bin in start_bin..=end_bin {
            let diff = self.bin_center(bin) - mean;
            sum_squared_diff += self.bins[bin] * diff * diff;
        }

        let stdev = (sum_squared_diff / total_count).sqrt();

        (total_count, mean, stdev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> Histogram {
        let mut hist = Histogram::new("ramp", 5, (0.0, 10.0));
        for (bin, count) in [1.0, 2.0, 3.0, 2.0, 1.0].iter().enumerate() {
            hist.fill_weighted(hist.bin_center(bin), *count);
        }
        hist
    }

    #[test]
    fn integral_with_and_without_width() {
        let hist = ramp();
        assert_eq!(hist.integral(), 9.0);
        let (plain, err) = hist.integral_and_error(1, 3, false);
        assert_eq!(plain, 7.0);
        assert_relative_eq!(err, (4.0_f64 + 9.0 + 4.0).sqrt());

        let (wide, wide_err) = hist.integral_and_error(1, 3, true);
        assert_eq!(wide, 14.0);
        assert_relative_eq!(wide_err, 2.0 * 17.0_f64.sqrt());
        assert_eq!(hist.integral_and_error(3, 1, true), (0.0, 0.0));
    }

    #[test]
    fn window_integral_excludes_the_bin_holding_hi() {
        let hist = ramp();
        // lo in bin 1, hi in bin 3 -> bins 1 and 2
        let (yield_, _) = hist.window_integral(2.5, 6.5);
        assert_eq!(yield_, (2.0 + 3.0) * 2.0);
        assert_eq!(hist.window_integral(-5.0, 0.5), (0.0, 0.0));
        // hi on the upper edge keeps the last bin
        assert_eq!(hist.window_integral(8.0, 10.0).0, 2.0);
    }

    #[test]
    fn maximum_bin_prefers_first_maximum() {
        let mut hist = Histogram::new("h", 4, (0.0, 4.0));
        hist.fill_weighted(1.5, 3.0);
        hist.fill_weighted(2.5, 3.0);
        assert_eq!(hist.maximum_bin(), 1);
        assert_eq!(Histogram::new("empty", 3, (0.0, 1.0)).maximum_bin(), 0);
    }

    #[test]
    fn windowed_mean_and_stdev() {
        let hist = ramp();
        let (count, mean, stdev) = hist.get_statistics(0.0, 9.99);
        assert_eq!(count, 9.0);
        assert_relative_eq!(mean, 5.0);
        // squared offsets 16, 4, 0, 4, 16 weighted by 1, 2, 3, 2, 1
        assert_relative_eq!(stdev, (48.0_f64 / 9.0).sqrt());
    }
}
