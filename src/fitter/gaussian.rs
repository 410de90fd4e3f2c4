use nalgebra::{DMatrix, DVector};

use crate::histoer::histo1d::histogram1d::Histogram;

#[derive(Default, Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Value {
    pub value: f64,
    pub uncertainty: f64,
}

#[derive(Default, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GaussianParams {
    pub amplitude: Value,
    pub mean: Value,
    pub sigma: Value,
    pub fwhm: Value,
    pub area: Value,
}

impl GaussianParams {
    pub fn new(amplitude: Value, mean: Value, sigma: Value, bin_width: f64) -> Option<Self> {
        if !(sigma.value > 0.0) {
            log::error!("Sigma value is not positive");
            return None;
        }

        let fwhm_factor = 2.0 * (2.0 * f64::ln(2.0)).sqrt();
        let two_pi_sqrt = (2.0 * std::f64::consts::PI).sqrt();

        let area = amplitude.value * sigma.value * two_pi_sqrt / bin_width;
        let area_uncertainty = ((sigma.value * two_pi_sqrt * amplitude.uncertainty).powi(2)
            + (amplitude.value * two_pi_sqrt * sigma.uncertainty).powi(2))
        .sqrt()
            / bin_width;

        Some(GaussianParams {
            amplitude,
            mean,
            sigma,
            fwhm: Value {
                value: fwhm_factor * sigma.value,
                uncertainty: fwhm_factor * sigma.uncertainty,
            },
            area: Value {
                value: area,
                uncertainty: area_uncertainty,
            },
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.amplitude.value * (-((x - self.mean.value).powi(2)) / (2.0 * self.sigma.value.powi(2))).exp()
    }
}

const MAX_ITERATIONS: usize = 200;
const CHI2_TOLERANCE: f64 = 1e-12;

/// Single-peak Gaussian χ² fit, optionally on a constant background.
///
/// A weighted parabola in `ln(y)` gives the starting point, then
/// Levenberg-Marquardt steps minimise χ² over every point in the window.
/// Empty bins stay in the fit with the smallest nonzero variance of the
/// window, so sparse tails pull on the shape.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GaussianFitter {
    x: Vec<f64>,
    y: Vec<f64>,
    variance: Vec<f64>,
    pub bin_width: f64,
    pub constant_background: bool,
    pub fit_params: Option<GaussianParams>,
    pub background: Option<Value>,
}

impl GaussianFitter {
    pub fn new(x: Vec<f64>, y: Vec<f64>, variance: Vec<f64>, bin_width: f64) -> Self {
        Self {
            x,
            y,
            variance,
            bin_width,
            constant_background: false,
            fit_params: None,
            background: None,
        }
    }

    /// Bins whose centres lie in `[lo, hi]`.
    pub fn from_histogram(histogram: &Histogram, lo: f64, hi: f64) -> Self {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut variance = Vec::new();
        for bin in 0..histogram.number_of_bins() {
            let center = histogram.bin_center(bin);
            if center >= lo && center <= hi {
                x.push(center);
                y.push(histogram.bins[bin]);
                variance.push(histogram.sumw2[bin]);
            }
        }
        Self::new(x, y, variance, histogram.bin_width)
    }

    pub fn with_constant_background(mut self) -> Self {
        self.constant_background = true;
        self
    }

    pub fn fit(&mut self) -> Option<&GaussianParams> {
        self.fit_params = None;
        self.background = None;

        let guess = self.initial_guess()?;
        let (params, covariance) = self.refine(&guess)?;
        let error = |i: usize| covariance[(i, i)].max(0.0).sqrt();

        let amplitude = Value {
            value: params[0],
            uncertainty: error(0),
        };
        let mean = Value {
            value: params[1],
            uncertainty: error(1),
        };
        let sigma = Value {
            value: params[2].abs(),
            uncertainty: error(2),
        };

        let (x_min, x_max) = self
            .x
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        if !(amplitude.value > 0.0) || !(mean.value >= x_min && mean.value <= x_max) {
            log::debug!(
                "Gaussian fit left the window (amplitude {}, mean {})",
                amplitude.value,
                mean.value
            );
            return None;
        }

        if self.constant_background {
            self.background = Some(Value {
                value: params[3],
                uncertainty: error(3),
            });
        }
        self.fit_params = GaussianParams::new(amplitude, mean, sigma, self.bin_width);
        self.fit_params.as_ref()
    }

    /// Variance used for each point; empty bins borrow the smallest nonzero one.
    fn point_variances(&self) -> Vec<f64> {
        let floor = self
            .variance
            .iter()
            .copied()
            .filter(|&var| var > 0.0)
            .fold(f64::INFINITY, f64::min);
        let floor = if floor.is_finite() { floor } else { 1.0 };
        self.variance
            .iter()
            .map(|&var| if var > 0.0 { var } else { floor })
            .collect()
    }

    /// `[amplitude, mean, sigma, background]` from a weighted parabola in
    /// `ln(y - background)`, with the background taken as the window minimum.
    fn initial_guess(&self) -> Option<[f64; 4]> {
        let background = if self.constant_background {
            self.y.iter().copied().fold(f64::INFINITY, f64::min)
        } else {
            0.0
        };

        let points: Vec<(f64, f64, f64)> = self
            .x
            .iter()
            .zip(&self.y)
            .zip(&self.variance)
            .map(|((&x, &y), &var)| (x, y - background, var))
            .filter(|&(_, y, var)| y > 0.0 && var > 0.0)
            .map(|(x, y, var)| (x, y.ln(), y * y / var))
            .collect();
        if points.len() < 3 {
            log::debug!("Gaussian fit needs at least 3 filled points, got {}", points.len());
            return None;
        }

        // shift x to the window centre for a well conditioned system
        let x0 = points.iter().map(|p| p.0).sum::<f64>() / points.len() as f64;

        let design = DMatrix::from_fn(points.len(), 3, |row, col| (points[row].0 - x0).powi(col as i32));
        let weights = DVector::from_iterator(points.len(), points.iter().map(|p| p.2));
        let targets = DVector::from_iterator(points.len(), points.iter().map(|p| p.1));

        let weighted = DMatrix::from_fn(points.len(), 3, |row, col| design[(row, col)] * weights[row]);
        let normal = design.transpose() * &weighted;
        let rhs = weighted.transpose() * &targets;

        let coefficients = normal.try_inverse()? * rhs;
        let (a, b, c) = (coefficients[0], coefficients[1], coefficients[2]);
        if !(c < 0.0) {
            log::debug!("Gaussian fit found no peak (curvature {c})");
            return None;
        }

        Some([
            (a - b * b / (4.0 * c)).exp(),
            x0 - b / (2.0 * c),
            (-1.0 / (2.0 * c)).sqrt(),
            background,
        ])
    }

    fn model(params: &DVector<f64>, x: f64) -> (f64, [f64; 4]) {
        let (amplitude, mean, sigma) = (params[0], params[1], params[2]);
        let u = (x - mean) / sigma;
        let shape = (-0.5 * u * u).exp();
        let background = params.get(3).copied().unwrap_or(0.0);
        (
            amplitude * shape + background,
            [shape, amplitude * shape * u / sigma, amplitude * shape * u * u / sigma, 1.0],
        )
    }

    fn chi2(&self, params: &DVector<f64>, variances: &[f64]) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .zip(variances)
            .map(|((&x, &y), &var)| (y - Self::model(params, x).0).powi(2) / var)
            .sum()
    }

    /// `JᵀJ` and `Jᵀr` of the variance-scaled residuals.
    fn normal_equations(&self, params: &DVector<f64>, variances: &[f64]) -> (DMatrix<f64>, DVector<f64>) {
        let n = params.len();
        let mut jtj = DMatrix::zeros(n, n);
        let mut jtr = DVector::zeros(n);
        for ((&x, &y), &var) in self.x.iter().zip(&self.y).zip(variances) {
            let (value, gradient) = Self::model(params, x);
            for i in 0..n {
                jtr[i] += gradient[i] * (y - value) / var;
                for j in 0..n {
                    jtj[(i, j)] += gradient[i] * gradient[j] / var;
                }
            }
        }
        (jtj, jtr)
    }

    /// Levenberg-Marquardt from `guess`. Returns the parameters and their
    /// covariance.
    fn refine(&self, guess: &[f64; 4]) -> Option<(DVector<f64>, DMatrix<f64>)> {
        let n = if self.constant_background { 4 } else { 3 };
        let variances = self.point_variances();

        let mut params = DVector::from_row_slice(&guess[..n]);
        let mut chi2 = self.chi2(&params, &variances);
        let mut lambda = 1e-3;

        for _ in 0..MAX_ITERATIONS {
            let (jtj, jtr) = self.normal_equations(&params, &variances);
            let mut damped = jtj.clone();
            for i in 0..n {
                damped[(i, i)] += lambda * jtj[(i, i)].max(f64::MIN_POSITIVE);
            }

            let Some(step) = damped.lu().solve(&jtr) else {
                lambda *= 10.0;
                continue;
            };
            let trial = &params + step;
            let trial_chi2 = self.chi2(&trial, &variances);

            if trial_chi2.is_finite() && trial_chi2 <= chi2 {
                let converged = chi2 - trial_chi2 <= CHI2_TOLERANCE * chi2;
                params = trial;
                chi2 = trial_chi2;
                lambda = (lambda / 10.0).max(1e-12);
                if converged {
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > 1e12 {
                    break;
                }
            }
        }

        if params.iter().any(|p| !p.is_finite()) {
            log::debug!("Gaussian fit diverged");
            return None;
        }

        let (jtj, _) = self.normal_equations(&params, &variances);
        let covariance = jtj.try_inverse()?;
        log::debug!("Gaussian fit converged with chi2 = {chi2:.4} over {} points", self.x.len());
        Some((params, covariance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian_histogram(mean: f64, sigma: f64, amplitude: f64) -> Histogram {
        let mut hist = Histogram::new("peak", 400, (0.0, 100.0));
        for bin in 0..400 {
            let x = hist.bin_center(bin);
            let y = amplitude * (-((x - mean).powi(2)) / (2.0 * sigma * sigma)).exp();
            if y > 1e-9 {
                hist.fill_weighted(x, y);
            }
        }
        hist
    }

    #[test]
    fn recovers_exact_gaussian() {
        let hist = gaussian_histogram(50.1, 0.8, 1000.0);
        let mut fitter = GaussianFitter::from_histogram(&hist, 48.0, 52.0);
        let params = fitter.fit().unwrap().clone();

        assert_relative_eq!(params.mean.value, 50.1, epsilon = 1e-6);
        assert_relative_eq!(params.sigma.value, 0.8, epsilon = 1e-6);
        assert_relative_eq!(params.amplitude.value, 1000.0, max_relative = 1e-6);
        assert_relative_eq!(params.fwhm.value, 2.0 * (2.0 * f64::ln(2.0)).sqrt() * 0.8, epsilon = 1e-6);
        assert!(params.mean.uncertainty > 0.0);
        assert_relative_eq!(params.evaluate(50.1), 1000.0, max_relative = 1e-6);
    }

    #[test]
    fn recovers_gaussian_on_flat_pedestal() {
        let mut hist = Histogram::new("peak", 400, (0.0, 100.0));
        for bin in 0..400 {
            let x = hist.bin_center(bin);
            let y = 1000.0 * (-((x - 50.1).powi(2)) / (2.0 * 0.8 * 0.8)).exp() + 20.0;
            hist.fill_weighted(x, y);
        }

        let mut fitter = GaussianFitter::from_histogram(&hist, 46.0, 54.0).with_constant_background();
        let params = fitter.fit().unwrap().clone();
        assert_relative_eq!(params.mean.value, 50.1, epsilon = 1e-4);
        assert_relative_eq!(params.sigma.value, 0.8, epsilon = 1e-4);
        assert_relative_eq!(params.amplitude.value, 1000.0, max_relative = 1e-4);
        assert_relative_eq!(fitter.background.unwrap().value, 20.0, epsilon = 1e-3);
    }

    #[test]
    fn empty_tail_bins_stay_in_the_fit() {
        // counts centred on a bin edge, so the window is symmetric about the mean
        let mut hist = Histogram::new("peak", 400, (0.0, 100.0));
        for bin in 0..400 {
            let x = hist.bin_center(bin);
            let counts = (200.0 * (-((x - 50.0).powi(2)) / 2.0).exp()).round() as usize;
            for _ in 0..counts {
                hist.fill(x);
            }
        }

        let mut fitter = GaussianFitter::from_histogram(&hist, 45.0, 55.0);
        assert!(fitter.y.iter().any(|&y| y == 0.0));
        let params = fitter.fit().unwrap().clone();
        assert_relative_eq!(params.mean.value, 50.0, epsilon = 1e-6);
        assert_relative_eq!(params.sigma.value, 1.0, epsilon = 0.05);
        assert!(params.sigma.uncertainty > 0.0);
        assert!(fitter.background.is_none());
    }

    #[test]
    fn valley_or_sparse_data_has_no_peak() {
        let mut valley = Histogram::new("valley", 10, (0.0, 10.0));
        for bin in 0..10 {
            let x = bin as f64 + 0.5;
            valley.fill_weighted(x, 1.0 + (x - 5.0).powi(2));
        }
        assert!(GaussianFitter::from_histogram(&valley, 0.0, 10.0).fit().is_none());

        let mut sparse = Histogram::new("sparse", 10, (0.0, 10.0));
        sparse.fill(4.5);
        sparse.fill(5.5);
        assert!(GaussianFitter::from_histogram(&sparse, 0.0, 10.0).fit().is_none());
    }
}
