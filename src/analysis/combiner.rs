use crate::error::{YieldError, YieldResult};
use crate::histoer::histo1d::histogram1d::Histogram;

/// Linear combination `Σ cᵢ·hᵢ`; every term must share the first term's binning.
pub fn combine(name: &str, terms: &[(f64, &Histogram)]) -> YieldResult<Histogram> {
    let Some((_, first)) = terms.first() else {
        return Err(YieldError::Binning(format!(
            "cannot combine '{name}' from zero histograms"
        )));
    };

    let mut result = first.empty_like(name);
    for (coefficient, histogram) in terms {
        result.add(histogram, *coefficient)?;
    }
    Ok(result)
}

/// Positron-charge-symmetric background measured alongside a run group.
#[derive(Debug, Clone, Copy)]
pub struct PositronTerms<'a> {
    pub data: &'a Histogram,
    pub dummy: &'a Histogram,
}

/// `(data − posData) − (dummy − posDummy) / wall_ratio`.
pub fn dummy_subtract(
    name: &str,
    data: &Histogram,
    dummy: &Histogram,
    wall_ratio: f64,
    positron: Option<PositronTerms<'_>>,
) -> YieldResult<Histogram> {
    if !(wall_ratio > 0.0) || !wall_ratio.is_finite() {
        return Err(YieldError::WallRatio(wall_ratio));
    }

    let dummy_coefficient = -1.0 / wall_ratio;
    match positron {
        Some(positron) => combine(
            name,
            &[
                (1.0, data),
                (-1.0, positron.data),
                (dummy_coefficient, dummy),
                (-dummy_coefficient, positron.dummy),
            ],
        ),
        None => combine(name, &[(1.0, data), (dummy_coefficient, dummy)]),
    }
}

/// Bin-wise quotient. Bins with a zero denominator hold `0.0 ± 0.0` and are
/// listed in `undefined_bins`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ratio {
    pub histogram: Histogram,
    pub undefined_bins: Vec<usize>,
}

/// `numerator / denominator` with `σ² = (σn²·d² + σd²·n²) / d⁴`.
pub fn ratio(name: &str, numerator: &Histogram, denominator: &Histogram) -> YieldResult<Ratio> {
    numerator.check_binning(denominator)?;

    let mut histogram = numerator.empty_like(name);
    let mut undefined_bins = Vec::new();

    for bin in 0..numerator.bins.len() {
        let n = numerator.bins[bin];
        let d = denominator.bins[bin];
        if d == 0.0 {
            undefined_bins.push(bin);
            continue;
        }

        let d2 = d * d;
        histogram.bins[bin] = n / d;
        histogram.sumw2[bin] = (numerator.sumw2[bin] * d2 + denominator.sumw2[bin] * n * n) / (d2 * d2);
    }

    if !undefined_bins.is_empty() {
        log::debug!(
            "Ratio {name}: {} bins with empty denominator",
            undefined_bins.len()
        );
    }

    Ok(Ratio {
        histogram,
        undefined_bins,
    })
}
