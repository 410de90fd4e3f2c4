use serde::{Deserialize, Serialize};

use crate::analysis::variables::DataExpr;
use crate::error::{YieldError, YieldResult};
use crate::histoer::cuts::Cuts;
use crate::histoer::histo1d::filling::Weights;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::util::event_table::EventTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoincidenceConfig {
    pub time_column: String,
    /// Wide gate, ns. Rows must lie strictly inside it.
    pub gate: (f64, f64),
    pub timing_bins: usize,
    pub rf_period: f64,
    pub half_width: f64,
    pub max_side_peaks: u32,
    /// Leave out the random windows one RF period from the peak.
    pub skip_first_sideband: bool,
}

impl Default for CoincidenceConfig {
    fn default() -> Self {
        Self {
            time_column: "CTime.ePiCoinTime_ROC1".to_string(),
            gate: (20.0, 80.0),
            timing_bins: 400,
            rf_period: 4.0,
            half_width: 1.0,
            max_side_peaks: 6,
            skip_first_sideband: true,
        }
    }
}

impl CoincidenceConfig {
    pub fn validate(&self) -> YieldResult<()> {
        let fail = |reason: &str| Err(YieldError::Settings(format!("coincidence: {reason}")));
        if !(self.gate.0 < self.gate.1) {
            return fail("gate must satisfy lo < hi");
        }
        if self.timing_bins == 0 {
            return fail("timing_bins must be positive");
        }
        if !(self.rf_period > 0.0) {
            return fail("rf_period must be positive");
        }
        if !(self.half_width > 0.0) {
            return fail("half_width must be positive");
        }
        Ok(())
    }

    fn first_side_peak(&self) -> u32 {
        if self.skip_first_sideband { 2 } else { 1 }
    }
}

/// Peak position, windows and yields of one dataset. An all-zero result
/// (see [`CoincidenceResult::is_valid`]) means the gate held no entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoincidenceResult {
    pub peak_center: f64,
    pub coin_window: (f64, f64),
    pub coin_yield: f64,
    pub coin_yield_err: f64,
    pub random_mean_yield: f64,
    pub random_mean_yield_err: f64,
    pub random_subtracted_yield: f64,
    pub random_subtracted_yield_err: f64,
    pub random_windows: Vec<(f64, f64)>,
}

impl CoincidenceResult {
    pub fn is_valid(&self) -> bool {
        self.coin_window.0 < self.coin_window.1
    }
}

/// Per-row mask of the base selection restricted to the open wide gate.
fn gated_mask(
    events: &EventTable,
    selection: &Cuts,
    config: &CoincidenceConfig,
) -> YieldResult<(Vec<bool>, Vec<f64>)> {
    let mut mask = selection.create_mask(events)?;
    let times = events.column(&config.time_column)?.to_vec();
    for (keep, &t) in mask.iter_mut().zip(&times) {
        *keep = *keep && t > config.gate.0 && t < config.gate.1;
    }
    Ok((mask, times))
}

fn timing_histogram(mask: &[bool], times: &[f64], config: &CoincidenceConfig) -> Histogram {
    let mut timing = Histogram::new("coincidence_time", config.timing_bins, config.gate);
    timing.fill_selected(times, mask, Weights::Uniform(1.0));
    timing
}

fn windows_from_timing(timing: &Histogram, config: &CoincidenceConfig) -> CoincidenceResult {
    let mut result = CoincidenceResult::default();
    if timing.entries == 0 {
        return result;
    }

    let peak = timing.bin_center(timing.maximum_bin());
    result.peak_center = peak;
    result.coin_window = (peak - config.half_width, peak + config.half_width);
    (result.coin_yield, result.coin_yield_err) =
        timing.window_integral(result.coin_window.0, result.coin_window.1);

    let mut sum = 0.0;
    let mut variance = 0.0;
    for k in config.first_side_peak()..=config.max_side_peaks {
        for sign in [-1.0, 1.0] {
            let center = peak + sign * f64::from(k) * config.rf_period;
            let (lo, hi) = (center - config.half_width, center + config.half_width);
            if lo < config.gate.0 || hi > config.gate.1 {
                continue;
            }
            let (value, error) = timing.window_integral(lo, hi);
            sum += value;
            variance += error * error;
            result.random_windows.push((lo, hi));
        }
    }

    let used = result.random_windows.len();
    if used > 0 {
        result.random_mean_yield = sum / used as f64;
        result.random_mean_yield_err = variance.sqrt() / used as f64;
    } else {
        log::warn!("No random window fits inside the coincidence gate; nothing subtracted");
    }
    result.random_subtracted_yield = result.coin_yield - result.random_mean_yield;
    result.random_subtracted_yield_err = result.coin_yield_err.hypot(result.random_mean_yield_err);

    result
}

/// Locate the timing peak and integrate the signal and random windows.
pub fn compute_windows(
    events: &EventTable,
    base_selection: &Cuts,
    config: &CoincidenceConfig,
) -> YieldResult<CoincidenceResult> {
    config.validate()?;
    let (mask, times) = gated_mask(events, base_selection, config)?;
    Ok(windows_from_timing(&timing_histogram(&mask, &times, config), config))
}

/// Reset `out` and fill it with the signal-window histogram of `variable`
/// minus the average of the random-window histograms, each row weighted by
/// `weight`. On an empty gate `out` stays empty.
pub fn fill_subtracted(
    events: &EventTable,
    base_selection: &Cuts,
    variable: &DataExpr,
    out: &mut Histogram,
    weight: f64,
    config: &CoincidenceConfig,
) -> YieldResult<CoincidenceResult> {
    config.validate()?;
    out.reset();

    let selection = variable.guarded(base_selection);
    let (mask, times) = gated_mask(events, &selection, config)?;
    let result = windows_from_timing(&timing_histogram(&mask, &times, config), config);
    if !result.is_valid() {
        return Ok(result);
    }

    let values = variable.evaluate(events)?;
    let window_fill = |name: &str, (lo, hi): (f64, f64)| {
        let in_window: Vec<bool> = mask
            .iter()
            .zip(&times)
            .map(|(&keep, &t)| keep && t > lo && t < hi)
            .collect();
        let mut hist = out.empty_like(name);
        hist.fill_selected(&values, &in_window, Weights::Uniform(weight));
        hist
    };

    let signal = window_fill("signal", result.coin_window);

    let mut randoms = out.empty_like("random_average");
    for &window in &result.random_windows {
        randoms.add(&window_fill("random", window), 1.0)?;
    }
    if !result.random_windows.is_empty() {
        randoms.scale(1.0 / result.random_windows.len() as f64);
    }

    out.add(&signal, 1.0)?;
    out.add(&randoms, -1.0)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const PEAK_BIN: usize = 200;

    /// Ten background events at every timing bin centre plus a sharp
    /// 1000-event peak in one bin. `dp` sits at 1.5 for background rows and
    /// 0.5 for peak rows.
    fn synthetic_run() -> EventTable {
        let config = CoincidenceConfig::default();
        let timing = Histogram::new("t", config.timing_bins, config.gate);

        let mut times = Vec::new();
        let mut dp = Vec::new();
        for bin in 0..config.timing_bins {
            for _ in 0..10 {
                times.push(timing.bin_center(bin));
                dp.push(1.5);
            }
        }
        for _ in 0..1000 {
            times.push(timing.bin_center(PEAK_BIN));
            dp.push(0.5);
        }
        EventTable::from_columns(vec![
            (config.time_column.clone(), times),
            ("H.gtr.dp".to_string(), dp),
        ])
        .unwrap()
    }

    #[test]
    fn finds_peak_and_subtracts_flat_background() {
        let config = CoincidenceConfig::default();
        let bin_width = (config.gate.1 - config.gate.0) / config.timing_bins as f64;
        let result = compute_windows(&synthetic_run(), &Cuts::default(), &config).unwrap();

        let expected_peak = config.gate.0 + (PEAK_BIN as f64 + 0.5) * bin_width;
        assert!(result.is_valid());
        assert_abs_diff_eq!(result.peak_center, expected_peak, epsilon = bin_width);

        // k = 2..=6 on both sides, all inside [20, 80]
        assert_eq!(result.random_windows.len(), 10);
        assert!(
            result
                .random_windows
                .iter()
                .all(|&(lo, hi)| lo >= config.gate.0 && hi <= config.gate.1)
        );

        // peak area in width-weighted units; windows span 13 or 14 bins, so
        // allow a couple of bins of background
        let background_per_bin = 10.0 * bin_width;
        assert_abs_diff_eq!(
            result.random_subtracted_yield,
            1000.0 * bin_width,
            epsilon = 2.0 * background_per_bin
        );
        assert!(result.random_subtracted_yield_err > 0.0);
    }

    #[test]
    fn first_sideband_can_be_included() {
        let config = CoincidenceConfig {
            skip_first_sideband: false,
            ..Default::default()
        };
        let result = compute_windows(&synthetic_run(), &Cuts::default(), &config).unwrap();
        assert_eq!(result.random_windows.len(), 12);
    }

    #[test]
    fn windows_outside_gate_are_dropped() {
        let config = CoincidenceConfig {
            gate: (40.0, 60.0),
            timing_bins: 100,
            ..Default::default()
        };
        let events = EventTable::from_columns(vec![
            (config.time_column.clone(), vec![50.1; 20]),
            ("H.gtr.dp".to_string(), vec![0.0; 20]),
        ])
        .unwrap();
        let result = compute_windows(&events, &Cuts::default(), &config).unwrap();
        // peak near 50.1: k = 2 (±8 ns) fits, k >= 3 does not
        assert_eq!(result.random_windows.len(), 2);
    }

    #[test]
    fn empty_gate_gives_invalid_zero_result() {
        let config = CoincidenceConfig::default();
        let events = EventTable::from_columns(vec![
            (config.time_column.clone(), vec![5.0, 95.0, 20.0, 80.0]),
            ("H.gtr.dp".to_string(), vec![0.0; 4]),
        ])
        .unwrap();
        let result = compute_windows(&events, &Cuts::default(), &config).unwrap();
        assert_eq!(result, CoincidenceResult::default());
        assert!(!result.is_valid());

        let mut out = Histogram::new("dp", 4, (0.0, 2.0));
        out.fill(0.5);
        let variable = DataExpr::parse("H.gtr.dp").unwrap();
        let result = fill_subtracted(&events, &Cuts::default(), &variable, &mut out, 2.0, &config)
            .unwrap();
        assert!(!result.is_valid());
        assert_eq!(out.integral(), 0.0);
    }

    #[test]
    fn subtracted_histogram_removes_randoms_per_bin() {
        let config = CoincidenceConfig::default();
        let variable = DataExpr::parse("H.gtr.dp").unwrap();
        let mut out = Histogram::new("dp", 2, (0.0, 2.0));

        let result = fill_subtracted(
            &synthetic_run(),
            &Cuts::default(),
            &variable,
            &mut out,
            2.0,
            &config,
        )
        .unwrap();
        assert!(result.is_valid());

        // all 1000 peak rows land in bin 0 with weight 2
        assert_abs_diff_eq!(out.bins[0], 2000.0, epsilon = 1e-9);
        // background rows in the signal window match the random average to
        // within about one timing bin of background
        assert_abs_diff_eq!(out.bins[1], 0.0, epsilon = 30.0);
        assert!(out.sumw2[0] >= 4.0 * 1000.0);
    }

    #[test]
    fn config_validation() {
        assert!(CoincidenceConfig::default().validate().is_ok());
        let bad = CoincidenceConfig {
            gate: (80.0, 20.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn invalid_configs_are_rejected_before_filling() {
        let events = synthetic_run();
        let variable = DataExpr::parse("H.gtr.dp").unwrap();
        let bad_configs = [
            CoincidenceConfig {
                timing_bins: 0,
                ..Default::default()
            },
            CoincidenceConfig {
                gate: (50.0, 50.0),
                ..Default::default()
            },
            CoincidenceConfig {
                rf_period: 0.0,
                ..Default::default()
            },
            CoincidenceConfig {
                half_width: f64::NAN,
                ..Default::default()
            },
        ];

        for config in &bad_configs {
            assert!(matches!(
                compute_windows(&events, &Cuts::default(), config),
                Err(YieldError::Settings(_))
            ));

            let mut out = Histogram::new("dp", 2, (0.0, 2.0));
            out.fill(0.5);
            assert!(matches!(
                fill_subtracted(&events, &Cuts::default(), &variable, &mut out, 1.0, config),
                Err(YieldError::Settings(_))
            ));
            // untouched on rejection
            assert_eq!(out.integral(), 1.0);
        }
    }

    /// Peak rows at 50.1 and a few background rows, inside a gate too narrow
    /// for any random window at k >= 2.
    fn narrow_gate_run(config: &CoincidenceConfig) -> EventTable {
        let mut times = vec![50.1; 100];
        let mut dp = vec![0.5; 100];
        times.extend([46.0, 54.0, 50.3]);
        dp.extend([1.5, 1.5, 1.5]);
        EventTable::from_columns(vec![
            (config.time_column.clone(), times),
            ("H.gtr.dp".to_string(), dp),
        ])
        .unwrap()
    }

    #[test]
    fn narrow_gate_subtracts_nothing() {
        let config = CoincidenceConfig {
            gate: (45.0, 55.0),
            timing_bins: 100,
            max_side_peaks: 6,
            ..Default::default()
        };
        let bin_width = 0.1;
        let events = narrow_gate_run(&config);

        let result = compute_windows(&events, &Cuts::default(), &config).unwrap();
        assert!(result.is_valid());
        assert!(result.random_windows.is_empty());
        assert_eq!(result.random_mean_yield, 0.0);
        assert_eq!(result.random_mean_yield_err, 0.0);
        // 100 peak rows plus the 50.3 row, width weighted
        assert_abs_diff_eq!(result.coin_yield, 101.0 * bin_width, epsilon = 1e-9);
        assert_eq!(result.random_subtracted_yield, result.coin_yield);
        assert_eq!(result.random_subtracted_yield_err, result.coin_yield_err);

        let variable = DataExpr::parse("H.gtr.dp").unwrap();
        let mut out = Histogram::new("dp", 2, (0.0, 2.0));
        let result =
            fill_subtracted(&events, &Cuts::default(), &variable, &mut out, 2.0, &config).unwrap();
        assert!(result.random_windows.is_empty());
        assert_abs_diff_eq!(out.bins[0], 200.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.bins[1], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn narrow_gate_keeps_missing_column_error() {
        let config = CoincidenceConfig {
            gate: (45.0, 55.0),
            timing_bins: 100,
            ..Default::default()
        };
        let events = narrow_gate_run(&config);
        let variable = DataExpr::parse("H.gtr.dpp").unwrap();
        let mut out = Histogram::new("dp", 2, (0.0, 2.0));
        assert!(matches!(
            fill_subtracted(&events, &Cuts::default(), &variable, &mut out, 1.0, &config),
            Err(YieldError::MissingColumn(name)) if name == "H.gtr.dpp"
        ));
    }
}
