use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::analysis::variables::{Binning, DataExpr};
use crate::error::YieldResult;
use crate::fitter::gaussian::{GaussianFitter, GaussianParams};
use crate::histoer::cuts::{Cut, Cuts};
use crate::histoer::histo1d::filling::Weights;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::histo2d::histogram2d::Histogram2D;
use crate::util::event_table::EventTable;
use crate::util::progress::batch_progress;
use crate::util::writer::{OutputDir, Table};

/// Fewer entries than this and no peak fit is attempted.
pub const MIN_FIT_ENTRIES: u64 = 50;

const HMS_PID: &str = "(H_gtr_dp>-8) && (H_gtr_dp<8) && (H_gtr_beta>0) && (H_gtr_beta<1.2) && (H_cal_etottracknorm>0.7) && (H_cer_npeSum>2.0)";
const SHMS_BASE: &str =
    "(P_gtr_dp>-10) && (P_gtr_dp<22) && (P_gtr_beta>0) && (P_gtr_beta<1.2) && (P_cal_etottracknorm<0.8)";
const SHMS_AERO: &str = "(P_gtr_p<2.7) && (P_aero_npeSum>2)";
const SHMS_HGC: &str = "(P_gtr_p>=2.7) && (P_hgcer_npeSum>1) && (P_aero_npeSum>2)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Spectrometer {
    Hms,
    Shms,
    Coin,
}

/// β against focal-plane x for one arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaView {
    pub arm: &'static str,
    pub beta: &'static str,
    pub xfp: &'static str,
}

const HMS_VIEW: BetaView = BetaView {
    arm: "hms",
    beta: "H_gtr_beta",
    xfp: "H_dc_x_fp",
};
const SHMS_VIEW: BetaView = BetaView {
    arm: "shms",
    beta: "P_gtr_beta",
    xfp: "P_dc_x_fp",
};

/// The 1D spectrum whose peak is tracked from run to run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakMetric {
    pub label: &'static str,
    pub column: &'static str,
    pub binning: Binning,
    pub half_window: f64,
    pub limits: (f64, f64),
}

impl PeakMetric {
    /// Fit window around a peak position, clamped to `limits`.
    pub fn window(&self, peak: f64) -> (f64, f64) {
        (
            (peak - self.half_window).max(self.limits.0),
            (peak + self.half_window).min(self.limits.1),
        )
    }
}

impl Spectrometer {
    pub fn name(&self) -> &'static str {
        match self {
            Spectrometer::Hms => "hms",
            Spectrometer::Shms => "shms",
            Spectrometer::Coin => "coin",
        }
    }

    /// Electron PID for the HMS, pion PID for the SHMS, both for coincidences.
    pub fn selection(&self) -> YieldResult<Cuts> {
        let hms = || Cut::new_1d("hms_pid", HMS_PID);
        let shms = || -> YieldResult<Vec<Cut>> {
            Ok(vec![
                Cut::new_1d("shms_base", SHMS_BASE)?,
                Cut::any_of("shms_pid", &[SHMS_AERO, SHMS_HGC])?,
            ])
        };

        let cuts = match self {
            Spectrometer::Hms => vec![hms()?],
            Spectrometer::Shms => shms()?,
            Spectrometer::Coin => {
                let mut cuts = vec![hms()?];
                cuts.extend(shms()?);
                cuts
            }
        };
        Ok(Cuts::new(cuts))
    }

    pub fn views(&self) -> Vec<BetaView> {
        match self {
            Spectrometer::Hms => vec![HMS_VIEW],
            Spectrometer::Shms => vec![SHMS_VIEW],
            Spectrometer::Coin => vec![HMS_VIEW, SHMS_VIEW],
        }
    }

    pub fn metric(&self) -> PeakMetric {
        let beta = |column| PeakMetric {
            label: "beta",
            column,
            binning: Binning {
                bins: 200,
                min: 0.2,
                max: 1.2,
            },
            half_window: 0.03,
            limits: (0.9, 1.1),
        };
        match self {
            Spectrometer::Hms => beta("H_gtr_beta"),
            Spectrometer::Shms => beta("P_gtr_beta"),
            Spectrometer::Coin => PeakMetric {
                label: "ctime",
                column: "CTime_ePiCoinTime_ROC2",
                binning: Binning {
                    bins: 400,
                    min: 0.0,
                    max: 100.0,
                },
                half_window: 2.0,
                limits: (0.0, 100.0),
            },
        }
    }

    pub fn required_columns(&self) -> YieldResult<Vec<String>> {
        let mut columns = self.selection()?.required_columns();
        for view in self.views() {
            columns.push(view.beta.to_string());
            columns.push(view.xfp.to_string());
        }
        columns.push(self.metric().column.to_string());
        columns.sort();
        columns.dedup();
        Ok(columns)
    }

    pub fn file_name(&self, run: u32) -> String {
        match self {
            Spectrometer::Hms => format!("skimmed_hms_coin_replay_production_{run}_-1.parquet"),
            Spectrometer::Shms => format!("skimmed_shms_coin_replay_production_{run}_-1.parquet"),
            Spectrometer::Coin => format!("skimmed_coin_replay_production_{run}_-1.parquet"),
        }
    }
}

/// Fit the peak of `histogram` when it holds enough entries.
pub fn peak_metrics(histogram: &Histogram, metric: &PeakMetric) -> Option<GaussianParams> {
    if histogram.entries < MIN_FIT_ENTRIES {
        log::warn!(
            "{}: {} entries, need {MIN_FIT_ENTRIES} to fit",
            histogram.name,
            histogram.entries
        );
        return None;
    }

    let peak = histogram.bin_center(histogram.maximum_bin());
    let (lo, hi) = metric.window(peak);
    GaussianFitter::from_histogram(histogram, lo, hi).fit().cloned()
}

/// Plots and peak of one run.
#[derive(Debug, Clone)]
pub struct RunInspection {
    pub run: u32,
    pub maps: Vec<(BetaView, Histogram2D)>,
    pub spectrum: Histogram,
    pub peak: Option<GaussianParams>,
}

pub fn inspect_run(spectrometer: Spectrometer, run: u32, events: &EventTable) -> YieldResult<RunInspection> {
    let selection = spectrometer.selection()?;

    let mut maps = Vec::new();
    for view in spectrometer.views() {
        let mut map = Histogram2D::new(
            &format!("{}_{}_run{run}_beta_vs_xfp", spectrometer.name(), view.arm),
            (80, 120),
            ((-45.0, 45.0), (0.2, 1.2)),
        );
        map.fill_from_events(events, view.xfp, view.beta, &selection)?;
        maps.push((view, map));
    }

    let metric = spectrometer.metric();
    let mut spectrum = Histogram::from_binning(
        &format!("{}_run{run}_{}", spectrometer.name(), metric.label),
        &metric.binning,
    );
    spectrum.fill_from_events(
        events,
        &DataExpr::Column(metric.column.to_string()),
        &selection,
        Weights::Uniform(1.0),
    )?;
    let peak = peak_metrics(&spectrum, &metric);

    Ok(RunInspection {
        run,
        maps,
        spectrum,
        peak,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub run: u32,
    pub mean: f64,
    pub mean_err: f64,
    pub sigma: f64,
    pub sigma_err: f64,
    pub entries: u64,
}

fn trend_table(points: &[TrendPoint]) -> Table {
    Table {
        headers: ["run", "mean", "mean_err", "sigma", "sigma_err", "entries"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        rows: points
            .iter()
            .map(|p| {
                vec![
                    f64::from(p.run),
                    p.mean,
                    p.mean_err,
                    p.sigma,
                    p.sigma_err,
                    p.entries as f64,
                ]
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QcSummary {
    pub trend: Vec<TrendPoint>,
    pub skipped_runs: Vec<(u32, String)>,
    pub written: Vec<PathBuf>,
}

fn write_inspection(
    out: &OutputDir,
    spectrometer: Spectrometer,
    inspection: &RunInspection,
) -> YieldResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (_, map) in &inspection.maps {
        written.push(out.write_csv(&format!("{}.csv", map.name), &Table::from_histogram2d(map))?);
    }
    written.push(out.write_csv(
        &format!("{}.csv", inspection.spectrum.name),
        &Table::from_histograms(&[(spectrometer.metric().label, &inspection.spectrum)])?,
    )?);
    Ok(written)
}

/// Inspect every run found in `dataset_dir`, then write the trend of the
/// fitted peak. Unreadable runs are logged and skipped.
pub fn run_qc(
    spectrometer: Spectrometer,
    dataset_dir: &Path,
    runs: &[u32],
    output_dir: &Path,
) -> YieldResult<QcSummary> {
    let out = OutputDir::new(output_dir, &format!("{}_qc", spectrometer.name()))?;
    let columns = spectrometer.required_columns()?;
    let progress = batch_progress(runs.len(), spectrometer.name());
    let mut summary = QcSummary::default();

    for &run in runs {
        progress.set_message(format!("run {run}"));
        let path = dataset_dir.join(spectrometer.file_name(run));
        let result = EventTable::read_parquet(&path, &columns)
            .and_then(|events| inspect_run(spectrometer, run, &events))
            .and_then(|inspection| {
                let written = write_inspection(&out, spectrometer, &inspection)?;
                Ok((inspection, written))
            });

        match result {
            Ok((inspection, written)) => {
                summary.written.extend(written);
                match inspection.peak {
                    Some(peak) => summary.trend.push(TrendPoint {
                        run,
                        mean: peak.mean.value,
                        mean_err: peak.mean.uncertainty,
                        sigma: peak.sigma.value,
                        sigma_err: peak.sigma.uncertainty,
                        entries: inspection.spectrum.entries,
                    }),
                    None => log::warn!("Run {run}: no peak fit, left out of the trend"),
                }
            }
            Err(err) => {
                log::warn!("Skipping run {run}: {err}");
                summary.skipped_runs.push((run, err.to_string()));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    if !summary.trend.is_empty() {
        let stem = format!("{}_{}_trends", spectrometer.name(), spectrometer.metric().label);
        let table = trend_table(&summary.trend);
        summary.written.push(out.write_csv(&format!("{stem}.csv"), &table)?);
        summary.written.push(out.write_json(&format!("{stem}.json"), &summary.trend)?);
    }

    log::info!(
        "{} QC: {} runs in trend, {} skipped",
        spectrometer.name(),
        summary.trend.len(),
        summary.skipped_runs.len()
    );
    Ok(summary)
}
