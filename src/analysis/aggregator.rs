use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analysis::coincidence::{self, CoincidenceConfig};
use crate::analysis::run_info::{ReportMarkers, RunReport};
use crate::analysis::variables::{Binning, DataExpr};
use crate::error::{YieldError, YieldResult};
use crate::histoer::cuts::Cuts;
use crate::histoer::histo1d::filling::Weights;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::util::event_table::EventTable;

/// Where the events and the report of a run come from.
pub trait RunSource {
    fn load_events(&self, run: u32, columns: &[String]) -> YieldResult<EventTable>;
    fn load_report(&self, run: u32) -> YieldResult<RunReport>;
}

/// Runs laid out on disk, located through `{run}` path patterns, e.g.
/// `data/coin_replay_production_{run}_-1.parquet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRuns {
    pub dataset_pattern: String,
    pub report_pattern: String,
    #[serde(default)]
    pub markers: ReportMarkers,
}

impl DiskRuns {
    pub fn new(dataset_pattern: &str, report_pattern: &str) -> Self {
        Self {
            dataset_pattern: dataset_pattern.to_string(),
            report_pattern: report_pattern.to_string(),
            markers: ReportMarkers::default(),
        }
    }

    pub fn dataset_path(&self, run: u32) -> PathBuf {
        PathBuf::from(self.dataset_pattern.replace("{run}", &run.to_string()))
    }

    pub fn report_path(&self, run: u32) -> PathBuf {
        PathBuf::from(self.report_pattern.replace("{run}", &run.to_string()))
    }
}

impl RunSource for DiskRuns {
    fn load_events(&self, run: u32, columns: &[String]) -> YieldResult<EventTable> {
        EventTable::read_parquet(&self.dataset_path(run), columns)
    }

    fn load_report(&self, run: u32) -> YieldResult<RunReport> {
        RunReport::load(&self.report_path(run), &self.markers)
    }
}

/// How each run's rows become a histogram.
#[derive(Debug, Clone, Copy)]
pub enum Projection<'a> {
    Plain,
    RandomSubtracted(&'a CoincidenceConfig),
}

/// Charge-normalized sum over one run group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpectrum {
    pub histogram: Histogram,
    pub total_charge: f64,
    pub used_runs: Vec<u32>,
    pub skipped_runs: Vec<(u32, String)>,
}

struct RunContribution {
    histogram: Histogram,
    charge: f64,
}

fn required_columns(
    variable: &DataExpr,
    selection: &Cuts,
    projection: Projection<'_>,
) -> Vec<String> {
    let mut columns = variable.guarded(selection).required_columns();
    columns.extend(variable.columns());
    if let Projection::RandomSubtracted(config) = projection {
        columns.push(config.time_column.clone());
    }
    columns.sort();
    columns.dedup();
    columns
}

fn process_run(
    source: &dyn RunSource,
    run: u32,
    name: &str,
    variable: &DataExpr,
    selection: &Cuts,
    binning: &Binning,
    projection: Projection<'_>,
) -> YieldResult<RunContribution> {
    let report = source.load_report(run)?;
    report.validate(run)?;

    let columns = required_columns(variable, selection, projection);
    let events = source.load_events(run, &columns)?;

    let scale = report.scale();
    let mut histogram = Histogram::from_binning(&format!("{name}_run{run}"), binning);
    match projection {
        Projection::Plain => {
            histogram.fill_from_events(&events, variable, selection, Weights::Uniform(scale))?
        }
        Projection::RandomSubtracted(config) => {
            let result = coincidence::fill_subtracted(
                &events,
                selection,
                variable,
                &mut histogram,
                scale,
                config,
            )?;
            if !result.is_valid() {
                log::warn!("Run {run}: no entries in the coincidence gate, contributes nothing");
            }
        }
    }

    log::info!(
        "Run {run}: charge = {:.4} mC, efficiency = {}, prescale = {}, rows = {}",
        report.charge_mc,
        report.tracking_efficiency,
        report.prescale,
        events.height()
    );

    Ok(RunContribution {
        histogram,
        charge: report.charge_mc,
    })
}

/// Sum the runs of a group and normalize by the charge of the runs that were
/// used. Runs with unreadable files or an invalid report are logged and
/// skipped. Any other error, such as a column no dataset has, stops the
/// group. A group left with no charge is an error.
pub fn aggregate(
    source: &dyn RunSource,
    name: &str,
    runs: &[u32],
    variable: &DataExpr,
    selection: &Cuts,
    binning: &Binning,
    projection: Projection<'_>,
) -> YieldResult<AggregateSpectrum> {
    binning.validate()?;
    if let Projection::RandomSubtracted(config) = projection {
        config.validate()?;
    }

    let empty = AggregateSpectrum {
        histogram: Histogram::from_binning(name, binning),
        total_charge: 0.0,
        used_runs: Vec::new(),
        skipped_runs: Vec::new(),
    };

    let mut spectrum = runs
        .iter()
        .map(|&run| {
            (
                run,
                process_run(source, run, name, variable, selection, binning, projection),
            )
        })
        .try_fold(empty, |mut acc, (run, contribution)| {
            match contribution {
                Ok(contribution) => {
                    acc.histogram.add(&contribution.histogram, 1.0)?;
                    acc.total_charge += contribution.charge;
                    acc.used_runs.push(run);
                }
                Err(err) if err.is_run_local() => {
                    log::warn!("Skipping run {run} in '{name}': {err}");
                    acc.skipped_runs.push((run, err.to_string()));
                }
                Err(err) => return Err(err),
            }
            Ok::<_, YieldError>(acc)
        })?;

    if spectrum.used_runs.is_empty() || !(spectrum.total_charge > 0.0) {
        return Err(YieldError::ZeroCharge(name.to_string()));
    }

    spectrum.histogram.scale(1.0 / spectrum.total_charge);
    log::info!(
        "'{name}': {} runs used, {} skipped, total charge {:.4} mC",
        spectrum.used_runs.len(),
        spectrum.skipped_runs.len(),
        spectrum.total_charge
    );

    Ok(spectrum)
}
