use serde::Serialize;
use std::path::PathBuf;

use crate::analysis::aggregator::{self, AggregateSpectrum, DiskRuns, Projection, RunSource};
use crate::analysis::coincidence::CoincidenceConfig;
use crate::analysis::combiner::{self, PositronTerms, Ratio};
use crate::analysis::settings::{QuickSettings, QuickVariable};
use crate::analysis::simulation::{self, SimWeighting};
use crate::analysis::variables::{Binning, DataExpr, Variable};
use crate::error::YieldResult;
use crate::histoer::cuts::Cuts;
use crate::histoer::histo1d::filling::Weights;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::util::event_table::EventTable;
use crate::util::progress::batch_progress;
use crate::util::writer::{OutputDir, Table};

#[derive(Debug, Clone, PartialEq)]
pub struct PositronRuns {
    pub data: Vec<u32>,
    pub dummy: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunGroups {
    pub data: Vec<u32>,
    pub dummy: Vec<u32>,
    pub positron: Option<PositronRuns>,
}

/// A validated comparison, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonPlan {
    pub category: String,
    pub output_dir: PathBuf,
    pub variables: Vec<Variable>,
    pub runs: RunGroups,
    pub source: DiskRuns,
    pub data_selection: Cuts,
    pub sim_selection: Cuts,
    pub coincidence: Option<CoincidenceConfig>,
    pub wall_ratio: f64,
    pub simulation_path: PathBuf,
    pub sim_weighting: SimWeighting,
}

impl ComparisonPlan {
    fn projection(&self) -> Projection<'_> {
        match &self.coincidence {
            Some(config) => Projection::RandomSubtracted(config),
            None => Projection::Plain,
        }
    }

    /// Every simulation column any requested variable needs.
    pub fn simulation_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .variables
            .iter()
            .flat_map(|variable| {
                simulation::required_columns(
                    &DataExpr::Column(variable.sim.clone()),
                    &self.sim_selection,
                    &self.sim_weighting,
                )
            })
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    pub fn load_simulation(&self) -> YieldResult<EventTable> {
        EventTable::read_parquet(&self.simulation_path, &self.simulation_columns())
    }
}

/// Every histogram built for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub variable: Variable,
    pub simulation: Histogram,
    pub data: AggregateSpectrum,
    pub dummy: AggregateSpectrum,
    pub positron: Option<(AggregateSpectrum, AggregateSpectrum)>,
    pub subtracted: Histogram,
    /// simulation / (data - dummy)
    pub ratio: Ratio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub total_charge: f64,
    pub used_runs: Vec<u32>,
    pub skipped_runs: Vec<(u32, String)>,
}

impl From<&AggregateSpectrum> for GroupSummary {
    fn from(spectrum: &AggregateSpectrum) -> Self {
        Self {
            total_charge: spectrum.total_charge,
            used_runs: spectrum.used_runs.clone(),
            skipped_runs: spectrum.skipped_runs.clone(),
        }
    }
}

/// JSON companion of a comparison table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableReport {
    pub variable: String,
    pub data_expression: String,
    pub binning: Binning,
    pub data: GroupSummary,
    pub dummy: GroupSummary,
    pub positron_data: Option<GroupSummary>,
    pub positron_dummy: Option<GroupSummary>,
    pub simulation_integral: f64,
    pub subtracted_integral: f64,
    pub undefined_ratio_bins: Vec<usize>,
    pub table: Table,
}

impl ComparisonOutcome {
    pub fn table(&self) -> YieldResult<Table> {
        let mut columns: Vec<(&str, &Histogram)> = vec![
            ("simulation", &self.simulation),
            ("data", &self.data.histogram),
            ("dummy", &self.dummy.histogram),
        ];
        if let Some((pos_data, pos_dummy)) = &self.positron {
            columns.push(("positron_data", &pos_data.histogram));
            columns.push(("positron_dummy", &pos_dummy.histogram));
        }
        columns.push(("data_minus_dummy", &self.subtracted));
        columns.push(("ratio", &self.ratio.histogram));
        Table::from_histograms(&columns)
    }

    pub fn report(&self) -> YieldResult<VariableReport> {
        Ok(VariableReport {
            variable: self.variable.sim.clone(),
            data_expression: self.variable.data.to_string(),
            binning: self.variable.binning,
            data: (&self.data).into(),
            dummy: (&self.dummy).into(),
            positron_data: self.positron.as_ref().map(|(data, _)| data.into()),
            positron_dummy: self.positron.as_ref().map(|(_, dummy)| dummy.into()),
            simulation_integral: self.simulation.integral(),
            subtracted_integral: self.subtracted.integral(),
            undefined_ratio_bins: self.ratio.undefined_bins.clone(),
            table: self.table()?,
        })
    }
}

/// Build the simulation, the charge-normalized run groups, the
/// dummy-subtracted data and their ratio for one variable.
pub fn compare_variable(
    plan: &ComparisonPlan,
    variable: &Variable,
    source: &dyn RunSource,
    sim_events: &EventTable,
) -> YieldResult<ComparisonOutcome> {
    let name = &variable.sim;
    let binning = &variable.binning;
    let projection = plan.projection();

    let simulation = simulation::build_simulation(
        sim_events,
        &format!("sim_{name}"),
        &DataExpr::Column(name.clone()),
        &plan.sim_selection,
        binning,
        &plan.sim_weighting,
    )?;

    let group = |label: &str, runs: &[u32]| {
        aggregator::aggregate(
            source,
            &format!("{label}_{name}"),
            runs,
            &variable.data,
            &plan.data_selection,
            binning,
            projection,
        )
    };

    let data = group("data", &plan.runs.data)?;
    let dummy = group("dummy", &plan.runs.dummy)?;
    let positron = match &plan.runs.positron {
        Some(runs) => Some((
            group("positron_data", &runs.data)?,
            group("positron_dummy", &runs.dummy)?,
        )),
        None => None,
    };

    let subtracted = combiner::dummy_subtract(
        &format!("data_minus_dummy_{name}"),
        &data.histogram,
        &dummy.histogram,
        plan.wall_ratio,
        positron.as_ref().map(|(data, dummy)| PositronTerms {
            data: &data.histogram,
            dummy: &dummy.histogram,
        }),
    )?;
    let ratio = combiner::ratio(&format!("ratio_{name}"), &simulation, &subtracted)?;

    Ok(ComparisonOutcome {
        variable: variable.clone(),
        simulation,
        data,
        dummy,
        positron,
        subtracted,
        ratio,
    })
}

/// Files written and variables that failed in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(String, String)>,
}

fn write_outcome(out: &OutputDir, outcome: &ComparisonOutcome) -> YieldResult<Vec<PathBuf>> {
    let name = &outcome.variable.sim;
    let report = outcome.report()?;
    Ok(vec![
        out.write_csv(&format!("compare_{name}.csv"), &report.table)?,
        out.write_json(&format!("compare_{name}.json"), &report)?,
    ])
}

/// Compare every planned variable. A failing variable is logged and the
/// batch moves on.
pub fn run_comparison(
    plan: &ComparisonPlan,
    source: &dyn RunSource,
    sim_events: &EventTable,
) -> YieldResult<ComparisonSummary> {
    let out = OutputDir::new(&plan.output_dir, &plan.category)?;
    let progress = batch_progress(plan.variables.len(), &plan.category);
    let mut summary = ComparisonSummary::default();

    for variable in &plan.variables {
        progress.set_message(variable.sim.clone());
        let result = compare_variable(plan, variable, source, sim_events)
            .and_then(|outcome| write_outcome(&out, &outcome));
        match result {
            Ok(paths) => summary.written.extend(paths),
            Err(err) => {
                log::error!("Variable '{}' failed: {err}", variable.sim);
                summary.failed.push((variable.sim.clone(), err.to_string()));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    log::info!(
        "{}: {} variables compared, {} failed",
        plan.category,
        plan.variables.len() - summary.failed.len(),
        summary.failed.len()
    );
    Ok(summary)
}

/// Area-normalized single-run comparison, `data / simulation`.
pub fn quick_compare(
    settings: &QuickSettings,
    data_run: u32,
    sim_run: u32,
) -> YieldResult<ComparisonSummary> {
    settings.validate()?;

    let mut columns: Vec<String> = settings.variables.iter().map(|v| v.column.clone()).collect();
    let data_events = EventTable::read_parquet(&settings.data_path(data_run), &columns)?;
    columns.extend(settings.sim_weight_column.iter().cloned());
    let sim_events = EventTable::read_parquet(&settings.sim_path(sim_run), &columns)?;

    let out = OutputDir::new(&settings.output_dir, "quick")?;
    let progress = batch_progress(settings.variables.len(), "quick");
    let mut summary = ComparisonSummary::default();

    for variable in &settings.variables {
        progress.set_message(variable.column.clone());
        let result = quick_table(settings, &data_events, &sim_events, variable).and_then(|table| {
            out.write_csv(
                &format!("quick_{data_run}_{sim_run}_{}.csv", variable.column),
                &table,
            )
        });
        match result {
            Ok(path) => summary.written.push(path),
            Err(err) => {
                log::error!("Column '{}' failed: {err}", variable.column);
                summary.failed.push((variable.column.clone(), err.to_string()));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(summary)
}

fn quick_table(
    settings: &QuickSettings,
    data_events: &EventTable,
    sim_events: &EventTable,
    variable: &QuickVariable,
) -> YieldResult<Table> {
    let expr = DataExpr::Column(variable.column.clone());
    let none = Cuts::default();

    let mut data = Histogram::from_binning("data", &variable.binning);
    data.fill_from_events(data_events, &expr, &none, Weights::Uniform(1.0))?;

    let mut sim = data.empty_like("simulation");
    match &settings.sim_weight_column {
        Some(column) => sim.fill_from_events(
            sim_events,
            &expr,
            &none,
            Weights::PerRow(sim_events.column(column)?),
        )?,
        None => sim.fill_from_events(sim_events, &expr, &none, Weights::Uniform(1.0))?,
    }

    data.normalize_area();
    sim.normalize_area();
    let ratio = combiner::ratio("ratio", &data, &sim)?;
    Table::from_histograms(&[("data", &data), ("simulation", &sim), ("ratio", &ratio.histogram)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregator::tests::{MemoryRuns, dp_events, report};
    use crate::error::YieldError;
    use crate::util::event_table::tests::write_parquet;
    use approx::assert_relative_eq;

    fn dp_variable() -> Variable {
        Variable {
            sim: "hsdelta".to_string(),
            data: DataExpr::parse("H.gtr.dp").unwrap(),
            binning: Binning::new(2, -8.0, 8.0).unwrap(),
        }
    }

    fn plan(output_dir: PathBuf, positron: Option<PositronRuns>) -> ComparisonPlan {
        ComparisonPlan {
            category: "coin".to_string(),
            output_dir,
            variables: vec![dp_variable()],
            runs: RunGroups {
                data: vec![1, 2],
                dummy: vec![3],
                positron,
            },
            source: DiskRuns::new("{run}.parquet", "{run}.report"),
            data_selection: Cuts::default(),
            sim_selection: Cuts::default(),
            coincidence: None,
            wall_ratio: 2.0,
            simulation_path: PathBuf::from("sim.parquet"),
            sim_weighting: SimWeighting::unweighted(),
        }
    }

    fn source() -> MemoryRuns {
        MemoryRuns::default()
            .with_run(1, report(1.0, 1, 1.0), dp_events(vec![-4.0; 6]))
            .with_run(2, report(1.0, 1, 1.0), dp_events(vec![-4.0, -4.0, 4.0, 4.0]))
            .with_run(3, report(2.0, 1, 1.0), dp_events(vec![-4.0; 4]))
            .with_run(4, report(1.0, 1, 1.0), dp_events(vec![-4.0]))
            .with_run(5, report(1.0, 1, 1.0), dp_events(vec![-4.0, -4.0]))
    }

    fn sim_events() -> EventTable {
        EventTable::from_columns(vec![("hsdelta".to_string(), vec![-4.0, -4.0, -4.0, 4.0])]).unwrap()
    }

    #[test]
    fn subtracts_dummy_and_divides_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path().to_path_buf(), None);
        let outcome = compare_variable(&plan, &dp_variable(), &source(), &sim_events()).unwrap();

        // data: 8 and 2 counts over 2 mC; dummy: 4 counts over 2 mC
        assert_eq!(outcome.data.histogram.bins, vec![4.0, 1.0]);
        assert_eq!(outcome.dummy.histogram.bins, vec![2.0, 0.0]);
        assert_eq!(outcome.subtracted.bins, vec![3.0, 1.0]);
        assert_eq!(outcome.simulation.bins, vec![3.0, 1.0]);
        assert_relative_eq!(outcome.ratio.histogram.bins[0], 1.0);
        assert_relative_eq!(outcome.ratio.histogram.bins[1], 1.0);
        assert!(outcome.positron.is_none());
    }

    #[test]
    fn positron_groups_enter_the_subtraction() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(
            dir.path().to_path_buf(),
            Some(PositronRuns {
                data: vec![4],
                dummy: vec![5],
            }),
        );
        let outcome = compare_variable(&plan, &dp_variable(), &source(), &sim_events()).unwrap();
        // (4 - 1) - (2 - 2) / 2
        assert_eq!(outcome.subtracted.bins, vec![3.0, 1.0]);
        let table = outcome.table().unwrap();
        assert!(table.headers.contains(&"positron_dummy".to_string()));
        assert_eq!(table.headers.len(), 3 + 2 * 7);
    }

    #[test]
    fn batch_writes_files_and_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan(dir.path().to_path_buf(), None);
        plan.variables.push(Variable {
            sim: "ssdelta".to_string(),
            data: DataExpr::parse("P.gtr.dp").unwrap(),
            binning: Binning::new(2, -8.0, 8.0).unwrap(),
        });

        let summary = run_comparison(&plan, &source(), &sim_events()).unwrap();
        assert_eq!(summary.written.len(), 2);
        assert!(dir.path().join("coin").join("compare_hsdelta.csv").exists());
        assert!(dir.path().join("coin").join("compare_hsdelta.json").exists());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "ssdelta");

        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("coin").join("compare_hsdelta.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json["data"]["used_runs"], serde_json::json!([1, 2]));
        assert_eq!(json["data_expression"], "H.gtr.dp");
    }

    #[test]
    fn empty_data_group_is_zero_charge() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan(dir.path().to_path_buf(), None);
        plan.runs.data = vec![99];
        assert!(matches!(
            compare_variable(&plan, &dp_variable(), &source(), &sim_events()),
            Err(YieldError::ZeroCharge(_))
        ));
    }

    #[test]
    fn simulation_columns_cover_every_variable() {
        let mut plan = plan(PathBuf::from("out"), None);
        plan.sim_weighting = SimWeighting::default();
        plan.sim_selection = Cuts::from_expressions("sim_cut", &["hsytar > -5".to_string()]).unwrap();
        assert_eq!(plan.simulation_columns(), vec!["Weight", "hsdelta", "hsytar"]);
    }

    #[test]
    fn quick_comparison_normalizes_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data_7.parquet");
        let sim_path = dir.path().join("sim_8.parquet");
        write_parquet(&data_path, &[("H.gtr.dp", vec![-0.5, -0.5, 0.5, 0.5])]);
        write_parquet(&sim_path, &[("H.gtr.dp", vec![-0.5, 0.5, 0.5, 0.5])]);

        let settings = QuickSettings {
            data_pattern: dir.path().join("data_{run}.parquet").display().to_string(),
            sim_pattern: dir.path().join("sim_{run}.parquet").display().to_string(),
            sim_weight_column: None,
            output_dir: dir.path().join("out"),
            variables: vec![QuickVariable {
                column: "H.gtr.dp".to_string(),
                binning: Binning::new(2, -1.0, 1.0).unwrap(),
            }],
        };

        let summary = quick_compare(&settings, 7, 8).unwrap();
        assert!(summary.failed.is_empty());
        let text = std::fs::read_to_string(&summary.written[0]).unwrap();
        let first: Vec<f64> = text
            .lines()
            .nth(1)
            .unwrap()
            .split(',')
            .map(|v| v.parse().unwrap())
            .collect();
        // data 0.5 vs simulation 0.25 in the first bin
        assert_relative_eq!(first[3], 0.5);
        assert_relative_eq!(first[5], 0.25);
        assert_relative_eq!(first[7], 2.0);
    }
}
