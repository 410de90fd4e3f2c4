use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::aggregator::DiskRuns;
use crate::analysis::coincidence::CoincidenceConfig;
use crate::analysis::comparison::{ComparisonPlan, PositronRuns, RunGroups};
use crate::analysis::run_range::parse_run_list;
use crate::analysis::simulation::SimWeighting;
use crate::analysis::variables::{Binning, Variable, VariableMap};
use crate::error::{YieldError, YieldResult};
use crate::histoer::cuts::Cuts;

/// Run lists in run-range syntax, e.g. `"24329-24332"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLists {
    pub data: String,
    pub dummy: String,
    pub positron_data: Option<String>,
    pub positron_dummy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub path: PathBuf,
    pub cuts: Vec<String>,
    #[serde(flatten)]
    pub weighting: SimWeighting,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("simc_worksim/simulation.parquet"),
            cuts: vec!["((hsdelta>-8.0) && (hsdelta<8))".to_string()],
            weighting: SimWeighting::default(),
        }
    }
}

/// YAML configuration of a data-vs-simulation comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub category: String,
    pub output_dir: PathBuf,
    pub variables: Vec<String>,
    /// Added to (or replacing) the built-in variable table.
    pub extra_variables: Vec<Variable>,
    pub runs: RunLists,
    pub source: DiskRuns,
    pub data_cuts: Vec<String>,
    /// Present for coincidence analyses: data and dummy are random-subtracted.
    pub coincidence: Option<CoincidenceConfig>,
    pub wall_ratio: f64,
    pub simulation: SimulationSettings,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            category: "coin".to_string(),
            output_dir: PathBuf::from("output"),
            variables: [
                "hsdelta", "hsytar", "hsxptar", "hsyptar", "ssdelta", "ssytar", "ssxptar",
                "ssyptar", "z", "xbj", "Q2", "W", "nu", "epsilon", "thetapq", "phipq",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extra_variables: Vec::new(),
            runs: RunLists::default(),
            source: DiskRuns::new(
                "Rsidis_parquet/coin_replay_production_{run}_-1.parquet",
                "REPORT_OUTPUT/COIN/PRODUCTION/replay_coin_production_{run}_-1.report",
            ),
            data_cuts: vec![
                "(H.gtr.dp>-8.0) && (H.gtr.dp<8.0) && (H.cal.etottracknorm>0.7) && (H.cer.npeSum>2.0)"
                    .to_string(),
            ],
            coincidence: Some(CoincidenceConfig::default()),
            wall_ratio: 3.82,
            simulation: SimulationSettings::default(),
        }
    }
}

impl AnalysisSettings {
    pub fn from_yaml_str(text: &str) -> YieldResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: &Path) -> YieldResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Read and validate in one step.
    pub fn load(path: &Path) -> YieldResult<ComparisonPlan> {
        let settings = Self::from_yaml_file(path)?;
        log::info!("Loaded analysis settings from {}", path.display());
        settings.plan()
    }

    pub fn variable_map(&self) -> YieldResult<VariableMap> {
        let mut map = VariableMap::builtin();
        for variable in &self.extra_variables {
            map.insert(variable.clone());
        }
        map.validate()?;
        Ok(map)
    }

    /// Validate everything up front and resolve it into typed values.
    pub fn plan(&self) -> YieldResult<ComparisonPlan> {
        if self.category.trim().is_empty() {
            return Err(YieldError::Settings("category must not be empty".to_string()));
        }
        if self.variables.is_empty() {
            return Err(YieldError::Settings("no variables requested".to_string()));
        }
        if !(self.wall_ratio > 0.0) || !self.wall_ratio.is_finite() {
            return Err(YieldError::WallRatio(self.wall_ratio));
        }
        if !(self.simulation.weighting.normfac > 0.0) {
            return Err(YieldError::Settings(format!(
                "simulation normfac must be positive, got {}",
                self.simulation.weighting.normfac
            )));
        }
        if let Some(config) = &self.coincidence {
            config.validate()?;
        }

        let variables = self.variable_map()?.resolve(&self.variables)?;

        let positron = match (&self.runs.positron_data, &self.runs.positron_dummy) {
            (Some(data), Some(dummy)) => Some(PositronRuns {
                data: parse_run_list(data)?,
                dummy: parse_run_list(dummy)?,
            }),
            (None, None) => None,
            _ => {
                return Err(YieldError::Settings(
                    "positron_data and positron_dummy must be given together".to_string(),
                ));
            }
        };

        Ok(ComparisonPlan {
            category: self.category.clone(),
            output_dir: self.output_dir.clone(),
            variables,
            runs: RunGroups {
                data: parse_run_list(&self.runs.data)?,
                dummy: parse_run_list(&self.runs.dummy)?,
                positron,
            },
            source: self.source.clone(),
            data_selection: Cuts::from_expressions("data_cut", &self.data_cuts)?,
            sim_selection: Cuts::from_expressions("sim_cut", &self.simulation.cuts)?,
            coincidence: self.coincidence.clone(),
            wall_ratio: self.wall_ratio,
            simulation_path: self.simulation.path.clone(),
            sim_weighting: self.simulation.weighting.clone(),
        })
    }
}

/// One column compared between a data run and a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickVariable {
    pub column: String,
    pub binning: Binning,
}

/// Settings of the single-run, area-normalized comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickSettings {
    pub data_pattern: String,
    pub sim_pattern: String,
    pub sim_weight_column: Option<String>,
    pub output_dir: PathBuf,
    pub variables: Vec<QuickVariable>,
}

impl Default for QuickSettings {
    fn default() -> Self {
        let binning = Binning {
            bins: 100,
            min: -1.0,
            max: 1.0,
        };
        Self {
            data_pattern: "ROOTfiles/data_{run}.parquet".to_string(),
            sim_pattern: "ROOTfiles/sim_{run}.parquet".to_string(),
            sim_weight_column: None,
            output_dir: PathBuf::from("output"),
            variables: ["H.gtr.dp", "H.kin.x_bj", "H.kin.Q2"]
                .iter()
                .map(|column| QuickVariable {
                    column: column.to_string(),
                    binning,
                })
                .collect(),
        }
    }
}

impl QuickSettings {
    pub fn from_yaml_file(path: &Path) -> YieldResult<Self> {
        let settings: Self = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> YieldResult<()> {
        if self.variables.is_empty() {
            return Err(YieldError::Settings("no variables requested".to_string()));
        }
        for variable in &self.variables {
            variable.binning.validate()?;
        }
        Ok(())
    }

    pub fn data_path(&self, run: u32) -> PathBuf {
        PathBuf::from(self.data_pattern.replace("{run}", &run.to_string()))
    }

    pub fn sim_path(&self, run: u32) -> PathBuf {
        PathBuf::from(self.sim_pattern.replace("{run}", &run.to_string()))
    }
}
