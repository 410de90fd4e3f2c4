use polars::error::PolarsError;
use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;

#[derive(Debug)]
pub enum YieldError {
    File(std::io::Error),
    DataFrame(PolarsError),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
    MissingColumn(String),
    CutExpression { cut: String, reason: String },
    RunRange(String),
    Report { path: PathBuf, reason: String },
    InvalidRun { run: u32, reason: String },
    UnknownVariable(String),
    Binning(String),
    BinningMismatch { left: String, right: String },
    ZeroCharge(String),
    WallRatio(f64),
    Settings(String),
}

impl From<std::io::Error> for YieldError {
    fn from(err: std::io::Error) -> YieldError {
        YieldError::File(err)
    }
}

impl From<PolarsError> for YieldError {
    fn from(err: PolarsError) -> YieldError {
        match err {
            PolarsError::ColumnNotFound(name) => YieldError::MissingColumn(name.to_string()),
            err => YieldError::DataFrame(err),
        }
    }
}

impl From<serde_yaml::Error> for YieldError {
    fn from(value: serde_yaml::Error) -> Self {
        YieldError::Yaml(value)
    }
}

impl From<serde_json::Error> for YieldError {
    fn from(value: serde_json::Error) -> Self {
        YieldError::Json(value)
    }
}

impl YieldError {
    /// Problems confined to one run's files, after which the remaining runs
    /// of a group are still worth processing.
    pub fn is_run_local(&self) -> bool {
        matches!(
            self,
            YieldError::File(_)
                | YieldError::DataFrame(_)
                | YieldError::Report { .. }
                | YieldError::InvalidRun { .. }
        )
    }
}

impl Display for YieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            YieldError::File(x) => write!(f, "File I/O error: {x}"),
            YieldError::DataFrame(x) => write!(f, "Error using polars: {x}"),
            YieldError::Yaml(x) => write!(f, "Error reading YAML: {x}"),
            YieldError::Json(x) => write!(f, "Error writing JSON: {x}"),
            YieldError::MissingColumn(name) => {
                write!(f, "Column '{name}' is not present in the event table")
            }
            YieldError::CutExpression { cut, reason } => {
                write!(f, "Cut '{cut}' could not be parsed: {reason}")
            }
            YieldError::RunRange(token) => write!(f, "Invalid run range token '{token}'"),
            YieldError::Report { path, reason } => {
                write!(f, "Report {} is unusable: {reason}", path.display())
            }
            YieldError::InvalidRun { run, reason } => write!(f, "Run {run} is unusable: {reason}"),
            YieldError::UnknownVariable(name) => {
                write!(f, "No linked data variable for simulation variable '{name}'")
            }
            YieldError::Binning(reason) => write!(f, "Invalid binning: {reason}"),
            YieldError::BinningMismatch { left, right } => write!(
                f,
                "Histograms '{left}' and '{right}' do not share the same binning"
            ),
            YieldError::ZeroCharge(group) => write!(
                f,
                "Run group '{group}' accumulated no charge; refusing to normalize"
            ),
            YieldError::WallRatio(ratio) => {
                write!(f, "Wall thickness ratio must be positive, got {ratio}")
            }
            YieldError::Settings(reason) => write!(f, "Invalid analysis settings: {reason}"),
        }
    }
}

impl Error for YieldError {}

pub type YieldResult<T> = Result<T, YieldError>;
