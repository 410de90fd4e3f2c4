use regex::Regex;
use std::fs::File;
use std::io::{BufRead as _, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{YieldError, YieldResult};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s:]*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)")
        .expect("number pattern is a valid regex")
});

static LEADING_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([-+]?\d+)").expect("integer pattern is a valid regex"));

/// Line markers searched for in a replay report.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ReportMarkers {
    pub charge: String,
    pub prescale: String,
    pub efficiency: String,
}

impl Default for ReportMarkers {
    fn default() -> Self {
        Self {
            charge: "BCM4C Beam Cut Charge".to_string(),
            prescale: "Ps4_factor".to_string(),
            efficiency: "E SING FID TRACK EFFIC".to_string(),
        }
    }
}

/// Per-run scalars needed to normalize a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RunReport {
    pub charge_mc: f64,
    pub prescale: i64,
    pub tracking_efficiency: f64,
}

/// On-disk YAML form of a report.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
struct ReportDocument {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<u32>,
    charge_mc: f64,
    prescale: i64,
    tracking_efficiency: f64,
}

fn leading_number(text: &str) -> f64 {
    LEADING_NUMBER
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0.0)
}

impl RunReport {
    /// Scan a text report for the three markers. The last matching line of
    /// each kind wins; a marker followed by unreadable text resets that field
    /// to zero, which [`RunReport::validate`] then rejects.
    pub fn from_report_file(path: &Path, markers: &ReportMarkers) -> YieldResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut report = RunReport::default();
        for line in reader.lines() {
            let line = line?;
            report.scan_line(&line, markers);
        }

        log::debug!("Parsed report {}: {:?}", path.display(), report);
        Ok(report)
    }

    pub fn from_report_text(text: &str, markers: &ReportMarkers) -> Self {
        let mut report = RunReport::default();
        for line in text.lines() {
            report.scan_line(line, markers);
        }
        report
    }

    fn scan_line(&mut self, line: &str, markers: &ReportMarkers) {
        if let Some(pos) = line.find(&markers.charge) {
            // reports carry uC
            self.charge_mc = leading_number(&line[pos + markers.charge.len()..]) / 1000.0;
        } else if line.contains(&markers.prescale) {
            self.prescale = line
                .split_once('=')
                .and_then(|(_, rest)| LEADING_INTEGER.captures(rest))
                .and_then(|caps| caps[1].parse().ok())
                .unwrap_or(0);
        } else if line.contains(&markers.efficiency) {
            if let Some((_, rest)) = line.split_once(':') {
                self.tracking_efficiency = leading_number(rest);
            }
        }
    }

    pub fn from_yaml_file(path: &Path) -> YieldResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text).map_err(|err| match err {
            YieldError::Yaml(e) => YieldError::Report {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            YieldError::Settings(reason) => YieldError::Report {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    fn from_yaml_str(text: &str) -> YieldResult<Self> {
        let document: ReportDocument = serde_yaml::from_str(text)?;
        if document.schema_version != REPORT_SCHEMA_VERSION {
            return Err(YieldError::Settings(format!(
                "unsupported schema_version {} (expected {REPORT_SCHEMA_VERSION})",
                document.schema_version
            )));
        }

        let report = RunReport {
            charge_mc: document.charge_mc,
            prescale: document.prescale,
            tracking_efficiency: document.tracking_efficiency,
        };
        report.problem().map_or(Ok(report), |reason| {
            Err(YieldError::Settings(reason))
        })
    }

    /// `.yaml`/`.yml` files use the schema, anything else is scanned for markers.
    pub fn load(path: &Path, markers: &ReportMarkers) -> YieldResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            _ => Self::from_report_file(path, markers),
        }
    }

    /// Serialize in the versioned schema.
    pub fn to_yaml(&self, run: Option<u32>) -> YieldResult<String> {
        let document = ReportDocument {
            schema_version: REPORT_SCHEMA_VERSION,
            run,
            charge_mc: self.charge_mc,
            prescale: self.prescale,
            tracking_efficiency: self.tracking_efficiency,
        };
        Ok(serde_yaml::to_string(&document)?)
    }

    fn problem(&self) -> Option<String> {
        if !(self.charge_mc > 0.0) {
            Some(format!("charge must be positive, got {} mC", self.charge_mc))
        } else if !(self.tracking_efficiency > 0.0 && self.tracking_efficiency <= 1.0) {
            Some(format!(
                "tracking efficiency must be in (0, 1], got {}",
                self.tracking_efficiency
            ))
        } else if self.prescale < 1 {
            Some(format!("prescale must be at least 1, got {}", self.prescale))
        } else {
            None
        }
    }

    pub fn validate(&self, run: u32) -> YieldResult<()> {
        match self.problem() {
            Some(reason) => Err(YieldError::InvalidRun { run, reason }),
            None => Ok(()),
        }
    }

    /// Per-event weight `prescale / efficiency`.
    pub fn scale(&self) -> f64 {
        self.prescale as f64 / self.tracking_efficiency
    }
}
