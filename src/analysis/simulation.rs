use serde::{Deserialize, Serialize};

use crate::analysis::variables::{Binning, DataExpr};
use crate::error::YieldResult;
use crate::histoer::cuts::Cuts;
use crate::histoer::histo1d::filling::Weights;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::util::event_table::EventTable;

/// Event weighting of a Monte-Carlo sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimWeighting {
    /// Per-event weight column; `None` weights every event by `normfac` alone.
    pub weight_column: Option<String>,
    pub normfac: f64,
    /// Divide by the number of generated events (rows in the sample).
    pub per_generated: bool,
}

impl Default for SimWeighting {
    fn default() -> Self {
        Self {
            weight_column: Some("Weight".to_string()),
            normfac: 0.842205e11,
            per_generated: true,
        }
    }
}

impl SimWeighting {
    pub fn unweighted() -> Self {
        Self {
            weight_column: None,
            normfac: 1.0,
            per_generated: false,
        }
    }
}

pub fn required_columns(variable: &DataExpr, selection: &Cuts, weighting: &SimWeighting) -> Vec<String> {
    let mut columns = variable.guarded(selection).required_columns();
    columns.extend(variable.columns());
    columns.extend(weighting.weight_column.iter().cloned());
    columns.sort();
    columns.dedup();
    columns
}

/// Fill `variable` for the selected simulation rows with `weight × normfac`,
/// then optionally divide by the generated event count.
pub fn build_simulation(
    events: &EventTable,
    name: &str,
    variable: &DataExpr,
    selection: &Cuts,
    binning: &Binning,
    weighting: &SimWeighting,
) -> YieldResult<Histogram> {
    binning.validate()?;
    let mut histogram = Histogram::from_binning(name, binning);

    match &weighting.weight_column {
        Some(column) => {
            let weights: Vec<f64> = events
                .column(column)?
                .iter()
                .map(|w| w * weighting.normfac)
                .collect();
            histogram.fill_from_events(events, variable, selection, Weights::PerRow(&weights))?;
        }
        None => histogram.fill_from_events(
            events,
            variable,
            selection,
            Weights::Uniform(weighting.normfac),
        )?,
    }

    if weighting.per_generated {
        let generated = events.height();
        log::info!("Total generated events for simulation '{name}': {generated}");
        if generated > 0 {
            histogram.scale(1.0 / generated as f64);
        } else {
            log::warn!("Simulation sample for '{name}' is empty; left unscaled");
        }
    }

    Ok(histogram)
}
