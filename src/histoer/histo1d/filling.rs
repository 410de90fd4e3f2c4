use super::histogram1d::Histogram;
use std::time::Instant;

use crate::analysis::variables::DataExpr;
use crate::error::YieldResult;
use crate::histoer::cuts::Cuts;
use crate::util::event_table::EventTable;

/// Per-row fill weights.
#[derive(Debug, Clone, Copy)]
pub enum Weights<'a> {
    Uniform(f64),
    PerRow(&'a [f64]),
}

impl Weights<'_> {
    fn at(&self, row: usize) -> f64 {
        match self {
            Weights::Uniform(weight) => *weight,
            Weights::PerRow(weights) => weights.get(row).copied().unwrap_or(f64::NAN),
        }
    }
}

impl Histogram {
    pub fn fill(&mut self, value: f64) {
        self.fill_weighted(value, 1.0);
    }

    /// NaN values or weights are dropped without counting as an entry.
    pub fn fill_weighted(&mut self, value: f64, weight: f64) {
        if value.is_nan() || weight.is_nan() {
            return;
        }

        self.entries += 1;
        if value < self.range.0 {
            self.underflow += weight;
        } else if value >= self.range.1 {
            self.overflow += weight;
        } else if let Some(index) = self.get_bin_index(value) {
            self.bins[index] += weight;
            self.sumw2[index] += weight * weight;
        }
    }

    /// Fill every row whose mask entry is set.
    pub fn fill_selected(&mut self, values: &[f64], mask: &[bool], weights: Weights<'_>) {
        for (row, (&value, &keep)) in values.iter().zip(mask).enumerate() {
            if keep {
                self.fill_weighted(value, weights.at(row));
            }
        }
    }

    /// Project `variable` for the rows passing `selection` (plus the
    /// variable's own guard).
    pub fn fill_from_events(
        &mut self,
        events: &EventTable,
        variable: &DataExpr,
        selection: &Cuts,
        weights: Weights<'_>,
    ) -> YieldResult<()> {
        let start = Instant::now();

        let mask = variable.guarded(selection).create_mask(events)?;
        let values = variable.evaluate(events)?;
        self.fill_selected(&values, &mask, weights);

        log::debug!(
            "Filled histogram {} from {} rows in {:?}",
            self.name,
            events.height(),
            start.elapsed()
        );

        Ok(())
    }
}
