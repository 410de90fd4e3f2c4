use fnv::FnvHashMap;
use std::time::Instant;

use crate::error::YieldResult;
use crate::histoer::cuts::Cuts;
use crate::util::event_table::EventTable;

#[derive(Debug, Clone)]
pub struct Histogram2D {
    pub name: String,
    pub bins: Bins,
    pub range: Range,
    pub overflow: f64,
    pub underflow: f64,
    pub entries: u64,
}

impl Histogram2D {
    // Create a new 2D Histogram with specified ranges and number of bins for each axis
    pub fn new(name: &str, bins: (usize, usize), range: ((f64, f64), (f64, f64))) -> Self {
        Self {
            name: name.to_owned(),
            bins: Bins {
                x: bins.0,
                x_width: (range.0.1 - range.0.0) / bins.0 as f64,
                y: bins.1,
                y_width: (range.1.1 - range.1.0) / bins.1 as f64,
                counts: FnvHashMap::default(),
            },
            range: Range {
                x: Value {
                    min: range.0.0,
                    max: range.0.1,
                },
                y: Value {
                    min: range.1.0,
                    max: range.1.1,
                },
            },
            overflow: 0.0,
            underflow: 0.0,
            entries: 0,
        }
    }

    pub fn reset(&mut self) {
        self.bins.counts.clear();
        self.overflow = 0.0;
        self.underflow = 0.0;
        self.entries = 0;
    }

    pub fn fill(&mut self, x_value: f64, y_value: f64) {
        self.fill_weighted(x_value, y_value, 1.0);
    }

    pub fn fill_weighted(&mut self, x_value: f64, y_value: f64, weight: f64) {
        if x_value.is_nan() || y_value.is_nan() || weight.is_nan() {
            return;
        }
        self.entries += 1;

        match (self.get_bin_index_x(x_value), self.get_bin_index_y(y_value)) {
            (Some(x_index), Some(y_index)) => {
                let cell = self.bins.counts.entry((x_index, y_index)).or_default();
                cell.content += weight;
                cell.sumw2 += weight * weight;
            }
            _ => {
                if x_value < self.range.x.min || y_value < self.range.y.min {
                    self.underflow += weight;
                } else {
                    self.overflow += weight;
                }
            }
        }
    }

    /// Fill `(x_column, y_column)` pairs of the rows passing `selection`.
    pub fn fill_from_events(
        &mut self,
        events: &EventTable,
        x_column: &str,
        y_column: &str,
        selection: &Cuts,
    ) -> YieldResult<()> {
        let start = Instant::now();

        let mask = selection.create_mask(events)?;
        let xs = events.column(x_column)?;
        let ys = events.column(y_column)?;

        for ((&x, &y), keep) in xs.iter().zip(ys).zip(mask) {
            if keep {
                self.fill(x, y);
            }
        }

        log::debug!("Filled histogram {} in {:?}", self.name, start.elapsed());
        Ok(())
    }

    // get the bin index for a given x value
    pub fn get_bin_index_x(&self, x: f64) -> Option<usize> {
        if x < self.range.x.min || x >= self.range.x.max || x.is_nan() {
            return None;
        }

        let bin_index: usize = ((x - self.range.x.min) / self.bins.x_width).floor() as usize;

        Some(bin_index.min(self.bins.x - 1))
    }

    // get the bin index for a given y value
    pub fn get_bin_index_y(&self, y: f64) -> Option<usize> {
        if y < self.range.y.min || y >= self.range.y.max || y.is_nan() {
            return None;
        }

        let bin_index: usize = ((y - self.range.y.min) / self.bins.y_width).floor() as usize;

        Some(bin_index.min(self.bins.y - 1))
    }

    pub fn bin_content(&self, x_index: usize, y_index: usize) -> f64 {
        self.bins
            .counts
            .get(&(x_index, y_index))
            .map_or(0.0, |cell| cell.content)
    }

    pub fn bin_center_x(&self, x_index: usize) -> f64 {
        self.range.x.min + (x_index as f64 + 0.5) * self.bins.x_width
    }

    pub fn bin_center_y(&self, y_index: usize) -> f64 {
        self.range.y.min + (y_index as f64 + 0.5) * self.bins.y_width
    }

    pub fn integral(&self) -> f64 {
        self.bins.counts.values().map(|cell| cell.content).sum()
    }

    /// Non-empty cells ordered by x then y index.
    pub fn filled_cells(&self) -> Vec<((usize, usize), Cell)> {
        let mut cells: Vec<((usize, usize), Cell)> = self
            .bins
            .counts
            .iter()
            .map(|(&key, &cell)| (key, cell))
            .collect();
        cells.sort_by_key(|(key, _)| *key);
        cells
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cell {
    pub content: f64,
    pub sumw2: f64,
}

#[derive(Debug, Clone)]
pub struct Bins {
    pub x: usize,
    pub x_width: f64,
    pub y: usize,
    pub y_width: f64,
    pub counts: FnvHashMap<(usize, usize), Cell>, // sparse: empty bins cost nothing
}

#[derive(Debug, Clone)]
pub struct Value {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone)]
pub struct Range {
    pub x: Value,
    pub y: Value,
}
