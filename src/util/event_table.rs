use fnv::FnvHashMap;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

use crate::error::{YieldError, YieldResult};

/// Column-oriented rows of one dataset, every column widened to `f64`.
///
/// Only the columns an analysis asks for are read from disk, so a table is
/// usually a small slice of the full replay schema. Null entries become NaN,
/// which never passes a comparison and never lands in a bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    columns: FnvHashMap<String, Vec<f64>>,
    rows: usize,
}

impl EventTable {
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> YieldResult<Self> {
        let rows = columns.first().map_or(0, |(_, values)| values.len());
        let mut map = FnvHashMap::default();
        for (name, values) in columns {
            if values.len() != rows {
                return Err(YieldError::Settings(format!(
                    "column '{name}' has {} rows, expected {rows}",
                    values.len()
                )));
            }
            map.insert(name, values);
        }
        Ok(Self { columns: map, rows })
    }

    pub fn from_dataframe(df: &DataFrame, columns: &[String]) -> YieldResult<Self> {
        let mut map = FnvHashMap::default();
        for name in columns {
            let column = df.column(name.as_str())?.cast(&DataType::Float64)?;
            let values: Vec<f64> = column
                .f64()?
                .into_iter()
                .map(|value| value.unwrap_or(f64::NAN))
                .collect();
            map.insert(name.clone(), values);
        }

        Ok(Self {
            columns: map,
            rows: df.height(),
        })
    }

    /// Read the requested columns of a parquet file. Every other column stays on disk.
    pub fn read_parquet(path: &Path, columns: &[String]) -> YieldResult<Self> {
        let start = Instant::now();

        let file = File::open(path)?;
        let df = ParquetReader::new(file)
            .with_columns(Some(columns.to_vec()))
            .finish()?;
        let table = Self::from_dataframe(&df, columns)?;

        log::debug!(
            "Read {} rows x {} columns from {} in {:?}",
            table.rows,
            columns.len(),
            path.display(),
            start.elapsed()
        );

        Ok(table)
    }

    pub fn height(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> YieldResult<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| YieldError::MissingColumn(name.to_string()))
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.columns.keys().cloned().collect();
        names.sort();
        names
    }
}
