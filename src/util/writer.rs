use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::YieldResult;
use crate::histoer::histo1d::histogram1d::Histogram;
use crate::histoer::histo2d::histogram2d::Histogram2D;

/// Numeric table with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    /// One row per bin: edges, centre, then `label` and `label_err` for each
    /// histogram. All histograms must share the first one's binning.
    pub fn from_histograms(histograms: &[(&str, &Histogram)]) -> YieldResult<Self> {
        let mut headers: Vec<String> = ["bin_low", "bin_high", "bin_center"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let Some((_, reference)) = histograms.first() else {
            return Ok(Self {
                headers,
                rows: Vec::new(),
            });
        };

        for (label, histogram) in histograms {
            reference.check_binning(histogram)?;
            headers.push(label.to_string());
            headers.push(format!("{label}_err"));
        }

        let edges = reference.get_bin_edges();
        let rows = (0..reference.number_of_bins())
            .map(|bin| {
                let mut row = vec![edges[bin], edges[bin + 1], reference.bin_center(bin)];
                for (_, histogram) in histograms {
                    row.push(histogram.bins[bin]);
                    row.push(histogram.bin_error(bin));
                }
                row
            })
            .collect();

        Ok(Self { headers, rows })
    }

    /// Non-empty cells of a 2D histogram.
    pub fn from_histogram2d(histogram: &Histogram2D) -> Self {
        let headers = ["x_center", "y_center", "content", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = histogram
            .filled_cells()
            .into_iter()
            .map(|((x, y), cell)| {
                vec![
                    histogram.bin_center_x(x),
                    histogram.bin_center_y(y),
                    cell.content,
                    cell.sumw2.sqrt(),
                ]
            })
            .collect();
        Self { headers, rows }
    }
}

/// Output directory for one category, e.g. `output/coin/`.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(base: &Path, category: &str) -> YieldResult<Self> {
        let root = base.join(category);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn write_csv(&self, file_name: &str, table: &Table) -> YieldResult<PathBuf> {
        let path = self.path(file_name);
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(format!("{}\n", table.headers.join(",")).as_bytes())?;
        for row in &table.rows {
            let line: Vec<String> = row.iter().map(|value| value.to_string()).collect();
            writer.write_all(format!("{}\n", line.join(",")).as_bytes())?;
        }
        writer.flush()?;

        log::info!("Wrote {}", path.display());
        Ok(path)
    }

    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> YieldResult<PathBuf> {
        let path = self.path(file_name);
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;

        log::info!("Wrote {}", path.display());
        Ok(path)
    }
}
