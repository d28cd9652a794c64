//! Spatial reconstruction of per-channel values onto the electrode grid.
//!
//! Placed cells keep the measured value. Every other cell takes the
//! kernel-weighted average of its neighbourhood, with the grid wrapping
//! around at the edges.
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use log::{info, warn};
use ndarray::{array, Array2, Zip};
use crate::drivers::MonitorError;
/// Grid of channel ordinals: 0 is an empty cell, k > 0 is channel k (1-based).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementMatrix {
    cells: Array2<u32>,
}
impl PlacementMatrix {
    pub fn new(cells: Array2<u32>, channel_count: usize) -> Result<Self, MonitorError> {
        if cells.is_empty() {
            return Err(MonitorError::InvalidFormat("matrix has no cells".into()));
        }
        let placement = Self { cells };
        placement.check_highest(channel_count)?;
        Ok(placement)
    }
    pub fn from_rows(rows: Vec<Vec<u32>>, channel_count: usize) -> Result<Self, MonitorError> {
        let height = rows.len();
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(MonitorError::InvalidFormat("rows have different lengths".into()));
        }
        let flat: Vec<u32> = rows.into_iter().flatten().collect();
        let cells = Array2::from_shape_vec((height, width), flat)
            .map_err(|e| MonitorError::InvalidFormat(e.to_string()))?;
        Self::new(cells, channel_count)
    }
    /// Lays channels out row by row on a grid `columns` wide.
    pub fn row_major(channel_count: usize, columns: usize) -> Result<Self, MonitorError> {
        if channel_count == 0 || columns == 0 {
            return Err(MonitorError::Configuration(
                "row-major layout needs at least one channel and one column".into(),
            ));
        }
        let rows = channel_count.div_ceil(columns);
        let cells = Array2::from_shape_fn((rows, columns), |(r, c)| {
            let ordinal = r * columns + c + 1;
            if ordinal <= channel_count {
                ordinal as u32
            } else {
                0
            }
        });
        Self::new(cells, channel_count)
    }
    /// Parses a whitespace-delimited matrix. Values may be written as floats
    /// (`1.0`, `2.000e+00`) but must be whole and non-negative.
    pub fn parse(text: &str, channel_count: usize) -> Result<Self, MonitorError> {
        let mut rows = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|token| parse_ordinal(token, line_no + 1))
                .collect::<Result<Vec<u32>, MonitorError>>()?;
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(MonitorError::InvalidFormat("file contains no rows".into()));
        }
        Self::from_rows(rows, channel_count)
    }
    pub fn load(path: impl AsRef<Path>, channel_count: usize) -> Result<Self, MonitorError> {
        let text = fs::read_to_string(path.as_ref())?;
        let placement = Self::parse(&text, channel_count)?;
        info!(
            "loaded {}x{} placement from {}",
            placement.rows(),
            placement.cols(),
            path.as_ref().display()
        );
        Ok(placement)
    }
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MonitorError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in self.cells.rows() {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        out
    }
    /// Rejects the whole matrix when any ordinal exceeds the channel count.
    pub fn check_highest(&self, channel_count: usize) -> Result<(), MonitorError> {
        let highest = self.highest_ordinal();
        if highest > channel_count {
            return Err(MonitorError::InvalidFormat(format!(
                "channel {highest} placed but only {channel_count} channels are available"
            )));
        }
        Ok(())
    }
    pub fn highest_ordinal(&self) -> usize {
        self.cells.iter().copied().max().unwrap_or(0) as usize
    }
    pub fn rows(&self) -> usize {
        self.cells.nrows()
    }
    pub fn cols(&self) -> usize {
        self.cells.ncols()
    }
    pub fn placed_count(&self) -> usize {
        self.cells.iter().filter(|&&v| v != 0).count()
    }
    pub fn cells(&self) -> &Array2<u32> {
        &self.cells
    }
}
fn parse_ordinal(token: &str, line: usize) -> Result<u32, MonitorError> {
    let value: f64 = token.parse().map_err(|_| {
        MonitorError::InvalidFormat(format!("line {line}: `{token}` is not a number"))
    })?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(MonitorError::InvalidFormat(format!(
            "line {line}: `{token}` is not a channel ordinal"
        )));
    }
    Ok(value as u32)
}
/// Convolution stencil used to fill gaps; normalised by its weight sum.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    weights: Array2<f64>,
    sum: f64,
}
impl Kernel {
    pub fn new(weights: Array2<f64>) -> Result<Self, MonitorError> {
        if weights.is_empty() {
            return Err(MonitorError::Configuration("kernel has no weights".into()));
        }
        let sum = weights.sum();
        if sum == 0.0 || !sum.is_finite() {
            return Err(MonitorError::Configuration(
                "kernel weights must have a finite, non-zero sum".into(),
            ));
        }
        Ok(Self { weights, sum })
    }
    /// N/S/E/W averaging stencil.
    pub fn four_neighbor() -> Self {
        let weights = array![[0.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0]];
        Self { weights, sum: 4.0 }
    }
    /// Nested rows, as written in the parameter file.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MonitorError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(MonitorError::Configuration(
                "kernel rows have different lengths".into(),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let weights = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| MonitorError::Configuration(e.to_string()))?;
        Self::new(weights)
    }
}
impl Default for Kernel {
    fn default() -> Self {
        Self::four_neighbor()
    }
}
/// 2-D convolution, output the same size as `grid`, indices wrapping at the edges.
pub fn convolve_wrap(grid: &Array2<f64>, kernel: &Kernel) -> Array2<f64> {
    let (rows, cols) = grid.dim();
    let (k_rows, k_cols) = kernel.weights.dim();
    let (center_r, center_c) = (((k_rows - 1) / 2) as isize, ((k_cols - 1) / 2) as isize);
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut acc = 0.0;
        for ((m, n), &w) in kernel.weights.indexed_iter() {
            if w == 0.0 {
                continue;
            }
            let src_r = (r as isize + center_r - m as isize).rem_euclid(rows as isize) as usize;
            let src_c = (c as isize + center_c - n as isize).rem_euclid(cols as isize) as usize;
            acc += w * grid[[src_r, src_c]];
        }
        acc / kernel.sum
    })
}
/// Places `features` on the grid and fills the gaps from their neighbours.
///
/// An empty feature vector yields an all-zero grid.
pub fn reconstruct(
    features: &[f64],
    placement: &PlacementMatrix,
    kernel: &Kernel,
) -> Result<Array2<f64>, MonitorError> {
    let cells = placement.cells();
    if features.is_empty() {
        return Ok(Array2::zeros(cells.dim()));
    }
    let highest = placement.highest_ordinal();
    if highest > features.len() {
        return Err(MonitorError::ChannelMismatch {
            expected: highest,
            actual: features.len(),
        });
    }
    let raw = cells.mapv(|k| if k == 0 { 0.0 } else { features[k as usize - 1] });
    let smoothed = convolve_wrap(&raw, kernel);
    let mut grid = raw;
    Zip::from(&mut grid)
        .and(cells)
        .and(&smoothed)
        .for_each(|out, &k, &s| {
            if k == 0 {
                *out = s;
            }
        });
    Ok(grid)
}
/// Heatmap-side owner of the placement and kernel.
#[derive(Clone, Debug)]
pub struct SpatialReconstructor {
    placement: PlacementMatrix,
    kernel: Kernel,
}
impl SpatialReconstructor {
    pub fn new(placement: PlacementMatrix, kernel: Kernel) -> Self {
        Self { placement, kernel }
    }
    pub fn reconstruct(&self, features: &[f64]) -> Result<Array2<f64>, MonitorError> {
        reconstruct(features, &self.placement, &self.kernel)
    }
    pub fn placement(&self) -> &PlacementMatrix {
        &self.placement
    }
    /// Swaps the placement only if the file loads and validates completely.
    pub fn load_placement(
        &mut self,
        path: impl AsRef<Path>,
        channel_count: usize,
    ) -> Result<(), MonitorError> {
        match PlacementMatrix::load(path.as_ref(), channel_count) {
            Ok(placement) => {
                self.placement = placement;
                Ok(())
            }
            Err(err) => {
                warn!(
                    "keeping previous placement, {} rejected: {err}",
                    path.as_ref().display()
                );
                Err(err)
            }
        }
    }
}
