use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// North-up grid raster with square cells. `origin_x`/`origin_y` is the top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRaster {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
    pub nodata: f64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterInfo {
    pub rows: usize,
    pub cols: usize,
    pub cell_size: f64,
}

impl GridRaster {
    pub fn new(
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        rows: usize,
        cols: usize,
        values: Vec<f64>,
    ) -> Result<Self> {
        let raster = Self {
            origin_x,
            origin_y,
            cell_size,
            rows,
            cols,
            nodata: crate::utils::constants::MISSING_VALUE,
            values,
        };
        raster.check()?;
        Ok(raster)
    }

    /// Build a raster by evaluating `f` at every cell centre.
    pub fn from_fn<F>(origin_x: f64, origin_y: f64, cell_size: f64, rows: usize, cols: usize, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut values = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let x = origin_x + (col as f64 + 0.5) * cell_size;
                let y = origin_y - (row as f64 + 0.5) * cell_size;
                values.push(f(x, y));
            }
        }
        Self {
            origin_x,
            origin_y,
            cell_size,
            rows,
            cols,
            nodata: crate::utils::constants::MISSING_VALUE,
            values,
        }
    }

    fn check(&self) -> Result<()> {
        if self.cell_size <= 0.0 || !self.cell_size.is_finite() {
            return Err(ProcessingError::InvalidFormat(format!(
                "Raster cell size must be positive, got {}",
                self.cell_size
            )));
        }
        if self.values.len() != self.rows * self.cols {
            return Err(ProcessingError::InvalidFormat(format!(
                "Raster has {} values for {}x{} cells",
                self.values.len(),
                self.rows,
                self.cols
            )));
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let raster: GridRaster = serde_json::from_reader(BufReader::new(file))?;
        raster.check()?;
        Ok(raster)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn info(&self) -> RasterInfo {
        RasterInfo {
            rows: self.rows,
            cols: self.cols,
            cell_size: self.cell_size,
        }
    }

    /// Row and column of the cell containing (x, y).
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.cell_size).floor();
        let row = ((self.origin_y - y) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 || col >= self.cols as f64 || row >= self.rows as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Cell value, `None` for nodata or outside the grid.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let value = *self.values.get(row * self.cols + col)?;
        if value == self.nodata || value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    pub fn value_at(&self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.cell_of(x, y)?;
        self.get(row, col)
    }

    /// Inclusive row/column window covering a bounding box, clamped to the grid.
    pub fn window(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Option<(usize, usize, usize, usize)> {
        let col_start = ((min_x - self.origin_x) / self.cell_size).floor().max(0.0);
        let col_end = ((max_x - self.origin_x) / self.cell_size).floor();
        let row_start = ((self.origin_y - max_y) / self.cell_size).floor().max(0.0);
        let row_end = ((self.origin_y - min_y) / self.cell_size).floor();

        if col_end < 0.0 || row_end < 0.0 || col_start >= self.cols as f64 || row_start >= self.rows as f64 {
            return None;
        }

        Some((
            row_start as usize,
            (row_end as usize).min(self.rows - 1),
            col_start as usize,
            (col_end as usize).min(self.cols - 1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> GridRaster {
        // 4x4 cells of 10 m starting at (0, 40); value = column index
        GridRaster::from_fn(0.0, 40.0, 10.0, 4, 4, |x, _| (x / 10.0).floor())
    }

    #[test]
    fn test_cell_lookup() {
        let raster = ramp();
        assert_eq!(raster.cell_of(5.0, 35.0), Some((0, 0)));
        assert_eq!(raster.cell_of(39.0, 1.0), Some((3, 3)));
        assert_eq!(raster.cell_of(-1.0, 5.0), None);
        assert_eq!(raster.value_at(25.0, 15.0), Some(2.0));
        assert_eq!(raster.cell_center(1, 2), (25.0, 25.0));
    }

    #[test]
    fn test_window_is_clamped() {
        let raster = ramp();
        assert_eq!(raster.window(-100.0, -100.0, 100.0, 100.0), Some((0, 3, 0, 3)));
        assert_eq!(raster.window(12.0, 12.0, 18.0, 18.0), Some((2, 2, 1, 1)));
        assert_eq!(raster.window(100.0, 100.0, 200.0, 200.0), None);
    }

    #[test]
    fn test_rejects_mismatched_values() {
        assert!(GridRaster::new(0.0, 0.0, 1.0, 2, 2, vec![1.0; 3]).is_err());
        assert!(GridRaster::new(0.0, 0.0, 0.0, 1, 1, vec![1.0]).is_err());
    }

    #[test]
    fn test_nodata_is_hidden() {
        let mut raster = ramp();
        raster.values[0] = raster.nodata;
        assert_eq!(raster.get(0, 0), None);
        assert_eq!(raster.get(0, 1), Some(1.0));
    }
}
