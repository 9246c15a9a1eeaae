/// In-memory elevation grid shared by gridding, mosaic, smoothing and rendering.
use crate::error::{PipelineError, Result};
use crate::geotiff::GeoKeys;
use serde::Serialize;

/// North-up affine placement of a raster. `origin_*` is the north-west corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_width: f64,
    pub cell_height: f64,
}

/// Horizontal footprint of a raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn union(self, other: Extent) -> Extent {
        Extent {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RasterStats {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub valid_cells: usize,
}

#[derive(Debug, Clone)]
pub struct Raster {
    pub cols: usize,
    pub rows: usize,
    pub transform: GeoTransform,
    pub nodata: f32,
    /// Row-major values, row 0 is the northern edge.
    pub data: Vec<f32>,
    pub geo_keys: Option<GeoKeys>,
}

impl Raster {
    /// Raster filled with `nodata`.
    pub fn new(cols: usize, rows: usize, transform: GeoTransform, nodata: f32) -> Self {
        Self {
            cols,
            rows,
            transform,
            nodata,
            data: vec![nodata; cols * rows],
            geo_keys: None,
        }
    }

    /// Wrap existing values, checking the buffer matches the grid size.
    pub fn from_data(
        cols: usize,
        rows: usize,
        transform: GeoTransform,
        nodata: f32,
        data: Vec<f32>,
    ) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(PipelineError::InvalidRaster(format!(
                "empty grid {}x{}",
                cols, rows
            )));
        }
        if data.len() != cols * rows {
            return Err(PipelineError::InvalidRaster(format!(
                "expected {} values for {}x{} grid, got {}",
                cols * rows,
                cols,
                rows,
                data.len()
            )));
        }
        Ok(Self {
            cols,
            rows,
            transform,
            nodata,
            data,
            geo_keys: None,
        })
    }

    #[inline]
    pub fn index(&self, col: usize, row: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.data[self.index(col, row)]
    }

    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        let idx = self.index(col, row);
        self.data[idx] = value;
    }

    /// False for nodata and non-finite values.
    #[inline]
    pub fn is_valid(&self, value: f32) -> bool {
        value.is_finite() && value != self.nodata
    }

    /// Valid value at a cell, if any.
    pub fn value(&self, col: usize, row: usize) -> Option<f32> {
        let value = self.get(col, row);
        self.is_valid(value).then_some(value)
    }

    /// World coordinates of a cell centre.
    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        let t = &self.transform;
        (
            t.origin_x + (col as f64 + 0.5) * t.cell_width,
            t.origin_y - (row as f64 + 0.5) * t.cell_height,
        )
    }

    /// Continuous pixel coordinates of a world position, measured so that
    /// integer values fall on cell centres.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let t = &self.transform;
        (
            (x - t.origin_x) / t.cell_width - 0.5,
            (t.origin_y - y) / t.cell_height - 0.5,
        )
    }

    pub fn extent(&self) -> Extent {
        let t = &self.transform;
        Extent {
            min_x: t.origin_x,
            max_x: t.origin_x + self.cols as f64 * t.cell_width,
            min_y: t.origin_y - self.rows as f64 * t.cell_height,
            max_y: t.origin_y,
        }
    }

    pub fn statistics(&self) -> RasterStats {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut valid_cells = 0usize;

        for &value in &self.data {
            if self.is_valid(value) {
                min = min.min(value);
                max = max.max(value);
                sum += value as f64;
                valid_cells += 1;
            }
        }

        RasterStats {
            min,
            max,
            mean: if valid_cells > 0 {
                sum / valid_cells as f64
            } else {
                f64::NAN
            },
            valid_cells,
        }
    }
}
