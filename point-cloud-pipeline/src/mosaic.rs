/// Merging raster tiles into a single mosaic with resampling.
use crate::error::{PipelineError, Result};
use crate::geotiff::{read_geotiff, write_geotiff};
use crate::layout::list_files;
use crate::raster::{Extent, GeoTransform, Raster};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleMethod {
    #[default]
    #[serde(rename = "nn")]
    Nearest,
    #[serde(rename = "bilinear")]
    Bilinear,
    /// Cubic convolution.
    #[serde(rename = "cc")]
    Cubic,
}

impl ResampleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResampleMethod::Nearest => "nn",
            ResampleMethod::Bilinear => "bilinear",
            ResampleMethod::Cubic => "cc",
        }
    }
}

impl std::str::FromStr for ResampleMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nn" | "nearest" => Ok(ResampleMethod::Nearest),
            "bilinear" => Ok(ResampleMethod::Bilinear),
            "cc" | "cubic" => Ok(ResampleMethod::Cubic),
            other => Err(PipelineError::Config(format!(
                "unknown resampling method '{}', expected nn, bilinear or cc",
                other
            ))),
        }
    }
}

fn contains(extent: &Extent, x: f64, y: f64) -> bool {
    x >= extent.min_x && x < extent.max_x && y > extent.min_y && y <= extent.max_y
}

#[inline]
fn clamp_index(i: i64, len: usize) -> usize {
    i.clamp(0, len as i64 - 1) as usize
}

fn sample_nearest(raster: &Raster, col: f64, row: f64) -> Option<f32> {
    let c = clamp_index(col.round() as i64, raster.cols);
    let r = clamp_index(row.round() as i64, raster.rows);
    raster.value(c, r)
}

fn sample_bilinear(raster: &Raster, col: f64, row: f64) -> Option<f32> {
    let c0 = col.floor();
    let r0 = row.floor();
    let tx = col - c0;
    let ty = row - r0;

    let cs = [c0 as i64, c0 as i64 + 1].map(|c| clamp_index(c, raster.cols));
    let rs = [r0 as i64, r0 as i64 + 1].map(|r| clamp_index(r, raster.rows));

    let v00 = raster.value(cs[0], rs[0])? as f64;
    let v10 = raster.value(cs[1], rs[0])? as f64;
    let v01 = raster.value(cs[0], rs[1])? as f64;
    let v11 = raster.value(cs[1], rs[1])? as f64;

    let top = v00 * (1.0 - tx) + v10 * tx;
    let bottom = v01 * (1.0 - tx) + v11 * tx;
    Some((top * (1.0 - ty) + bottom * ty) as f32)
}

/// Keys cubic convolution kernel with a = -0.5.
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    const A: f64 = -0.5;
    if t <= 1.0 {
        (A + 2.0) * t.powi(3) - (A + 3.0) * t.powi(2) + 1.0
    } else if t < 2.0 {
        A * t.powi(3) - 5.0 * A * t.powi(2) + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

fn sample_cubic(raster: &Raster, col: f64, row: f64) -> Option<f32> {
    let c0 = col.floor() as i64;
    let r0 = row.floor() as i64;
    let tx = col - c0 as f64;
    let ty = row - r0 as f64;

    let mut sum = 0.0;
    for j in -1..=2i64 {
        let r = clamp_index(r0 + j, raster.rows);
        let wy = cubic_weight(j as f64 - ty);
        for i in -1..=2i64 {
            let c = clamp_index(c0 + i, raster.cols);
            let wx = cubic_weight(i as f64 - tx);
            sum += raster.value(c, r)? as f64 * wx * wy;
        }
    }
    Some(sum as f32)
}

/// Value of `raster` at a world position. Interpolating methods fall back to
/// nearest neighbour when their footprint touches nodata.
pub fn sample(raster: &Raster, x: f64, y: f64, method: ResampleMethod) -> Option<f32> {
    if !contains(&raster.extent(), x, y) {
        return None;
    }
    let (col, row) = raster.world_to_pixel(x, y);
    let value = match method {
        ResampleMethod::Nearest => None,
        ResampleMethod::Bilinear => sample_bilinear(raster, col, row),
        ResampleMethod::Cubic => sample_cubic(raster, col, row),
    };
    value.or_else(|| sample_nearest(raster, col, row))
}

/// Merge rasters onto the grid of the first one, covering the union of all extents.
/// Where tiles overlap the earliest tile with a valid value wins.
pub fn mosaic(rasters: &[Raster], method: ResampleMethod) -> Result<Raster> {
    let first = rasters
        .first()
        .ok_or_else(|| PipelineError::InvalidRaster("nothing to mosaic".to_string()))?;

    let extent = rasters
        .iter()
        .map(Raster::extent)
        .reduce(Extent::union)
        .unwrap_or_else(|| first.extent());
    let cell_width = first.transform.cell_width;
    let cell_height = first.transform.cell_height;

    // Whole cells of the first tile's grid out to the union's west and north edges.
    let west_cells = ((first.transform.origin_x - extent.min_x) / cell_width - 1e-9).ceil();
    let north_cells = ((extent.max_y - first.transform.origin_y) / cell_height - 1e-9).ceil();
    let origin_x = first.transform.origin_x - west_cells * cell_width;
    let origin_y = first.transform.origin_y + north_cells * cell_height;

    let cols = (((extent.max_x - origin_x) / cell_width) - 1e-9).ceil().max(1.0) as usize;
    let rows = (((origin_y - extent.min_y) / cell_height) - 1e-9).ceil().max(1.0) as usize;
    let transform = GeoTransform {
        origin_x,
        origin_y,
        cell_width,
        cell_height,
    };

    let mut output = Raster::new(cols, rows, transform, first.nodata);
    output.geo_keys = first.geo_keys.clone();
    tracing::info!(
        "Mosaicking {} tiles into {}x{} cells ({})",
        rasters.len(),
        cols,
        rows,
        method.as_str()
    );

    let extents: Vec<Extent> = rasters.iter().map(Raster::extent).collect();
    let nodata = output.nodata;
    output
        .data
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out)| {
            let y = transform.origin_y - (row as f64 + 0.5) * cell_height;
            for (col, cell) in out.iter_mut().enumerate() {
                let x = transform.origin_x + (col as f64 + 0.5) * cell_width;
                *cell = rasters
                    .iter()
                    .zip(&extents)
                    .filter(|(_, e)| contains(e, x, y))
                    .find_map(|(r, _)| sample(r, x, y, method))
                    .unwrap_or(nodata);
            }
        });

    Ok(output)
}

/// Mosaic every `.tif` in `tif_dir` (name order) into `output`.
pub fn mosaic_folder(tif_dir: &Path, output: &Path, method: ResampleMethod) -> Result<Raster> {
    let files = list_files(tif_dir, "tif")?;
    if files.is_empty() {
        return Err(PipelineError::EmptyInput {
            kind: "raster",
            dir: tif_dir.to_path_buf(),
        });
    }

    let mut rasters = Vec::with_capacity(files.len());
    for (idx, file) in files.iter().enumerate() {
        tracing::info!("{} \t{}", idx, file.display());
        rasters.push(read_geotiff(file)?);
    }

    let merged = mosaic(&rasters, method)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_geotiff(&merged, output)?;
    tracing::info!("Saved mosaic {}", output.display());
    Ok(merged)
}
