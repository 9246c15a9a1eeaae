/// Point cloud gridding into elevation rasters (DSM or TIN interpolation).
use crate::bounds::PointCloudBounds;
use crate::delaunay::triangulate;
use crate::error::{PipelineError, Result};
use crate::geotiff::write_geotiff;
use crate::laz::{geo_keys, read_points};
use crate::layout::{current_point_clouds, raster_output};
use crate::raster::{GeoTransform, Raster};
use crate::spatial_index::GridIndex;
use constants::raster::{DEFAULT_RESOLUTION, DEFAULT_SEARCH_RADIUS, NODATA};
use indicatif::{ProgressBar, ProgressStyle};
use las::Point;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Positions closer than this (map units) are merged before triangulation.
const MERGE_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GriddingMethod {
    /// Highest point within the search radius of each cell centre.
    Surface,
    /// Linear interpolation on a Delaunay TIN.
    Delaunay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GriddingParams {
    pub method: GriddingMethod,
    /// Output cell size in map units.
    pub resolution: f64,
    /// DSM search radius in map units.
    pub radius: f64,
    pub exclude_classes: Vec<u8>,
    pub min_z: Option<f64>,
    pub max_z: Option<f64>,
    /// TIN triangles with a longer edge are left as nodata.
    pub max_triangle_edge_length: Option<f64>,
}

impl Default for GriddingParams {
    fn default() -> Self {
        Self {
            method: GriddingMethod::Surface,
            resolution: DEFAULT_RESOLUTION,
            radius: DEFAULT_SEARCH_RADIUS,
            exclude_classes: Vec::new(),
            min_z: None,
            max_z: None,
            max_triangle_edge_length: None,
        }
    }
}

impl GriddingParams {
    /// Class and elevation-range test applied before gridding.
    pub fn accepts(&self, point: &Point) -> bool {
        if self
            .exclude_classes
            .contains(&u8::from(point.classification))
        {
            return false;
        }
        if self.min_z.is_some_and(|min| point.z < min) {
            return false;
        }
        if self.max_z.is_some_and(|max| point.z > max) {
            return false;
        }
        true
    }
}

/// Empty grid covering `bounds`, with edges snapped to multiples of `resolution`.
pub fn grid_for_bounds(bounds: &PointCloudBounds, resolution: f64) -> Raster {
    let origin_x = (bounds.min_x / resolution).floor() * resolution;
    let origin_y = (bounds.max_y / resolution).ceil() * resolution;
    let east = (bounds.max_x / resolution).ceil() * resolution;
    let south = (bounds.min_y / resolution).floor() * resolution;
    let cols = (((east - origin_x) / resolution).round() as usize).max(1);
    let rows = (((origin_y - south) / resolution).round() as usize).max(1);

    let transform = GeoTransform {
        origin_x,
        origin_y,
        cell_width: resolution,
        cell_height: resolution,
    };
    Raster::new(cols, rows, transform, NODATA)
}

fn gridding_bar(total: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "[{{bar:40.green/blue}}] {{pos}}/{{len}} {} ({{percent}}%) {{msg}}",
                unit
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("▉▊▋▌▍▎▏ "),
    );
    pb
}

/// Grid `(x, y, z)` positions with the configured method.
pub fn rasterize_points(positions: &[(f64, f64, f64)], params: &GriddingParams) -> Result<Raster> {
    if params.resolution.is_nan() || params.resolution <= 0.0 {
        return Err(PipelineError::Config(format!(
            "gridding resolution must be positive, got {}",
            params.resolution
        )));
    }
    if positions.is_empty() {
        return Err(PipelineError::InvalidRaster("no points to grid".to_string()));
    }

    let mut bounds = PointCloudBounds::new();
    for &(x, y, z) in positions {
        bounds.update(x, y, z);
    }
    let mut raster = grid_for_bounds(&bounds, params.resolution);
    tracing::debug!(
        "Gridding {} points into {}x{} cells",
        positions.len(),
        raster.cols,
        raster.rows
    );

    match params.method {
        GriddingMethod::Surface => surface_model(positions, params, &mut raster),
        GriddingMethod::Delaunay => tin_gridding(positions, params, &mut raster),
    }

    Ok(raster)
}

/// Highest elevation among the points within the search radius of each cell centre.
fn surface_model(positions: &[(f64, f64, f64)], params: &GriddingParams, raster: &mut Raster) {
    // Every point must reach the centre of the cell it falls in.
    let min_radius = params.resolution * std::f64::consts::FRAC_1_SQRT_2;
    let radius = params.radius.max(min_radius);

    let xy: Vec<(f64, f64)> = positions.iter().map(|&(x, y, _)| (x, y)).collect();
    let index = GridIndex::build(&xy, radius);

    let cols = raster.cols;
    let transform = raster.transform;
    let nodata = raster.nodata;
    let pb = gridding_bar(raster.rows as u64, "rows");
    pb.set_message("Surface model");

    raster
        .data
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out)| {
            let cy = transform.origin_y - (row as f64 + 0.5) * transform.cell_height;
            for (col, cell) in out.iter_mut().enumerate() {
                let cx = transform.origin_x + (col as f64 + 0.5) * transform.cell_width;
                let mut highest = f64::NEG_INFINITY;
                index.for_each_within(&xy, cx, cy, radius, |i| {
                    highest = highest.max(positions[i].2);
                });
                *cell = if highest.is_finite() {
                    highest as f32
                } else {
                    nodata
                };
            }
            pb.inc(1);
        });

    pb.finish_with_message("Surface model complete");
}

/// Merge coincident positions, keeping the highest elevation.
fn merge_duplicates(positions: &[(f64, f64, f64)]) -> Vec<(f64, f64, f64)> {
    let mut unique: HashMap<(i64, i64), (f64, f64, f64)> = HashMap::with_capacity(positions.len());
    for &(x, y, z) in positions {
        let key = (
            (x / MERGE_TOLERANCE).round() as i64,
            (y / MERGE_TOLERANCE).round() as i64,
        );
        unique
            .entry(key)
            .and_modify(|kept| {
                if z > kept.2 {
                    *kept = (x, y, z);
                }
            })
            .or_insert((x, y, z));
    }
    let mut merged: Vec<_> = unique.into_values().collect();
    merged.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    merged
}

/// Linear interpolation of a Delaunay TIN at every cell centre.
fn tin_gridding(positions: &[(f64, f64, f64)], params: &GriddingParams, raster: &mut Raster) {
    let points = merge_duplicates(positions);
    let xy: Vec<(f64, f64)> = points.iter().map(|&(x, y, _)| (x, y)).collect();

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Triangulating {} points", xy.len()));
    let tin = triangulate(&xy);
    spinner.finish_and_clear();
    tracing::debug!("TIN has {} triangles", tin.triangles.len());

    let max_edge_sq = params.max_triangle_edge_length.map(|l| l * l);
    let t = raster.transform;
    let pb = gridding_bar(tin.triangles.len() as u64, "triangles");
    pb.set_message("Interpolating TIN");

    for (idx, tri) in tin.triangles.iter().enumerate() {
        if idx % 10_000 == 0 {
            pb.set_position(idx as u64);
        }
        let [a, b, c] = tri.map(|i| points[i]);

        if let Some(limit) = max_edge_sq {
            let longest = [(a, b), (b, c), (c, a)]
                .iter()
                .map(|(p, q)| (p.0 - q.0).powi(2) + (p.1 - q.1).powi(2))
                .fold(0.0, f64::max);
            if longest > limit {
                continue;
            }
        }

        let det = (b.1 - c.1) * (a.0 - c.0) + (c.0 - b.0) * (a.1 - c.1);
        if det.abs() < f64::EPSILON {
            continue;
        }

        let min_x = a.0.min(b.0).min(c.0);
        let max_x = a.0.max(b.0).max(c.0);
        let min_y = a.1.min(b.1).min(c.1);
        let max_y = a.1.max(b.1).max(c.1);

        let col_start = ((min_x - t.origin_x) / t.cell_width - 0.5).ceil().max(0.0) as usize;
        let col_end = ((max_x - t.origin_x) / t.cell_width - 0.5).floor();
        let row_start = ((t.origin_y - max_y) / t.cell_height - 0.5).ceil().max(0.0) as usize;
        let row_end = ((t.origin_y - min_y) / t.cell_height - 0.5).floor();
        if col_end < 0.0 || row_end < 0.0 {
            continue;
        }
        let col_end = (col_end as usize).min(raster.cols - 1);
        let row_end = (row_end as usize).min(raster.rows - 1);

        for row in row_start..=row_end {
            for col in col_start..=col_end {
                let (px, py) = raster.cell_center(col, row);
                let l1 = ((b.1 - c.1) * (px - c.0) + (c.0 - b.0) * (py - c.1)) / det;
                let l2 = ((c.1 - a.1) * (px - c.0) + (a.0 - c.0) * (py - c.1)) / det;
                let l3 = 1.0 - l1 - l2;
                const EDGE_EPS: f64 = -1e-9;
                if l1 >= EDGE_EPS && l2 >= EDGE_EPS && l3 >= EDGE_EPS {
                    raster.set(col, row, (l1 * a.2 + l2 * b.2 + l3 * c.2) as f32);
                }
            }
        }
    }

    pb.finish_with_message("TIN interpolated");
}

/// Grid one LAS file into a GeoTIFF, carrying over the file's GeoTIFF keys.
pub fn rasterize_file(input: &Path, output: &Path, params: &GriddingParams) -> Result<Raster> {
    let (header, points) = read_points(input)?;
    let positions: Vec<(f64, f64, f64)> = points
        .iter()
        .filter(|p| params.accepts(p))
        .map(|p| (p.x, p.y, p.z))
        .collect();
    tracing::debug!(
        "{}: {} of {} points retained for gridding",
        input.display(),
        positions.len(),
        points.len()
    );
    drop(points);

    let mut raster = rasterize_points(&positions, params)?;
    raster.geo_keys = geo_keys(&header);
    write_geotiff(&raster, output)?;
    Ok(raster)
}

/// Grid every current LAS file in `las_dir` into `tif_dir`, one raster per
/// file. Sources kept next to their filtered copies are skipped.
pub fn rasterize_folder(las_dir: &Path, tif_dir: &Path, params: &GriddingParams) -> Result<Vec<PathBuf>> {
    let files = current_point_clouds(las_dir)?;
    if files.is_empty() {
        tracing::warn!("No .las files in {}", las_dir.display());
        return Ok(Vec::new());
    }
    fs::create_dir_all(tif_dir)?;

    let mut written = Vec::with_capacity(files.len());
    for (idx, file) in files.iter().enumerate() {
        let output = raster_output(file, tif_dir);
        tracing::info!(
            "{} \t{} - {:?} gridding at {} m",
            idx,
            file.display(),
            params.method,
            params.resolution
        );
        match rasterize_file(file, &output, params) {
            Ok(raster) => {
                let stats = raster.statistics();
                tracing::info!(
                    "Saved {} ({}x{}, {} valid cells)",
                    output.display(),
                    raster.cols,
                    raster.rows,
                    stats.valid_cells
                );
                written.push(output);
            }
            Err(PipelineError::InvalidRaster(reason)) => {
                tracing::warn!("Skipping {}: {}", file.display(), reason);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}
