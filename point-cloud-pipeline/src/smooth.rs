/// Neighbourhood filters for smoothing elevation rasters.
use crate::error::Result;
use crate::geotiff::{read_geotiff, write_geotiff};
use crate::raster::Raster;
use crate::stats::{median, round_to};
use constants::raster::{DEFAULT_MEDIAN_WINDOW, DEFAULT_SIG_DIGITS};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_window() -> usize {
    DEFAULT_MEDIAN_WINDOW
}

fn default_small_window() -> usize {
    3
}

fn default_sig_digits() -> u32 {
    DEFAULT_SIG_DIGITS
}

fn default_sigma_dist() -> f64 {
    0.75
}

fn default_sigma_int() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SmoothMethod {
    /// Median of the window after rounding to `sig_digits` decimals.
    Median {
        #[serde(default = "default_window")]
        filter_x: usize,
        #[serde(default = "default_window")]
        filter_y: usize,
        #[serde(default = "default_sig_digits")]
        sig_digits: u32,
    },
    /// Clamp each cell to the range of its neighbours.
    ConservativeSmoothing {
        #[serde(default = "default_small_window")]
        filter_x: usize,
        #[serde(default = "default_small_window")]
        filter_y: usize,
    },
    /// Edge-preserving Gaussian weighting in space and elevation.
    Bilateral {
        #[serde(default = "default_sigma_dist")]
        sigma_dist: f64,
        #[serde(default = "default_sigma_int")]
        sigma_int: f64,
    },
}

impl Default for SmoothMethod {
    fn default() -> Self {
        SmoothMethod::Median {
            filter_x: DEFAULT_MEDIAN_WINDOW,
            filter_y: DEFAULT_MEDIAN_WINDOW,
            sig_digits: DEFAULT_SIG_DIGITS,
        }
    }
}

impl SmoothMethod {
    pub fn name(&self) -> &'static str {
        match self {
            SmoothMethod::Median { .. } => "median",
            SmoothMethod::ConservativeSmoothing { .. } => "conservative_smoothing",
            SmoothMethod::Bilateral { .. } => "bilateral",
        }
    }

    /// Half window sizes (columns, rows) in cells.
    fn half_window(&self) -> (usize, usize) {
        match *self {
            SmoothMethod::Median {
                filter_x, filter_y, ..
            }
            | SmoothMethod::ConservativeSmoothing { filter_x, filter_y } => {
                (odd(filter_x) / 2, odd(filter_y) / 2)
            }
            SmoothMethod::Bilateral { sigma_dist, .. } => {
                let r = (2.5 * sigma_dist).ceil().max(1.0) as usize;
                (r, r)
            }
        }
    }
}

/// Even window sizes grow to the next odd size so the window stays centred.
fn odd(size: usize) -> usize {
    let size = size.max(1);
    if size % 2 == 0 { size + 1 } else { size }
}

/// Apply `method` to every valid cell. Nodata cells are left untouched and
/// never contribute to a neighbourhood.
pub fn smooth(raster: &Raster, method: &SmoothMethod) -> Raster {
    let (half_x, half_y) = method.half_window();
    let cols = raster.cols;
    let rows = raster.rows;

    let mut output = raster.clone();
    output
        .data
        .par_chunks_mut(cols)
        .enumerate()
        .for_each_init(Vec::new, |window: &mut Vec<(f64, f64)>, (row, out)| {
            let r0 = row.saturating_sub(half_y);
            let r1 = (row + half_y).min(rows - 1);
            for (col, cell) in out.iter_mut().enumerate() {
                let Some(centre) = raster.value(col, row) else {
                    continue;
                };
                let c0 = col.saturating_sub(half_x);
                let c1 = (col + half_x).min(cols - 1);

                // (value, squared distance in cells) for every valid neighbour.
                window.clear();
                for r in r0..=r1 {
                    for c in c0..=c1 {
                        if let Some(v) = raster.value(c, r) {
                            let dc = c as f64 - col as f64;
                            let dr = r as f64 - row as f64;
                            window.push((v as f64, dc * dc + dr * dr));
                        }
                    }
                }

                *cell = filter_cell(method, centre as f64, window) as f32;
            }
        });

    output
}

fn filter_cell(method: &SmoothMethod, centre: f64, window: &mut [(f64, f64)]) -> f64 {
    match *method {
        SmoothMethod::Median { sig_digits, .. } => {
            let mut values: Vec<f64> = window.iter().map(|&(v, _)| round_to(v, sig_digits)).collect();
            median(&mut values)
        }
        SmoothMethod::ConservativeSmoothing { .. } => {
            let (lo, hi) = window
                .iter()
                .filter(|&&(_, d)| d > 0.0)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(v, _)| {
                    (lo.min(v), hi.max(v))
                });
            if lo > hi { centre } else { centre.clamp(lo, hi) }
        }
        SmoothMethod::Bilateral {
            sigma_dist,
            sigma_int,
        } => {
            let two_sd = 2.0 * sigma_dist * sigma_dist;
            let two_si = 2.0 * sigma_int * sigma_int;
            let (weighted, total) = window.iter().fold((0.0, 0.0), |(sum, total), &(v, d2)| {
                let dv = v - centre;
                let w = (-d2 / two_sd).exp() * (-(dv * dv) / two_si).exp();
                (sum + w * v, total + w)
            });
            if total > 0.0 { weighted / total } else { centre }
        }
    }
}

/// Smooth a raster file into `output`.
pub fn smooth_file(input: &Path, output: &Path, method: &SmoothMethod) -> Result<Raster> {
    let raster = read_geotiff(input)?;
    tracing::info!(
        "Filtering {} ({}x{}) with {}",
        input.display(),
        raster.cols,
        raster.rows,
        method.name()
    );
    let filtered = smooth(&raster, method);
    write_geotiff(&filtered, output)?;
    tracing::info!("Saved {}", output.display());
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use approx::assert_relative_eq;
    use constants::raster::NODATA;

    fn grid(values: &[f32], cols: usize) -> Raster {
        let transform = GeoTransform {
            origin_x: 0.0,
            origin_y: (values.len() / cols) as f64,
            cell_width: 1.0,
            cell_height: 1.0,
        };
        Raster::from_data(cols, values.len() / cols, transform, NODATA, values.to_vec()).unwrap()
    }

    #[test]
    fn median_removes_single_spike() {
        let mut values = vec![5.0f32; 25];
        values[12] = 100.0;
        let raster = grid(&values, 5);
        let method = SmoothMethod::Median {
            filter_x: 3,
            filter_y: 3,
            sig_digits: 2,
        };
        let out = smooth(&raster, &method);
        assert_eq!(out.get(2, 2), 5.0);
        assert!(out.data.iter().all(|&v| v == 5.0));
    }

    #[test]
    fn median_rounds_to_significant_digits() {
        let raster = grid(&[1.234, 1.236, 1.238], 3);
        let method = SmoothMethod::Median {
            filter_x: 3,
            filter_y: 1,
            sig_digits: 2,
        };
        let out = smooth(&raster, &method);
        assert_relative_eq!(out.get(1, 0), 1.24, epsilon = 1e-6);
    }

    #[test]
    fn nodata_is_preserved_and_ignored() {
        let mut values = vec![2.0f32; 9];
        values[4] = NODATA;
        values[0] = 8.0;
        let raster = grid(&values, 3);
        let out = smooth(&raster, &SmoothMethod::Median { filter_x: 3, filter_y: 3, sig_digits: 2 });
        assert_eq!(out.get(1, 1), NODATA);
        // Window of (0,0) holds 8, 2, 2 once the nodata centre is skipped.
        assert_eq!(out.get(0, 0), 2.0);
    }

    #[test]
    fn conservative_smoothing_clamps_to_neighbour_range() {
        let values = [1.0, 2.0, 3.0, 2.0, 50.0, 2.0, 3.0, 2.0, 1.0];
        let raster = grid(&values, 3);
        let out = smooth(
            &raster,
            &SmoothMethod::ConservativeSmoothing {
                filter_x: 3,
                filter_y: 3,
            },
        );
        assert_eq!(out.get(1, 1), 3.0);
        assert_eq!(out.get(0, 0), 2.0);
    }

    #[test]
    fn bilateral_keeps_flat_areas_and_steps() {
        let mut values = vec![0.0f32; 40];
        for v in values.iter_mut().skip(24) {
            *v = 100.0;
        }
        let raster = grid(&values, 8);
        let out = smooth(
            &raster,
            &SmoothMethod::Bilateral {
                sigma_dist: 0.75,
                sigma_int: 1.0,
            },
        );
        assert_relative_eq!(out.get(0, 0), 0.0, epsilon = 1e-4);
        assert_relative_eq!(out.get(7, 4), 100.0, epsilon = 1e-4);
        // The step between rows survives because intensity weights vanish.
        assert!(out.get(3, 2) < 1.0);
        assert!(out.get(3, 3) > 99.0);
    }

    #[test]
    fn even_windows_are_bumped_to_odd() {
        assert_eq!(odd(8), 9);
        assert_eq!(odd(9), 9);
        assert_eq!(odd(0), 1);
        let method = SmoothMethod::Median {
            filter_x: 4,
            filter_y: 2,
            sig_digits: 2,
        };
        assert_eq!(method.half_window(), (2, 1));
    }

    #[test]
    fn method_deserializes_with_defaults() {
        let method: SmoothMethod = serde_json::from_str(r#"{"method": "median"}"#).unwrap();
        assert_eq!(method, SmoothMethod::default());
        let method: SmoothMethod =
            serde_json::from_str(r#"{"method": "bilateral", "sigma_int": 4.0}"#).unwrap();
        assert_eq!(
            method,
            SmoothMethod::Bilateral {
                sigma_dist: 0.75,
                sigma_int: 4.0
            }
        );
    }
}
