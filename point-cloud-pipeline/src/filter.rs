/// Point cloud filtering: elevation outlier removal and classification exclusion.
use crate::error::Result;
use crate::laz::{point_bar_style, read_points, write_points};
use crate::layout::{class_output, current_point_clouds, outlier_output};
use crate::spatial_index::GridIndex;
use crate::stats::median;
use constants::class::{DEFAULT_EXCLUDED_CLASSES, HIGH_NOISE, LOW_NOISE};
use constants::raster::{DEFAULT_ELEV_DIFF, DEFAULT_OUTLIER_RADIUS};
use indicatif::ProgressBar;
use las::Point;
use las::point::Classification;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierParams {
    /// Horizontal neighbourhood radius in map units.
    pub radius: f64,
    /// Largest accepted deviation from the neighbourhood elevation.
    pub elev_diff: f64,
    /// Median instead of mean neighbourhood elevation.
    pub use_median: bool,
    /// Re-classify outliers as noise instead of removing them.
    pub classify: bool,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_OUTLIER_RADIUS,
            elev_diff: DEFAULT_ELEV_DIFF,
            use_median: true,
            classify: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierSettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub params: OutlierParams,
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            params: OutlierParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassFilterSettings {
    pub enabled: bool,
    pub exclude: Vec<u8>,
}

impl Default for ClassFilterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            exclude: DEFAULT_EXCLUDED_CLASSES.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub outliers: OutlierSettings,
    pub classes: ClassFilterSettings,
    /// Keep only the filtered copy of each file.
    pub delete_source: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            outliers: OutlierSettings::default(),
            classes: ClassFilterSettings::default(),
            delete_source: true,
        }
    }
}

/// Outcome of the outlier test for one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    /// Lower than its neighbourhood by more than the threshold.
    Low,
    /// Higher than its neighbourhood by more than the threshold.
    High,
}

/// Per-file filtering statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterReport {
    pub file: String,
    pub input_points: usize,
    pub kept_points: usize,
    pub removed_points: usize,
    pub reclassified_points: usize,
}

impl FilterReport {
    fn log(&self) {
        tracing::info!(
            "{}: {} points in, {} kept, {} removed, {} reclassified",
            self.file,
            self.input_points,
            self.kept_points,
            self.removed_points,
            self.reclassified_points
        );
    }
}

/// Compare every point against the mean/median elevation of its horizontal neighbours.
pub fn detect_outliers(positions: &[(f64, f64, f64)], params: &OutlierParams) -> Vec<Verdict> {
    let xy: Vec<(f64, f64)> = positions.iter().map(|&(x, y, _)| (x, y)).collect();
    let index = GridIndex::build(&xy, params.radius);

    let pb = ProgressBar::new(positions.len() as u64);
    pb.set_style(point_bar_style());
    pb.set_message("Testing neighbourhoods");

    let verdicts = (0..positions.len())
        .into_par_iter()
        .map_init(Vec::new, |neighbours: &mut Vec<f64>, i| {
            if i % 10_000 == 0 {
                pb.inc(10_000);
            }
            let (x, y, z) = positions[i];
            neighbours.clear();
            index.for_each_within(&xy, x, y, params.radius, |j| {
                if j != i {
                    neighbours.push(positions[j].2);
                }
            });
            if neighbours.is_empty() {
                return Verdict::Keep;
            }

            let reference = if params.use_median {
                median(neighbours)
            } else {
                neighbours.iter().sum::<f64>() / neighbours.len() as f64
            };

            let diff = z - reference;
            if diff.abs() <= params.elev_diff {
                Verdict::Keep
            } else if diff < 0.0 {
                Verdict::Low
            } else {
                Verdict::High
            }
        })
        .collect();

    pb.finish_with_message("Neighbourhoods tested");
    verdicts
}

/// Remove or re-classify outliers in place, returning the surviving points.
pub fn remove_outliers(points: Vec<Point>, params: &OutlierParams) -> Result<(Vec<Point>, FilterReport)> {
    let positions: Vec<(f64, f64, f64)> = points.iter().map(|p| (p.x, p.y, p.z)).collect();
    let verdicts = detect_outliers(&positions, params);

    let mut report = FilterReport {
        input_points: points.len(),
        ..Default::default()
    };
    let low = Classification::new(LOW_NOISE)?;
    let high = Classification::new(HIGH_NOISE)?;

    let mut kept = Vec::with_capacity(points.len());
    for (mut point, verdict) in points.into_iter().zip(verdicts) {
        match verdict {
            Verdict::Keep => kept.push(point),
            Verdict::Low | Verdict::High if params.classify => {
                point.classification = if verdict == Verdict::Low { low } else { high };
                report.reclassified_points += 1;
                kept.push(point);
            }
            Verdict::Low | Verdict::High => report.removed_points += 1,
        }
    }
    report.kept_points = kept.len();
    Ok((kept, report))
}

/// Drop points whose classification code is listed in `exclude`.
pub fn exclude_classes(points: Vec<Point>, exclude: &[u8]) -> (Vec<Point>, FilterReport) {
    let input_points = points.len();
    let kept: Vec<Point> = points
        .into_iter()
        .filter(|p| !exclude.contains(&u8::from(p.classification)))
        .collect();

    let report = FilterReport {
        input_points,
        kept_points: kept.len(),
        removed_points: input_points - kept.len(),
        ..Default::default()
    };
    (kept, report)
}

pub fn filter_file_outliers(input: &Path, output: &Path, params: &OutlierParams) -> Result<FilterReport> {
    let (header, points) = read_points(input)?;
    let (kept, mut report) = remove_outliers(points, params)?;
    write_points(output, &header, &kept)?;
    report.file = output.display().to_string();
    Ok(report)
}

pub fn filter_file_classes(input: &Path, output: &Path, exclude: &[u8]) -> Result<FilterReport> {
    let (header, points) = read_points(input)?;
    let (kept, mut report) = exclude_classes(points, exclude);
    write_points(output, &header, &kept)?;
    report.file = output.display().to_string();
    Ok(report)
}

/// Run the enabled filters over the current LAS files in `las_dir`.
/// Outlier removal runs first; class filtering then runs over its outputs,
/// so kept sources are never filtered twice.
pub fn filter_folder(las_dir: &Path, settings: &FilterSettings) -> Result<Vec<FilterReport>> {
    let mut reports = Vec::new();
    let mut files = current_point_clouds(las_dir)?;

    if settings.outliers.enabled {
        tracing::info!("Removing outliers from {} files", files.len());
        let mut outputs = Vec::with_capacity(files.len());
        for (idx, file) in files.iter().enumerate() {
            tracing::info!("{} \t{} - remove outliers", idx, file.display());
            let output = outlier_output(file);
            let report = filter_file_outliers(file, &output, &settings.outliers.params)?;
            report.log();
            if settings.delete_source {
                fs::remove_file(file)?;
                tracing::debug!("Deleted {}", file.display());
            }
            reports.push(report);
            outputs.push(output);
        }
        files = outputs;
    }

    if settings.classes.enabled {
        tracing::info!(
            "Excluding classes {:?} from {} files",
            settings.classes.exclude,
            files.len()
        );
        for (idx, file) in files.iter().enumerate() {
            tracing::info!("{} \t{} - filter classes", idx, file.display());
            let output = class_output(file);
            let report = filter_file_classes(file, &output, &settings.classes.exclude)?;
            report.log();
            if settings.delete_source {
                fs::remove_file(file)?;
                tracing::debug!("Deleted {}", file.display());
            }
            reports.push(report);
        }
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laz::create_reader;
    use crate::laz::tests::write_test_cloud;
    use crate::layout::list_files;

    fn flat_patch_with_spikes() -> Vec<(f64, f64, f64)> {
        let mut positions = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                positions.push((i as f64, j as f64, 10.0 + 0.1 * ((i + j) % 3) as f64));
            }
        }
        positions.push((4.5, 4.5, 60.0));
        positions.push((5.5, 5.5, -30.0));
        positions
    }

    #[test]
    fn spikes_are_flagged_by_direction() {
        let positions = flat_patch_with_spikes();
        let verdicts = detect_outliers(&positions, &OutlierParams::default());

        assert_eq!(verdicts[100], Verdict::High);
        assert_eq!(verdicts[101], Verdict::Low);
        assert!(verdicts[..100].iter().all(|v| *v == Verdict::Keep));
    }

    #[test]
    fn mean_reference_is_pulled_by_spikes() {
        let positions = flat_patch_with_spikes();
        let params = OutlierParams {
            use_median: false,
            elev_diff: 20.0,
            ..Default::default()
        };
        let verdicts = detect_outliers(&positions, &params);
        assert_eq!(verdicts[100], Verdict::High);
        assert_eq!(verdicts[101], Verdict::Low);
    }

    #[test]
    fn isolated_points_are_kept() {
        let positions = vec![(0.0, 0.0, 0.0), (100.0, 100.0, 500.0)];
        let verdicts = detect_outliers(&positions, &OutlierParams::default());
        assert_eq!(verdicts, vec![Verdict::Keep, Verdict::Keep]);
    }

    #[test]
    fn classify_mode_keeps_and_relabels_outliers() {
        let points: Vec<Point> = flat_patch_with_spikes()
            .into_iter()
            .map(|(x, y, z)| Point {
                x,
                y,
                z,
                ..Default::default()
            })
            .collect();
        let params = OutlierParams {
            classify: true,
            ..Default::default()
        };

        let (kept, report) = remove_outliers(points.clone(), &params).unwrap();
        assert_eq!(kept.len(), 102);
        assert_eq!(report.reclassified_points, 2);
        assert_eq!(u8::from(kept[100].classification), HIGH_NOISE);
        assert_eq!(u8::from(kept[101].classification), LOW_NOISE);

        let (kept, report) = remove_outliers(points, &OutlierParams::default()).unwrap();
        assert_eq!(kept.len(), 100);
        assert_eq!(report.removed_points, 2);
    }

    #[test]
    fn class_exclusion_drops_listed_codes() {
        let points: Vec<Point> = [2u8, 7, 6, 18, 0, 2]
            .iter()
            .map(|&c| Point {
                classification: Classification::new(c).unwrap(),
                ..Default::default()
            })
            .collect();

        let (kept, report) = exclude_classes(points, &[0, 7, 18]);
        let codes: Vec<u8> = kept.iter().map(|p| u8::from(p.classification)).collect();
        assert_eq!(codes, vec![2, 6, 2]);
        assert_eq!(report.removed_points, 3);
    }

    #[test]
    fn filter_folder_chains_stages_and_replaces_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("tile.las");
        let mut cloud: Vec<(f64, f64, f64, u8)> = flat_patch_with_spikes()
            .into_iter()
            .map(|(x, y, z)| (x, y, z, 2))
            .collect();
        cloud[0].3 = 6;
        write_test_cloud(&source, &cloud);

        let settings = FilterSettings {
            outliers: OutlierSettings::default(),
            classes: ClassFilterSettings {
                enabled: true,
                exclude: vec![6],
            },
            delete_source: true,
        };
        let reports = filter_folder(tmp.path(), &settings).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].removed_points, 2);
        assert_eq!(reports[1].removed_points, 1);

        let remaining = list_files(tmp.path(), "las").unwrap();
        assert_eq!(remaining, vec![tmp.path().join("tile_rmv_out_rmv_cls.las")]);
        let reader = create_reader(&remaining[0]).unwrap();
        assert_eq!(reader.header().number_of_points(), 99);
    }

    #[test]
    fn kept_sources_are_filtered_once() {
        let tmp = tempfile::tempdir().unwrap();
        let cloud: Vec<(f64, f64, f64, u8)> = flat_patch_with_spikes()
            .into_iter()
            .map(|(x, y, z)| (x, y, z, 2))
            .collect();
        write_test_cloud(&tmp.path().join("tile.las"), &cloud);

        let settings = FilterSettings {
            classes: ClassFilterSettings {
                enabled: true,
                exclude: vec![7, 18],
            },
            delete_source: false,
            ..Default::default()
        };
        let reports = filter_folder(tmp.path(), &settings).unwrap();
        assert_eq!(reports.len(), 2);

        let names: Vec<String> = list_files(tmp.path(), "las")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["tile.las", "tile_rmv_out.las", "tile_rmv_out_rmv_cls.las"]
        );
        assert_eq!(
            current_point_clouds(tmp.path()).unwrap(),
            vec![tmp.path().join("tile_rmv_out_rmv_cls.las")]
        );
    }
}
