/// LiDAR file summaries written as JSON reports.
use crate::bounds::PointCloudBounds;
use crate::error::Result;
use crate::laz::{create_reader, geo_keys, point_bar_style};
use constants::class::get_class_name;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct VlrSummary {
    pub user_id: String,
    pub record_id: u16,
    pub description: String,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCount {
    pub code: u8,
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LidarSummary {
    pub file: String,
    pub version: String,
    pub point_format: u8,
    pub compressed: bool,
    pub system_identifier: String,
    pub generating_software: String,
    pub point_count: u64,
    pub bounds: PointCloudBounds,
    /// Planimetric area of the bounding box.
    pub area: f64,
    /// Points per square map unit.
    pub density: f64,
    /// Mean distance between points assuming an even spread.
    pub average_spacing: f64,
    /// Point counts keyed by return number.
    pub returns: BTreeMap<u8, u64>,
    pub classes: Vec<ClassCount>,
    pub vlrs: Vec<VlrSummary>,
    pub has_geo_keys: bool,
}

impl LidarSummary {
    pub fn log(&self) {
        tracing::info!(
            "{}: LAS {} format {}, {} points",
            self.file,
            self.version,
            self.point_format,
            self.point_count
        );
        tracing::info!(
            "  area {:.1} m², density {:.2} pts/m², spacing {:.3} m",
            self.area,
            self.density,
            self.average_spacing
        );
        for class in &self.classes {
            tracing::info!("  class {:>3} {:<24} {}", class.code, class.name, class.count);
        }
    }
}

/// Scan a LAS/LAZ file and collect header facts and point statistics.
pub fn summarize(path: &Path) -> Result<LidarSummary> {
    let mut reader = create_reader(path)?;
    let header = reader.header().clone();

    let pb = ProgressBar::new(header.number_of_points());
    pb.set_style(point_bar_style());
    pb.set_message("Scanning points");

    let mut bounds = PointCloudBounds::new();
    let mut returns = BTreeMap::new();
    let mut class_counts: BTreeMap<u8, u64> = BTreeMap::new();
    let mut point_count = 0u64;
    for point in reader.points() {
        let point = point?;
        bounds.update(point.x, point.y, point.z);
        *returns.entry(point.return_number).or_insert(0) += 1;
        *class_counts.entry(u8::from(point.classification)).or_insert(0) += 1;
        point_count += 1;
        if point_count % 100_000 == 0 {
            pb.set_position(point_count);
        }
    }
    pb.finish_with_message("Scan complete");

    let area = if bounds.is_empty() { 0.0 } else { bounds.area() };
    let density = if area > 0.0 { point_count as f64 / area } else { 0.0 };
    let average_spacing = if density > 0.0 { (1.0 / density).sqrt() } else { 0.0 };

    let version = header.version();
    let format = header.point_format();
    Ok(LidarSummary {
        file: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        version: format!("{}.{}", version.major, version.minor),
        point_format: format.to_u8()?,
        compressed: format.is_compressed,
        system_identifier: header.system_identifier().to_string(),
        generating_software: header.generating_software().to_string(),
        point_count,
        bounds,
        area,
        density,
        average_spacing,
        returns,
        classes: class_counts
            .into_iter()
            .map(|(code, count)| ClassCount {
                code,
                name: get_class_name(code),
                count,
            })
            .collect(),
        vlrs: header
            .vlrs()
            .iter()
            .map(|vlr| VlrSummary {
                user_id: vlr.user_id.clone(),
                record_id: vlr.record_id,
                description: vlr.description.clone(),
                length: vlr.data.len(),
            })
            .collect(),
        has_geo_keys: geo_keys(&header).is_some(),
    })
}

/// Write a summary as pretty JSON.
pub fn write_report(summary: &LidarSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, summary)?;
    tracing::info!("Saved LiDAR report {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laz::tests::write_test_cloud;
    use approx::assert_relative_eq;

    #[test]
    fn summary_counts_classes_and_density() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.las");
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let class = if i == 0 { 7 } else { 2 };
                points.push((i as f64 * 2.0, j as f64 * 2.0, 5.0, class));
            }
        }
        write_test_cloud(&path, &points);

        let summary = summarize(&path).unwrap();
        assert_eq!(summary.point_count, 100);
        assert_eq!(summary.point_format, 1);
        assert!(!summary.compressed);
        assert!(summary.has_geo_keys);
        assert_relative_eq!(summary.area, 18.0 * 18.0, epsilon = 1e-6);
        assert_relative_eq!(summary.density, 100.0 / 324.0, epsilon = 1e-9);
        assert_relative_eq!(summary.average_spacing, 1.8, epsilon = 1e-9);
        assert_eq!(
            summary.classes,
            vec![
                ClassCount {
                    code: 2,
                    name: get_class_name(2),
                    count: 90
                },
                ClassCount {
                    code: 7,
                    name: get_class_name(7),
                    count: 10
                },
            ]
        );
        assert!(summary.vlrs.iter().any(|v| v.user_id == "LASF_Projection"));
    }

    #[test]
    fn report_is_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.las");
        write_test_cloud(&path, &[(0.0, 0.0, 1.0, 2), (1.0, 1.0, 2.0, 2)]);
        let report = tmp.path().join("area/info.json");
        write_report(&summarize(&path).unwrap(), &report).unwrap();

        let value: serde_json::Value =
            serde_json::from_reader(File::open(&report).unwrap()).unwrap();
        assert_eq!(value["point_count"], 2);
        assert_eq!(value["file"], "tile.las");
        assert_eq!(value["classes"][0]["count"], 2);
    }
}
