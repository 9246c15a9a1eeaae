use crate::error::Result;
use crate::geotiff::GeoKeys;
use crate::layout::list_files;
use indicatif::{ProgressBar, ProgressStyle};
use las::{Builder, Header, Point, Reader, Writer};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// VLR user id carrying GeoTIFF keys inside LAS files.
const PROJECTION_USER_ID: &str = "LASF_Projection";
const LASZIP_USER_ID: &str = "laszip encoded";

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> Result<Reader> {
    let file = File::open(file_path)?;
    let buf_reader = BufReader::new(file);
    Ok(Reader::new(buf_reader)?)
}

/// Header for an uncompressed copy of `source`, keeping format, transforms and VLRs.
pub fn uncompressed_header(source: &Header) -> Result<Header> {
    let mut builder = Builder::from(source.clone());
    builder.point_format.is_compressed = false;
    builder.vlrs.retain(|vlr| vlr.user_id != LASZIP_USER_ID);
    Ok(builder.into_header()?)
}

/// Load every point of a file with progress tracking.
pub fn read_points(file_path: &Path) -> Result<(Header, Vec<Point>)> {
    let mut reader = create_reader(file_path)?;
    let header = reader.header().clone();
    let total_points = header.number_of_points();

    let pb = ProgressBar::new(total_points);
    pb.set_style(point_bar_style());
    pb.set_message("Loading points");

    let mut points = Vec::with_capacity(total_points as usize);
    for (idx, point_result) in reader.points().enumerate() {
        points.push(point_result?);

        if idx % 50_000 == 0 {
            pb.set_position(idx as u64);
        }
    }
    pb.finish_with_message("Points loaded");

    Ok((header, points))
}

/// Write points as an uncompressed LAS file using the source file's header layout.
pub fn write_points(path: &Path, source: &Header, points: &[Point]) -> Result<()> {
    let header = uncompressed_header(source)?;
    let mut writer = Writer::from_path(path, header)?;
    for point in points {
        writer.write_point(point.clone())?;
    }
    writer.close()?;
    Ok(())
}

/// GeoTIFF keys stored in the LAS projection VLRs, if any.
pub fn geo_keys(header: &Header) -> Option<GeoKeys> {
    let vlr_data = |record_id: u16| {
        header
            .vlrs()
            .iter()
            .find(|vlr| vlr.user_id == PROJECTION_USER_ID && vlr.record_id == record_id)
            .map(|vlr| vlr.data.as_slice())
    };

    let directory = vlr_data(34735)?;
    let key_directory = directory
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect::<Vec<_>>();
    if key_directory.len() < 4 {
        return None;
    }

    let double_params = vlr_data(34736)
        .map(|data| {
            data.chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect()
        })
        .unwrap_or_default();
    let ascii_params = vlr_data(34737)
        .map(|data| {
            String::from_utf8_lossy(data)
                .trim_end_matches('\0')
                .to_string()
        })
        .unwrap_or_default();

    Some(GeoKeys {
        key_directory,
        double_params,
        ascii_params,
    })
}

/// Decompress every `.laz` in `laz_dir` into `.las` files in `las_dir`.
pub fn decompress_folder(laz_dir: &Path, las_dir: &Path, delete_source: bool) -> Result<Vec<PathBuf>> {
    let files = list_files(laz_dir, "laz")?;
    if files.is_empty() {
        tracing::warn!("No .laz files in {}", laz_dir.display());
        return Ok(Vec::new());
    }
    fs::create_dir_all(las_dir)?;

    let mut written = Vec::with_capacity(files.len());
    for (idx, file) in files.iter().enumerate() {
        tracing::info!("{} \t{} - reading .LAZ", idx, file.display());
        let output = las_dir.join(format!(
            "{}.las",
            file.file_stem().unwrap_or_default().to_string_lossy()
        ));
        decompress_file(file, &output)?;
        tracing::info!("Saved {}", output.display());

        if delete_source {
            fs::remove_file(file)?;
            tracing::info!("Deleted {}", file.display());
        }
        written.push(output);
    }

    Ok(written)
}

/// Convert one compressed point cloud into an uncompressed LAS file.
pub fn decompress_file(input: &Path, output: &Path) -> Result<u64> {
    let mut reader = create_reader(input)?;
    let header = uncompressed_header(reader.header())?;
    let mut writer = Writer::from_path(output, header)?;

    let mut count = 0u64;
    for point_result in reader.points() {
        writer.write_point(point_result?)?;
        count += 1;
    }
    writer.close()?;

    tracing::debug!("Decompressed {} points", count);
    Ok(count)
}

pub(crate) fn point_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {pos}/{len} points ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("▉▊▋▌▍▎▏ ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use las::point::{Classification, Format};
    use las::{Transform, Vector, Vlr};

    /// Write a small LAS file, optionally compressed when the path ends in `.laz`.
    pub(crate) fn write_test_cloud(path: &Path, points: &[(f64, f64, f64, u8)]) {
        let mut builder = Builder::from((1, 2));
        builder.point_format = Format::new(1).unwrap();
        builder.transforms = Vector {
            x: Transform { scale: 0.001, offset: 0.0 },
            y: Transform { scale: 0.001, offset: 0.0 },
            z: Transform { scale: 0.001, offset: 0.0 },
        };
        builder.vlrs.push(Vlr {
            user_id: PROJECTION_USER_ID.to_string(),
            record_id: 34735,
            description: "GeoKeyDirectoryTag".to_string(),
            data: [1u16, 1, 0, 1, 3072, 0, 1, 26917]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        });
        let header = builder.into_header().unwrap();
        let mut writer = Writer::from_path(path, header).unwrap();
        for &(x, y, z, class) in points {
            writer
                .write_point(Point {
                    x,
                    y,
                    z,
                    classification: Classification::new(class).unwrap(),
                    gps_time: Some(0.0),
                    ..Default::default()
                })
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn read_points_returns_header_and_points() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.las");
        write_test_cloud(&path, &[(1.0, 2.0, 3.0, 2), (4.0, 5.0, 6.0, 6)]);

        let (header, points) = read_points(&path).unwrap();
        assert_eq!(header.number_of_points(), 2);
        assert_eq!(points.len(), 2);
        assert!((points[1].z - 6.0).abs() < 1e-6);
        assert_eq!(u8::from(points[1].classification), 6);
    }

    #[test]
    fn geo_keys_are_read_from_projection_vlr() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.las");
        write_test_cloud(&path, &[(0.0, 0.0, 0.0, 2)]);

        let reader = create_reader(&path).unwrap();
        let keys = geo_keys(reader.header()).unwrap();
        assert_eq!(keys.key_directory, vec![1, 1, 0, 1, 3072, 0, 1, 26917]);
        assert!(keys.double_params.is_empty());
    }

    #[test]
    fn decompress_folder_converts_and_removes_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let laz_dir = tmp.path().join("laz_files");
        let las_dir = tmp.path().join("las_files");
        fs::create_dir_all(&laz_dir).unwrap();
        let source = laz_dir.join("block.laz");
        write_test_cloud(&source, &[(1.0, 1.0, 1.0, 2), (2.0, 2.0, 2.0, 2), (3.0, 3.0, 3.0, 5)]);

        let written = decompress_folder(&laz_dir, &las_dir, true).unwrap();
        assert_eq!(written, vec![las_dir.join("block.las")]);
        assert!(!source.exists());

        let reader = create_reader(&written[0]).unwrap();
        assert!(!reader.header().point_format().is_compressed);
        assert_eq!(reader.header().number_of_points(), 3);
    }

    #[test]
    fn decompress_folder_can_keep_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let laz_dir = tmp.path().join("laz_files");
        let las_dir = tmp.path().join("las_files");
        fs::create_dir_all(&laz_dir).unwrap();
        let source = laz_dir.join("block.laz");
        write_test_cloud(&source, &[(1.0, 1.0, 1.0, 2), (2.0, 2.0, 2.0, 2)]);

        let written = decompress_folder(&laz_dir, &las_dir, false).unwrap();
        assert_eq!(written, vec![las_dir.join("block.las")]);
        assert!(source.exists());
        assert_eq!(create_reader(&source).unwrap().header().number_of_points(), 2);
        assert_eq!(create_reader(&written[0]).unwrap().header().number_of_points(), 2);
    }
}
