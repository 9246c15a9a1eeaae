/// Per-area folder structure and the file naming used between stages.
use crate::error::Result;
use constants::folders::{
    CLASS_SUFFIX, FILTER_MARKER, INFO_REPORT, LAS_DIR, LAZ_DIR, MOSAIC_DIR, OUTLIER_SUFFIX,
    RENDER_DIR, TIF_DIR,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Working folders of one processed area (city, survey block, ...).
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub area: String,
    pub root: PathBuf,
}

impl ProjectLayout {
    pub fn new(working_dir: &Path, area: &str) -> Self {
        Self {
            area: area.to_string(),
            root: working_dir.join(area),
        }
    }

    /// Creates all stage folders. Existing folders are left untouched.
    pub fn create(&self) -> Result<()> {
        for dir in [
            self.laz_dir(),
            self.las_dir(),
            self.tif_dir(),
            self.mosaic_dir(),
            self.render_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        tracing::debug!("Created folder structure under {}", self.root.display());
        Ok(())
    }

    pub fn laz_dir(&self) -> PathBuf {
        self.root.join(LAZ_DIR)
    }

    pub fn las_dir(&self) -> PathBuf {
        self.root.join(LAS_DIR)
    }

    pub fn tif_dir(&self) -> PathBuf {
        self.root.join(TIF_DIR)
    }

    pub fn mosaic_dir(&self) -> PathBuf {
        self.root.join(MOSAIC_DIR)
    }

    pub fn render_dir(&self) -> PathBuf {
        self.root.join(RENDER_DIR)
    }

    pub fn info_report(&self) -> PathBuf {
        self.root.join(INFO_REPORT)
    }

    /// Mosaic output, named after the area and resampling method.
    pub fn mosaic_path(&self, method: &str) -> PathBuf {
        self.mosaic_dir()
            .join(format!("{}_mosaic_{}.tif", self.area, method))
    }

    /// Smoothed mosaic output.
    pub fn filtered_mosaic_path(&self, method: &str) -> PathBuf {
        self.mosaic_dir()
            .join(format!("{}_mosaic_{}_filtered.tif", self.area, method))
    }

    pub fn render_path(&self, label: &str, extension: &str) -> PathBuf {
        self.render_dir()
            .join(format!("{}_{}.{}", self.area, label, extension))
    }
}

/// Lists files with the given extension (case-insensitive) in name order.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// LAS files in `dir` without a filtered copy next to them. A kept source
/// `tile.las` is superseded by `tile_rmv_out.las`, which in turn is
/// superseded by `tile_rmv_out_rmv_cls.las`.
pub fn current_point_clouds(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = list_files(dir, "las")?;
    let stems: Vec<String> = files.iter().map(|f| stem_of(f)).collect();
    Ok(files
        .iter()
        .zip(&stems)
        .filter(|(_, stem)| {
            let prefix = format!("{}{}", stem, FILTER_MARKER);
            !stems.iter().any(|s| s.starts_with(&prefix))
        })
        .map(|(file, _)| file.clone())
        .collect())
}

/// `dir/<stem><suffix>.<extension>` for an input file.
pub fn with_suffix(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    input.with_file_name(format!("{}{}.{}", stem_of(input), suffix, extension))
}

pub fn outlier_output(input: &Path) -> PathBuf {
    with_suffix(input, OUTLIER_SUFFIX, "las")
}

pub fn class_output(input: &Path) -> PathBuf {
    with_suffix(input, CLASS_SUFFIX, "las")
}

/// Raster tile for a point cloud, placed in `tif_dir`.
pub fn raster_output(input: &Path, tif_dir: &Path) -> PathBuf {
    tif_dir.join(format!("{}.tif", stem_of(input)))
}
