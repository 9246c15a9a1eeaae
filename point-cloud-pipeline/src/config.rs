/// Pipeline configuration stored as JSON.
///
/// Every field has a default, so a partial file only needs to name what it
/// changes. Each stage carries a `run` flag that the runner checks in order.
use crate::error::{PipelineError, Result};
use crate::filter::FilterSettings;
use crate::mosaic::ResampleMethod;
use crate::rasterize::{GriddingMethod, GriddingParams};
use crate::render::{RenderSettings, View};
use crate::smooth::SmoothMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One surveyed area and the URLs of its tiles or archives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    pub name: String,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadStage {
    pub run: bool,
    /// Extract point clouds from downloaded ZIP archives.
    pub unzip: bool,
}

impl Default for DownloadStage {
    fn default() -> Self {
        Self {
            run: false,
            unzip: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompressStage {
    pub run: bool,
    pub delete_source: bool,
}

impl Default for DecompressStage {
    fn default() -> Self {
        Self {
            run: true,
            delete_source: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoStage {
    pub run: bool,
}

impl Default for InfoStage {
    fn default() -> Self {
        Self { run: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterStage {
    pub run: bool,
    #[serde(flatten)]
    pub settings: FilterSettings,
}

impl Default for FilterStage {
    fn default() -> Self {
        Self {
            run: true,
            settings: FilterSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterizeStage {
    pub run: bool,
    #[serde(flatten)]
    pub params: GriddingParams,
}

impl Default for RasterizeStage {
    fn default() -> Self {
        Self {
            run: true,
            params: GriddingParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicStage {
    pub run: bool,
    pub method: ResampleMethod,
}

impl Default for MosaicStage {
    fn default() -> Self {
        Self {
            run: true,
            method: ResampleMethod::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothStage {
    pub run: bool,
    pub filter: SmoothMethod,
}

impl Default for SmoothStage {
    fn default() -> Self {
        Self {
            run: true,
            filter: SmoothMethod::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderStage {
    pub run: bool,
    /// Still images to produce, one PNG per view.
    pub views: Vec<View>,
    /// Also write the orbiting GIF.
    pub orbit: bool,
    pub settings: RenderSettings,
}

impl Default for RenderStage {
    fn default() -> Self {
        Self {
            run: true,
            views: vec![View::Isometric, View::Orthographic],
            orbit: true,
            settings: RenderSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent of all area folders.
    pub working_dir: PathBuf,
    pub areas: Vec<AreaConfig>,
    pub download: DownloadStage,
    pub decompress: DecompressStage,
    pub info: InfoStage,
    pub filter: FilterStage,
    pub rasterize: RasterizeStage,
    pub mosaic: MosaicStage,
    pub smooth: SmoothStage,
    pub render: RenderStage,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("data"),
            areas: vec![AreaConfig {
                name: "area".to_string(),
                links: Vec::new(),
            }],
            download: DownloadStage::default(),
            decompress: DecompressStage::default(),
            info: InfoStage::default(),
            filter: FilterStage::default(),
            rasterize: RasterizeStage::default(),
            mosaic: MosaicStage::default(),
            smooth: SmoothStage::default(),
            render: RenderStage::default(),
        }
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::Config(message.into())
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be positive, got {}", name, value)))
    }
}

impl PipelineConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn area(&self, name: &str) -> Option<&AreaConfig> {
        self.areas.iter().find(|a| a.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.areas.is_empty() {
            return Err(invalid("at least one area is required"));
        }
        let mut names = HashSet::new();
        for area in &self.areas {
            let name = area.name.trim();
            if name.is_empty() {
                return Err(invalid("area names must not be empty"));
            }
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(invalid(format!("area name '{}' is not a folder name", name)));
            }
            if !names.insert(name) {
                return Err(invalid(format!("area '{}' is listed twice", name)));
            }
        }

        let outliers = &self.filter.settings.outliers.params;
        positive("filter.outliers.radius", outliers.radius)?;
        if !(outliers.elev_diff.is_finite() && outliers.elev_diff >= 0.0) {
            return Err(invalid("filter.outliers.elev_diff must be zero or positive"));
        }

        let gridding = &self.rasterize.params;
        positive("rasterize.resolution", gridding.resolution)?;
        if gridding.method == GriddingMethod::Surface {
            positive("rasterize.radius", gridding.radius)?;
        }
        if let (Some(min), Some(max)) = (gridding.min_z, gridding.max_z) {
            if min > max {
                return Err(invalid("rasterize.min_z is above rasterize.max_z"));
            }
        }
        if let Some(edge) = gridding.max_triangle_edge_length {
            positive("rasterize.max_triangle_edge_length", edge)?;
        }

        match self.smooth.filter {
            SmoothMethod::Median {
                filter_x, filter_y, ..
            }
            | SmoothMethod::ConservativeSmoothing { filter_x, filter_y } => {
                if filter_x == 0 || filter_y == 0 {
                    return Err(invalid("smooth filter sizes must be at least 1"));
                }
            }
            SmoothMethod::Bilateral {
                sigma_dist,
                sigma_int,
            } => {
                positive("smooth.sigma_dist", sigma_dist)?;
                positive("smooth.sigma_int", sigma_int)?;
            }
        }

        let render = &self.render.settings;
        if render.width == 0 || render.height == 0 || render.supersample == 0 {
            return Err(invalid("render size and supersample must be non-zero"));
        }
        if render.max_grid_dim < 2 {
            return Err(invalid("render.max_grid_dim must be at least 2"));
        }
        if self.render.orbit && render.orbit_frames == 0 {
            return Err(invalid("render.orbit_frames must be non-zero"));
        }
        positive("render.orbit_zoom", render.orbit_zoom as f64)?;

        Ok(())
    }
}
