/// Stage runner driving every configured area through the processing chain.
use crate::config::{AreaConfig, PipelineConfig};
use crate::download::download_archives;
use crate::error::{PipelineError, Result};
use crate::filter::filter_folder;
use crate::info::{summarize, write_report};
use crate::layout::{ProjectLayout, list_files};
use crate::laz::decompress_folder;
use crate::mosaic::mosaic_folder;
use crate::rasterize::rasterize_folder;
use crate::render::{RenderSettings, render_file};
use crate::smooth::smooth_file;
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Stage {
    Download,
    Decompress,
    Info,
    Filter,
    Rasterize,
    Mosaic,
    Smooth,
    Render,
}

impl Stage {
    /// Processing order.
    pub const ALL: [Stage; 8] = [
        Stage::Download,
        Stage::Decompress,
        Stage::Info,
        Stage::Filter,
        Stage::Rasterize,
        Stage::Mosaic,
        Stage::Smooth,
        Stage::Render,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Decompress => "decompress",
            Stage::Info => "info",
            Stage::Filter => "filter",
            Stage::Rasterize => "rasterize",
            Stage::Mosaic => "mosaic",
            Stage::Smooth => "smooth",
            Stage::Render => "render",
        }
    }

    /// What to do by hand when the stage is switched off.
    pub fn manual_hint(&self) -> &'static str {
        match self {
            Stage::Download => "Download LiDAR files manually (and unzip, if needed)",
            Stage::Decompress => "Decompress compressed LiDAR files manually",
            Stage::Info => "Inspect LiDAR files manually",
            Stage::Filter => "Filter LiDAR files manually",
            Stage::Rasterize => "Rasterize LiDAR files manually",
            Stage::Mosaic => "Mosaic rasterized LiDAR files manually",
            Stage::Smooth => "Filter mosaic file(s) manually (if needed)",
            Stage::Render => "Render the mosaic manually",
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self, area: &AreaConfig) -> ProjectLayout {
        ProjectLayout::new(&self.config.working_dir, area.name.trim())
    }

    fn enabled(&self, stage: Stage) -> bool {
        let c = &self.config;
        match stage {
            Stage::Download => c.download.run,
            Stage::Decompress => c.decompress.run,
            Stage::Info => c.info.run,
            Stage::Filter => c.filter.run,
            Stage::Rasterize => c.rasterize.run,
            Stage::Mosaic => c.mosaic.run,
            Stage::Smooth => c.smooth.run,
            Stage::Render => c.render.run,
        }
    }

    /// Run every enabled stage for every area.
    pub fn run(&self) -> Result<()> {
        let started = Instant::now();
        for area in &self.config.areas {
            self.run_area(area)?;
        }
        tracing::info!(
            "Pipeline finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Run the enabled stages for one area.
    pub fn run_area(&self, area: &AreaConfig) -> Result<()> {
        tracing::info!("=== {} ===", area.name);
        for stage in Stage::ALL {
            if self.enabled(stage) {
                self.run_stage(area, stage)?;
            } else {
                tracing::info!("\t{}", stage.manual_hint());
            }
        }
        Ok(())
    }

    /// Run one stage for an area, whether or not it is enabled.
    pub fn run_stage(&self, area: &AreaConfig, stage: Stage) -> Result<()> {
        let layout = self.layout(area);
        layout.create()?;

        let started = Instant::now();
        tracing::info!("[{}] {} started", area.name, stage.name());
        match stage {
            Stage::Download => self.download(area, &layout)?,
            Stage::Decompress => self.decompress(&layout)?,
            Stage::Info => self.info(&layout)?,
            Stage::Filter => self.filter(&layout)?,
            Stage::Rasterize => self.rasterize(&layout)?,
            Stage::Mosaic => self.mosaic(&layout)?,
            Stage::Smooth => self.smooth(&layout)?,
            Stage::Render => self.render(&layout)?,
        }
        tracing::info!(
            "[{}] {} finished in {:.2}s",
            area.name,
            stage.name(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn download(&self, area: &AreaConfig, layout: &ProjectLayout) -> Result<()> {
        let files = download_archives(&area.links, layout, self.config.download.unzip)?;
        tracing::info!("{} point cloud files available", files.len());
        Ok(())
    }

    fn decompress(&self, layout: &ProjectLayout) -> Result<()> {
        decompress_folder(
            &layout.laz_dir(),
            &layout.las_dir(),
            self.config.decompress.delete_source,
        )?;
        Ok(())
    }

    fn info(&self, layout: &ProjectLayout) -> Result<()> {
        let first = list_files(&layout.las_dir(), "las")?
            .into_iter()
            .chain(list_files(&layout.laz_dir(), "laz")?)
            .next();
        let Some(path) = first else {
            tracing::warn!("No point cloud files to summarise for {}", layout.area);
            return Ok(());
        };
        let summary = summarize(&path)?;
        summary.log();
        write_report(&summary, &layout.info_report())
    }

    fn filter(&self, layout: &ProjectLayout) -> Result<()> {
        if list_files(&layout.las_dir(), "las")?.is_empty() {
            tracing::warn!("No .las files in {}", layout.las_dir().display());
            return Ok(());
        }
        let reports = filter_folder(&layout.las_dir(), &self.config.filter.settings)?;
        let removed: usize = reports.iter().map(|r| r.removed_points).sum();
        tracing::info!("Filtered {} files, {} points removed", reports.len(), removed);
        Ok(())
    }

    fn rasterize(&self, layout: &ProjectLayout) -> Result<()> {
        let written = rasterize_folder(
            &layout.las_dir(),
            &layout.tif_dir(),
            &self.config.rasterize.params,
        )?;
        tracing::info!("{} rasters written", written.len());
        Ok(())
    }

    fn mosaic_output(&self, layout: &ProjectLayout) -> PathBuf {
        layout.mosaic_path(self.config.mosaic.method.as_str())
    }

    fn mosaic(&self, layout: &ProjectLayout) -> Result<()> {
        mosaic_folder(
            &layout.tif_dir(),
            &self.mosaic_output(layout),
            self.config.mosaic.method,
        )?;
        Ok(())
    }

    fn smooth(&self, layout: &ProjectLayout) -> Result<()> {
        let input = self.mosaic_output(layout);
        if !input.is_file() {
            tracing::warn!("No mosaic at {} to smooth", input.display());
            return Ok(());
        }
        let output = layout.filtered_mosaic_path(self.config.mosaic.method.as_str());
        smooth_file(&input, &output, &self.config.smooth.filter)?;
        Ok(())
    }

    /// Render the smoothed mosaic, or the raw mosaic when smoothing was skipped.
    fn render(&self, layout: &ProjectLayout) -> Result<()> {
        let method = self.config.mosaic.method.as_str();
        let input = [layout.filtered_mosaic_path(method), layout.mosaic_path(method)]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| PipelineError::EmptyInput {
                kind: "mosaic",
                dir: layout.mosaic_dir(),
            })?;

        let stage = &self.config.render;
        for &view in &stage.views {
            let settings = RenderSettings {
                view,
                ..stage.settings.clone()
            };
            render_file(&input, &layout.render_path(view.label(), "png"), &settings)?;
        }
        if stage.orbit {
            render_file(&input, &layout.render_path("orbit", "gif"), &stage.settings)?;
        }
        Ok(())
    }
}
