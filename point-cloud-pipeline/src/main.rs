/// LiDAR processing pipeline entry point
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use point_cloud_pipeline::config::AreaConfig;
use point_cloud_pipeline::info::{summarize, write_report};
use point_cloud_pipeline::render::{RenderSettings, View, render_file};
use point_cloud_pipeline::{Pipeline, PipelineConfig, Stage};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "point-cloud-pipeline")]
#[command(author, version, about = "LiDAR point cloud to elevation raster pipeline", long_about = None)]
struct Cli {
    /// Debug level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline configuration file
    #[arg(short, long, global = true, default_value = "pipeline.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with default settings
    Init {
        /// Parent folder of the area folders
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
        /// Area names, one folder each
        #[arg(short, long)]
        area: Vec<String>,
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Run the configured stages
    Run {
        /// Run only this stage, even if disabled in the configuration
        #[arg(long, value_enum)]
        only: Option<Stage>,
        /// Restrict the run to one area
        #[arg(short, long)]
        area: Option<String>,
    },
    /// Summarise a LAS/LAZ file
    Info {
        input: PathBuf,
        /// Also write the summary as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render an elevation raster to PNG, or to an orbiting GIF for .gif outputs
    Render {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value = "isometric")]
        view: ViewArg,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ViewArg {
    Isometric,
    Ortho,
}

impl From<ViewArg> for View {
    fn from(v: ViewArg) -> Self {
        match v {
            ViewArg::Isometric => View::Isometric,
            ViewArg::Ortho => View::Orthographic,
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match &cli.command {
        Commands::Init {
            working_dir,
            area,
            force,
        } => {
            if cli.config.exists() && !force {
                bail!(
                    "{} already exists, pass --force to overwrite",
                    cli.config.display()
                );
            }
            let mut config = PipelineConfig::default();
            if let Some(dir) = working_dir {
                config.working_dir = dir.clone();
            }
            if !area.is_empty() {
                config.areas = area
                    .iter()
                    .map(|name| AreaConfig {
                        name: name.clone(),
                        links: Vec::new(),
                    })
                    .collect();
            }
            config.validate()?;
            config.save(&cli.config)?;
            tracing::info!("Wrote {}", cli.config.display());
        }
        Commands::Run { only, area } => {
            let pipeline = Pipeline::new(load_config(&cli)?)?;
            let areas: Vec<AreaConfig> = match area {
                Some(name) => vec![
                    pipeline
                        .config()
                        .area(name)
                        .cloned()
                        .with_context(|| format!("Area '{}' is not configured", name))?,
                ],
                None => pipeline.config().areas.clone(),
            };
            match (only, area) {
                (None, None) => pipeline.run()?,
                (Some(stage), _) => {
                    for a in &areas {
                        pipeline.run_stage(a, *stage)?;
                    }
                }
                (None, Some(_)) => {
                    for a in &areas {
                        pipeline.run_area(a)?;
                    }
                }
            }
        }
        Commands::Info { input, output } => {
            let summary = summarize(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            summary.log();
            if let Some(path) = output {
                write_report(&summary, path)?;
            }
        }
        Commands::Render {
            input,
            output,
            view,
            width,
            height,
        } => {
            let mut settings = if cli.config.exists() {
                load_config(&cli)?.render.settings
            } else {
                RenderSettings::default()
            };
            settings.view = (*view).into();
            if let Some(w) = width {
                settings.width = *w;
            }
            if let Some(h) = height {
                settings.height = *h;
            }
            render_file(input, output, &settings)
                .with_context(|| format!("Failed to render {}", input.display()))?;
        }
    }

    Ok(())
}
