/// Error types shared by every pipeline stage.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No {kind} files found in {}", dir.display())]
    EmptyInput { kind: &'static str, dir: PathBuf },

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
