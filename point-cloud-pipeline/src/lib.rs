/// LiDAR point cloud processing: download, decompress, filter, grid, mosaic, smooth and render.
pub mod bounds;
pub mod config;
pub mod delaunay;
pub mod download;
pub mod error;
pub mod filter;
pub mod geotiff;
pub mod info;
pub mod layout;
pub mod laz;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod rasterize;
pub mod render;
pub mod smooth;
pub mod spatial_index;
pub mod stats;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, Stage};
