pub mod class;
pub mod folders;
pub mod raster;
pub mod render_settings;
