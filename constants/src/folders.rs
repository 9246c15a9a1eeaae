/// Per-area working folders, one per data stage.

/// Raw compressed point clouds.
pub const LAZ_DIR: &str = "laz_files";

/// Decompressed and filtered point clouds.
pub const LAS_DIR: &str = "las_files";

/// Rasterized tiles.
pub const TIF_DIR: &str = "tif_files";

/// Mosaic and filtered mosaic outputs.
pub const MOSAIC_DIR: &str = "mosaic_files";

pub const RENDER_DIR: &str = "renders";

/// Summary report written by the info stage.
pub const INFO_REPORT: &str = "info.json";

/// Suffix appended by outlier removal.
pub const OUTLIER_SUFFIX: &str = "_rmv_out";

/// Suffix appended by class filtering.
pub const CLASS_SUFFIX: &str = "_rmv_cls";

/// Shared prefix of every filter suffix; marks a file as a filtered copy.
pub const FILTER_MARKER: &str = "_rmv_";
