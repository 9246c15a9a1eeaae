/// Raster grid defaults shared by gridding, mosaic and smoothing.

/// Nodata value written into every generated raster.
pub const NODATA: f32 = -32768.0;

/// Default grid resolution in map units.
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Default DSM search radius in map units.
pub const DEFAULT_SEARCH_RADIUS: f64 = 0.8;

/// Default outlier search radius in map units.
pub const DEFAULT_OUTLIER_RADIUS: f64 = 4.0;

/// Default maximum elevation difference before a point counts as an outlier.
pub const DEFAULT_ELEV_DIFF: f64 = 15.0;

/// Median filter window used on the mosaic.
pub const DEFAULT_MEDIAN_WINDOW: usize = 9;

/// Decimal places kept before taking the median.
pub const DEFAULT_SIG_DIGITS: u32 = 2;
