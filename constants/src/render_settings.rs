/// Defaults for offline terrain rendering.

pub const DEFAULT_IMAGE_SIZE: u32 = 1600;

/// Supersampling factor used for anti-aliasing.
pub const DEFAULT_SUPERSAMPLE: u32 = 2;

/// Elevations are warped along +z by this fraction of their value.
pub const DEFAULT_WARP_FACTOR: f32 = 0.02;

/// Cells below this elevation are clipped from the mesh.
pub const DEFAULT_CLIP_BELOW: f32 = 0.1;

/// Upper bound on mesh vertices along either grid axis.
pub const DEFAULT_MAX_GRID_DIM: usize = 1024;

pub const ORBIT_FRAMES: usize = 36;
pub const ORBIT_ZOOM: f32 = 1.5;
pub const ORBIT_FRAME_DELAY_MS: u32 = 100;

/// Vertical field of view of perspective views.
pub const FIELD_OF_VIEW_DEG: f32 = 30.0;

/// Key light, upper left of the default isometric camera.
pub const KEY_LIGHT_INTENSITY: f32 = 0.75;
pub const KEY_LIGHT_AZIMUTH_DEG: f32 = 135.0;
pub const KEY_LIGHT_ELEVATION_DEG: f32 = 50.0;

/// Secondary directional light, given as (elevation, azimuth) = (300, -20).
pub const LIGHT_INTENSITY: f32 = 0.7;
pub const LIGHT_AZIMUTH_DEG: f32 = -20.0;
pub const LIGHT_ELEVATION_DEG: f32 = 300.0;

pub const AMBIENT: f32 = 0.25;

/// Bounding box line colour (light grey).
pub const BOX_COLOUR: [u8; 4] = [211, 211, 211, 191];
