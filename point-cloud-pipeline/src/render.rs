/// Offline terrain rendering of elevation rasters.
///
/// The raster becomes a triangle mesh which is drawn by a small CPU
/// z-buffer rasterizer into PNG stills or an orbiting GIF.
use crate::error::{PipelineError, Result};
use crate::geotiff::read_geotiff;
use crate::raster::Raster;
use constants::render_settings::{
    AMBIENT, BOX_COLOUR, DEFAULT_CLIP_BELOW, DEFAULT_IMAGE_SIZE, DEFAULT_MAX_GRID_DIM,
    DEFAULT_SUPERSAMPLE, DEFAULT_WARP_FACTOR, FIELD_OF_VIEW_DEG, KEY_LIGHT_AZIMUTH_DEG,
    KEY_LIGHT_ELEVATION_DEG, KEY_LIGHT_INTENSITY, LIGHT_AZIMUTH_DEG, LIGHT_ELEVATION_DEG,
    LIGHT_INTENSITY, ORBIT_FRAMES, ORBIT_FRAME_DELAY_MS, ORBIT_ZOOM,
};
use glam::{Mat4, Quat, Vec3};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, RgbaImage};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Rows of the supersampled canvas rasterized by one worker.
const BAND_ROWS: usize = 32;

/// Matplotlib `Blues` colour stops, light to dark.
const BLUES: [[u8; 3]; 9] = [
    [247, 251, 255],
    [222, 235, 247],
    [198, 219, 239],
    [158, 202, 225],
    [107, 174, 214],
    [66, 146, 198],
    [33, 113, 181],
    [8, 81, 156],
    [8, 48, 107],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Perspective camera looking down the (1, 1, 1) diagonal.
    Isometric,
    /// Straight down with an orthographic projection.
    Orthographic,
}

impl View {
    /// Label used in output file names.
    pub fn label(&self) -> &'static str {
        match self {
            View::Isometric => "isometric",
            View::Orthographic => "ortho",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub intensity: f32,
    /// Degrees counter-clockwise from +x.
    pub azimuth_deg: f32,
    /// Degrees above the horizon, negative lights from below.
    pub elevation_deg: f32,
}

impl DirectionalLight {
    /// Unit vector pointing towards the light.
    fn direction(&self) -> Vec3 {
        let az = self.azimuth_deg.to_radians();
        let el = self.elevation_deg.to_radians();
        Vec3::new(el.cos() * az.cos(), el.cos() * az.sin(), el.sin())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Render at this multiple of the output size and downscale.
    pub supersample: u32,
    pub view: View,
    pub warp_factor: f32,
    pub clip_below: f32,
    pub rotate_z_deg: f32,
    pub max_grid_dim: usize,
    pub orbit_frames: usize,
    pub orbit_zoom: f32,
    pub frame_delay_ms: u32,
    pub ambient: f32,
    pub key_light: DirectionalLight,
    pub fill_light: DirectionalLight,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_IMAGE_SIZE,
            height: DEFAULT_IMAGE_SIZE,
            supersample: DEFAULT_SUPERSAMPLE,
            view: View::Isometric,
            warp_factor: DEFAULT_WARP_FACTOR,
            clip_below: DEFAULT_CLIP_BELOW,
            rotate_z_deg: 0.0,
            max_grid_dim: DEFAULT_MAX_GRID_DIM,
            orbit_frames: ORBIT_FRAMES,
            orbit_zoom: ORBIT_ZOOM,
            frame_delay_ms: ORBIT_FRAME_DELAY_MS,
            ambient: AMBIENT,
            key_light: DirectionalLight {
                intensity: KEY_LIGHT_INTENSITY,
                azimuth_deg: KEY_LIGHT_AZIMUTH_DEG,
                elevation_deg: KEY_LIGHT_ELEVATION_DEG,
            },
            fill_light: DirectionalLight {
                intensity: LIGHT_INTENSITY,
                azimuth_deg: LIGHT_AZIMUTH_DEG,
                elevation_deg: LIGHT_ELEVATION_DEG,
            },
        }
    }
}

impl RenderSettings {
    fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

/// Colour of the `Blues` map at `t` in [0, 1].
pub fn blues(t: f32) -> [f32; 3] {
    let pos = t.clamp(0.0, 1.0) * (BLUES.len() - 1) as f32;
    let i = (pos.floor() as usize).min(BLUES.len() - 2);
    let f = pos - i as f32;
    let (lo, hi) = (BLUES[i], BLUES[i + 1]);
    [0, 1, 2].map(|k| (lo[k] as f32 * (1.0 - f) + hi[k] as f32 * f) / 255.0)
}

/// Triangulated surface of a raster in local coordinates (x, y from the
/// raster's south-west corner).
#[derive(Debug, Clone)]
pub struct TerrainMesh {
    pub positions: Vec<Vec3>,
    /// Unwarped elevation of each vertex, drives the colormap.
    pub scalars: Vec<f32>,
    pub triangles: Vec<[u32; 3]>,
}

impl TerrainMesh {
    pub fn from_raster(raster: &Raster, settings: &RenderSettings) -> Result<Self> {
        let step = raster
            .cols
            .max(raster.rows)
            .div_ceil(settings.max_grid_dim.max(1))
            .max(1);
        let grid_cols = raster.cols.div_ceil(step);
        let grid_rows = raster.rows.div_ceil(step);
        let extent = raster.extent();

        let mut index = vec![u32::MAX; grid_cols * grid_rows];
        let mut positions = Vec::new();
        let mut scalars = Vec::new();
        for gr in 0..grid_rows {
            for gc in 0..grid_cols {
                let (col, row) = (gc * step, gr * step);
                let Some(value) = raster.value(col, row) else {
                    continue;
                };
                if value < settings.clip_below {
                    continue;
                }
                let (x, y) = raster.cell_center(col, row);
                index[gr * grid_cols + gc] = positions.len() as u32;
                positions.push(Vec3::new(
                    (x - extent.min_x) as f32,
                    (y - extent.min_y) as f32,
                    value * (1.0 + settings.warp_factor),
                ));
                scalars.push(value);
            }
        }

        let mut triangles = Vec::new();
        for gr in 0..grid_rows.saturating_sub(1) {
            for gc in 0..grid_cols.saturating_sub(1) {
                let a = index[gr * grid_cols + gc];
                let b = index[gr * grid_cols + gc + 1];
                let c = index[(gr + 1) * grid_cols + gc];
                let d = index[(gr + 1) * grid_cols + gc + 1];
                if [a, b, c, d].contains(&u32::MAX) {
                    continue;
                }
                // Rows run south, so these windings face +z.
                triangles.push([a, c, b]);
                triangles.push([b, c, d]);
            }
        }

        if triangles.is_empty() {
            return Err(PipelineError::InvalidRaster(format!(
                "no renderable cells at or above {} in {}x{} grid",
                settings.clip_below, raster.cols, raster.rows
            )));
        }

        let mut mesh = Self {
            positions,
            scalars,
            triangles,
        };
        mesh.rotate_z(settings.rotate_z_deg);
        Ok(mesh)
    }

    /// Axis-aligned bounds (min, max).
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.positions.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(lo, hi), &p| (lo.min(p), hi.max(p)),
        )
    }

    pub fn center(&self) -> Vec3 {
        let (lo, hi) = self.bounds();
        (lo + hi) * 0.5
    }

    /// Length of the bounding box diagonal.
    pub fn diagonal(&self) -> f32 {
        let (lo, hi) = self.bounds();
        (hi - lo).length()
    }

    fn rotate_z(&mut self, degrees: f32) {
        if degrees == 0.0 {
            return;
        }
        let center = self.center();
        let rotation = Quat::from_rotation_z(degrees.to_radians());
        for p in &mut self.positions {
            *p = center + rotation * (*p - center);
        }
    }

    /// Area-weighted vertex normals.
    fn vertex_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in &self.triangles {
            let [a, b, c] = tri.map(|i| self.positions[i as usize]);
            let n = (b - a).cross(c - a);
            for &i in tri {
                normals[i as usize] += n;
            }
        }
        normals
            .into_iter()
            .map(|n| {
                let n = n.normalize_or_zero();
                if n == Vec3::ZERO { Vec3::Z } else { n }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Projection {
    Perspective { fov_y: f32 },
    Orthographic { half_height: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    projection: Projection,
    near: f32,
    far: f32,
}

impl Camera {
    /// Camera framing the whole mesh for a still view.
    pub fn for_view(mesh: &TerrainMesh, view: View, aspect: f32) -> Self {
        let target = mesh.center();
        let radius = (mesh.diagonal() * 0.5).max(1e-3);
        match view {
            View::Isometric => {
                let fov_y = FIELD_OF_VIEW_DEG.to_radians();
                let distance = fit_distance(radius, fov_y, aspect);
                Self::looking_at(
                    target + Vec3::ONE.normalize() * distance,
                    target,
                    Vec3::Z,
                    Projection::Perspective { fov_y },
                    radius,
                )
            }
            View::Orthographic => {
                let (lo, hi) = mesh.bounds();
                let half = (hi - lo) * 0.5;
                let half_height = half.y.max(half.x / aspect).max(1e-3) * 1.1;
                Self::looking_at(
                    target + Vec3::Z * (2.0 * radius),
                    target,
                    Vec3::Y,
                    Projection::Orthographic { half_height },
                    radius,
                )
            }
        }
    }

    /// Frame `frame` of `frames` on a circle around the mesh, raised by one
    /// mesh diagonal and zoomed in by `zoom`.
    pub fn orbit(mesh: &TerrainMesh, frame: usize, frames: usize, zoom: f32, aspect: f32) -> Self {
        let target = mesh.center();
        let radius = (mesh.diagonal() * 0.5).max(1e-3);
        let base_fov = FIELD_OF_VIEW_DEG.to_radians();
        let horizontal = fit_distance(radius, base_fov, aspect);
        let angle = std::f32::consts::TAU * frame as f32 / frames.max(1) as f32
            + std::f32::consts::FRAC_PI_4;
        let eye = target
            + Vec3::new(
                horizontal * angle.cos(),
                horizontal * angle.sin(),
                2.0 * radius,
            );
        Self::looking_at(
            eye,
            target,
            Vec3::Z,
            Projection::Perspective {
                fov_y: base_fov / zoom.max(1e-3),
            },
            radius,
        )
    }

    fn looking_at(eye: Vec3, target: Vec3, up: Vec3, projection: Projection, radius: f32) -> Self {
        let distance = (eye - target).length();
        Self {
            eye,
            target,
            up,
            projection,
            near: (distance - radius * 1.5).max(distance * 1e-3),
            far: distance + radius * 1.5,
        }
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(self.eye, self.target, self.up);
        let projection = match self.projection {
            Projection::Perspective { fov_y } => {
                Mat4::perspective_rh(fov_y, aspect, self.near, self.far)
            }
            Projection::Orthographic { half_height } => {
                let half_width = half_height * aspect;
                Mat4::orthographic_rh(
                    -half_width,
                    half_width,
                    -half_height,
                    half_height,
                    self.near,
                    self.far,
                )
            }
        };
        projection * view
    }
}

/// Distance at which a sphere of `radius` fits both field-of-view axes.
fn fit_distance(radius: f32, fov_y: f32, aspect: f32) -> f32 {
    let fov_x = 2.0 * ((fov_y * 0.5).tan() * aspect).atan();
    let fov = fov_y.min(fov_x);
    radius / (fov * 0.5).sin() * 1.05
}

/// Supersampled colour and depth buffers for one band of rows.
struct Band<'a> {
    width: usize,
    first_row: usize,
    rgba: &'a mut [[f32; 4]],
    depth: &'a mut [f32],
}

impl Band<'_> {
    fn rows(&self) -> usize {
        self.depth.len() / self.width
    }

    fn fill_triangle(&mut self, v: [Vec3; 3], colours: [[f32; 3]; 3]) {
        let [a, b, c] = v;
        let area = edge(a, b, c);
        if area.abs() < 1e-12 {
            return;
        }

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0);
        let max_x = a.x.max(b.x).max(c.x).ceil().min(self.width as f32 - 1.0);
        let band_top = self.first_row as f32;
        let band_bottom = (self.first_row + self.rows()) as f32 - 1.0;
        let min_y = a.y.min(b.y).min(c.y).floor().max(band_top);
        let max_y = a.y.max(b.y).max(c.y).ceil().min(band_bottom);
        if min_x > max_x || min_y > max_y {
            return;
        }

        for py in min_y as usize..=max_y as usize {
            for px in min_x as usize..=max_x as usize {
                let p = Vec3::new(px as f32 + 0.5, py as f32 + 0.5, 0.0);
                let w0 = edge(b, c, p) / area;
                let w1 = edge(c, a, p) / area;
                let w2 = edge(a, b, p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                let idx = (py - self.first_row) * self.width + px;
                if z < self.depth[idx] {
                    self.depth[idx] = z;
                    let rgb = [0, 1, 2]
                        .map(|k| w0 * colours[0][k] + w1 * colours[1][k] + w2 * colours[2][k]);
                    self.rgba[idx] = [rgb[0], rgb[1], rgb[2], 1.0];
                }
            }
        }
    }

    /// Depth-tested line blended over the surface, `thickness` pixels wide.
    fn draw_line(&mut self, p: Vec3, q: Vec3, colour: [f32; 4], thickness: usize) {
        let steps = (q.x - p.x).abs().max((q.y - p.y).abs()).ceil().max(1.0) as usize;
        let offset = (thickness / 2) as isize;
        let alpha = colour[3];
        for i in 0..=steps {
            let s = p.lerp(q, i as f32 / steps as f32);
            for dy in 0..thickness as isize {
                for dx in 0..thickness as isize {
                    let x = s.x.floor() as isize + dx - offset;
                    let y = s.y.floor() as isize + dy - offset - self.first_row as isize;
                    if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.rows() {
                        continue;
                    }
                    let idx = y as usize * self.width + x as usize;
                    if s.z > self.depth[idx] + 1e-4 {
                        continue;
                    }
                    let dst = self.rgba[idx];
                    self.rgba[idx] = [
                        colour[0] * alpha + dst[0] * (1.0 - alpha),
                        colour[1] * alpha + dst[1] * (1.0 - alpha),
                        colour[2] * alpha + dst[2] * (1.0 - alpha),
                        alpha + dst[3] * (1.0 - alpha),
                    ];
                }
            }
        }
    }
}

#[inline]
fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Draws a mesh with pre-shaded vertex colours from any camera.
pub struct Renderer<'a> {
    mesh: &'a TerrainMesh,
    settings: &'a RenderSettings,
    colours: Vec<[f32; 3]>,
    box_edges: Vec<(Vec3, Vec3)>,
}

impl<'a> Renderer<'a> {
    /// Lights are fixed in world space, so shading happens once per mesh.
    pub fn new(mesh: &'a TerrainMesh, settings: &'a RenderSettings) -> Self {
        let normals = mesh.vertex_normals();
        let (lo, hi) = mesh
            .scalars
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
                (lo.min(s), hi.max(s))
            });
        let key = (settings.key_light.intensity, settings.key_light.direction());
        let fill = (settings.fill_light.intensity, settings.fill_light.direction());

        let colours = mesh
            .scalars
            .par_iter()
            .zip(normals.par_iter())
            .map(|(&s, &n)| {
                let t = if hi > lo { (s - lo) / (hi - lo) } else { 0.5 };
                // Two-sided Lambert terms.
                let light =
                    settings.ambient + key.0 * n.dot(key.1).abs() + fill.0 * n.dot(fill.1).abs();
                blues(t).map(|c| (c * light).min(1.0))
            })
            .collect();

        Self {
            mesh,
            settings,
            colours,
            box_edges: box_edges(mesh.bounds()),
        }
    }

    pub fn still(&self) -> RgbaImage {
        let camera = Camera::for_view(self.mesh, self.settings.view, self.settings.aspect());
        self.render(&camera)
    }

    /// Render one image from `camera`.
    pub fn render(&self, camera: &Camera) -> RgbaImage {
        let ss = self.settings.supersample.max(1) as usize;
        let width = self.settings.width.max(1) as usize * ss;
        let height = self.settings.height.max(1) as usize * ss;
        let vp = camera.view_projection(self.settings.aspect());

        let project = |p: Vec3| -> Option<Vec3> {
            let clip = vp * p.extend(1.0);
            if clip.w <= 1e-6 {
                return None;
            }
            let ndc = clip.truncate() / clip.w;
            Some(Vec3::new(
                (ndc.x + 1.0) * 0.5 * width as f32,
                (1.0 - ndc.y) * 0.5 * height as f32,
                ndc.z,
            ))
        };
        let screen: Vec<Option<Vec3>> = self.mesh.positions.par_iter().map(|&p| project(p)).collect();
        let lines: Vec<(Vec3, Vec3)> = self
            .box_edges
            .iter()
            .filter_map(|&(p, q)| Some((project(p)?, project(q)?)))
            .collect();
        let box_colour = [
            BOX_COLOUR[0] as f32 / 255.0,
            BOX_COLOUR[1] as f32 / 255.0,
            BOX_COLOUR[2] as f32 / 255.0,
            BOX_COLOUR[3] as f32 / 255.0,
        ];

        let mut rgba = vec![[0.0f32; 4]; width * height];
        let mut depth = vec![f32::INFINITY; width * height];
        rgba.par_chunks_mut(width * BAND_ROWS)
            .zip(depth.par_chunks_mut(width * BAND_ROWS))
            .enumerate()
            .for_each(|(band, (rgba, depth))| {
                let mut band = Band {
                    width,
                    first_row: band * BAND_ROWS,
                    rgba,
                    depth,
                };
                for tri in &self.mesh.triangles {
                    let [Some(a), Some(b), Some(c)] = tri.map(|i| screen[i as usize]) else {
                        continue;
                    };
                    if a.z.min(b.z).min(c.z) < 0.0 || a.z.max(b.z).max(c.z) > 1.0 {
                        continue;
                    }
                    let colours = tri.map(|i| self.colours[i as usize]);
                    band.fill_triangle([a, b, c], colours);
                }
                for &(p, q) in &lines {
                    band.draw_line(p, q, box_colour, ss);
                }
            });

        downsample(&rgba, width, height, ss)
    }

    /// Render the orbit and stream it into a looping GIF.
    pub fn write_orbit(&self, path: &Path) -> Result<()> {
        let frames = self.settings.orbit_frames.max(1);
        let file = BufWriter::new(File::create(path)?);
        let mut encoder = GifEncoder::new_with_speed(file, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        let delay = Delay::from_numer_denom_ms(self.settings.frame_delay_ms, 1);

        let pb = ProgressBar::new(frames as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("▉▊▋▌▍▎▏ "),
        );
        for frame in 0..frames {
            let camera = Camera::orbit(
                self.mesh,
                frame,
                frames,
                self.settings.orbit_zoom,
                self.settings.aspect(),
            );
            encoder.encode_frame(Frame::from_parts(self.render(&camera), 0, 0, delay))?;
            pb.inc(1);
        }
        pb.finish_with_message("orbit complete");
        Ok(())
    }
}

/// The twelve edges of an axis-aligned box.
fn box_edges((lo, hi): (Vec3, Vec3)) -> Vec<(Vec3, Vec3)> {
    let corner = |i: usize| {
        Vec3::new(
            if i & 1 == 0 { lo.x } else { hi.x },
            if i & 2 == 0 { lo.y } else { hi.y },
            if i & 4 == 0 { lo.z } else { hi.z },
        )
    };
    let mut edges = Vec::with_capacity(12);
    for i in 0..8 {
        for bit in [1, 2, 4] {
            if i & bit == 0 {
                edges.push((corner(i), corner(i | bit)));
            }
        }
    }
    edges
}

/// Box-filter the premultiplied supersampled buffer into the output image.
fn downsample(rgba: &[[f32; 4]], width: usize, height: usize, ss: usize) -> RgbaImage {
    let (out_w, out_h) = (width / ss, height / ss);
    let mut image = RgbaImage::new(out_w as u32, out_h as u32);
    let samples = (ss * ss) as f32;
    let buffer: &mut [u8] = &mut image;
    buffer
        .par_chunks_mut(out_w * 4)
        .enumerate()
        .for_each(|(oy, row)| {
            for ox in 0..out_w {
                let mut sum = [0.0f32; 4];
                for sy in 0..ss {
                    for sx in 0..ss {
                        let px = rgba[(oy * ss + sy) * width + ox * ss + sx];
                        for k in 0..4 {
                            sum[k] += px[k];
                        }
                    }
                }
                let alpha = sum[3] / samples;
                let out = &mut row[ox * 4..ox * 4 + 4];
                if alpha > 0.0 {
                    for k in 0..3 {
                        out[k] = ((sum[k] / samples / alpha).clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                }
                out[3] = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        });
    image
}

/// Render a raster file. A `.gif` output gets the orbit, anything else a PNG
/// still of `settings.view`.
pub fn render_file(input: &Path, output: &Path, settings: &RenderSettings) -> Result<()> {
    let raster = read_geotiff(input)?;
    let mesh = TerrainMesh::from_raster(&raster, settings)?;
    tracing::info!(
        "Rendering {} ({} vertices, {} triangles)",
        input.display(),
        mesh.positions.len(),
        mesh.triangles.len()
    );

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let renderer = Renderer::new(&mesh, settings);
    let is_gif = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"));
    if is_gif {
        renderer.write_orbit(output)?;
    } else {
        renderer.still().save_with_format(output, ImageFormat::Png)?;
    }

    tracing::info!("Saved {}", output.display());
    Ok(())
}
