//! Draws the DisWorld map: a base image with one marker per user.

pub mod projection;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use tracing::info;

use disworld_types::models::{Coordinate, UserId};

use crate::projection::Equirectangular;

/// Locations keyed by user. Ordered so rendering never depends on hash order.
pub type Locations = BTreeMap<UserId, Coordinate>;

const OCEAN: Rgba<u8> = Rgba([170, 205, 235, 255]);
const GRATICULE: Rgba<u8> = Rgba([200, 222, 242, 255]);
const EQUATOR: Rgba<u8> = Rgba([130, 170, 210, 255]);
const MARKER_FILL: Rgba<u8> = Rgba([220, 40, 40, 255]);
const MARKER_OUTLINE: Rgba<u8> = Rgba([60, 10, 10, 255]);

/// Degrees between graticule lines on the generated base map.
const GRATICULE_STEP: i32 = 30;

pub struct MapRenderer {
    base: RgbaImage,
    projection: Equirectangular,
    marker_radius: u32,
}

impl MapRenderer {
    /// Use a plain generated base map (ocean fill + graticule).
    pub fn generated(width: u32, height: u32) -> Self {
        Self::with_base(generate_base(width, height))
    }

    /// Load an equirectangular world image from disk as the base map.
    pub fn from_file(path: &Path) -> Result<Self> {
        let base = image::open(path)
            .with_context(|| format!("failed to load base map {}", path.display()))?
            .to_rgba8();
        info!(
            "Loaded base map {} ({}x{})",
            path.display(),
            base.width(),
            base.height()
        );
        Ok(Self::with_base(base))
    }

    fn with_base(base: RgbaImage) -> Self {
        let projection = Equirectangular::new(base.width(), base.height());
        let marker_radius = (base.width() / 200).max(4);
        Self {
            base,
            projection,
            marker_radius,
        }
    }

    /// Render the map with one marker per user and encode it as PNG.
    pub fn render(&self, locations: &Locations) -> Result<Vec<u8>> {
        let mut canvas = self.base.clone();
        for coord in locations.values() {
            let (x, y) = self.projection.project(coord.latitude, coord.longitude);
            draw_marker(&mut canvas, x, y, self.marker_radius);
        }
        encode_png(&canvas)
    }

    /// The base map with no markers.
    pub fn render_base(&self) -> Result<Vec<u8>> {
        self.render(&Locations::new())
    }
}

fn generate_base(width: u32, height: u32) -> RgbaImage {
    let projection = Equirectangular::new(width, height);
    let mut img = RgbaImage::from_pixel(width, height, OCEAN);

    for lon in (-180..=180).step_by(GRATICULE_STEP as usize) {
        let x = projection.longitude_to_x(lon as f64);
        for y in 0..height {
            img.put_pixel(x, y, GRATICULE);
        }
    }
    for lat in (-90..=90).step_by(GRATICULE_STEP as usize) {
        let y = projection.latitude_to_y(lat as f64);
        let color = if lat == 0 { EQUATOR } else { GRATICULE };
        for x in 0..width {
            img.put_pixel(x, y, color);
        }
    }

    img
}

/// Filled disc with a one-pixel outline, clipped to the canvas.
fn draw_marker(img: &mut RgbaImage, cx: u32, cy: u32, radius: u32) {
    let r = radius as i64;
    let outer = r * r;
    let inner = (r - 1) * (r - 1);
    let (w, h) = (img.width() as i64, img.height() as i64);

    for dy in -r..=r {
        for dx in -r..=r {
            let d = dx * dx + dy * dy;
            if d > outer {
                continue;
            }
            let (x, y) = (cx as i64 + dx, cy as i64 + dy);
            if x < 0 || y < 0 || x >= w || y >= h {
                continue;
            }
            let color = if d > inner { MARKER_OUTLINE } else { MARKER_FILL };
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .context("failed to encode map as PNG")?;
    Ok(buf)
}
