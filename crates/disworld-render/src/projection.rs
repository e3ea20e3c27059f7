/// Equirectangular (plate carrée) projection onto a `width` x `height` canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equirectangular {
    width: u32,
    height: u32,
}

impl Equirectangular {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel position for a coordinate, clamped to the canvas.
    pub fn project(&self, latitude: f64, longitude: f64) -> (u32, u32) {
        let x = (longitude + 180.0) / 360.0 * self.width as f64;
        let y = (90.0 - latitude) / 180.0 * self.height as f64;
        (
            clamp_axis(x, self.width),
            clamp_axis(y, self.height),
        )
    }

    pub fn longitude_to_x(&self, longitude: f64) -> u32 {
        self.project(0.0, longitude).0
    }

    pub fn latitude_to_y(&self, latitude: f64) -> u32 {
        self.project(latitude, 0.0).1
    }
}

fn clamp_axis(v: f64, size: u32) -> u32 {
    if size == 0 {
        return 0;
    }
    (v.floor().max(0.0) as u32).min(size - 1)
}
