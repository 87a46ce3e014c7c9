#[cfg(feature = "cv")]
pub mod cv;

pub mod board;
pub mod calibration;
pub mod camera;
pub mod dataset;
pub mod label;
pub mod logger;
pub mod mesh;
pub mod pose;

pub use camera::CameraParams;
pub use pose::{Pose, RigidOffset};

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0. ..self.width as f64).contains(&x) && (0. ..self.height as f64).contains(&y)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parses `a,b,c` into three floats, used for offset arguments on the command line.
pub fn parse_triple(s: &str) -> Result<[f64; 3], String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("`{p}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    parts
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected 3 comma separated values, got {}", v.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_half_open() {
        let size = ImageSize::new(640, 480);
        assert!(size.contains(0., 0.));
        assert!(size.contains(639.9, 479.9));
        assert!(!size.contains(640., 10.));
        assert!(!size.contains(10., -0.1));
    }

    #[test]
    fn parses_triples() {
        assert_eq!(parse_triple("180, 180,-90"), Ok([180., 180., -90.]));
        assert!(parse_triple("1,2").is_err());
        assert!(parse_triple("1,x,2").is_err());
    }
}
