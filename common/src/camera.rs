use nalgebra::{Matrix3, Matrix4, Point2, Point3};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error as ThisError;

/// Distortion vector lengths OpenCV produces without the tilted sensor model.
pub const DISTORTION_LENGTHS: [usize; 4] = [4, 5, 8, 12];

#[derive(Debug, ThisError)]
pub enum ParamsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid camera parameters: {0}")]
    Shape(String),
}

/// Intrinsics, lens distortion and the error they were calibrated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCameraParams", into = "RawCameraParams")]
pub struct CameraParams {
    pub intrinsic: Matrix3<f64>,
    /// k1, k2, p1, p2[, k3[, k4, k5, k6[, s1, s2, s3, s4]]]
    pub distortion: Vec<f64>,
    pub reprojection_error: f64,
}

#[derive(Serialize, Deserialize)]
struct RawCameraParams {
    intrinsic: Vec<Vec<f64>>,
    distortion: RawDistortion,
    reprojection_error: f64,
}

/// The writer emits `1xK`, older files may carry a flat list.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawDistortion {
    Nested(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

impl TryFrom<RawCameraParams> for CameraParams {
    type Error = ParamsError;

    fn try_from(raw: RawCameraParams) -> Result<Self, Self::Error> {
        if raw.intrinsic.len() != 3 || raw.intrinsic.iter().any(|r| r.len() != 3) {
            return Err(ParamsError::Shape(format!(
                "intrinsic must be 3x3, got {:?}",
                raw.intrinsic.iter().map(Vec::len).collect::<Vec<_>>()
            )));
        }
        let intrinsic = Matrix3::from_fn(|r, c| raw.intrinsic[r][c]);

        let distortion = match raw.distortion {
            RawDistortion::Flat(d) => d,
            RawDistortion::Nested(mut rows) if rows.len() == 1 => rows.remove(0),
            RawDistortion::Nested(rows) => {
                return Err(ParamsError::Shape(format!(
                    "distortion must be a single row, got {} rows",
                    rows.len()
                )))
            }
        };

        let params = Self {
            intrinsic,
            distortion,
            reprojection_error: raw.reprojection_error,
        };
        params.validate()?;
        Ok(params)
    }
}

impl From<CameraParams> for RawCameraParams {
    fn from(p: CameraParams) -> Self {
        Self {
            intrinsic: (0..3)
                .map(|r| (0..3).map(|c| p.intrinsic[(r, c)]).collect())
                .collect(),
            distortion: RawDistortion::Nested(vec![p.distortion]),
            reprojection_error: p.reprojection_error,
        }
    }
}

impl CameraParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !DISTORTION_LENGTHS.contains(&self.distortion.len()) {
            return Err(ParamsError::Shape(format!(
                "distortion must have one of {DISTORTION_LENGTHS:?} coefficients, got {}",
                self.distortion.len()
            )));
        }

        let finite = self.intrinsic.iter().all(|v| v.is_finite())
            && self.distortion.iter().all(|v| v.is_finite());
        if !finite {
            return Err(ParamsError::Shape("non-finite value".into()));
        }

        if self.fx() <= 0. || self.fy() <= 0. {
            return Err(ParamsError::Shape(format!(
                "focal lengths must be positive, got ({}, {})",
                self.fx(),
                self.fy()
            )));
        }

        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Creates missing parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ParamsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(File::create(path)?, self)?;
        Ok(())
    }

    pub fn fx(&self) -> f64 {
        self.intrinsic[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic[(1, 2)]
    }

    fn coeff(&self, i: usize) -> f64 {
        self.distortion.get(i).copied().unwrap_or(0.)
    }

    /// Applies the OpenCV lens model to a point on the normalized image plane.
    fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));
        let (s1, s2, s3, s4) = (
            self.coeff(8),
            self.coeff(9),
            self.coeff(10),
            self.coeff(11),
        );

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = (1. + k1 * r2 + k2 * r4 + k3 * r6) / (1. + k4 * r2 + k5 * r4 + k6 * r6);

        let xd = x * radial + 2. * p1 * x * y + p2 * (r2 + 2. * x * x) + s1 * r2 + s2 * r4;
        let yd = y * radial + p1 * (r2 + 2. * y * y) + 2. * p2 * x * y + s3 * r2 + s4 * r4;

        (xd, yd)
    }

    /// Projects model points through `transform` (model -> camera) onto the image.
    ///
    /// Points at or behind the camera plane are projected anyway and come out
    /// non-finite or mirrored; callers bounds-check the result.
    pub fn project(&self, transform: &Matrix4<f64>, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        let k = &self.intrinsic;

        points
            .iter()
            .map(|p| {
                let c = transform.transform_point(p);
                let (x, y) = self.distort(c.x / c.z, c.y / c.z);

                Point2::new(
                    k[(0, 0)] * x + k[(0, 1)] * y + k[(0, 2)],
                    k[(1, 1)] * y + k[(1, 2)],
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(distortion: Vec<f64>) -> CameraParams {
        CameraParams {
            intrinsic: Matrix3::new(800., 0., 320., 0., 800., 240., 0., 0., 1.),
            distortion,
            reprojection_error: 0.4,
        }
    }

    #[test]
    fn saves_nested_distortion_and_loads_it_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("camera_params.json");

        let p = params(vec![0.1, -0.2, 0.001, 0.002, 0.05]);
        p.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["distortion"].as_array().unwrap().len(), 1);
        assert_eq!(value["intrinsic"][0].as_array().unwrap().len(), 3);

        assert_eq!(CameraParams::load(&path).unwrap(), p);
    }

    #[test]
    fn accepts_flat_distortion() {
        let json = r#"{
            "intrinsic": [[700, 0, 300], [0, 700, 200], [0, 0, 1]],
            "distortion": [0, 0, 0, 0, 0],
            "reprojection_error": 1.5
        }"#;
        let p: CameraParams = serde_json::from_str(json).unwrap();
        assert_eq!(p.distortion.len(), 5);
        assert_eq!(p.cx(), 300.);
    }

    #[test]
    fn rejects_bad_shapes() {
        let not_square = r#"{"intrinsic": [[1, 0], [0, 1]], "distortion": [[0, 0, 0, 0, 0]], "reprojection_error": 0}"#;
        assert!(serde_json::from_str::<CameraParams>(not_square).is_err());

        let odd_length = r#"{"intrinsic": [[1, 0, 0], [0, 1, 0], [0, 0, 1]], "distortion": [[0, 0, 0]], "reprojection_error": 0}"#;
        assert!(serde_json::from_str::<CameraParams>(odd_length).is_err());

        let two_rows = r#"{"intrinsic": [[1, 0, 0], [0, 1, 0], [0, 0, 1]], "distortion": [[0, 0, 0, 0], [0, 0, 0, 0]], "reprojection_error": 0}"#;
        assert!(serde_json::from_str::<CameraParams>(two_rows).is_err());
    }

    #[test]
    fn projects_like_a_pinhole_without_distortion() {
        let p = params(vec![0.; 5]);
        let t = Matrix4::identity();
        let out = p.project(&t, &[Point3::new(0., 0., 2.), Point3::new(0.1, -0.05, 1.)]);

        assert_relative_eq!(out[0].x, 320.);
        assert_relative_eq!(out[0].y, 240.);
        assert_relative_eq!(out[1].x, 400.);
        assert_relative_eq!(out[1].y, 200.);
    }

    #[test]
    fn radial_distortion_pushes_points_outwards() {
        let p = params(vec![0.1, 0., 0., 0., 0.]);
        let out = p.project(&Matrix4::identity(), &[Point3::new(0.5, 0., 1.)]);

        // x'' = 0.5 * (1 + 0.1 * 0.25)
        assert_relative_eq!(out[0].x, 320. + 800. * 0.5125, epsilon = 1e-9);
        assert_relative_eq!(out[0].y, 240.);
    }
}
