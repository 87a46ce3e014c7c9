//! Per-frame label rows.
//!
//! Layout of a full row (35 values):
//!
//! | index  | content                                               |
//! |--------|-------------------------------------------------------|
//! | 0      | class id                                              |
//! | 1..19  | 9 keypoints (origin, 8 corners), x / width, y / height |
//! | 19..21 | keypoint x range / width, y range / height            |
//! | 21..29 | fx, fy, width, height, cx, cy, width, height          |
//! | 29..35 | object rotation vector, translation vector            |
//!
//! The relabel step later drops the last six values.

use crate::{CameraParams, ImageSize, Pose};
use nalgebra::{Matrix4, Point2};
use std::{fmt::Write as _, path::Path};
use thiserror::Error as ThisError;

pub const KEYPOINTS: usize = 9;
pub const FIELDS_WITHOUT_POSE: usize = 29;
pub const FIELDS_WITH_POSE: usize = 35;

#[derive(Debug, ThisError)]
pub enum LabelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad number `{0}`")]
    Number(String),

    #[error("expected {FIELDS_WITHOUT_POSE} or {FIELDS_WITH_POSE} values, got {0}")]
    FieldCount(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub class_id: u32,
    /// Normalized to image size.
    pub keypoints: [Point2<f64>; KEYPOINTS],
    /// Normalized spread of the keypoints along x and y.
    pub range: [f64; 2],
    pub camera: [f64; 8],
    pub pose: Option<Pose>,
}

impl LabelRecord {
    pub fn build(
        class_id: u32,
        projected: &[Point2<f64>; KEYPOINTS],
        params: &CameraParams,
        size: ImageSize,
        object: &Matrix4<f64>,
    ) -> Self {
        let (w, h) = (size.width as f64, size.height as f64);

        let keypoints = projected.map(|p| Point2::new(p.x / w, p.y / h));

        let spread = |f: fn(&Point2<f64>) -> f64| {
            let (lo, hi) = projected
                .iter()
                .map(f)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            hi - lo
        };

        Self {
            class_id,
            keypoints,
            range: [spread(|p| p.x) / w, spread(|p| p.y) / h],
            camera: [params.fx(), params.fy(), w, h, params.cx(), params.cy(), w, h],
            pose: Some(Pose::from_matrix(object)),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(FIELDS_WITH_POSE);
        v.push(self.class_id as f64);
        for k in &self.keypoints {
            v.extend([k.x, k.y]);
        }
        v.extend(self.range);
        v.extend(self.camera);
        if let Some(pose) = &self.pose {
            v.extend(pose.rvec.iter());
            v.extend(pose.tvec.iter());
        }
        v
    }

    /// One whitespace separated line, newline terminated.
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        for (i, v) in self.values().into_iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            let _ = write!(line, "{v}");
        }
        line.push('\n');
        line
    }

    pub fn parse(line: &str) -> Result<Self, LabelError> {
        let values = line
            .split_whitespace()
            .map(|t| t.parse::<f64>().map_err(|_| LabelError::Number(t.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        if values.len() != FIELDS_WITHOUT_POSE && values.len() != FIELDS_WITH_POSE {
            return Err(LabelError::FieldCount(values.len()));
        }

        let mut keypoints = [Point2::origin(); KEYPOINTS];
        for (i, k) in keypoints.iter_mut().enumerate() {
            *k = Point2::new(values[1 + 2 * i], values[2 + 2 * i]);
        }

        let mut camera = [0.; 8];
        camera.copy_from_slice(&values[21..29]);

        let pose = (values.len() == FIELDS_WITH_POSE).then(|| {
            Pose::new(
                [values[29], values[30], values[31]].into(),
                [values[32], values[33], values[34]].into(),
            )
        });

        Ok(Self {
            class_id: values[0] as u32,
            keypoints,
            range: [values[19], values[20]],
            camera,
            pose,
        })
    }

    /// Reads the first row of a label file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(text.lines().next().unwrap_or_default())
    }

    /// Keypoints scaled back to pixels.
    pub fn pixel_keypoints(&self, size: ImageSize) -> [Point2<f64>; KEYPOINTS] {
        self.keypoints
            .map(|k| Point2::new(k.x * size.width as f64, k.y * size.height as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn params() -> CameraParams {
        CameraParams {
            intrinsic: Matrix3::new(600., 0., 320., 0., 610., 240., 0., 0., 1.),
            distortion: vec![0.; 5],
            reprojection_error: 0.3,
        }
    }

    fn record() -> LabelRecord {
        let mut projected = [Point2::new(320., 240.); KEYPOINTS];
        projected[1] = Point2::new(160., 120.);
        projected[8] = Point2::new(480., 360.);

        let object = Pose::new(Vector3::new(0., 0.3, 0.), Vector3::new(0.1, 0., 0.5)).to_matrix();
        LabelRecord::build(0, &projected, &params(), ImageSize::new(640, 480), &object)
    }

    #[test]
    fn build_normalizes_by_image_size() {
        let r = record();

        assert_eq!(r.keypoints[0], Point2::new(0.5, 0.5));
        assert_eq!(r.keypoints[1], Point2::new(0.25, 0.25));
        assert_eq!(r.range, [0.5, 0.5]);
        assert_eq!(r.camera, [600., 610., 640., 480., 320., 240., 640., 480.]);

        let pose = r.pose.unwrap();
        assert_relative_eq!(pose.rvec, Vector3::new(0., 0.3, 0.), epsilon = 1e-12);
        assert_relative_eq!(pose.tvec, Vector3::new(0.1, 0., 0.5), epsilon = 1e-12);
    }

    #[test]
    fn full_line_has_35_values_and_parses_back() {
        let r = record();
        let line = r.to_line();

        assert!(line.ends_with('\n'));
        assert_eq!(line.split_whitespace().count(), FIELDS_WITH_POSE);

        let parsed = LabelRecord::parse(&line).unwrap();
        assert_eq!(parsed.keypoints, r.keypoints);
        assert_eq!(parsed.camera, r.camera);
    }

    #[test]
    fn stripped_rows_have_no_pose() {
        let mut r = record();
        r.pose = None;
        let line = r.to_line();
        assert_eq!(line.split_whitespace().count(), FIELDS_WITHOUT_POSE);
        assert_eq!(LabelRecord::parse(&line).unwrap().pose, None);
    }

    #[test]
    fn rejects_other_lengths() {
        assert!(matches!(
            LabelRecord::parse("0 0.1 0.2"),
            Err(LabelError::FieldCount(3))
        ));
        assert!(matches!(
            LabelRecord::parse("0 x"),
            Err(LabelError::Number(_))
        ));
    }

    #[test]
    fn pixel_keypoints_undo_normalization() {
        let px = record().pixel_keypoints(ImageSize::new(640, 480));
        assert_eq!(px[8], Point2::new(480., 360.));
    }
}
