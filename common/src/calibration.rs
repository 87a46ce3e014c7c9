//! Frame acceptance and correspondence bookkeeping for camera calibration.

use crate::{CameraParams, ImageSize};
use log::debug;
use std::collections::HashSet;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CalibrationError<E> {
    #[error("no valid calibration data: no frame had enough usable marker corners")]
    NoValidData,

    #[error("invalid image size {0}")]
    InvalidImageSize(ImageSize),

    #[error("calibration unreliable: reprojection error {error:.4} exceeds {threshold}")]
    Unreliable { error: f64, threshold: f64 },

    #[error("solver failed: {0}")]
    Solver(E),
}

/// Planar grid the accepted corners are matched against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPattern {
    pub width: u8,
    pub height: u8,
    /// metres
    pub square_size: f32,
}

impl CalibrationPattern {
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major grid on the z = 0 plane, x varying fastest.
    pub fn object_points(&self) -> Vec<[f32; 3]> {
        (0..self.height)
            .flat_map(|y| {
                (0..self.width).map(move |x| {
                    [x as f32 * self.square_size, y as f32 * self.square_size, 0.]
                })
            })
            .collect()
    }
}

/// Why a frame did not make it into the correspondence set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooFewMarkers { found: usize, required: usize },
    TooFewCornerGroups { found: usize, required: usize },
    TooFewCorners { found: usize, required: usize },
    Duplicates { unique: usize, total: usize },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::TooFewMarkers { found, required } => {
                write!(f, "insufficient markers ({found}, need more than {required})")
            }
            Rejection::TooFewCornerGroups { found, required } => {
                write!(f, "insufficient corner groups ({found}, need more than {required})")
            }
            Rejection::TooFewCorners { found, required } => {
                write!(f, "insufficient corners ({found}, need {required})")
            }
            Rejection::Duplicates { unique, total } => {
                write!(f, "too many duplicate corners ({unique} unique of {total})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceCriteria {
    /// Marker ids needed, exclusive.
    pub min_marker_ids: usize,
    /// Corner groups needed, exclusive.
    pub min_corner_groups: usize,
    pub min_unique_ratio: f64,
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self {
            min_marker_ids: 5,
            min_corner_groups: 10,
            min_unique_ratio: 0.8,
        }
    }
}

impl AcceptanceCriteria {
    /// Returns the first `required` flattened corners if the frame passes.
    pub fn evaluate(
        &self,
        marker_ids: usize,
        corner_groups: &[Vec<[f32; 2]>],
        required: usize,
    ) -> Result<Vec<[f32; 2]>, Rejection> {
        if marker_ids <= self.min_marker_ids {
            return Err(Rejection::TooFewMarkers {
                found: marker_ids,
                required: self.min_marker_ids,
            });
        }

        if corner_groups.len() <= self.min_corner_groups {
            return Err(Rejection::TooFewCornerGroups {
                found: corner_groups.len(),
                required: self.min_corner_groups,
            });
        }

        let flat: Vec<[f32; 2]> = corner_groups.iter().flatten().copied().collect();
        if flat.len() < required {
            return Err(Rejection::TooFewCorners {
                found: flat.len(),
                required,
            });
        }

        // + 0. folds -0. into 0.
        let unique = flat
            .iter()
            .map(|[x, y]| ((x + 0.).to_bits(), (y + 0.).to_bits()))
            .collect::<HashSet<_>>()
            .len();
        if (unique as f64) < self.min_unique_ratio * flat.len() as f64 {
            return Err(Rejection::Duplicates {
                unique,
                total: flat.len(),
            });
        }

        let mut flat = flat;
        flat.truncate(required);
        Ok(flat)
    }
}

/// Paired object and image points, one entry per accepted view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    object_points: Vec<Vec<[f32; 3]>>,
    image_points: Vec<Vec<[f32; 2]>>,
}

impl Correspondences {
    /// Both sides must have the same number of points.
    pub fn add_view(&mut self, object: Vec<[f32; 3]>, image: Vec<[f32; 2]>) {
        assert_eq!(
            object.len(),
            image.len(),
            "object and image points must pair up"
        );
        self.object_points.push(object);
        self.image_points.push(image);
    }

    pub fn len(&self) -> usize {
        self.object_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }

    pub fn object_points(&self) -> &[Vec<[f32; 3]>] {
        &self.object_points
    }

    pub fn image_points(&self) -> &[Vec<[f32; 2]>] {
        &self.image_points
    }
}

/// Turns accumulated correspondences into camera parameters.
pub trait Solver {
    type Error;

    fn solve(
        &self,
        correspondences: &Correspondences,
        image_size: ImageSize,
    ) -> Result<CameraParams, Self::Error>;
}

/// Accumulates views over one pass of a video.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    pattern: CalibrationPattern,
    template: Vec<[f32; 3]>,
    criteria: AcceptanceCriteria,
    correspondences: Correspondences,
    image_size: Option<ImageSize>,
}

impl CalibrationSession {
    pub fn new(pattern: CalibrationPattern, criteria: AcceptanceCriteria) -> Self {
        Self {
            template: pattern.object_points(),
            pattern,
            criteria,
            correspondences: Correspondences::default(),
            image_size: None,
        }
    }

    /// Returns the number of corners added for this frame.
    pub fn observe(
        &mut self,
        frame_index: usize,
        image_size: ImageSize,
        marker_ids: usize,
        corner_groups: &[Vec<[f32; 2]>],
    ) -> Result<usize, Rejection> {
        if !image_size.is_empty() {
            self.image_size.get_or_insert(image_size);
        }

        let corners = self
            .criteria
            .evaluate(marker_ids, corner_groups, self.pattern.len())?;

        let n = corners.len();
        self.correspondences.add_view(self.template.clone(), corners);
        debug!("frame {frame_index}: added {n} corners to calibration");

        Ok(n)
    }

    pub fn correspondences(&self) -> &Correspondences {
        &self.correspondences
    }

    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    /// Solves and applies the reprojection error gate.
    pub fn finish<S: Solver>(
        &self,
        solver: &S,
        max_error: f64,
    ) -> Result<CameraParams, CalibrationError<S::Error>> {
        if self.correspondences.is_empty() {
            return Err(CalibrationError::NoValidData);
        }

        let image_size = match self.image_size {
            Some(s) if !s.is_empty() => s,
            other => {
                return Err(CalibrationError::InvalidImageSize(
                    other.unwrap_or(ImageSize::new(0, 0)),
                ))
            }
        };

        let params = solver
            .solve(&self.correspondences, image_size)
            .map_err(CalibrationError::Solver)?;

        if params.reprojection_error.is_nan() || params.reprojection_error > max_error {
            return Err(CalibrationError::Unreliable {
                error: params.reprojection_error,
                threshold: max_error,
            });
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use std::cell::Cell;

    const PATTERN: CalibrationPattern = CalibrationPattern {
        width: 4,
        height: 5,
        square_size: 0.0235,
    };

    /// `n` marker quads with distinct corners.
    fn groups(n: usize) -> Vec<Vec<[f32; 2]>> {
        (0..n)
            .map(|i| {
                let o = i as f32 * 10.;
                vec![[o, 0.], [o + 5., 0.], [o + 5., 5.], [o, 5.]]
            })
            .collect()
    }

    struct FixedSolver {
        error: f64,
        calls: Cell<usize>,
    }

    impl Solver for FixedSolver {
        type Error = String;

        fn solve(&self, c: &Correspondences, _: ImageSize) -> Result<CameraParams, String> {
            self.calls.set(self.calls.get() + 1);
            assert_eq!(c.object_points().len(), c.image_points().len());
            Ok(CameraParams {
                intrinsic: Matrix3::identity(),
                distortion: vec![0.; 5],
                reprojection_error: self.error,
            })
        }
    }

    fn solver(error: f64) -> FixedSolver {
        FixedSolver {
            error,
            calls: Cell::new(0),
        }
    }

    #[test]
    fn grid_is_x_fastest() {
        let p = PATTERN.object_points();
        assert_eq!(p.len(), 20);
        assert_eq!(p[1], [0.0235, 0., 0.]);
        assert_eq!(p[4], [0., 0.0235, 0.]);
        assert_eq!(p[19], [3. * 0.0235, 4. * 0.0235, 0.]);
    }

    #[test]
    fn marker_and_group_thresholds_are_exclusive() {
        let c = AcceptanceCriteria::default();

        assert_eq!(
            c.evaluate(5, &groups(12), 20),
            Err(Rejection::TooFewMarkers {
                found: 5,
                required: 5
            })
        );
        assert!(matches!(
            c.evaluate(6, &groups(10), 20),
            Err(Rejection::TooFewCornerGroups { found: 10, .. })
        ));
        assert_eq!(c.evaluate(6, &groups(11), 20).unwrap().len(), 20);
    }

    #[test]
    fn needs_enough_flat_corners() {
        let c = AcceptanceCriteria {
            min_corner_groups: 0,
            ..Default::default()
        };
        assert!(matches!(
            c.evaluate(6, &groups(4), 20),
            Err(Rejection::TooFewCorners { found: 16, .. })
        ));
    }

    #[test]
    fn rejects_mostly_duplicated_corners() {
        let c = AcceptanceCriteria::default();
        let mut g = groups(11);
        // 44 corners, 12 of them copies -> 32 unique < 35.2
        for i in 0..3 {
            g[i + 1] = g[0].clone();
        }
        assert_eq!(
            c.evaluate(6, &g, 20),
            Err(Rejection::Duplicates {
                unique: 32,
                total: 44
            })
        );

        // one copy -> 40 unique >= 35.2
        let mut g = groups(11);
        g[1] = g[0].clone();
        assert!(c.evaluate(6, &g, 20).is_ok());
    }

    #[test]
    fn unique_ratio_boundary_is_inclusive() {
        let c = AcceptanceCriteria::default();

        // 60 corners, 48 unique: exactly 80%
        let mut g = groups(15);
        for i in 1..4 {
            g[i] = g[0].clone();
        }
        assert_eq!(c.evaluate(6, &g, 20).unwrap().len(), 20);

        g[4][0] = g[5][0];
        assert_eq!(
            c.evaluate(6, &g, 20),
            Err(Rejection::Duplicates {
                unique: 47,
                total: 60
            })
        );
    }

    #[test]
    fn signed_zeros_are_the_same_corner() {
        let c = AcceptanceCriteria::default();
        let mut g = groups(11);
        let mirrored = vec![[-0., -0.], [5., -0.], [5., 5.], [-0., 5.]];
        for i in 1..4 {
            g[i] = mirrored.clone();
        }
        assert_eq!(
            c.evaluate(6, &g, 20),
            Err(Rejection::Duplicates {
                unique: 32,
                total: 44
            })
        );
    }

    #[test]
    fn correspondences_grow_in_lockstep() {
        let mut s = CalibrationSession::new(PATTERN, AcceptanceCriteria::default());
        let size = ImageSize::new(640, 480);

        for frame in 0..5 {
            let ids = if frame % 2 == 0 { 8 } else { 3 };
            let _ = s.observe(frame, size, ids, &groups(12));

            let c = s.correspondences();
            assert_eq!(c.object_points().len(), c.image_points().len());
            for (o, i) in c.object_points().iter().zip(c.image_points()) {
                assert_eq!(o.len(), i.len());
            }
        }
        assert_eq!(s.correspondences().len(), 3);
    }

    #[test]
    #[should_panic]
    fn mismatched_views_are_refused() {
        Correspondences::default().add_view(vec![[0.; 3]; 2], vec![[0.; 2]; 3]);
    }

    #[test]
    fn fails_without_data_and_never_calls_the_solver() {
        let mut s = CalibrationSession::new(PATTERN, AcceptanceCriteria::default());
        for frame in 0..10 {
            // never more than five distinct ids
            assert!(s.observe(frame, ImageSize::new(640, 480), 5, &groups(20)).is_err());
        }

        let solver = solver(0.1);
        assert!(matches!(
            s.finish(&solver, 5.),
            Err(CalibrationError::NoValidData)
        ));
        assert_eq!(solver.calls.get(), 0);
    }

    #[test]
    fn quality_gate_blocks_high_errors() {
        let mut s = CalibrationSession::new(PATTERN, AcceptanceCriteria::default());
        s.observe(0, ImageSize::new(640, 480), 8, &groups(12)).unwrap();

        match s.finish(&solver(5.01), 5.) {
            Err(CalibrationError::Unreliable { error, threshold }) => {
                assert_eq!((error, threshold), (5.01, 5.));
            }
            other => panic!("expected unreliable, got {other:?}"),
        }

        assert!(matches!(
            s.finish(&solver(f64::NAN), 5.),
            Err(CalibrationError::Unreliable { .. })
        ));

        let params = s.finish(&solver(5.), 5.).unwrap();
        assert!(params.reprojection_error <= 5.);
    }

    #[test]
    fn image_size_comes_from_first_valid_frame() {
        let mut s = CalibrationSession::new(PATTERN, AcceptanceCriteria::default());
        let _ = s.observe(0, ImageSize::new(0, 0), 1, &[]);
        let _ = s.observe(1, ImageSize::new(1280, 720), 1, &[]);
        let _ = s.observe(2, ImageSize::new(640, 480), 1, &[]);
        assert_eq!(s.image_size(), Some(ImageSize::new(1280, 720)));
    }
}
