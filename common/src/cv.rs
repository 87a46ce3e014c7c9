use crate::{
    board::{BoardError, BoardSpec, Dictionary, PrintLayout},
    calibration::{Correspondences, Solver},
    dataset::MaskTier,
    mesh::Mesh,
    CameraParams, ImageSize, Pose,
};
use nalgebra::{Matrix3, Matrix4, Point2};
use opencv::{
    calib3d,
    core::{self, Mat, Point, Point2f, Point3f, Rect, Scalar, Size, TermCriteria, Vector},
    highgui, imgcodecs, imgproc,
    objdetect::{self, ArucoDetector, CharucoBoard, CharucoDetector, CharucoParameters},
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::{collections::HashSet, path::Path};
use thiserror::Error as ThisError;

/// Keeps rasterized coordinates well inside `i32`.
const COORD_LIMIT: f64 = 1e6;

fn error(message: impl Into<String>) -> opencv::Error {
    opencv::Error::new(core::StsError, message.into())
}

fn path_str(path: &Path) -> opencv::Result<&str> {
    path.to_str()
        .ok_or_else(|| error(format!("path is not valid utf-8: {}", path.display())))
}

pub fn get_aruco_dictionary(dictionary: Dictionary) -> opencv::Result<objdetect::Dictionary> {
    use objdetect::PredefinedDictionaryType as P;

    objdetect::get_predefined_dictionary(match dictionary {
        Dictionary::Dict4x4_50 => P::DICT_4X4_50,
        Dictionary::Dict4x4_100 => P::DICT_4X4_100,
        Dictionary::Dict4x4_250 => P::DICT_4X4_250,
        Dictionary::Dict5x5_50 => P::DICT_5X5_50,
        Dictionary::Dict5x5_100 => P::DICT_5X5_100,
        Dictionary::Dict6x6_50 => P::DICT_6X6_50,
        Dictionary::Dict6x6_100 => P::DICT_6X6_100,
        Dictionary::Dict6x6_250 => P::DICT_6X6_250,
    })
}

fn refine_parameters() -> objdetect::RefineParameters {
    objdetect::RefineParameters {
        min_rep_distance: 0.5,
        error_correction_rate: 1.0,
        check_all_orders: true,
    }
}

pub fn marker_detector(dictionary: Dictionary) -> opencv::Result<ArucoDetector> {
    ArucoDetector::new(
        &get_aruco_dictionary(dictionary)?,
        &objdetect::DetectorParameters::default()?,
        refine_parameters(),
    )
}

#[derive(Debug, ThisError)]
pub enum BoardBuildError {
    #[error(transparent)]
    Spec(#[from] BoardError),

    #[error("opencv error: {0}")]
    OpenCV(#[from] opencv::Error),
}

pub fn generate_board(spec: &BoardSpec) -> Result<CharucoBoard, BoardBuildError> {
    spec.validate()?;

    Ok(CharucoBoard::new(
        Size::new(spec.squares_x as i32, spec.squares_y as i32),
        spec.square_length as f32,
        spec.marker_length as f32,
        &get_aruco_dictionary(spec.dictionary)?,
        &core::no_array(),
    )?)
}

/// Rasterizes a board onto a sheet of the layout's paper size.
pub fn render_board(spec: &BoardSpec, layout: &PrintLayout) -> Result<Mat, BoardBuildError> {
    let (width, height) = layout.size()?;
    let board = generate_board(spec)?;

    let mut img = Mat::default();
    board.generate_image(
        Size::new(width, height),
        &mut img,
        layout.margin as i32,
        layout.border_bits as i32,
    )?;

    if img.empty() {
        return Err(error("board rendering produced an empty image").into());
    }

    Ok(img)
}

pub fn write_image(path: &Path, image: &Mat) -> opencv::Result<()> {
    if imgcodecs::imwrite(path_str(path)?, image, &Vector::new())? {
        Ok(())
    } else {
        Err(error(format!("could not write {}", path.display())))
    }
}

pub fn read_image(path: &Path) -> opencv::Result<Mat> {
    let img = imgcodecs::imread(path_str(path)?, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(error(format!("could not read {}", path.display())));
    }
    Ok(img)
}

pub fn image_size(image: &Mat) -> opencv::Result<ImageSize> {
    let s = image.size()?;
    Ok(ImageSize::new(s.width.max(0) as u32, s.height.max(0) as u32))
}

/// Frames of a video file; the capture is released when this is dropped.
/// Iteration ends at the end of the stream or after the first read error.
pub struct VideoFrames {
    cap: VideoCapture,
    index: usize,
    failed: bool,
}

impl VideoFrames {
    pub fn open(path: &Path) -> opencv::Result<Self> {
        let cap = VideoCapture::from_file(path_str(path)?, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(error(format!("could not open video {}", path.display())));
        }

        Ok(Self {
            cap,
            index: 0,
            failed: false,
        })
    }
}

impl Iterator for VideoFrames {
    type Item = opencv::Result<(usize, Mat)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut frame = Mat::default();

        match self.cap.read(&mut frame) {
            Ok(false) => None,
            Ok(true) => {
                let i = self.index;
                self.index += 1;
                Some(Ok((i, frame)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for VideoFrames {
    fn drop(&mut self) {
        let _ = self.cap.release();
    }
}

pub fn to_gray(image: &Mat) -> opencv::Result<Mat> {
    if image.channels() == 1 {
        return image.try_clone();
    }

    let mut gray = Mat::default();
    imgproc::cvt_color(image, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
    Ok(gray)
}

pub struct FoundMarkers {
    pub corners: Vector<Vector<Point2f>>,
    pub ids: Vector<i32>,
}

impl FoundMarkers {
    pub fn distinct_ids(&self) -> usize {
        self.ids.iter().collect::<HashSet<_>>().len()
    }

    pub fn corner_groups(&self) -> Vec<Vec<[f32; 2]>> {
        self.corners
            .iter()
            .map(|g| g.iter().map(|p| [p.x, p.y]).collect())
            .collect()
    }
}

pub fn detect_markers(detector: &ArucoDetector, image: &Mat) -> opencv::Result<FoundMarkers> {
    let mut corners = Vector::new();
    let mut ids = Vector::new();
    let mut rejected = Vector::<Vector<Point2f>>::new();

    detector.detect_markers(image, &mut corners, &mut ids, &mut rejected)?;

    Ok(FoundMarkers { corners, ids })
}

pub fn draw_markers(image: &mut Mat, markers: &FoundMarkers) -> opencv::Result<()> {
    objdetect::draw_detected_markers(
        image,
        &markers.corners,
        &markers.ids,
        Scalar::new(0.0, 255.0, 0.0, 1.0),
    )
}

pub struct FoundBoard {
    pub corners: Vector<Point2f>,
    pub ids: Vector<i32>,
    pub markers: FoundMarkers,
}

/// Intrinsics and distortion as OpenCV matrices.
pub struct CameraMats {
    pub camera_matrix: Mat,
    pub dist_coeffs: Mat,
}

impl CameraMats {
    pub fn new(params: &CameraParams) -> opencv::Result<Self> {
        let k = &params.intrinsic;
        let rows: Vec<[f64; 3]> = (0..3).map(|r| [k[(r, 0)], k[(r, 1)], k[(r, 2)]]).collect();

        Ok(Self {
            camera_matrix: Mat::from_slice_2d(&rows)?,
            dist_coeffs: Mat::from_exact_iter(params.distortion.iter().copied())?,
        })
    }
}

fn column3(m: &Mat) -> opencv::Result<nalgebra::Vector3<f64>> {
    let v: Vec<f64> = m.to_vec_2d::<f64>()?.into_iter().flatten().collect();
    match v.as_slice() {
        [x, y, z] => Ok(nalgebra::Vector3::new(*x, *y, *z)),
        _ => Err(error(format!("expected a 3-vector, got {} values", v.len()))),
    }
}

pub struct BoardDetector {
    board: CharucoBoard,
    markers: ArucoDetector,
    charuco: CharucoDetector,
    min_corners: usize,
}

impl BoardDetector {
    /// `min_corners` is clamped to the 4 points PnP needs.
    pub fn new(spec: &BoardSpec, min_corners: usize) -> Result<Self, BoardBuildError> {
        let board = generate_board(spec)?;
        let charuco = CharucoDetector::new(
            &board,
            &CharucoParameters::default()?,
            &objdetect::DetectorParameters::default()?,
            refine_parameters(),
        )?;

        Ok(Self {
            markers: marker_detector(spec.dictionary)?,
            board,
            charuco,
            min_corners: min_corners.max(4),
        })
    }

    pub fn find_board(&self, image: &Mat) -> opencv::Result<Option<FoundBoard>> {
        let mut markers = detect_markers(&self.markers, image)?;

        // requires at least one detectable marker
        if markers.ids.is_empty() {
            return Ok(None);
        }

        let mut corners = Vector::new();
        let mut ids = Vector::new();
        self.charuco.detect_board(
            image,
            &mut corners,
            &mut ids,
            &mut markers.corners,
            &mut markers.ids,
        )?;

        if ids.len() < self.min_corners {
            return Ok(None);
        }

        Ok(Some(FoundBoard {
            corners,
            ids,
            markers,
        }))
    }

    /// Board pose in camera space, `None` if PnP does not converge.
    pub fn estimate_pose(
        &self,
        found: &FoundBoard,
        camera: &CameraMats,
    ) -> opencv::Result<Option<Pose>> {
        let mut object_points = Vector::<Point3f>::new();
        let mut image_points = Vector::<Point2f>::new();
        self.board.match_image_points(
            &found.corners,
            &found.ids,
            &mut object_points,
            &mut image_points,
        )?;

        if object_points.len() < self.min_corners {
            return Ok(None);
        }

        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let solved = calib3d::solve_pnp(
            &object_points,
            &image_points,
            &camera.camera_matrix,
            &camera.dist_coeffs,
            &mut rvec,
            &mut tvec,
            false,
            calib3d::SOLVEPNP_ITERATIVE,
        )?;

        if !solved {
            return Ok(None);
        }

        let pose = Pose::new(column3(&rvec)?, column3(&tvec)?);
        let finite = pose.rvec.iter().chain(pose.tvec.iter()).all(|v| v.is_finite());
        Ok(finite.then_some(pose))
    }

    pub fn detect_pose(&self, image: &Mat, camera: &CameraMats) -> opencv::Result<Option<(FoundBoard, Pose)>> {
        let Some(found) = self.find_board(image)? else {
            return Ok(None);
        };

        Ok(self.estimate_pose(&found, camera)?.map(|pose| (found, pose)))
    }
}

pub fn draw_board(image: &mut Mat, board: &FoundBoard) -> opencv::Result<()> {
    objdetect::draw_detected_corners_charuco(
        image,
        &board.corners,
        &board.ids,
        Scalar::new(0.0, 0.0, 255.0, 1.0),
    )?;
    draw_markers(image, &board.markers)
}

pub fn draw_frame_axes(
    image: &mut Mat,
    camera: &CameraMats,
    pose: &Pose,
    length: f32,
) -> opencv::Result<()> {
    let rvec = Mat::from_exact_iter(pose.rvec.iter().copied())?;
    let tvec = Mat::from_exact_iter(pose.tvec.iter().copied())?;
    calib3d::draw_frame_axes(
        image,
        &camera.camera_matrix,
        &camera.dist_coeffs,
        &rvec,
        &tvec,
        length,
        3,
    )
}

fn to_pixel(p: &Point2<f64>) -> Point {
    let clamp = |v: f64| v.round().clamp(-COORD_LIMIT, COORD_LIMIT) as i32;
    Point::new(clamp(p.x), clamp(p.y))
}

/// Box edges between corners whose indices differ in exactly one bit.
pub fn draw_box(image: &mut Mat, corners: &[Point2<f64>; 8], color: Scalar) -> opencv::Result<()> {
    for a in 0..8usize {
        for bit in [1, 2, 4] {
            let b = a | bit;
            if b == a {
                continue;
            }
            let (pa, pb) = (&corners[a], &corners[b]);
            if !(pa.x.is_finite() && pa.y.is_finite() && pb.x.is_finite() && pb.y.is_finite()) {
                continue;
            }

            imgproc::line(image, to_pixel(pa), to_pixel(pb), color, 2, imgproc::LINE_8, 0)?;
        }
    }
    Ok(())
}

pub fn draw_keypoints(image: &mut Mat, points: &[Point2<f64>], color: Scalar) -> opencv::Result<()> {
    for p in points.iter().filter(|p| p.x.is_finite() && p.y.is_finite()) {
        imgproc::circle(image, to_pixel(p), 4, color, -1, imgproc::LINE_8, 0)?;
    }
    Ok(())
}

fn blank_mask(size: ImageSize) -> opencv::Result<Mat> {
    Mat::new_rows_cols_with_default(
        size.height as i32,
        size.width as i32,
        core::CV_8UC1,
        Scalar::all(0.),
    )
}

/// Fills every triangle that lies entirely in front of the camera.
pub fn rasterize_mesh_mask(
    mesh: &Mesh,
    transform: &Matrix4<f64>,
    params: &CameraParams,
    size: ImageSize,
) -> opencv::Result<Mat> {
    let mut mask = blank_mask(size)?;

    let depth: Vec<f64> = mesh
        .vertices
        .iter()
        .map(|v| transform.transform_point(v).z)
        .collect();
    let projected = params.project(transform, &mesh.vertices);

    let visible = |i: usize| depth[i] > 0. && projected[i].x.is_finite() && projected[i].y.is_finite();

    let mut triangle = Vector::<Point>::with_capacity(3);
    for face in &mesh.faces {
        if !face.iter().all(|&i| visible(i)) {
            continue;
        }

        triangle.clear();
        for &i in face {
            triangle.push(to_pixel(&projected[i]));
        }
        imgproc::fill_convex_poly(&mut mask, &triangle, Scalar::all(255.), imgproc::LINE_8, 0)?;
    }

    Ok(mask)
}

/// Convex hull of the finite projected points.
pub fn coarse_mask(points: &[Point2<f64>], size: ImageSize) -> opencv::Result<Mat> {
    let mut mask = blank_mask(size)?;

    let pts: Vector<Point> = points
        .iter()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .map(to_pixel)
        .collect();
    if pts.len() < 3 {
        return Ok(mask);
    }

    let mut hull = Vector::<Point>::new();
    imgproc::convex_hull(&pts, &mut hull, false, true)?;
    imgproc::fill_convex_poly(&mut mask, &hull, Scalar::all(255.), imgproc::LINE_8, 0)?;

    Ok(mask)
}

/// Mesh mask, or the coarse hull when the mesh leaves the mask empty.
pub fn object_mask(
    mesh: &Mesh,
    transform: &Matrix4<f64>,
    params: &CameraParams,
    keypoints: &[Point2<f64>],
    size: ImageSize,
) -> opencv::Result<(Mat, MaskTier)> {
    let mask = rasterize_mesh_mask(mesh, transform, params, size)?;
    if core::count_non_zero(&mask)? > 0 {
        return Ok((mask, MaskTier::Mesh));
    }

    Ok((coarse_mask(keypoints, size)?, MaskTier::Coarse))
}

fn to_point_vectors(c: &Correspondences) -> (Vector<Vector<Point3f>>, Vector<Vector<Point2f>>) {
    let object = c
        .object_points()
        .iter()
        .map(|v| v.iter().map(|[x, y, z]| Point3f::new(*x, *y, *z)).collect())
        .collect();
    let image = c
        .image_points()
        .iter()
        .map(|v| v.iter().map(|[x, y]| Point2f::new(*x, *y)).collect())
        .collect();
    (object, image)
}

/// `calibrateCamera` with the default model and termination criteria.
pub struct OpenCvSolver;

impl Solver for OpenCvSolver {
    type Error = opencv::Error;

    fn solve(
        &self,
        correspondences: &Correspondences,
        image_size: ImageSize,
    ) -> opencv::Result<CameraParams> {
        let (object_points, image_points) = to_point_vectors(correspondences);

        let mut camera_matrix = Mat::default();
        let mut dist_coeffs = Mat::default();
        let mut rvecs = Vector::<Mat>::new();
        let mut tvecs = Vector::<Mat>::new();

        let reprojection_error = calib3d::calibrate_camera(
            &object_points,
            &image_points,
            Size::new(image_size.width as i32, image_size.height as i32),
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut rvecs,
            &mut tvecs,
            0,
            TermCriteria::new(
                core::TermCriteria_Type::COUNT as i32 + core::TermCriteria_Type::EPS as i32,
                30,
                f64::EPSILON,
            )?,
        )?;

        let k: Vec<f64> = camera_matrix.to_vec_2d::<f64>()?.into_iter().flatten().collect();
        if k.len() != 9 {
            return Err(error(format!("camera matrix has {} values", k.len())));
        }

        Ok(CameraParams {
            intrinsic: Matrix3::from_row_slice(&k),
            distortion: dist_coeffs.to_vec_2d::<f64>()?.into_iter().flatten().collect(),
            reprojection_error,
        })
    }
}

/// Undistorts with the alpha = 1 optimal matrix and crops to the valid region.
pub fn undistort_cropped(image: &Mat, params: &CameraParams) -> opencv::Result<Mat> {
    let camera = CameraMats::new(params)?;
    let size = image.size()?;

    let mut roi = Rect::default();
    let optimal = calib3d::get_optimal_new_camera_matrix(
        &camera.camera_matrix,
        &camera.dist_coeffs,
        size,
        1.,
        size,
        Some(&mut roi),
        false,
    )?;

    let mut undistorted = Mat::default();
    calib3d::undistort(
        image,
        &mut undistorted,
        &camera.camera_matrix,
        &camera.dist_coeffs,
        &optimal,
    )?;

    if roi.width <= 0 || roi.height <= 0 {
        return Ok(undistorted);
    }

    Mat::roi(&undistorted, roi)?.try_clone()
}

pub fn display_image(image: &Mat, title: &str, destroy: bool) -> opencv::Result<()> {
    highgui::imshow(title, image)?;

    // pressed q
    while !matches!(highgui::wait_key(0), Err(_) | Ok(113)) {}

    if destroy {
        highgui::destroy_window(title)?;
    }

    Ok(())
}
