use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use nalgebra::{Point2, Point3};
use opencv::{core::Scalar, prelude::*};
use posekit_common::{
    board::BoardSpec,
    cv::{
        draw_board, draw_box, draw_frame_axes, draw_keypoints, image_size, object_mask,
        write_image, BoardDetector, CameraMats, VideoFrames,
    },
    dataset::{frame_stem, out_of_bounds, DatasetLayout, FrameWriter, MaskTier},
    label::{LabelRecord, KEYPOINTS},
    mesh::Mesh,
    CameraParams, RigidOffset,
};
use std::{fs, path::PathBuf};

/// Board axes drawn on annotated frames (m).
const AXIS_LENGTH: f32 = 0.05;

pub struct Config {
    pub mesh: PathBuf,
    pub camera: PathBuf,
    pub video: PathBuf,
    pub output: PathBuf,
    pub board: BoardSpec,
    pub offset: RigidOffset,
    pub class_id: u32,
    pub min_board_corners: usize,
    pub annotate: bool,
}

/// Everything a frame is processed against.
pub struct Scene {
    mesh: Mesh,
    corners: [Point3<f64>; 8],
    keypoints: [Point3<f64>; KEYPOINTS],
    params: CameraParams,
    camera: CameraMats,
    offset: RigidOffset,
    detector: BoardDetector,
    class_id: u32,
}

pub struct FrameOutput {
    pub label: LabelRecord,
    pub mask: Mat,
    pub tier: MaskTier,
    pub annotated: Option<Mat>,
}

impl Scene {
    pub fn new(
        mesh: Mesh,
        params: CameraParams,
        board: &BoardSpec,
        offset: RigidOffset,
        class_id: u32,
        min_board_corners: usize,
    ) -> Result<Self> {
        let (Some(corners), Some(keypoints)) = (mesh.corners(), mesh.keypoints()) else {
            return Err(anyhow!("mesh has no vertices"));
        };

        Ok(Self {
            camera: CameraMats::new(&params)?,
            detector: BoardDetector::new(board, min_board_corners)?,
            mesh,
            corners,
            keypoints,
            params,
            offset,
            class_id,
        })
    }

    pub fn load(config: &Config) -> Result<Self> {
        let mesh = Mesh::load_ply(&config.mesh)
            .with_context(|| format!("could not load mesh {}", config.mesh.display()))?;
        if let Some((lo, hi)) = mesh.bounds() {
            info!(
                "mesh: {} vertices, {} faces, x {:.4}..{:.4}, y {:.4}..{:.4}, z {:.4}..{:.4}",
                mesh.vertices.len(),
                mesh.faces.len(),
                lo.x,
                hi.x,
                lo.y,
                hi.y,
                lo.z,
                hi.z
            );
        }

        let params = CameraParams::load(&config.camera)
            .with_context(|| format!("could not load camera {}", config.camera.display()))?;

        debug!("offset transform:{}", config.offset.to_matrix());

        Self::new(
            mesh,
            params,
            &config.board,
            config.offset,
            config.class_id,
            config.min_board_corners,
        )
    }

    /// `None` when the board pose cannot be recovered from this frame.
    pub fn process_frame(
        &self,
        index: usize,
        frame: &Mat,
        annotate: bool,
    ) -> opencv::Result<Option<FrameOutput>> {
        let size = image_size(frame)?;
        if size.is_empty() {
            return Ok(None);
        }

        let Some((found, board_pose)) = self.detector.detect_pose(frame, &self.camera)? else {
            return Ok(None);
        };
        debug!("frame {index}: board {board_pose}");

        let object = self.offset.compose(&board_pose);
        debug!("frame {index}: object transform:{object}");

        let corners = self.params.project(&object, &self.corners);
        let Ok(keypoints) = <[Point2<f64>; KEYPOINTS]>::try_from(
            self.params.project(&object, &self.keypoints),
        ) else {
            return Ok(None);
        };
        debug!("frame {index}: keypoints {keypoints:?}");

        for p in out_of_bounds(&keypoints, size) {
            warn!(
                "frame {index}: keypoint ({:.1}, {:.1}) outside the {size} image",
                p.x, p.y
            );
        }

        let (mask, tier) = object_mask(&self.mesh, &object, &self.params, &keypoints, size)?;
        if tier == MaskTier::Coarse {
            warn!("frame {index}: mesh mask empty, using convex hull of the keypoints");
        }

        let label = LabelRecord::build(self.class_id, &keypoints, &self.params, size, &object);

        let annotated = if annotate {
            let mut img = frame.try_clone()?;
            draw_board(&mut img, &found)?;
            draw_frame_axes(&mut img, &self.camera, &board_pose, AXIS_LENGTH)?;
            if let Ok(corners) = <[Point2<f64>; 8]>::try_from(corners) {
                draw_box(&mut img, &corners, Scalar::new(255., 0., 0., 0.))?;
            }
            draw_keypoints(&mut img, &keypoints, Scalar::new(0., 0., 255., 0.))?;
            Some(img)
        } else {
            None
        };

        Ok(Some(FrameOutput {
            label,
            mask,
            tier,
            annotated,
        }))
    }
}

/// Writes a frame's files; on failure the ones already written are removed.
pub fn save_frame(
    layout: &DatasetLayout,
    stem: &str,
    frame: &Mat,
    output: &FrameOutput,
) -> Result<()> {
    let mut writer = FrameWriter::new();

    writer.write(layout.image_path(stem), |p| write_image(p, frame))?;
    writer.write(layout.mask_path(stem), |p| write_image(p, &output.mask))?;
    writer.write(layout.label_path(stem), |p| fs::write(p, output.label.to_line()))?;
    if let Some(img) = &output.annotated {
        writer.write(layout.annotated_path(stem), |p| write_image(p, img))?;
    }

    writer.commit();
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub read: usize,
    pub saved: usize,
    pub skipped: usize,
    pub coarse_masks: usize,
}

pub fn build(config: &Config) -> Result<Summary> {
    let scene = Scene::load(config)?;

    let layout = DatasetLayout::new(&config.output);
    layout
        .create_dirs(config.annotate)
        .with_context(|| format!("could not create {}", config.output.display()))?;

    let frames = VideoFrames::open(&config.video)
        .with_context(|| format!("could not open {}", config.video.display()))?;

    let mut summary = Summary::default();
    for frame in frames {
        let (i, frame) = match frame {
            Ok(f) => f,
            Err(e) => {
                warn!("stopped reading video: {e}");
                break;
            }
        };
        summary.read += 1;

        if frame.empty() {
            warn!("frame {i}: empty, skipping");
            summary.skipped += 1;
            continue;
        }

        let output = match scene.process_frame(i, &frame, config.annotate) {
            Ok(Some(o)) => o,
            Ok(None) => {
                warn!("frame {i}: board pose not found, skipping");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!("frame {i}: {e}, skipping");
                summary.skipped += 1;
                continue;
            }
        };

        let stem = frame_stem(i);
        save_frame(&layout, &stem, &frame, &output)
            .with_context(|| format!("could not save frame {i}"))?;

        summary.saved += 1;
        if output.tier == MaskTier::Coarse {
            summary.coarse_masks += 1;
        }
        debug!("frame {i}: saved as {stem}");
    }

    if summary.saved == 0 {
        warn!("no images were saved, check board detection");
    }

    let checked = layout.verify_integrity()?;
    info!(
        "read {} frames: {} saved, {} skipped, {} coarse masks; {checked} complete triplets in {}",
        summary.read,
        summary.saved,
        summary.skipped,
        summary.coarse_masks,
        config.output.display()
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Matrix4};
    use opencv::core::{self, Scalar};
    use posekit_common::{board::Dictionary, ImageSize, Pose};

    fn params() -> CameraParams {
        CameraParams {
            intrinsic: Matrix3::new(500., 0., 160., 0., 500., 120., 0., 0., 1.),
            distortion: vec![0.; 5],
            reprojection_error: 0.2,
        }
    }

    fn board() -> BoardSpec {
        BoardSpec {
            squares_x: 8,
            squares_y: 5,
            square_length: 0.034,
            marker_length: 0.021,
            dictionary: Dictionary::Dict6x6_50,
        }
    }

    fn cube() -> Mesh {
        let mut vertices = vec![];
        for i in 0..8 {
            vertices.push(Point3::new(
                if i & 4 == 0 { -0.02 } else { 0.02 },
                if i & 2 == 0 { -0.02 } else { 0.02 },
                if i & 1 == 0 { -0.02 } else { 0.02 },
            ));
        }
        Mesh {
            vertices,
            faces: vec![[0, 1, 3], [0, 3, 2], [4, 5, 7], [4, 7, 6]],
        }
    }

    fn blank(rows: i32, cols: i32) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC3, Scalar::all(0.)).unwrap()
    }

    fn output() -> FrameOutput {
        let object: Matrix4<f64> =
            Pose::new(Default::default(), [0., 0., 0.5].into()).to_matrix();
        let keypoints = [Point2::new(160., 120.); KEYPOINTS];

        FrameOutput {
            label: LabelRecord::build(0, &keypoints, &params(), ImageSize::new(320, 240), &object),
            mask: Mat::new_rows_cols_with_default(240, 320, core::CV_8UC1, Scalar::all(0.))
                .unwrap(),
            tier: MaskTier::Mesh,
            annotated: None,
        }
    }

    #[test]
    fn blank_frame_is_skipped() {
        let scene = Scene::new(
            cube(),
            params(),
            &board(),
            RigidOffset::new([180., 180., -90.], [0.145, 0.095, 0.]),
            0,
            4,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.create_dirs(true).unwrap();

        let frame = blank(240, 320);
        let output = scene.process_frame(0, &frame, true).unwrap();
        if let Some(output) = &output {
            save_frame(&layout, &frame_stem(0), &frame, output).unwrap();
        }
        assert!(output.is_none());

        assert!(layout.image_stems().unwrap().is_empty());
        assert_eq!(layout.verify_integrity().unwrap(), 0);
        for d in [
            layout.images_dir(),
            layout.masks_dir(),
            layout.labels_dir(),
            layout.annotated_dir(),
        ] {
            assert_eq!(fs::read_dir(d).unwrap().count(), 0);
        }
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let empty = Mesh {
            vertices: vec![],
            faces: vec![],
        };
        assert!(Scene::new(empty, params(), &board(), RigidOffset::new([0.; 3], [0.; 3]), 0, 4)
            .is_err());
    }

    #[test]
    fn saves_complete_triplet() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.create_dirs(false).unwrap();

        save_frame(&layout, "frame_3", &blank(240, 320), &output()).unwrap();

        assert_eq!(layout.verify_integrity().unwrap(), 1);
        let label = fs::read_to_string(layout.label_path("frame_3")).unwrap();
        assert_eq!(label.split_whitespace().count(), 35);
    }

    #[test]
    fn failed_save_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        fs::create_dir_all(layout.images_dir()).unwrap();
        fs::create_dir_all(layout.masks_dir()).unwrap();

        // labels/ is missing, so the last write fails
        assert!(save_frame(&layout, "frame_0", &blank(240, 320), &output()).is_err());

        assert!(!layout.image_path("frame_0").exists());
        assert!(!layout.mask_path("frame_0").exists());
        assert_eq!(layout.verify_integrity().unwrap(), 0);
    }
}
