use anyhow::{Context, Result};
use log::{debug, info, warn};
use opencv::{core::Mat, objdetect::ArucoDetector, prelude::*};
use posekit_common::{
    board::Dictionary,
    calibration::{AcceptanceCriteria, CalibrationPattern, CalibrationSession, Rejection},
    cv::{
        detect_markers, image_size, marker_detector, read_image, to_gray, undistort_cropped,
        write_image, OpenCvSolver, VideoFrames,
    },
    CameraParams,
};
use std::path::PathBuf;

pub struct UndistortTest {
    pub input: PathBuf,
    pub output: PathBuf,
}

pub struct Config {
    pub video: PathBuf,
    pub output: PathBuf,
    pub pattern: CalibrationPattern,
    pub dictionary: Dictionary,
    pub criteria: AcceptanceCriteria,
    pub max_reprojection_error: f64,
    pub undistort: Option<UndistortTest>,
}

#[derive(Debug, Default)]
struct Stats {
    read: usize,
    empty: usize,
    rejected: usize,
    accepted: usize,
}

/// Detects markers in one frame and offers them to the session.
fn observe_frame(
    detector: &ArucoDetector,
    session: &mut CalibrationSession,
    index: usize,
    frame: &Mat,
) -> opencv::Result<Result<usize, Rejection>> {
    let size = image_size(frame)?;
    let markers = detect_markers(detector, &to_gray(frame)?)?;
    debug!(
        "frame {index}: {} markers, {} distinct ids",
        markers.ids.len(),
        markers.distinct_ids()
    );

    Ok(session.observe(index, size, markers.distinct_ids(), &markers.corner_groups()))
}

fn collect(config: &Config) -> Result<CalibrationSession> {
    let detector = marker_detector(config.dictionary)?;
    let mut session = CalibrationSession::new(config.pattern, config.criteria);
    let mut stats = Stats::default();

    let frames = VideoFrames::open(&config.video)
        .with_context(|| format!("could not open {}", config.video.display()))?;

    for frame in frames {
        let (i, frame) = match frame {
            Ok(f) => f,
            Err(e) => {
                warn!("stopped reading video: {e}");
                break;
            }
        };
        stats.read += 1;

        if frame.empty() {
            warn!("frame {i}: empty, skipping");
            stats.empty += 1;
            continue;
        }

        match observe_frame(&detector, &mut session, i, &frame) {
            Ok(Ok(_)) => stats.accepted += 1,
            Ok(Err(reason)) => {
                warn!("frame {i}: {reason}");
                stats.rejected += 1;
            }
            Err(e) => {
                warn!("frame {i}: {e}, skipping");
                stats.rejected += 1;
            }
        }
    }

    info!(
        "read {} frames: {} accepted, {} rejected, {} empty",
        stats.read, stats.accepted, stats.rejected, stats.empty
    );

    Ok(session)
}

pub fn calibrate(config: &Config) -> Result<CameraParams> {
    let session = collect(config)?;

    let params = session.finish(&OpenCvSolver, config.max_reprojection_error)?;

    info!("reprojection error: {:.4} px", params.reprojection_error);
    info!("camera matrix: {}", params.intrinsic);
    info!("distortion: {:?}", params.distortion);

    params
        .save(&config.output)
        .with_context(|| format!("could not save {}", config.output.display()))?;
    info!("camera parameters saved to `{}`", config.output.display());

    if let Some(test) = &config.undistort {
        undistort_test(test, &params)?;
    }

    Ok(params)
}

fn undistort_test(test: &UndistortTest, params: &CameraParams) -> Result<()> {
    if !test.input.is_file() {
        warn!(
            "undistortion test image {} not found, skipping",
            test.input.display()
        );
        return Ok(());
    }

    let img = read_image(&test.input)?;
    let undistorted = undistort_cropped(&img, params)?;
    write_image(&test.output, &undistorted)
        .with_context(|| format!("could not save {}", test.output.display()))?;

    info!("undistorted test image saved to `{}`", test.output.display());
    Ok(())
}
