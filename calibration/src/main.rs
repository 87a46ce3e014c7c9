mod calibrate;
mod generate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;
use posekit_common::{
    board::{BoardSpec, Dictionary, PaperFormat, PrintLayout},
    calibration::{AcceptanceCriteria, CalibrationPattern},
    logger,
};
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// The action to take
    #[command(subcommand)]
    command: CLICommand,
}

#[derive(Subcommand)]
enum CLICommand {
    /// Generates a printable ChArUco board image
    Generate {
        /// File name to save generated board to
        #[arg(long, default_value = "charuco_8x5_A4.png")]
        file: PathBuf,

        /// Number of squares along the x axis
        #[arg(long, default_value_t = 8)]
        squares_x: u8,

        /// Number of squares along the y axis
        #[arg(long, default_value_t = 5)]
        squares_y: u8,

        /// Side of a chessboard square (m)
        #[arg(long, default_value_t = 0.035)]
        square_length: f64,

        /// Side of a marker (m)
        #[arg(long, default_value_t = 0.013)]
        marker_length: f64,

        /// Predefined ArUco dictionary
        #[arg(long, default_value = "DICT_4X4_50")]
        dictionary: Dictionary,

        /// Paper format (a3, a4, letter)
        #[arg(long, default_value = "a4")]
        paper: PaperFormat,

        /// Print resolution
        #[arg(long, default_value_t = 300)]
        dpi: u32,

        /// Margin around the generated image (px)
        #[arg(long, default_value_t = 20)]
        margin: u16,

        /// Width of the marker borders (bits)
        #[arg(long, default_value_t = 1)]
        border_bits: u8,
    },

    /// Acquire camera parameters from a video of the board
    Calibrate {
        /// Calibration video
        #[arg(long)]
        video: PathBuf,

        /// Camera parameter file to write
        #[arg(short, long, default_value = "camera_params.json")]
        output: PathBuf,

        /// Side of a calibration grid square (m)
        #[arg(long, default_value_t = 0.0235)]
        square_size: f32,

        /// Calibration grid width
        #[arg(long, default_value_t = 4)]
        pattern_width: u8,

        /// Calibration grid height
        #[arg(long, default_value_t = 5)]
        pattern_height: u8,

        /// Predefined ArUco dictionary
        #[arg(long, default_value = "DICT_6X6_50")]
        dictionary: Dictionary,

        /// A frame needs more distinct marker ids than this
        #[arg(long, default_value_t = 5)]
        min_marker_ids: usize,

        /// A frame needs more marker corner groups than this
        #[arg(long, default_value_t = 10)]
        min_corner_groups: usize,

        /// Minimum share of unique corners in an accepted frame
        #[arg(long, default_value_t = 0.8)]
        min_unique_ratio: f64,

        /// Reject calibrations with a larger reprojection error (px)
        #[arg(long, default_value_t = 5.0)]
        max_reprojection_error: f64,

        /// Image to undistort with the result
        #[arg(long)]
        undistort_test: Option<PathBuf>,

        /// Where to save the undistorted test image
        #[arg(long, default_value = "calibresult.png")]
        undistorted_output: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    logger::init(args.log_level.as_deref());

    if let Err(e) = run(args.command) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(command: CLICommand) -> Result<()> {
    match command {
        CLICommand::Generate {
            file,
            squares_x,
            squares_y,
            square_length,
            marker_length,
            dictionary,
            paper,
            dpi,
            margin,
            border_bits,
        } => generate::export_board(
            &BoardSpec {
                squares_x,
                squares_y,
                square_length,
                marker_length,
                dictionary,
            },
            &PrintLayout {
                paper,
                dpi,
                margin,
                border_bits,
            },
            &file,
        ),

        CLICommand::Calibrate {
            video,
            output,
            square_size,
            pattern_width,
            pattern_height,
            dictionary,
            min_marker_ids,
            min_corner_groups,
            min_unique_ratio,
            max_reprojection_error,
            undistort_test,
            undistorted_output,
        } => {
            let config = calibrate::Config {
                video,
                output,
                pattern: CalibrationPattern {
                    width: pattern_width,
                    height: pattern_height,
                    square_size,
                },
                dictionary,
                criteria: AcceptanceCriteria {
                    min_marker_ids,
                    min_corner_groups,
                    min_unique_ratio,
                },
                max_reprojection_error,
                undistort: undistort_test.map(|input| calibrate::UndistortTest {
                    input,
                    output: undistorted_output,
                }),
            };

            calibrate::calibrate(&config).map(|_| ())
        }
    }
}
