mod builder;
mod visualize;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;
use posekit_common::{
    board::{BoardSpec, Dictionary},
    logger, parse_triple, RigidOffset,
};
use std::path::PathBuf;

/// Pose dataset builder
#[derive(Parser)]
struct Args {
    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extracts labelled frames from a video of the object on its board
    Build {
        /// Object mesh (PLY)
        #[arg(long)]
        mesh: PathBuf,

        /// Camera parameter file
        #[arg(long, default_value = "camera_params.json")]
        camera: PathBuf,

        /// Input video
        #[arg(long)]
        video: PathBuf,

        /// Dataset root
        #[arg(short, long, default_value = "dataset")]
        output: PathBuf,

        #[arg(long, default_value_t = 8)]
        squares_x: u8,

        #[arg(long, default_value_t = 5)]
        squares_y: u8,

        /// Side of a chessboard square (m)
        #[arg(long, default_value_t = 0.034)]
        square_length: f64,

        /// Side of a marker (m)
        #[arg(long, default_value_t = 0.021)]
        marker_length: f64,

        #[arg(long, default_value = "DICT_6X6_50")]
        dictionary: Dictionary,

        /// Board to object rotation, x,y,z degrees
        #[arg(long, default_value = "180,180,-90", value_parser = parse_triple, allow_hyphen_values = true)]
        rotation_offset: [f64; 3],

        /// Board to object translation, x,y,z metres
        #[arg(long, default_value = "0.145,0.095,0.0", value_parser = parse_triple, allow_hyphen_values = true)]
        translation_offset: [f64; 3],

        #[arg(long, default_value_t = 0)]
        class_id: u32,

        /// Fewest ChArUco corners to attempt a pose with
        #[arg(long, default_value_t = 4)]
        min_board_corners: usize,

        /// Also save frames with the board and the projected box drawn
        #[arg(long)]
        annotate: bool,
    },

    /// Draws the labelled keypoints of a saved frame
    Visualize {
        /// Dataset root
        #[arg(short, long, default_value = "dataset")]
        output: PathBuf,

        /// Frame stem, e.g. frame_12 (defaults to the first one)
        #[arg(long)]
        frame: Option<String>,

        /// Where to save the overlay (defaults to <root>/visualization.png)
        #[arg(long)]
        save: Option<PathBuf>,

        /// Open a window with the overlay, close with q
        #[arg(long)]
        show: bool,
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

fn run(command: Command) -> Result<()> {
    match command {
        Command::Build {
            mesh,
            camera,
            video,
            output,
            squares_x,
            squares_y,
            square_length,
            marker_length,
            dictionary,
            rotation_offset,
            translation_offset,
            class_id,
            min_board_corners,
            annotate,
        } => {
            let config = builder::Config {
                mesh,
                camera,
                video,
                output,
                board: BoardSpec {
                    squares_x,
                    squares_y,
                    square_length,
                    marker_length,
                    dictionary,
                },
                offset: RigidOffset::new(rotation_offset, translation_offset),
                class_id,
                min_board_corners,
                annotate,
            };

            builder::build(&config)?;
        }

        Command::Visualize {
            output,
            frame,
            save,
            show,
        } => {
            visualize::visualize(&output, frame.as_deref(), save, show)?;
        }
    }

    Ok(())
}
