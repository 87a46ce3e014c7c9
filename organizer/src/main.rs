use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use posekit_common::logger;
use posekit_organizer::{
    split::{self, list_images},
    strip_pose_labels, write_split, SplitRatios,
};
use std::path::PathBuf;

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
    /// Strips the pose fields from label files (35 values to 29)
    Relabel {
        /// Label directory, searched recursively
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to mirror the stripped labels into
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Splits an image directory into train/val/test lists
    Split {
        /// Image directory
        #[arg(long)]
        images: PathBuf,

        /// Directory for the list files
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value_t = 0.8)]
        train: f64,

        #[arg(long, default_value_t = 0.1)]
        val: f64,

        #[arg(long, default_value_t = 0.1)]
        test: f64,

        /// Shuffle seed
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Image file extension
        #[arg(long, default_value = "png")]
        extension: String,
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
        Command::Relabel { input, output } => {
            let report = strip_pose_labels(&input, &output)?;
            if !report.skipped.is_empty() {
                info!("{} files had an unexpected format", report.skipped.len());
            }
        }

        Command::Split {
            images,
            output,
            train,
            val,
            test,
            seed,
            extension,
        } => {
            let names = list_images(&images, &extension)
                .with_context(|| format!("could not list {}", images.display()))?;

            let split = split::split(names, SplitRatios { train, val, test }, seed);
            info!(
                "{} images: {} train, {} val, {} test",
                split.len(),
                split.train.len(),
                split.val.len(),
                split.test.len()
            );

            write_split(&output, &split)?;
        }
    }

    Ok(())
}
