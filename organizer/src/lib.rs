//! Post-processing of generated datasets: label rewriting and train/val/test lists.

pub mod relabel;
pub mod split;

pub use relabel::{strip_pose_labels, RelabelError, RelabelReport};
pub use split::{split, write_split, Split, SplitError, SplitRatios};
