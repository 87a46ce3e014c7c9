use log::{debug, info};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{fs, io, path::Path};
use thiserror::Error as ThisError;

pub const TRAIN_LIST: &str = "train.txt";
pub const VAL_LIST: &str = "val.txt";
pub const TEST_LIST: &str = "test.txt";
pub const TRAINING_RANGE: &str = "training_range.txt";

#[derive(ThisError, Debug)]
pub enum SplitError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("training image `{0}` has no numeric frame index")]
    MissingIndex(String),
}

/// Shares of the train and val sets; test gets whatever remains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    /// Only reported, the boundaries come from `train` and `val`.
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File names in `dir` (not recursive) ending in `.{extension}`.
pub fn list_images(dir: &Path, extension: &str) -> io::Result<Vec<String>> {
    let suffix = format!(".{extension}");

    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(&suffix) {
                names.push(name.to_string());
            }
        }
    }

    Ok(names)
}

/// Sorts, shuffles with a seeded rng and cuts at the truncated ratio boundaries.
pub fn split(mut names: Vec<String>, ratios: SplitRatios, seed: u64) -> Split {
    names.sort();
    names.shuffle(&mut StdRng::seed_from_u64(seed));

    let n = names.len();
    let boundary = |share: f64| ((share * n as f64) as usize).min(n);

    let train_end = boundary(ratios.train);
    let val_end = boundary(ratios.train + ratios.val).max(train_end);
    debug!("{n} images, cuts at {train_end} and {val_end}");

    let test = names.split_off(val_end);
    let val = names.split_off(train_end);

    Split {
        train: names,
        val,
        test,
    }
}

/// Digits left after dropping `frame_` from the stem, e.g. `frame_0042.png` gives `0042`.
pub fn frame_index(name: &str) -> Option<&str> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    let index = stem.strip_prefix("frame_").unwrap_or(stem);

    (!index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())).then_some(index)
}

fn write_list(path: &Path, items: &[impl AsRef<str>]) -> io::Result<()> {
    let mut text = String::new();
    for item in items {
        text.push_str(item.as_ref());
        text.push('\n');
    }
    fs::write(path, text)?;

    info!("saved {} items to {}", items.len(), path.display());
    Ok(())
}

/// Writes the three lists and the training frame indices.
///
/// Indices are checked first so a bad name leaves `output` untouched.
pub fn write_split(output: &Path, split: &Split) -> Result<(), SplitError> {
    let indices = split
        .train
        .iter()
        .map(|name| frame_index(name).ok_or_else(|| SplitError::MissingIndex(name.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    fs::create_dir_all(output)?;
    write_list(&output.join(TRAIN_LIST), &split.train)?;
    write_list(&output.join(VAL_LIST), &split.val)?;
    write_list(&output.join(TEST_LIST), &split.test)?;
    write_list(&output.join(TRAINING_RANGE), &indices)?;

    Ok(())
}
