//! On-disk layout of a generated dataset.
//!
//! ```text
//! <root>/images/frame_K.png
//! <root>/mask/frame_K.png
//! <root>/labels/frame_K.txt
//! <root>/annotated/frame_K.png   (optional)
//! ```

use crate::ImageSize;
use log::warn;
use nalgebra::Point2;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;

pub const IMAGE_EXTENSION: &str = "png";
pub const LABEL_EXTENSION: &str = "txt";

#[derive(Debug, ThisError)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("label file {0} does not exist")]
    MissingLabel(PathBuf),

    #[error("mask file {0} does not exist")]
    MissingMask(PathBuf),
}

/// Which mask strategy produced a frame's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskTier {
    /// Every mesh triangle rasterized.
    Mesh,
    /// Convex hull of the projected keypoints.
    Coarse,
}

impl std::fmt::Display for MaskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MaskTier::Mesh => "mesh",
            MaskTier::Coarse => "coarse",
        })
    }
}

pub fn frame_stem(index: usize) -> String {
    format!("frame_{index}")
}

#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.root.join("mask")
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.root.join("labels")
    }

    pub fn annotated_dir(&self) -> PathBuf {
        self.root.join("annotated")
    }

    pub fn create_dirs(&self, annotated: bool) -> io::Result<()> {
        fs::create_dir_all(self.images_dir())?;
        fs::create_dir_all(self.masks_dir())?;
        fs::create_dir_all(self.labels_dir())?;
        if annotated {
            fs::create_dir_all(self.annotated_dir())?;
        }
        Ok(())
    }

    pub fn image_path(&self, stem: &str) -> PathBuf {
        self.images_dir().join(format!("{stem}.{IMAGE_EXTENSION}"))
    }

    pub fn mask_path(&self, stem: &str) -> PathBuf {
        self.masks_dir().join(format!("{stem}.{IMAGE_EXTENSION}"))
    }

    pub fn label_path(&self, stem: &str) -> PathBuf {
        self.labels_dir().join(format!("{stem}.{LABEL_EXTENSION}"))
    }

    pub fn annotated_path(&self, stem: &str) -> PathBuf {
        self.annotated_dir().join(format!("{stem}.{IMAGE_EXTENSION}"))
    }

    /// Stems of the saved images, sorted. A missing image directory is empty.
    pub fn image_stems(&self) -> io::Result<Vec<String>> {
        let dir = match fs::read_dir(self.images_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut stems = vec![];
        for entry in dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IMAGE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Every saved image must have a label and a mask; returns the image count.
    pub fn verify_integrity(&self) -> Result<usize, IntegrityError> {
        let stems = self.image_stems()?;

        for stem in &stems {
            let label = self.label_path(stem);
            if !label.is_file() {
                return Err(IntegrityError::MissingLabel(label));
            }

            let mask = self.mask_path(stem);
            if !mask.is_file() {
                return Err(IntegrityError::MissingMask(mask));
            }
        }

        Ok(stems.len())
    }
}

/// Writes a frame's files as a unit: unless committed, everything written
/// through it is removed again on drop.
#[derive(Debug, Default)]
pub struct FrameWriter {
    written: Vec<PathBuf>,
    committed: bool,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<E>(
        &mut self,
        path: PathBuf,
        f: impl FnOnce(&Path) -> Result<(), E>,
    ) -> Result<(), E> {
        // tracked before writing so a half-written file is cleaned up too
        self.written.push(path);
        let path = &self.written[self.written.len() - 1];
        f(path)
    }

    pub fn commit(mut self) -> Vec<PathBuf> {
        self.committed = true;
        std::mem::take(&mut self.written)
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.written {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("could not remove partial output {}: {e}", path.display());
                }
            }
        }
    }
}

/// Points that fall outside the image.
pub fn out_of_bounds(points: &[Point2<f64>], size: ImageSize) -> Vec<Point2<f64>> {
    points
        .iter()
        .filter(|p| !size.contains(p.x, p.y))
        .copied()
        .collect()
}
