use anyhow::{bail, Context, Result};
use log::info;
use opencv::core::Scalar;
use posekit_common::{
    cv::{display_image, draw_keypoints, image_size, read_image, write_image},
    dataset::DatasetLayout,
    label::LabelRecord,
};
use std::path::{Path, PathBuf};

/// Draws the labelled keypoints of one saved frame onto its image.
///
/// Uses `frame` if given, otherwise the first image in sorted order.
pub fn visualize(
    root: &Path,
    frame: Option<&str>,
    save: Option<PathBuf>,
    show: bool,
) -> Result<PathBuf> {
    let layout = DatasetLayout::new(root);

    let stem = match frame {
        Some(f) => f.to_string(),
        None => match layout.image_stems()?.into_iter().next() {
            Some(s) => s,
            None => bail!("no images in {}", layout.images_dir().display()),
        },
    };

    let image = layout.image_path(&stem);
    let label = layout.label_path(&stem);
    let mask = layout.mask_path(&stem);
    for p in [&image, &label, &mask] {
        if !p.is_file() {
            bail!("{} does not exist", p.display());
        }
    }

    let mut img = read_image(&image)?;
    let record = LabelRecord::load(&label)
        .with_context(|| format!("could not parse {}", label.display()))?;

    let keypoints = record.pixel_keypoints(image_size(&img)?);
    draw_keypoints(&mut img, &keypoints, Scalar::new(0., 0., 255., 0.))?;

    let save = save.unwrap_or_else(|| root.join("visualization.png"));
    write_image(&save, &img).with_context(|| format!("could not save {}", save.display()))?;
    info!("{stem}: keypoints drawn to `{}`", save.display());

    if show {
        display_image(&img, &stem, true)?;
    }

    Ok(save)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::{core, prelude::*};
    use std::fs;

    const LABEL: &str = "0 0.5 0.5 0.1 0.1 0.9 0.1 0.9 0.9 0.1 0.9 0.2 0.2 0.8 0.2 0.8 0.8 0.2 0.8 \
                         0.8 0.8 500 500 320 240 160 120 320 240 0 0 0 0 0 0.5\n";

    fn dataset(dir: &Path, with_mask: bool) -> DatasetLayout {
        let layout = DatasetLayout::new(dir);
        layout.create_dirs(false).unwrap();

        let img =
            Mat::new_rows_cols_with_default(240, 320, core::CV_8UC3, Scalar::all(0.)).unwrap();
        write_image(&layout.image_path("frame_5"), &img).unwrap();
        fs::write(layout.label_path("frame_5"), LABEL).unwrap();
        if with_mask {
            write_image(&layout.mask_path("frame_5"), &img).unwrap();
        }
        layout
    }

    #[test]
    fn draws_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        dataset(dir.path(), true);

        let out = visualize(dir.path(), None, None, false).unwrap();
        assert_eq!(out, dir.path().join("visualization.png"));

        let drawn = read_image(&out).unwrap();
        // center keypoint is red
        let px = drawn.at_2d::<core::Vec3b>(120, 160).unwrap();
        assert_eq!(px.0, [0, 0, 255]);
    }

    #[test]
    fn missing_mask_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        dataset(dir.path(), false);

        assert!(visualize(dir.path(), Some("frame_5"), None, false).is_err());
    }
}
