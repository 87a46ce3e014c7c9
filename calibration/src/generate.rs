use anyhow::{Context, Result};
use log::info;
use posekit_common::{
    board::{BoardSpec, PrintLayout},
    cv::{render_board, write_image},
};
use std::path::Path;

/// Renders the board and writes it; nothing is written if rendering fails.
pub fn export_board(spec: &BoardSpec, layout: &PrintLayout, file: &Path) -> Result<()> {
    let img = render_board(spec, layout).context("could not generate board")?;
    write_image(file, &img).with_context(|| format!("could not save {}", file.display()))?;

    let (width, height) = layout.size()?;
    info!(
        "{}x{} {} board exported to `{}` ({width}x{height} px at {} dpi)",
        spec.squares_x,
        spec.squares_y,
        spec.dictionary,
        file.display(),
        layout.dpi,
    );

    Ok(())
}
