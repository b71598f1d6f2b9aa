use crate::export::check_overwrite;
use anyhow::Result;
use lbibcell_common::{BoundingBox, PolyMesh};
use log::info;
use std::path::{Path, PathBuf};

/// Fails unless `input` is an existing `.vtp` file.
pub fn check_vtp_input(input: &Path) -> Result<()> {
    let is_vtp = input.extension().is_some_and(|e| e == "vtp");
    if !input.is_file() || !is_vtp {
        anyhow::bail!("{} not valid, should be a vtp file, i.e. Cells_4000_0.vtp", input.display());
    }
    Ok(())
}

/// `<dir>/<stem>_cell_id_mod.vtp`
pub fn default_relabel_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    input.with_file_name(format!("{}_cell_id_mod.vtp", stem))
}

/// Sets `cell_type = id` on every cell lying strictly inside `bbox` and writes the result.
pub fn relabel(input: &Path, output: &Path, bbox: &BoundingBox, id: f64, force: bool) -> Result<usize> {
    check_vtp_input(input)?;
    check_overwrite(output, force)?;

    let mut mesh = PolyMesh::read_vtp(input)?;
    let count = mesh.relabel_within_box(bbox, id)?;
    info!(
        "{} of {} cells inside [{}, {}] x [{}, {}] set to cell_type {:.1}",
        count, mesh.polys.len(), bbox.min_x, bbox.max_x, bbox.min_y, bbox.max_y, id
    );
    mesh.write_vtp(output)?;
    info!("Saved to {}", output.display());
    Ok(count)
}

/// Moves every point of the mesh by `dx` along x.
pub fn translate(input: &Path, output: &Path, dx: f64, force: bool) -> Result<()> {
    check_vtp_input(input)?;
    check_overwrite(output, force)?;

    let mut mesh = PolyMesh::read_vtp(input)?;
    mesh.translate_x(dx);
    mesh.write_vtp(output)?;
    info!("{} moved {} in x direction", input.display(), dx);
    info!("Saved to {}", output.display());
    Ok(())
}
