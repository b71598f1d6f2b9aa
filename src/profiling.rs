//! Concentration profiles along y and exponential-decay fits on them.

use anyhow::{Context, Result};
use lbibcell_common::decay::{self, DecayModel, FitResult};
use lbibcell_common::solver::{infer_grid_size, list_matrix_files, list_solver_outputs, read_solver_matrix};
use lbibcell_common::{npy, ConcentrationMatrix, PolyMesh, Profile, ProfileMode};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

const TO_FIT_SUFFIX: &str = "_to_fit";

/// Position of the morphogen source in lattice units. `x` falls back to the grid middle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcePosition {
    pub x: Option<f64>,
    pub y: f64,
}

impl SourcePosition {
    /// Explicit coordinates win; otherwise the mean centroid of `cell_type` cells in `mesh`.
    pub fn resolve(x: Option<f64>, y: Option<f64>, mesh: Option<&Path>, cell_type: f64) -> Result<Self> {
        let from_mesh = match mesh {
            Some(path) => {
                let set = PolyMesh::read_vtp(path)?.centroids_of_type(cell_type)?;
                info!("{} of {} cells are type: {:.1}", set.centroids.len(), set.total_cells, cell_type);
                let mean = set
                    .mean()
                    .with_context(|| format!("no source cell of type {:.1} in {}", cell_type, path.display()))?;
                Some(mean)
            }
            None => None,
        };
        match (y, from_mesh) {
            (Some(y), _) => Ok(SourcePosition { x: x.or(from_mesh.map(|m| m.0)), y }),
            (None, Some((mx, my))) => Ok(SourcePosition { x: x.or(Some(mx)), y: my }),
            (None, None) => anyhow::bail!("give either --source-y or --source-mesh"),
        }
    }
}

/// Matrices to profile: a single file, or every converted (else raw) dump of a directory.
pub fn collect_inputs(input: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let files = match list_matrix_files(input, prefix) {
        Ok(files) => files,
        Err(_) => list_solver_outputs(input, prefix)?,
    };
    Ok(files.into_iter().map(|f| f.path).collect())
}

fn load_matrix(path: &Path, size: Option<(usize, usize)>, column: usize) -> Result<ConcentrationMatrix> {
    if path.extension().is_some_and(|e| e == "npy") {
        return npy::read_matrix(path);
    }
    let (size_x, size_y) = match size {
        Some(size) => size,
        None => infer_grid_size(path)?,
    };
    read_solver_matrix(path, size_x, size_y, column)
}

/// `<dir>/<stem>_to_fit.txt`
pub fn to_fit_path(matrix: &Path) -> PathBuf {
    let stem = matrix.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    matrix.with_file_name(format!("{}{}.txt", stem, TO_FIT_SUFFIX))
}

/// Writes the profile of every input next to it. Returns the profile files written.
pub fn write_profiles(
    inputs: &[PathBuf],
    source: SourcePosition,
    mode: ProfileMode,
    size: Option<(usize, usize)>,
    column: usize,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(inputs.len());
    for path in inputs {
        info!("Reading concentration from {}", path.display());
        let result = load_matrix(path, size, column).and_then(|mat| {
            let source_x = source.x.unwrap_or(mat.size_x as f64 / 2.0);
            Profile::from_matrix(&mat, mode, source_x, source.y)
        });
        let profile = match result {
            Ok(profile) => profile,
            Err(e) => {
                error!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        let out = to_fit_path(path);
        profile.save(&out)?;
        info!("Saving values for fitting to {}", out.display());
        written.push(out);
    }
    if written.is_empty() {
        anyhow::bail!("no profile could be computed from {} input(s)", inputs.len());
    }
    Ok(written)
}

/// `Cells_10_to_fit.txt` -> `Cells_10_fit.toml`
pub fn fit_output_path(profile: &Path) -> PathBuf {
    let stem = profile.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let base = stem.strip_suffix(TO_FIT_SUFFIX).unwrap_or(&stem);
    profile.with_file_name(format!("{}_fit.toml", base))
}

/// Fits `model` to the downstream part of a saved profile.
pub fn fit_profile(path: &Path, model: DecayModel, p0: &[f64], max_evaluations: usize) -> Result<FitResult> {
    let profile = Profile::load(path)?.downstream();
    if profile.is_empty() {
        anyhow::bail!("{} has no points downstream of the source", path.display());
    }
    info!("Fitting {:?} to {} points from {}", model, profile.len(), path.display());
    let result = decay::fit(model, &profile.distance, &profile.value, p0, max_evaluations)?;
    if !result.converged {
        warn!("fit for {} did not converge; parameters may be unreliable", path.display());
    }
    Ok(result)
}

pub fn save_fit(result: &FitResult, path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(result).map_err(|e| anyhow::anyhow!("Failed to serialize fit: {}", e))?;
    std::fs::write(path, text).map_err(|e| anyhow::anyhow!("Failed to write fit '{}': {}", path.display(), e))?;
    info!("Fit saved to {}", path.display());
    Ok(())
}
