use anyhow::{Context, Result};
use lbibcell_common::solver::{infer_grid_size, list_solver_outputs, read_solver_matrix_with_range};
use lbibcell_common::{npy, FrameEntry, SeriesSummary, SolverConfig, SolverFile, ValueRange};
use log::{debug, error, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

const MANY_FILES: usize = 30;

/// Converts a directory of solver dumps into `.npy` matrices sharing one range.
pub struct SolverProcessor {
    dir: PathBuf,
    solver: SolverConfig,
    size_x: usize,
    size_y: usize,
    files: Vec<SolverFile>,
}

impl SolverProcessor {
    /// Lists the dumps in `dir`. Without an explicit size, the grid is read off the first dump.
    pub fn new<P: AsRef<Path>>(dir: P, solver: SolverConfig, size: Option<(usize, usize)>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let files = list_solver_outputs(&dir, &solver.file_prefix)?;
        if files.len() > MANY_FILES {
            info!("Dealing with {} files, this may take a while.", files.len());
        }

        let (size_x, size_y) = match size {
            Some(size) => size,
            None => {
                let first = dir.join(format!("{}0.txt", solver.file_prefix));
                let first = if first.exists() { first } else { files[0].path.clone() };
                infer_grid_size(&first)
                    .with_context(|| format!("Cannot infer the grid size from {}", first.display()))?
            }
        };
        if size_x == 0 || size_y == 0 {
            anyhow::bail!("grid size must be positive, got {} x {}", size_x, size_y);
        }
        info!("LB grid: {} x {} nodes, {} dumps in {}", size_x, size_y, files.len(), dir.display());

        Ok(SolverProcessor { dir, solver, size_x, size_y, files })
    }

    pub fn files(&self) -> &[SolverFile] {
        &self.files
    }

    pub fn grid_size(&self) -> (usize, usize) {
        (self.size_x, self.size_y)
    }

    fn convert_one(&self, file: &SolverFile, column: usize) -> Result<ValueRange> {
        let (mat, range) = read_solver_matrix_with_range(&file.path, self.size_x, self.size_y, column)?;
        npy::write_matrix(file.with_extension("npy"), &mat)?;
        debug!("{} -> {}.npy ({:e}..{:e})", file.path.display(), file.stem(), range.min, range.max);
        Ok(range)
    }

    /// Writes `<stem>.npy` next to every dump plus `summary.toml` with the series range.
    /// A dump that fails to parse is logged and left out of the summary.
    pub fn save_npy(&self) -> Result<SeriesSummary> {
        let column = self.solver.concentration_column;
        let results: Vec<(SolverFile, Result<ValueRange>)> = self
            .files
            .par_iter()
            .map(|file| (file.clone(), self.convert_one(file, column)))
            .collect();

        let mut range = ValueRange::default();
        let mut frames = Vec::with_capacity(results.len());
        for (file, result) in results {
            match result {
                Ok(r) => {
                    range = range.merge(r);
                    frames.push(FrameEntry { step: file.step, npy: format!("{}.npy", file.stem()) });
                }
                Err(e) => error!("Skipping {}: {:#}", file.path.display(), e),
            }
        }
        if frames.is_empty() {
            anyhow::bail!("None of the {} solver dumps in {} could be converted", self.files.len(), self.dir.display());
        }

        info!("Global range over {} dumps: min {:e}, max {:e}", frames.len(), range.min, range.max);
        let summary = SeriesSummary {
            size_x: self.size_x,
            size_y: self.size_y,
            shift: self.solver.log_shift,
            range,
            frames,
        };
        let summary_path = SeriesSummary::path_in(&self.dir);
        summary.save(&summary_path)?;
        info!("Range summary saved to {}", summary_path.display());
        Ok(summary)
    }
}
