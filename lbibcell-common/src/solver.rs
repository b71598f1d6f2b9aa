//! Reading the solver's tab-separated concentration dumps (`Cells_<step>.txt`).
//!
//! Each line describes one lattice node: column 0 is x, column 1 is y and the
//! concentration sits in a fixed column (5 for the reporter used by LBIBCell).

use crate::matrix::{ConcentrationMatrix, ValueRange};
use anyhow::{Context, Result};
use log::debug;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One parsed line of a solver dump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverRecord {
    pub x: usize,
    pub y: usize,
    pub concentration: f64,
}

/// A dump found in an output directory, with the solver iteration it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverFile {
    pub step: u64,
    pub path: PathBuf,
}

impl SolverFile {
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Same location with another extension, e.g. `Cells_10.npy`.
    pub fn with_extension(&self, ext: &str) -> PathBuf {
        self.path.with_extension(ext)
    }
}

pub fn parse_record(line: &str, column: usize) -> Result<SolverRecord> {
    let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
    if fields.len() <= column.max(1) {
        anyhow::bail!("expected at least {} tab-separated fields, got {}", column.max(1) + 1, fields.len());
    }
    let x = fields[0].trim().parse::<usize>().with_context(|| format!("invalid x '{}'", fields[0]))?;
    let y = fields[1].trim().parse::<usize>().with_context(|| format!("invalid y '{}'", fields[1]))?;
    let concentration = fields[column]
        .trim()
        .parse::<f64>()
        .with_context(|| format!("invalid concentration '{}'", fields[column]))?;
    Ok(SolverRecord { x, y, concentration })
}

/// Parses a whole dump into a `size_x` x `size_y` matrix. Nodes absent from the file stay zero.
pub fn read_solver_matrix<P: AsRef<Path>>(
    path: P,
    size_x: usize,
    size_y: usize,
    column: usize,
) -> Result<ConcentrationMatrix> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Solver output {} cannot be opened", path.display()))?;
    let reader = BufReader::new(file);
    let mut mat = ConcentrationMatrix::zeros(size_x, size_y);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line, column)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        if record.x >= size_x || record.y >= size_y {
            anyhow::bail!(
                "{}:{}: node ({}, {}) lies outside the {} x {} grid",
                path.display(), line_no + 1, record.x, record.y, size_x, size_y
            );
        }
        mat.set(record.x, record.y, record.concentration);
    }
    Ok(mat)
}

/// Reads a dump and also returns its range anchored at zero.
pub fn read_solver_matrix_with_range<P: AsRef<Path>>(
    path: P,
    size_x: usize,
    size_y: usize,
    column: usize,
) -> Result<(ConcentrationMatrix, ValueRange)> {
    let mat = read_solver_matrix(path, size_x, size_y, column)?;
    let mut range = ValueRange::default();
    for &v in &mat.data {
        range.include(v);
    }
    Ok((mat, range))
}

/// Grid size from the last node of a dump, which the solver writes last.
pub fn infer_grid_size<P: AsRef<Path>>(path: P) -> Result<(usize, usize)> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Solver output {} cannot be opened", path.display()))?;
    let mut last = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    let last = last.with_context(|| format!("{} is empty", path.display()))?;
    // Only x and y are needed here.
    let fields: Vec<&str> = last.split('\t').collect();
    if fields.len() < 2 {
        anyhow::bail!("{}: last line has no x/y columns", path.display());
    }
    let size_x = fields[0].trim().parse::<usize>()? + 1;
    let size_y = fields[1].trim().parse::<usize>()? + 1;
    debug!("LB grid from {}: {} x {}", path.display(), size_x, size_y);
    Ok((size_x, size_y))
}

/// Step encoded in a file name such as `Cells_100.txt` or `Cells_100.npy`.
pub fn step_from_name(name: &str, prefix: &str) -> Option<u64> {
    let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
    stem.strip_prefix(prefix)?.parse().ok()
}

fn list_with_extension(dir: &Path, prefix: &str, ext: &str, skip_log: bool) -> Result<Vec<SolverFile>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("\"{}\" does not exist. Try with the correct directory.", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if skip_log && name == "log.txt" {
            continue;
        }
        if !entry.file_type()?.is_file() || !name.ends_with(ext) {
            continue;
        }
        // Derived files such as Cells_10_to_fit.txt carry no plain step number.
        match step_from_name(&name, prefix) {
            Some(step) => files.push(SolverFile { step, path: entry.path() }),
            None => debug!("skipping {} (no {}<step> name)", name, prefix),
        }
    }
    files.sort_by_key(|f| f.step);
    Ok(files)
}

/// All solver dumps in `dir` (`<prefix><step>.txt`, never `log.txt`), sorted by step.
pub fn list_solver_outputs<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Vec<SolverFile>> {
    let dir = dir.as_ref();
    let files = list_with_extension(dir, prefix, ".txt", true)?;
    if files.is_empty() {
        anyhow::bail!("No solver output like {}100.txt in {}", prefix, dir.display());
    }
    Ok(files)
}

/// Converted matrices (`<prefix><step>.npy`) in `dir`, sorted by step.
pub fn list_matrix_files<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Vec<SolverFile>> {
    let dir = dir.as_ref();
    let files = list_with_extension(dir, prefix, ".npy", false)?;
    if files.is_empty() {
        anyhow::bail!("No converted matrices like {}100.npy in {}", prefix, dir.display());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dump(dir: &Path, name: &str, size_x: usize, size_y: usize, f: impl Fn(usize, usize) -> f64) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for x in 0..size_x {
            for y in 0..size_y {
                writeln!(file, "{}\t{}\t0\t0\t0\t{}", x, y, f(x, y)).unwrap();
            }
        }
        path
    }

    #[test]
    fn test_parse_record() {
        let r = parse_record("3\t7\t0.1\t0.2\t1\t0.25\n", 5).unwrap();
        assert_eq!(r, SolverRecord { x: 3, y: 7, concentration: 0.25 });
        assert!(parse_record("3\t7\t0.1", 5).is_err());
        assert!(parse_record("a\t7\t0\t0\t0\t1", 5).is_err());
    }

    #[test]
    fn test_read_matrix_and_infer_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(dir.path(), "Cells_0.txt", 3, 4, |x, y| (x * 10 + y) as f64);

        assert_eq!(infer_grid_size(&path).unwrap(), (3, 4));
        let (mat, range) = read_solver_matrix_with_range(&path, 3, 4, 5).unwrap();
        assert_eq!(mat.get(2, 3), 23.0);
        assert_eq!(range, ValueRange::new(0.0, 23.0));

        // A grid that is too small for the dump is rejected.
        assert!(read_solver_matrix(&path, 2, 4, 5).is_err());
    }

    #[test]
    fn test_listing_sorts_by_step_and_skips_log() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Cells_100.txt", "Cells_20.txt", "Cells_0.txt", "log.txt", "Cells_20_to_fit.txt"] {
            write_dump(dir.path(), name, 1, 1, |_, _| 1.0);
        }
        let files = list_solver_outputs(dir.path(), "Cells_").unwrap();
        let steps: Vec<_> = files.iter().map(|f| f.step).collect();
        assert_eq!(steps, vec![0, 20, 100]);
        assert_eq!(files[1].stem(), "Cells_20");
    }

    #[test]
    fn test_empty_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_solver_outputs(dir.path(), "Cells_").unwrap_err();
        assert!(err.to_string().contains("No solver output"));
    }

    #[test]
    fn test_step_from_name() {
        assert_eq!(step_from_name("Cells_150.txt", "Cells_"), Some(150));
        assert_eq!(step_from_name("Cells_150.npy", "Cells_"), Some(150));
        assert_eq!(step_from_name("Cells_solver_1.txt", "Cells_"), None);
    }
}
