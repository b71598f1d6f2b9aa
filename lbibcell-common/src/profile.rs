//! Concentration profiles along the long axis, stored as `distance,value` text
//! files (`Cells_<step>_to_fit.txt`) for later fitting.

use crate::matrix::ConcentrationMatrix;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// How the 2-D field is reduced to a 1-D profile along y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    /// Mean over x for every y.
    Avg,
    /// The single lattice row through the source centroid.
    Section,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    /// Signed distance from the source along y, in LB units.
    pub distance: Vec<f64>,
    pub value: Vec<f64>,
}

impl Profile {
    /// Builds the profile of `mat` relative to a source at `(source_x, source_y)`.
    pub fn from_matrix(mat: &ConcentrationMatrix, mode: ProfileMode, source_x: f64, source_y: f64) -> Result<Self> {
        let value = match mode {
            ProfileMode::Avg => mat.mean_over_x(),
            ProfileMode::Section => {
                if source_x < 0.0 {
                    anyhow::bail!("source x {} lies outside the grid", source_x);
                }
                let x = source_x as usize;
                mat.row_at_x(x)
                    .with_context(|| format!("source x {} lies outside the {} x {} grid", x, mat.size_x, mat.size_y))?
                    .to_vec()
            }
        };
        let distance = (0..mat.size_y).map(|y| y as f64 - source_y).collect();
        Ok(Profile { distance, value })
    }

    /// Only the points downstream of the source, which are the ones the decay models describe.
    pub fn downstream(&self) -> Profile {
        let (distance, value) = self
            .distance
            .iter()
            .zip(&self.value)
            .filter(|(d, _)| **d > 0.0)
            .map(|(d, v)| (*d, *v))
            .unzip();
        Profile { distance, value }
    }

    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        for (d, v) in self.distance.iter().zip(&self.value) {
            writeln!(w, "{},{}", format_sci(*d), format_sci(*v))?;
        }
        w.flush().with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open profile {}", path.display()))?;
        let mut profile = Profile::default();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (d, v) = line
                .split_once(',')
                .with_context(|| format!("{}:{}: expected 'distance,value'", path.display(), line_no + 1))?;
            let parse = |s: &str| {
                s.trim()
                    .parse::<f64>()
                    .with_context(|| format!("{}:{}: invalid number '{}'", path.display(), line_no + 1, s))
            };
            profile.distance.push(parse(d)?);
            profile.value.push(parse(v)?);
        }
        Ok(profile)
    }
}

/// `%.18e` formatting with a signed two-digit exponent, e.g. `1.500000000000000000e+01`.
pub fn format_sci(v: f64) -> String {
    if !v.is_finite() {
        return format!("{}", v);
    }
    let s = format!("{:.18e}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sci_matches_numpy_style() {
        assert_eq!(format_sci(15.0), "1.500000000000000000e+01");
        assert_eq!(format_sci(-0.25), "-2.500000000000000000e-01");
        assert_eq!(format_sci(0.0), "0.000000000000000000e+00");
    }

    #[test]
    fn test_avg_and_section_profiles() {
        let mat = ConcentrationMatrix::from_vec(2, 4, vec![1.0, 2.0, 3.0, 4.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        let avg = Profile::from_matrix(&mat, ProfileMode::Avg, 0.5, 1.5).unwrap();
        assert_eq!(avg.distance, vec![-1.5, -0.5, 0.5, 1.5]);
        assert_eq!(avg.value, vec![2.0, 3.0, 4.0, 5.0]);

        let section = Profile::from_matrix(&mat, ProfileMode::Section, 1.7, 1.5).unwrap();
        assert_eq!(section.value, vec![3.0, 4.0, 5.0, 6.0]);

        let down = avg.downstream();
        assert_eq!(down.distance, vec![0.5, 1.5]);
        assert_eq!(down.value, vec![4.0, 5.0]);

        assert!(Profile::from_matrix(&mat, ProfileMode::Section, 2.0, 0.0).is_err());
    }

    #[test]
    fn test_profile_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cells_10_to_fit.txt");
        let profile = Profile { distance: vec![-0.5, 0.5], value: vec![1e-3, 2.5] };
        profile.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("-5.000000000000000000e-01,1.000000000000000021e-03"));
        assert_eq!(Profile::load(&path).unwrap(), profile);
    }
}
