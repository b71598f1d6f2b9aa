use crate::matrix::ValueRange;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "summary.toml";

/// One converted dump of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEntry {
    pub step: u64,
    /// File name of the `.npy`, relative to the series directory.
    pub npy: String,
}

/// Grid size and shared color range of a converted series, written next to the dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub size_x: usize,
    pub size_y: usize,
    /// Log-norm shift; colorbar values are offset by this amount.
    pub shift: f64,
    /// Range over every dump, anchored at zero and not yet shifted.
    pub range: ValueRange,
    pub frames: Vec<FrameEntry>,
}

impl SeriesSummary {
    pub fn path_in<P: AsRef<Path>>(dir: P) -> PathBuf {
        dir.as_ref().join(SUMMARY_FILE)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let text = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize summary: {}", e))?;
        std::fs::write(path_ref, text)
            .map_err(|e| anyhow::anyhow!("Failed to write summary '{}': {}", path_ref.display(), e))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read summary '{}': {}", path_ref.display(), e))?;
        let summary: SeriesSummary = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;
        if summary.range.min > summary.range.max {
            anyhow::bail!("summary '{}' has an inverted range", path_ref.display());
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_file_in_series_dir() {
        let dir = tempfile::tempdir().unwrap();
        let summary = SeriesSummary {
            size_x: 300,
            size_y: 1000,
            shift: 1e-10,
            range: ValueRange::new(0.0, 12.5),
            frames: vec![
                FrameEntry { step: 0, npy: "Cells_0.npy".into() },
                FrameEntry { step: 10, npy: "Cells_10.npy".into() },
            ],
        };
        let path = SeriesSummary::path_in(dir.path());
        summary.save(&path).unwrap();
        assert!(path.ends_with(SUMMARY_FILE));
        assert_eq!(SeriesSummary::load(&path).unwrap(), summary);
    }
}
