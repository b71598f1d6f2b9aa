use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::path::Path;

// Lattice dimensions of the LBIBCell box grid
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct GridConfig {
    pub size_x: usize,
    pub size_y: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig { size_x: 300, size_y: 1000 }
    }
}

// How the solver dumps (Cells_N.txt) are laid out
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SolverConfig {
    pub file_prefix: String,
    pub concentration_column: usize,
    /// Added before log-normalising so that zero concentrations stay representable.
    pub log_shift: f64,
    /// Solver iterations between two consecutive dumps.
    pub step: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            file_prefix: "Cells_".to_string(),
            concentration_column: 5,
            log_shift: 1e-10,
            step: 10,
        }
    }
}

// Frame rendering and video settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
    /// Pixels per lattice node along each axis.
    pub frame_scale: u32,
    pub contour_levels: usize,
    pub gif_width: u32,
    pub heatmap_colormap: String,
    pub contour_colormap: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            fps: 10,
            frame_scale: 2,
            contour_levels: 10,
            gif_width: 1500,
            heatmap_colormap: "coolwarm".to_string(),
            contour_colormap: "plasma".to_string(),
        }
    }
}

// Image segmentation settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Objects smaller than this (in grid units squared) are treated as artifacts.
    pub small_object_threshold: f64,
    pub size_x: usize,
    pub size_y: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        SegmentationConfig { small_object_threshold: 40.0, size_x: 1000, size_y: 1000 }
    }
}

// Exponential decay fitting settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct FitConfig {
    pub initial_c0: f64,
    pub initial_k: f64,
    pub initial_b: f64,
    pub max_evaluations: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig { initial_c0: 1.0, initial_k: 2.0, initial_b: 1.0, max_evaluations: 5000 }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Bincode,
    MessagePack,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Bincode => "bin",
            OutputFormat::MessagePack => "msgpack",
        }
    }
}

// Configuration for output settings, loaded from the toolkit TOML
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// Shared defaults for every tool, optionally loaded from a TOML file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ToolkitConfig {
    pub grid: GridConfig,
    pub solver: SolverConfig,
    pub render: RenderConfig,
    pub segmentation: SegmentationConfig,
    pub fit: FitConfig,
    pub output: OutputConfig,
}

impl ToolkitConfig {
    /// Loads the toolkit configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: ToolkitConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads the file when given, falls back to defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.size_x == 0 || self.grid.size_y == 0 {
            anyhow::bail!("grid size must be positive, got {} x {}.", self.grid.size_x, self.grid.size_y);
        }
        if self.segmentation.size_x == 0 || self.segmentation.size_y == 0 {
            anyhow::bail!("segmentation grid size must be positive.");
        }
        if self.render.fps == 0 {
            anyhow::bail!("render.fps must be greater than 0.");
        }
        if self.render.frame_scale == 0 {
            anyhow::bail!("render.frame_scale must be greater than 0.");
        }
        if self.render.contour_levels < 2 {
            anyhow::bail!("render.contour_levels must be at least 2.");
        }
        if !(self.solver.log_shift >= 0.0) {
            anyhow::bail!("solver.log_shift must be non-negative.");
        }
        if self.fit.max_evaluations == 0 {
            anyhow::bail!("fit.max_evaluations must be greater than 0.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[grid]\nsize_x = 64\nsize_y = 128\n\n[output]\nformat = \"messagepack\"").unwrap();

        let config = ToolkitConfig::load(file.path()).unwrap();
        assert_eq!(config.grid.size_x, 64);
        assert_eq!(config.grid.size_y, 128);
        assert_eq!(config.output.format, OutputFormat::MessagePack);
        assert_eq!(config.solver.concentration_column, 5);
        assert_eq!(config.render.fps, 10);
        assert_eq!(config.fit.max_evaluations, 5000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[render]\nfps = 0").unwrap();
        assert!(ToolkitConfig::load(file.path()).is_err());

        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[output]\nformat = \"yaml\"").unwrap();
        assert!(ToolkitConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = ToolkitConfig::load("/nonexistent/lbibcell.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
