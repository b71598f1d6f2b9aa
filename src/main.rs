use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use lbibcell_common::{BoundingBox, DecayModel, OutputFormat, ProfileMode, ToolkitConfig};
use log::info;
use std::path::PathBuf;

// Define modules used by main
mod centroid;
mod export;
mod init_cond;
mod mesh_edit;
mod profiling;
mod solver_processor;

use init_cond::{CircleCell, Placement};
use profiling::SourcePosition;
use solver_processor::SolverProcessor;

/// Post-processing tools for LBIBCell solver output and reporter meshes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional toolkit TOML with shared defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModelArg {
    /// c0 * exp(-k x)
    Exp,
    /// c0 * exp(-k x) + b
    ExpOffset,
}

impl From<ModelArg> for DecayModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Exp => DecayModel::Exponential,
            ModelArg::ExpOffset => DecayModel::ExponentialOffset,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Avg,
    Section,
}

impl From<ModeArg> for ProfileMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Avg => ProfileMode::Avg,
            ModeArg::Section => ProfileMode::Section,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FormatArg {
    Csv,
    Json,
    Bincode,
    Messagepack,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Bincode => OutputFormat::Bincode,
            FormatArg::Messagepack => OutputFormat::MessagePack,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert solver dumps (Cells_N.txt) to .npy and record the series range
    Convert {
        /// LBIBCell reporter output dir
        #[arg(short, long)]
        input_dir: PathBuf,
        /// SizeX in LBIBCell (read from Cells_0.txt if omitted)
        #[arg(long)]
        size_x: Option<usize>,
        /// SizeY in LBIBCell (read from Cells_0.txt if omitted)
        #[arg(long)]
        size_y: Option<usize>,
    },
    /// Write concentration profiles along y (`<stem>_to_fit.txt`)
    Profile {
        /// A dump, an .npy matrix, or a directory of them
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        source_x: Option<f64>,
        #[arg(long)]
        source_y: Option<f64>,
        /// Reporter mesh whose source cells give the source position
        #[arg(long)]
        source_mesh: Option<PathBuf>,
        #[arg(long, default_value_t = 1.0)]
        source_type: f64,
        #[arg(long, value_enum, default_value = "avg")]
        mode: ModeArg,
        #[arg(long)]
        size_x: Option<usize>,
        #[arg(long)]
        size_y: Option<usize>,
    },
    /// Centroids of the cells of one type in a reporter mesh
    Centroid {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        cell_type: f64,
        /// Table format (defaults to output.format from the config)
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Fit an exponential decay to a `_to_fit.txt` profile
    Fit {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value = "exp-offset")]
        model: ModelArg,
        #[arg(long)]
        c0: Option<f64>,
        #[arg(long)]
        k: Option<f64>,
        #[arg(long)]
        b: Option<f64>,
    },
    /// Set cell_type on the cells lying strictly inside a box
    Relabel {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value_t = 2.0)]
        id: f64,
        /// MIN_X MIN_Y MAX_X MAX_Y
        #[arg(long = "box", num_args = 4, value_names = ["MIN_X", "MIN_Y", "MAX_X", "MAX_Y"], allow_negative_numbers = true, required = true)]
        bbox: Vec<f64>,
        /// Defaults to `<stem>_cell_id_mod.vtp` next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Move a mesh along the x axis
    Translate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Distance to be moved in x
        #[arg(short = 'x', long, default_value_t = -350.0, allow_negative_numbers = true)]
        x_dist: f64,
        #[arg(long)]
        force: bool,
    },
    /// Write a round initial cell for LBIBCell
    InitCond {
        #[arg(long, default_value_t = 1000)]
        size_x: u32,
        #[arg(long, default_value_t = 1000)]
        size_y: u32,
        /// Explicit center; both coordinates are required together
        #[arg(long, requires = "center_y")]
        center_x: Option<i64>,
        #[arg(long, requires = "center_x")]
        center_y: Option<i64>,
        #[arg(short, long, default_value_t = 50.0)]
        radius: f64,
        /// Resolution of the circular cell
        #[arg(long, default_value_t = 360)]
        res: usize,
        #[arg(long, default_value = "build/config")]
        out_dir: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn grid_override(size_x: Option<usize>, size_y: Option<usize>, config: &ToolkitConfig) -> Option<(usize, usize)> {
    match (size_x, size_y) {
        (None, None) => None,
        (x, y) => Some((x.unwrap_or(config.grid.size_x), y.unwrap_or(config.grid.size_y))),
    }
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    let cli = Cli::parse();
    let config = ToolkitConfig::load_or_default(cli.config.as_deref())?;
    run(cli.command, &config)
}

fn run(command: Command, config: &ToolkitConfig) -> Result<()> {
    match command {
        Command::Convert { input_dir, size_x, size_y } => {
            info!("Using {} Rayon threads.", rayon::current_num_threads());
            let size = grid_override(size_x, size_y, config);
            let processor = SolverProcessor::new(&input_dir, config.solver.clone(), size)?;
            let summary = processor.save_npy()?;
            info!("Converted {} dumps in {}", summary.frames.len(), input_dir.display());
        }
        Command::Profile { input, source_x, source_y, source_mesh, source_type, mode, size_x, size_y } => {
            let source = SourcePosition::resolve(source_x, source_y, source_mesh.as_deref(), source_type)?;
            info!("Source at y = {:.3}", source.y);
            let inputs = profiling::collect_inputs(&input, &config.solver.file_prefix)?;
            let written = profiling::write_profiles(
                &inputs,
                source,
                mode.into(),
                grid_override(size_x, size_y, config),
                config.solver.concentration_column,
            )?;
            info!("{} profile(s) written", written.len());
        }
        Command::Centroid { input, cell_type, format } => {
            let format = format.map(OutputFormat::from).unwrap_or(config.output.format);
            centroid::export_centroids(&input, cell_type, format)?;
        }
        Command::Fit { input, model, c0, k, b } => {
            let p0 = [
                c0.unwrap_or(config.fit.initial_c0),
                k.unwrap_or(config.fit.initial_k),
                b.unwrap_or(config.fit.initial_b),
            ];
            let result = profiling::fit_profile(&input, model.into(), &p0, config.fit.max_evaluations)?;
            println!("C0={:.6} Lambda={:.6} b={:.6}", result.c0, result.lambda, result.b);
            info!("{}", result.label());
            profiling::save_fit(&result, &profiling::fit_output_path(&input))?;
        }
        Command::Relabel { input, id, bbox, output, force } => {
            let bbox = BoundingBox::from_slice(&bbox)?;
            let output = output.unwrap_or_else(|| mesh_edit::default_relabel_output(&input));
            mesh_edit::relabel(&input, &output, &bbox, id, force)?;
        }
        Command::Translate { input, output, x_dist, force } => {
            mesh_edit::translate(&input, &output, x_dist, force)?;
        }
        Command::InitCond { size_x, size_y, center_x, center_y, radius, res, out_dir, force } => {
            let placement = match (center_x, center_y) {
                (Some(x), Some(y)) => Placement::Center { x, y },
                _ => Placement::Grid { size_x, size_y },
            };
            let cell = CircleCell::new(placement, radius, res)?;
            std::fs::create_dir_all(&out_dir)
                .map_err(|e| anyhow::anyhow!("Failed to create '{}': {}", out_dir.display(), e))?;
            let path = init_cond::parameters_path(&out_dir, placement, radius, res);
            export::check_overwrite(&path, force)?;
            cell.save(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_relabel_box_takes_four_values() {
        let cli = Cli::try_parse_from([
            "lbibcell-tools", "relabel", "-i", "m.vtp", "--box", "-1", "0", "10.5", "20",
        ])
        .unwrap();
        match cli.command {
            Command::Relabel { bbox, id, output, .. } => {
                assert_eq!(bbox, vec![-1.0, 0.0, 10.5, 20.0]);
                assert_eq!(id, 2.0);
                assert!(output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["lbibcell-tools", "relabel", "-i", "m.vtp", "--box", "1", "2", "3"]).is_err());
    }

    #[test]
    fn test_init_cond_writes_grid_centered_cell() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("build/config");
        let cmd = Command::InitCond {
            size_x: 200,
            size_y: 300,
            center_x: None,
            center_y: None,
            radius: 50.0,
            res: 8,
            out_dir: out_dir.clone(),
            force: false,
        };
        run(cmd, &ToolkitConfig::default()).unwrap();
        let path = out_dir.join("parameters_200_by_300_radius_50.0_center.txt");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("1\t150.0\t150.0"));

        // Refused the second time without --force.
        let again = Command::InitCond {
            size_x: 200,
            size_y: 300,
            center_x: None,
            center_y: None,
            radius: 50.0,
            res: 8,
            out_dir,
            force: false,
        };
        assert!(run(again, &ToolkitConfig::default()).is_err());
    }

    #[test]
    fn test_grid_override_fills_missing_axis() {
        let config = ToolkitConfig::default();
        assert_eq!(grid_override(None, None, &config), None);
        assert_eq!(grid_override(Some(50), None, &config), Some((50, 1000)));
    }
}
