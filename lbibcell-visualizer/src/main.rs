use ab_glyph::FontArc;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use lbibcell_common::{AnalyticParams, RenderConfig, ToolkitConfig};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};
use std::time::Instant;

mod colormap;
mod fitplot;
mod frames;
mod meshplot;
mod segment;
mod video;

use colormap::{Colormap, Normalize};
use frames::{FrameKind, FrameStyle};

/// Figures and videos from LBIBCell output
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional toolkit TOML with shared defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by the heatmap and contour frame series.
#[derive(Args, Debug, Clone)]
struct FrameArgs {
    /// Directory holding the converted Cells_N.npy matrices
    #[arg(short, long)]
    input_dir: PathBuf,
    /// TTF font used to stamp the frame label and colorbar ticks
    #[arg(long)]
    font: Option<PathBuf>,
    /// Also encode the frames to MP4 and GIF
    #[arg(long)]
    video: bool,
    /// Prefix of the copied videos (defaults to the input dir name)
    #[arg(long)]
    name: Option<String>,
    /// Fixed lower color limit; disables the log shift
    #[arg(long, requires = "vmax", allow_negative_numbers = true)]
    vmin: Option<f64>,
    /// Fixed upper color limit
    #[arg(long, requires = "vmin", allow_negative_numbers = true)]
    vmax: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log-scaled heatmap frames of a converted series
    Heatmap(FrameArgs),
    /// Filled-contour frames of a converted series
    Contour(FrameArgs),
    /// Cell meshes of a reporter run colored by cell_type
    Mesh {
        /// LBIBCell reporter output dir (Cells_*.vtm)
        #[arg(short, long)]
        input_dir: PathBuf,
        /// Solver iterations between saved reporter sets
        #[arg(long)]
        step: Option<u64>,
        #[arg(long)]
        size_x: Option<usize>,
        #[arg(long)]
        size_y: Option<usize>,
    },
    /// Segment a screenshot or microscopy image into cells
    Segment {
        /// Image saved from Paraview, i.e. screenshot.png
        #[arg(short, long)]
        input: PathBuf,
        /// Directory for the figures and statistics
        #[arg(long)]
        outdir: PathBuf,
        /// The X-axis of the box grid
        #[arg(short = 'x', long)]
        size_x: Option<usize>,
        /// The Y-axis of the box grid
        #[arg(short = 'y', long)]
        size_y: Option<usize>,
        #[arg(long)]
        force: bool,
    },
    /// Fit a `_to_fit.txt` profile and plot data, fit and analytic solution
    PlotFit {
        #[arg(short, long)]
        input: PathBuf,
        /// Output PNG (defaults to the input with a .png extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Parameters of the analytic readout: P D LF LT
        #[arg(long, num_args = 4, value_names = ["P", "D", "LF", "LT"])]
        analytic: Option<Vec<f64>>,
        /// Logarithmic y axis
        #[arg(long)]
        log: bool,
        #[arg(long)]
        c0: Option<f64>,
        #[arg(long)]
        k: Option<f64>,
        #[arg(long)]
        b: Option<f64>,
    },
}

fn load_font(path: &Path) -> Result<FontArc> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read font {}", path.display()))?;
    FontArc::try_from_vec(data).map_err(|e| anyhow::anyhow!("Invalid font '{}': {}", path.display(), e))
}

fn frame_style(kind: FrameKind, args: &FrameArgs, series: &frames::Series, render: &RenderConfig) -> Result<FrameStyle> {
    let colormap: Colormap = match kind {
        FrameKind::Heatmap => render.heatmap_colormap.parse()?,
        FrameKind::Contour => render.contour_colormap.parse()?,
    };
    let (shift, norm) = match (kind, args.vmin.zip(args.vmax)) {
        (FrameKind::Heatmap, Some((vmin, vmax))) => (0.0, Normalize::log(vmin, vmax)?),
        (FrameKind::Heatmap, None) => {
            let range = series.range.shifted(series.shift);
            (series.shift, Normalize::log(range.min, range.max)?)
        }
        (FrameKind::Contour, Some((vmin, vmax))) => (0.0, Normalize::linear(vmin, vmax)?),
        (FrameKind::Contour, None) => (0.0, Normalize::linear(series.range.min, series.range.max)?),
    };
    Ok(FrameStyle { kind, colormap, norm, shift, scale: render.frame_scale, levels: render.contour_levels })
}

fn series_name(input_dir: &Path) -> String {
    input_dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "lbibcell".to_string())
}

fn run_frames(kind: FrameKind, args: FrameArgs, config: &ToolkitConfig) -> Result<()> {
    let start = Instant::now();
    let series = frames::load_series(&args.input_dir, &config.solver.file_prefix, config.solver.log_shift)?;
    let style = frame_style(kind, &args, &series, &config.render)?;
    let (vmin, vmax) = style.norm.limits();
    info!("{} frames of {}, color range [{:e}, {:e}]", series.frames.len(), args.input_dir.display(), vmin, vmax);

    let font = args.font.as_deref().map(load_font).transpose()?;
    let fig_dir = args.input_dir.join("fig");
    let images = frames::render_series(&series, &style, font.as_ref(), &fig_dir)?;
    info!("Frames rendered in {:.2?}", start.elapsed());

    if args.video {
        let name = args.name.clone().unwrap_or_else(|| series_name(&args.input_dir));
        video::export_videos(
            &images,
            kind.name(),
            config.render.fps,
            config.render.gif_width,
            &fig_dir,
            Path::new("."),
            &name,
        );
    }
    Ok(())
}

fn run(command: Command, config: &ToolkitConfig) -> Result<()> {
    match command {
        Command::Heatmap(args) => run_frames(FrameKind::Heatmap, args, config)?,
        Command::Contour(args) => run_frames(FrameKind::Contour, args, config)?,
        Command::Mesh { input_dir, step, size_x, size_y } => {
            let grid = (size_x.unwrap_or(config.grid.size_x), size_y.unwrap_or(config.grid.size_y));
            meshplot::plot_mesh_dir(
                &input_dir,
                &config.solver.file_prefix,
                step.unwrap_or(config.solver.step),
                grid,
                config.render.frame_scale,
                &input_dir.join("fig"),
            )?;
        }
        Command::Segment { input, outdir, size_x, size_y, force } => {
            segment::run_segmentation(
                &input,
                &outdir,
                size_x.unwrap_or(config.segmentation.size_x),
                size_y.unwrap_or(config.segmentation.size_y),
                config.segmentation.small_object_threshold,
                force,
            )?;
        }
        Command::PlotFit { input, output, analytic, log, c0, k, b } => {
            let p0 = [
                c0.unwrap_or(config.fit.initial_c0),
                k.unwrap_or(config.fit.initial_k),
                b.unwrap_or(config.fit.initial_b),
            ];
            let analytic = analytic.map(|v| AnalyticParams { p: v[0], d: v[1], lf: v[2], lt: v[3] });
            let output = output.unwrap_or_else(|| fitplot::default_output(&input));
            fitplot::run_plot_fit(&input, &output, &p0, config.fit.max_evaluations, analytic, log)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    let cli = Cli::parse();
    let config = ToolkitConfig::load_or_default(cli.config.as_deref())?;
    info!("Using {} Rayon threads.", rayon::current_num_threads());
    run(cli.command, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use lbibcell_common::ValueRange;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_vmin_needs_vmax() {
        assert!(Cli::try_parse_from(["lbibcell-visualizer", "heatmap", "-i", "out", "--vmin", "1e-6"]).is_err());
        let cli =
            Cli::try_parse_from(["lbibcell-visualizer", "contour", "-i", "out", "--vmin", "-1", "--vmax", "2"]).unwrap();
        match cli.command {
            Command::Contour(args) => assert_eq!((args.vmin, args.vmax), (Some(-1.0), Some(2.0))),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_analytic_takes_four_values() {
        let cli = Cli::try_parse_from([
            "lbibcell-visualizer", "plot-fit", "-i", "Cells_10_to_fit.txt", "--analytic", "1", "0.1", "20", "1000",
        ])
        .unwrap();
        match cli.command {
            Command::PlotFit { analytic, log, .. } => {
                assert_eq!(analytic, Some(vec![1.0, 0.1, 20.0, 1000.0]));
                assert!(!log);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn args(vmin: Option<f64>, vmax: Option<f64>) -> FrameArgs {
        FrameArgs { input_dir: PathBuf::from("out"), font: None, video: false, name: None, vmin, vmax }
    }

    #[test]
    fn test_heatmap_style_applies_shift() {
        let series = frames::Series { frames: Vec::new(), range: ValueRange::new(0.0, 1.0), shift: 1e-10 };
        let render = RenderConfig::default();

        let style = frame_style(FrameKind::Heatmap, &args(None, None), &series, &render).unwrap();
        assert_eq!(style.shift, 1e-10);
        assert_eq!(style.norm, Normalize::Log { vmin: 1e-10, vmax: 1.0 + 1e-10 });
        assert_eq!(style.colormap, Colormap::Coolwarm);

        let fixed = frame_style(FrameKind::Heatmap, &args(Some(1e-6), Some(1.0)), &series, &render).unwrap();
        assert_eq!(fixed.shift, 0.0);
        assert_eq!(fixed.norm.limits(), (1e-6, 1.0));

        let contour = frame_style(FrameKind::Contour, &args(None, None), &series, &render).unwrap();
        assert_eq!(contour.norm, Normalize::Linear { vmin: 0.0, vmax: 1.0 });
        assert_eq!(contour.colormap, Colormap::Plasma);
        assert_eq!(contour.levels, 10);
    }
}
