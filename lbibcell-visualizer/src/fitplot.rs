//! Scatter of a concentration profile with its fitted decay curve.

use anyhow::{Context, Result};
use lbibcell_common::decay::{self, analytic_readout_infinite, linspace};
use lbibcell_common::{AnalyticParams, DecayModel, FitResult, Profile};
use log::{info, warn};
use plotters::prelude::*;
use std::path::{Path, PathBuf};

const CURVE_START: f64 = 0.0;
const CURVE_END: f64 = 1000.0;
const CURVE_SAMPLES: usize = 250;
const PLOT_SIZE: (u32, u32) = (1280, 960);

const DATA_COLOR: RGBColor = RGBColor(176, 196, 222);
const FIT_COLOR: RGBColor = RGBColor(255, 140, 0);
const ANALYTIC_COLOR: RGBColor = RGBColor(46, 139, 87);

/// Everything drawn on the chart.
#[derive(Debug, Clone)]
pub struct FitCurves {
    pub data: Vec<(f64, f64)>,
    pub fit: FitResult,
    pub fitted: Vec<(f64, f64)>,
    pub analytic: Option<Vec<(f64, f64)>>,
}

impl FitCurves {
    /// Fits the offset model to the downstream part of `profile`.
    pub fn from_profile(profile: &Profile, p0: &[f64; 3], max_evaluations: usize, analytic: Option<AnalyticParams>) -> Result<Self> {
        let downstream = profile.downstream();
        if downstream.is_empty() {
            anyhow::bail!("profile has no points downstream of the source");
        }
        let fit = decay::fit(DecayModel::ExponentialOffset, &downstream.distance, &downstream.value, p0, max_evaluations)?;
        if !fit.converged {
            warn!("fit did not converge within {} evaluations", max_evaluations);
        }

        let xs = linspace(CURVE_START, CURVE_END, CURVE_SAMPLES);
        let fitted = xs.iter().map(|&x| (x, fit.evaluate(x))).collect();
        // The readout is only defined on the tissue [0, Lt].
        let analytic = analytic.map(|params| {
            xs.iter()
                .filter_map(|&x| analytic_readout_infinite(x, &params, fit.k).ok().map(|y| (x, y)))
                .collect()
        });

        Ok(FitCurves {
            data: downstream.distance.iter().copied().zip(downstream.value.iter().copied()).collect(),
            fit,
            fitted,
            analytic,
        })
    }

    fn all_points(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.data.iter().chain(&self.fitted).chain(self.analytic.iter().flatten())
    }

    /// (x range, y range) covering every curve; a log axis only sees positive values.
    fn bounds(&self, log_y: bool) -> Result<((f64, f64), (f64, f64))> {
        let mut x = (CURVE_START, CURVE_END);
        let mut y = (f64::INFINITY, f64::NEG_INFINITY);
        for &(px, py) in self.all_points() {
            if !py.is_finite() || (log_y && py <= 0.0) {
                continue;
            }
            x = (x.0.min(px), x.1.max(px));
            y = (y.0.min(py), y.1.max(py));
        }
        if !(y.0 <= y.1) {
            anyhow::bail!("nothing to plot on a {} axis", if log_y { "log" } else { "linear" });
        }
        if log_y {
            Ok((x, (y.0 / 2.0, y.1 * 2.0)))
        } else {
            let pad = ((y.1 - y.0) * 0.05).max(1e-12);
            Ok((x, (y.0 - pad, y.1 + pad)))
        }
    }
}

/// Chart path used when none is given: the input with a `.png` extension.
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    input.with_file_name(format!("{}.png", stem))
}

macro_rules! draw_curves {
    ($chart:expr, $curves:expr, $label:expr, $log_y:expr) => {{
        let keep = |p: &&(f64, f64)| !$log_y || p.1 > 0.0;
        $chart
            .draw_series($curves.data.iter().filter(keep).map(|&p| Circle::new(p, 2, DATA_COLOR.filled())))
            .map_err(|e| anyhow::anyhow!("Failed to draw data: {}", e))?
            .label($label)
            .legend(|(x, y)| Circle::new((x + 10, y), 3, DATA_COLOR.filled()));
        $chart
            .draw_series(LineSeries::new($curves.fitted.iter().filter(keep).copied(), FIT_COLOR.stroke_width(2)))
            .map_err(|e| anyhow::anyhow!("Failed to draw fit: {}", e))?
            .label($curves.fit.label())
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], FIT_COLOR.stroke_width(2)));
        if let Some(analytic) = &$curves.analytic {
            let points: Vec<(f64, f64)> = analytic.iter().filter(keep).copied().collect();
            $chart
                .draw_series(DashedLineSeries::new(points, 8, 5, ANALYTIC_COLOR.stroke_width(2)))
                .map_err(|e| anyhow::anyhow!("Failed to draw analytic solution: {}", e))?
                .label("Analytic solution")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ANALYTIC_COLOR.stroke_width(2)));
        }
        $chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|e| anyhow::anyhow!("Failed to draw legend: {}", e))?;
    }};
}

/// Draws the chart to `path` (PNG).
pub fn plot_fit(curves: &FitCurves, label: &str, log_y: bool, path: &Path) -> Result<()> {
    let ((x0, x1), (y0, y1)) = curves.bounds(log_y)?;
    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("Failed to draw {}: {}", path.display(), e))?;
    let mut builder = ChartBuilder::on(&root);
    builder.margin(20).x_label_area_size(50).y_label_area_size(80);

    if log_y {
        let mut chart = builder
            .build_cartesian_2d(x0..x1, (y0..y1).log_scale())
            .map_err(|e| anyhow::anyhow!("Failed to build chart: {}", e))?;
        chart
            .configure_mesh()
            .x_desc("distance from source")
            .y_desc("concentration")
            .draw()
            .map_err(|e| anyhow::anyhow!("Failed to draw axes: {}", e))?;
        draw_curves!(chart, curves, label, true);
    } else {
        let mut chart = builder
            .build_cartesian_2d(x0..x1, y0..y1)
            .map_err(|e| anyhow::anyhow!("Failed to build chart: {}", e))?;
        chart
            .configure_mesh()
            .x_desc("distance from source")
            .y_desc("concentration")
            .draw()
            .map_err(|e| anyhow::anyhow!("Failed to draw axes: {}", e))?;
        draw_curves!(chart, curves, label, false);
    }

    root.present().map_err(|e| anyhow::anyhow!("Failed to save {}: {}", path.display(), e))?;
    info!("Fig saved to {}", path.display());
    Ok(())
}

/// Loads `input`, fits it and writes the chart. Returns the fit.
pub fn run_plot_fit(
    input: &Path,
    output: &Path,
    p0: &[f64; 3],
    max_evaluations: usize,
    analytic: Option<AnalyticParams>,
    log_y: bool,
) -> Result<FitResult> {
    let profile = Profile::load(input).with_context(|| format!("Cannot plot {}", input.display()))?;
    let curves = FitCurves::from_profile(&profile, p0, max_evaluations, analytic)?;
    let fit = &curves.fit;
    println!("C0={:.4}  Lambda={:.4} b={:.4}", fit.c0, fit.lambda, fit.b);

    let label = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    plot_fit(&curves, &label, log_y, output)?;
    Ok(curves.fit)
}
