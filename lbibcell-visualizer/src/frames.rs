//! Heatmap and filled-contour frames of concentration matrices, one PNG per
//! dump, all drawn on the color range of the whole series.

use crate::colormap::{Colormap, Normalize};
use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use dashmap::DashMap;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use indicatif::{ProgressBar, ProgressStyle};
use lbibcell_common::solver::list_matrix_files;
use lbibcell_common::{npy, ConcentrationMatrix, SeriesSummary, ValueRange};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

// Colorbar layout, in pixels.
const BAR_GAP: u32 = 12;
const BAR_WIDTH: u32 = 24;
const TICK_LEN: u32 = 5;
const LABEL_WIDTH: u32 = 96;
const TICKS: usize = 5;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Continuous, usually log-normalised.
    Heatmap,
    /// Values quantised into bands.
    Contour,
}

impl FrameKind {
    /// Prefix of the frame files and of the videos.
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Heatmap => "heatmap",
            FrameKind::Contour => "contourf",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameStyle {
    pub kind: FrameKind,
    pub colormap: Colormap,
    pub norm: Normalize,
    /// Added to every value before normalising.
    pub shift: f64,
    /// Pixels per lattice node along each axis.
    pub scale: u32,
    pub levels: usize,
}

/// Centre of the band `t` falls into when [0, 1] is cut into `levels` bands.
pub fn band_center(t: f64, levels: usize) -> f64 {
    let levels = levels.max(1);
    let band = ((t * levels as f64).floor() as usize).min(levels - 1);
    (band as f64 + 0.5) / levels as f64
}

impl FrameStyle {
    fn color_for_position(&self, t: f64) -> Rgb<u8> {
        match self.kind {
            FrameKind::Heatmap => self.colormap.sample(t),
            FrameKind::Contour => self.colormap.sample(band_center(t, self.levels)),
        }
    }

    pub fn color_at(&self, value: f64) -> Rgb<u8> {
        self.color_for_position(self.norm.apply(value + self.shift))
    }
}

/// Draws `mat` with its origin at the lower left (x to the right, y up) and a colorbar on the right.
pub fn render_matrix(mat: &ConcentrationMatrix, style: &FrameStyle, font: Option<&FontArc>, label: &str) -> RgbImage {
    let scale = style.scale.max(1);
    let field_w = mat.size_x as u32 * scale;
    let field_h = mat.size_y as u32 * scale;
    let right = if font.is_some() { LABEL_WIDTH } else { TICK_LEN + 2 };
    let mut image = RgbImage::from_pixel(field_w + BAR_GAP + BAR_WIDTH + right, field_h.max(1), WHITE);

    for x in 0..mat.size_x {
        for y in 0..mat.size_y {
            let color = style.color_at(mat.get(x, y));
            let px0 = x as u32 * scale;
            let py0 = (mat.size_y - 1 - y) as u32 * scale;
            for dy in 0..scale {
                for dx in 0..scale {
                    image.put_pixel(px0 + dx, py0 + dy, color);
                }
            }
        }
    }

    draw_colorbar(&mut image, style, field_w + BAR_GAP, field_h, font);

    if let Some(font) = font {
        draw_text_mut(&mut image, BLACK, 6, 4, PxScale::from(18.0), font, label);
    }
    image
}

fn draw_colorbar(image: &mut RgbImage, style: &FrameStyle, x0: u32, height: u32, font: Option<&FontArc>) {
    if height == 0 {
        return;
    }
    for row in 0..height {
        let t = 1.0 - (row as f64 + 0.5) / height as f64;
        let color = style.color_for_position(t);
        for dx in 0..BAR_WIDTH {
            image.put_pixel(x0 + dx, row, color);
        }
    }
    draw_hollow_rect_mut(image, Rect::at(x0 as i32, 0).of_size(BAR_WIDTH, height), BLACK);

    let bar_right = (x0 + BAR_WIDTH) as f32;
    for k in 0..TICKS {
        let t = k as f64 / (TICKS - 1) as f64;
        let row = ((1.0 - t) * (height - 1) as f64) as f32;
        draw_line_segment_mut(image, (bar_right, row), (bar_right + TICK_LEN as f32, row), BLACK);
        if let Some(font) = font {
            let text = format!("{:.2e}", style.norm.invert(t));
            let y = (row as i32 - 7).clamp(0, height.saturating_sub(14) as i32);
            draw_text_mut(image, BLACK, bar_right as i32 + TICK_LEN as i32 + 3, y, PxScale::from(14.0), font, &text);
        }
    }
}

/// A converted series: matrices in step order and the range they share.
#[derive(Debug, Clone)]
pub struct Series {
    pub frames: Vec<(String, PathBuf)>,
    pub range: ValueRange,
    pub shift: f64,
}

/// Reads `summary.toml` when `convert` left one, otherwise scans the `.npy` files for the range.
pub fn load_series(dir: &Path, prefix: &str, default_shift: f64) -> Result<Series> {
    let summary_path = SeriesSummary::path_in(dir);
    if summary_path.exists() {
        let summary = SeriesSummary::load(&summary_path)?;
        info!("Using range from {}: [{:e}, {:e}]", summary_path.display(), summary.range.min, summary.range.max);
        let frames = summary
            .frames
            .iter()
            .map(|f| (label_of(&f.npy), dir.join(&f.npy)))
            .collect();
        return Ok(Series { frames, range: summary.range, shift: summary.shift });
    }

    warn!("{} not found, computing the range over the series", summary_path.display());
    let files = list_matrix_files(dir, prefix)
        .with_context(|| format!("run `lbibcell-tools convert -i {}` first", dir.display()))?;
    let range = files
        .par_iter()
        .map(|f| npy::read_matrix(&f.path).map(|m| m.range()))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .fold(ValueRange::default(), ValueRange::merge);
    let frames = files.into_iter().map(|f| (f.stem(), f.path)).collect();
    Ok(Series { frames, range, shift: default_shift })
}

fn label_of(npy_name: &str) -> String {
    npy_name.strip_suffix(".npy").unwrap_or(npy_name).to_string()
}

pub(crate) fn progress_bar(len: usize, what: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    match ProgressStyle::default_bar()
        .template(&format!("[{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{percent}}%) [{{eta}}]", what))
    {
        Ok(style) => bar.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("progress bar template rejected: {}", e),
    }
    bar
}

/// Renders every frame in parallel and writes `<out_dir>/<kind>_<i>.png` in step order.
/// Frames that fail to load are logged and skipped. Returns the rendered images in order.
pub fn render_series(series: &Series, style: &FrameStyle, font: Option<&FontArc>, out_dir: &Path) -> Result<Vec<RgbImage>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let rendered: DashMap<usize, RgbImage> = DashMap::new();
    let bar = progress_bar(series.frames.len(), "frames");
    series.frames.par_iter().enumerate().for_each(|(i, (label, path))| {
        match npy::read_matrix(path) {
            Ok(mat) => {
                rendered.insert(i, render_matrix(&mat, style, font, label));
            }
            Err(e) => error!("Skipping frame {} ({}): {:#}", i, path.display(), e),
        }
        bar.inc(1);
    });
    bar.finish_with_message("rendered");

    let mut keys: Vec<usize> = rendered.iter().map(|entry| *entry.key()).collect();
    keys.sort_unstable();
    let mut images = Vec::with_capacity(keys.len());
    for i in keys {
        if let Some((_, image)) = rendered.remove(&i) {
            let path = out_dir.join(format!("{}_{}.png", style.kind.name(), i));
            image.save(&path).with_context(|| format!("Failed to save {}", path.display()))?;
            images.push(image);
        }
    }
    info!("{} {} frames written to {}", images.len(), style.kind.name(), out_dir.display());
    Ok(images)
}
