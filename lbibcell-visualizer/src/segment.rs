//! Cell segmentation of simulation screenshots or microscopy images.
//!
//! The image is thresholded with Otsu's method (cells are the dark class), small
//! artifacts are dropped and the remaining objects are labelled. Areas and
//! centroids are rescaled from pixels to lattice units of the simulation box.

use anyhow::{Context, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{info, warn};
use palette::{Mix, Srgb};
use plotters::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const RESULTS_CSV: &str = "segmentated_res.csv";
pub const BOUNDARIES_PNG: &str = "segmentated_boundaries.png";
pub const LABELS_PNG: &str = "segmentated_labels.png";
pub const CENTROIDS_PNG: &str = "segmentated_centroids.png";

const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const OVERLAY_ALPHA: f32 = 0.3;
const LABEL_COLORS: [(u8, u8, u8); 10] = [
    (255, 0, 0),
    (0, 0, 255),
    (255, 255, 0),
    (255, 0, 255),
    (0, 128, 0),
    (75, 0, 130),
    (255, 140, 0),
    (0, 255, 255),
    (255, 192, 203),
    (154, 205, 50),
];
const CENTROID_PLOT_SIZE: u32 = 800;

/// One labelled object, already rescaled to lattice units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub index: usize,
    pub label: u32,
    pub area: f64,
    #[serde(rename = "centroid-0")]
    pub centroid_row: f64,
    #[serde(rename = "centroid-1")]
    pub centroid_col: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AreaStats {
    pub count: usize,
    pub mean: f64,
    /// Geometric standard deviation (sample, ddof = 1); NaN for a single cell.
    pub gstd: f64,
    /// Coefficient of variation, population standard deviation over mean.
    pub cv: f64,
    pub min: f64,
    pub max: f64,
}

impl AreaStats {
    pub fn from_areas(areas: &[f64]) -> Result<Self> {
        if areas.is_empty() {
            anyhow::bail!("no cells identified in the image");
        }
        let n = areas.len() as f64;
        let mean = areas.iter().sum::<f64>() / n;
        let variance = areas.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;

        let logs: Vec<f64> = areas.iter().map(|a| a.ln()).collect();
        let log_mean = logs.iter().sum::<f64>() / n;
        let gstd = if areas.len() > 1 {
            (logs.iter().map(|l| (l - log_mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt().exp()
        } else {
            f64::NAN
        };

        Ok(AreaStats {
            count: areas.len(),
            mean,
            gstd,
            cv: variance.sqrt() / mean,
            min: areas.iter().copied().fold(f64::INFINITY, f64::min),
            max: areas.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Pixel to lattice scale factors; rows map to x, columns to y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridScale {
    pub x: f64,
    pub y: f64,
}

impl GridScale {
    pub fn new(image: &GrayImage, size_x: usize, size_y: usize) -> Result<Self> {
        if size_x == 0 || size_y == 0 {
            anyhow::bail!("grid size must be positive, got {} x {}", size_x, size_y);
        }
        Ok(GridScale { x: image.height() as f64 / size_x as f64, y: image.width() as f64 / size_y as f64 })
    }

    pub fn area(&self) -> f64 {
        self.x * self.y
    }
}

pub struct Segmentation {
    pub gray: GrayImage,
    pub labels: ImageBuffer<Luma<u32>, Vec<u32>>,
    pub threshold: u8,
    pub scale: GridScale,
    pub regions: Vec<Region>,
}

/// Foreground mask (255) of the pixels at or below the Otsu level, objects
/// smaller than `min_pixels` (4-connected) cleared.
fn clean_mask(gray: &GrayImage, threshold: u8, min_pixels: f64) -> GrayImage {
    let mut mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y)[0] <= threshold { 255 } else { 0 }])
    });

    let components = connected_components(&mask, Connectivity::Four, Luma([0u8]));
    let n_components = components.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut sizes = vec![0usize; n_components + 1];
    for p in components.pixels() {
        sizes[p[0] as usize] += 1;
    }
    for (x, y, p) in components.enumerate_pixels() {
        let label = p[0] as usize;
        if label != 0 && (sizes[label] as f64) < min_pixels {
            mask.put_pixel(x, y, Luma([0]));
        }
    }
    mask
}

fn region_props(labels: &ImageBuffer<Luma<u32>, Vec<u32>>, scale: GridScale) -> Vec<Region> {
    let n = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    // (area, row sum, col sum) per label
    let mut acc = vec![(0usize, 0f64, 0f64); n + 1];
    for (col, row, p) in labels.enumerate_pixels() {
        let entry = &mut acc[p[0] as usize];
        entry.0 += 1;
        entry.1 += row as f64;
        entry.2 += col as f64;
    }
    acc.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, (area, _, _))| *area > 0)
        .enumerate()
        .map(|(index, (label, &(area, rows, cols)))| Region {
            index,
            label: label as u32,
            area: area as f64 / scale.area(),
            centroid_row: rows / area as f64 / scale.x,
            centroid_col: cols / area as f64 / scale.y,
        })
        .collect()
}

/// Segments `gray` for a simulation box of `size_x` x `size_y` lattice nodes.
pub fn segment(gray: GrayImage, size_x: usize, size_y: usize, small_object_threshold: f64) -> Result<Segmentation> {
    let scale = GridScale::new(&gray, size_x, size_y)?;
    let threshold = otsu_level(&gray);
    let mask = clean_mask(&gray, threshold, small_object_threshold * scale.area());
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
    let regions = region_props(&labels, scale);
    Ok(Segmentation { gray, labels, threshold, scale, regions })
}

impl Segmentation {
    pub fn stats(&self) -> Result<AreaStats> {
        let areas: Vec<f64> = self.regions.iter().map(|r| r.area).collect();
        AreaStats::from_areas(&areas)
    }

    fn gray_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.gray.width(), self.gray.height(), |x, y| {
            let v = self.gray.get_pixel(x, y)[0];
            Rgb([v, v, v])
        })
    }

    /// Gray image with every pixel next to a different label painted yellow.
    pub fn boundaries(&self) -> RgbImage {
        let mut out = self.gray_rgb();
        let (w, h) = self.labels.dimensions();
        for (x, y, p) in self.labels.enumerate_pixels() {
            let here = p[0];
            let neighbours = [
                (x.checked_sub(1), Some(y)),
                ((x + 1 < w).then_some(x + 1), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), (y + 1 < h).then_some(y + 1)),
            ];
            let on_edge = neighbours.iter().any(|n| match n {
                (Some(nx), Some(ny)) => self.labels.get_pixel(*nx, *ny)[0] != here,
                _ => false,
            });
            if on_edge {
                out.put_pixel(x, y, BOUNDARY_COLOR);
            }
        }
        out
    }

    /// Label colors blended over the gray image; background stays gray.
    pub fn label_overlay(&self) -> RgbImage {
        let mut out = self.gray_rgb();
        for (x, y, p) in self.labels.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            let (r, g, b) = LABEL_COLORS[(p[0] as usize - 1) % LABEL_COLORS.len()];
            let v = self.gray.get_pixel(x, y)[0];
            let base = Srgb::new(v, v, v).into_format::<f32>();
            let mixed = base.mix(Srgb::new(r, g, b).into_format::<f32>(), OVERLAY_ALPHA);
            let (r, g, b) = mixed.into_format::<u8>().into_components();
            out.put_pixel(x, y, Rgb([r, g, b]));
        }
        out
    }
}

fn write_results(regions: &[Region], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    for region in regions {
        writer.serialize(region)?;
    }
    writer.flush()?;
    Ok(())
}

/// Centroids over the simulation box, each drawn as a disc of its cell's area.
fn plot_centroids(regions: &[Region], size_x: usize, size_y: usize, path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (CENTROID_PLOT_SIZE, CENTROID_PLOT_SIZE)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("Failed to draw {}: {}", path.display(), e))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(0.0..size_x as f64, 0.0..size_y as f64)
        .map_err(|e| anyhow::anyhow!("Failed to build chart: {}", e))?;

    let px_per_unit = CENTROID_PLOT_SIZE as f64 / size_x.max(size_y) as f64;
    chart
        .draw_series(regions.iter().map(|r| {
            let radius = ((r.area / std::f64::consts::PI).sqrt() * px_per_unit).max(1.0) as i32;
            Circle::new((r.centroid_row, r.centroid_col), radius, BLUE.mix(0.6).filled())
        }))
        .map_err(|e| anyhow::anyhow!("Failed to draw centroids: {}", e))?;
    root.present().map_err(|e| anyhow::anyhow!("Failed to save {}: {}", path.display(), e))?;
    Ok(())
}

/// Creates `outdir`, refusing an existing one unless `force` is set.
fn prepare_outdir(outdir: &Path, force: bool) -> Result<()> {
    if outdir.exists() {
        if !force {
            anyhow::bail!("{} already exists; pass --force to overwrite", outdir.display());
        }
        warn!("{} already exists, overwriting its results", outdir.display());
    }
    std::fs::create_dir_all(outdir).with_context(|| format!("Failed to create {}", outdir.display()))
}

/// Segments the image at `input` and writes the table and figures into `outdir`.
pub fn run_segmentation(
    input: &Path,
    outdir: &Path,
    size_x: usize,
    size_y: usize,
    small_object_threshold: f64,
    force: bool,
) -> Result<AreaStats> {
    let gray = image::open(input)
        .with_context(|| format!("Failed to read image {}", input.display()))?
        .to_luma8();
    info!("Input: {} X {}", gray.height(), gray.width());
    prepare_outdir(outdir, force)?;

    let seg = segment(gray, size_x, size_y, small_object_threshold)?;
    info!("Otsu threshold {}, objects below {} removed", seg.threshold, small_object_threshold);
    let stats = seg.stats()?;
    info!("{} cells identified from the image", stats.count);
    info!("Average area : {:.4} +/- {:.2}", stats.mean, stats.gstd);
    info!("CV           : {:.4}", stats.cv);
    info!("min          : {:.4}", stats.min);
    info!("max          : {:.4}", stats.max);

    let out = |name: &str| -> PathBuf { outdir.join(name) };
    write_results(&seg.regions, &out(RESULTS_CSV))?;
    seg.boundaries()
        .save(out(BOUNDARIES_PNG))
        .with_context(|| format!("Failed to save {}", BOUNDARIES_PNG))?;
    seg.label_overlay()
        .save(out(LABELS_PNG))
        .with_context(|| format!("Failed to save {}", LABELS_PNG))?;
    plot_centroids(&seg.regions, size_x, size_y, &out(CENTROIDS_PNG))?;
    info!("Segmentation results saved to {}", outdir.display());
    Ok(stats)
}
