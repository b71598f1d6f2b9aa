//! Cell meshes of a reporter run, one image per saved step, cells filled by `cell_type`.

use crate::frames::progress_bar;
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_polygon_mut, draw_polygon_mut};
use imageproc::point::Point;
use lbibcell_common::mesh::reporter_vtp_path;
use lbibcell_common::PolyMesh;
use log::{error, info};
use palette::{FromColor, Hsv, Srgb};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

const PALETTE_SIZE: usize = 16;
const PALETTE_SEED: u64 = 42;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const EDGE: Rgb<u8> = Rgb([0, 0, 0]);

/// Generate a shuffled HSV palette; the seed keeps colors stable between runs.
pub fn generate_color_palette(count: usize, seed: u64) -> Vec<Rgb<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut colors: Vec<Rgb<u8>> = (0..count)
        .map(|i| {
            let hue = i as f32 / count as f32;
            let saturation = 0.7 + rng.random_range(-0.1..0.1);
            let value = 0.8 + rng.random_range(-0.1..0.1);
            let rgb = Srgb::from_color(Hsv::new(hue * 360.0, saturation, value));
            Rgb([(rgb.red * 255.0) as u8, (rgb.green * 255.0) as u8, (rgb.blue * 255.0) as u8])
        })
        .collect();
    // Adjacent labels should not get similar colors
    colors.shuffle(&mut rng);
    colors
}

fn label_color(label: f64, palette: &[Rgb<u8>]) -> Rgb<u8> {
    let idx = label.round().max(0.0) as usize % palette.len().max(1);
    palette.get(idx).copied().unwrap_or(EDGE)
}

/// Pixel outline of a polygon with repeated vertices removed, or `None` when it collapses.
fn pixel_outline(mesh: &PolyMesh, poly: &[usize], size_y: usize, scale: f64) -> Option<Vec<Point<i32>>> {
    let mut outline: Vec<Point<i32>> = Vec::with_capacity(poly.len());
    for &i in poly {
        let [x, y, _] = mesh.points[i];
        let p = Point::new((x * scale).round() as i32, ((size_y as f64 - y) * scale).round() as i32);
        if outline.last() != Some(&p) {
            outline.push(p);
        }
    }
    while outline.len() > 1 && outline.first() == outline.last() {
        outline.pop();
    }
    (outline.len() >= 3).then_some(outline)
}

/// Draws every polygon filled with the color of its `cell_type`, edges in black.
/// The `size_x` x `size_y` lattice fills the image, y pointing up.
pub fn render_mesh(mesh: &PolyMesh, size_x: usize, size_y: usize, scale: u32, palette: &[Rgb<u8>]) -> Result<RgbImage> {
    let labels = mesh.cell_type()?;
    let mut image = RgbImage::from_pixel((size_x as u32 * scale).max(1), (size_y as u32 * scale).max(1), BACKGROUND);
    for poly in &mesh.polys {
        let Some(outline) = pixel_outline(mesh, poly, size_y, scale as f64) else {
            continue;
        };
        draw_polygon_mut(&mut image, &outline, label_color(labels[poly[0]], palette));
        let edges: Vec<Point<f32>> = outline.iter().map(|p| Point::new(p.x as f32, p.y as f32)).collect();
        draw_hollow_polygon_mut(&mut image, &edges, EDGE);
    }
    Ok(image)
}

/// Number of `<prefix>*.vtm` reporter sets in `dir`.
pub fn count_reporter_sets(dir: &Path, prefix: &str) -> Result<usize> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Cannot read {}", dir.display()))?;
    let mut count = 0;
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) && name.ends_with(".vtm") {
            count += 1;
        }
    }
    if count == 0 {
        anyhow::bail!("No cell reporter files saved in {}", dir.display());
    }
    Ok(count)
}

/// Renders `<prefix><step*i>/<prefix><step*i>_0.vtp` for every reporter set to
/// `<fig_dir>/<prefix><i>_cell_type.png`. Returns the images written.
pub fn plot_mesh_dir(
    dir: &Path,
    prefix: &str,
    step: u64,
    grid: (usize, usize),
    scale: u32,
    fig_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let count = count_reporter_sets(dir, prefix)?;
    std::fs::create_dir_all(fig_dir).with_context(|| format!("Creating {} failed", fig_dir.display()))?;
    let palette = generate_color_palette(PALETTE_SIZE, PALETTE_SEED);
    info!("Plotting {} meshes from {}", count, dir.display());

    let bar = progress_bar(count, "meshes");
    let written: Vec<PathBuf> = (0..count)
        .into_par_iter()
        .filter_map(|i| {
            let vtp = reporter_vtp_path(dir, prefix, step * i as u64);
            let figname = fig_dir.join(format!("{}{}_cell_type.png", prefix, i));
            let result = PolyMesh::read_vtp(&vtp)
                .and_then(|mesh| render_mesh(&mesh, grid.0, grid.1, scale, &palette))
                .and_then(|image| {
                    image.save(&figname).with_context(|| format!("Failed to save {}", figname.display()))
                });
            bar.inc(1);
            match result {
                Ok(()) => Some(figname),
                Err(e) => {
                    error!("Drawing {} failed: {:#}", vtp.display(), e);
                    None
                }
            }
        })
        .collect();
    bar.finish_with_message("plotted");
    info!("{} of {} mesh plots saved to {}", written.len(), count, fig_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"<VTKFile type="PolyData">
  <PolyData>
    <Piece NumberOfPoints="4" NumberOfPolys="1">
      <PointData>
        <DataArray type="Float64" Name="cell_type" format="ascii">1 1 1 1</DataArray>
      </PointData>
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">2 2 0 8 2 0 8 8 0 2 8 0</DataArray>
      </Points>
      <Polys>
        <DataArray type="Int64" Name="connectivity" format="ascii">0 1 2 3</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">4</DataArray>
      </Polys>
    </Piece>
  </PolyData>
</VTKFile>"#;

    #[test]
    fn test_palette_is_deterministic() {
        let a = generate_color_palette(8, 1);
        assert_eq!(a, generate_color_palette(8, 1));
        assert_eq!(a.len(), 8);
        assert_eq!(label_color(9.0, &a), a[1]);
    }

    #[test]
    fn test_render_fills_cell_with_label_color() {
        let mesh = PolyMesh::from_vtp_str(SQUARE).unwrap();
        let palette = generate_color_palette(4, 3);
        let img = render_mesh(&mesh, 10, 10, 2, &palette).unwrap();
        assert_eq!(img.dimensions(), (20, 20));
        // Inside the square (lattice (5, 5)) and outside it.
        assert_eq!(*img.get_pixel(10, 10), palette[1]);
        assert_eq!(*img.get_pixel(1, 1), BACKGROUND);
        // Lower-left corner of the square sits at pixel (4, 16) and is on an edge.
        assert_eq!(*img.get_pixel(4, 16), EDGE);
    }

    #[test]
    fn test_plot_dir_walks_reporter_sets() {
        let dir = tempfile::tempdir().unwrap();
        for step in [0u64, 10] {
            let sub = dir.path().join(format!("Cells_{}", step));
            std::fs::create_dir_all(&sub).unwrap();
            std::fs::write(sub.join(format!("Cells_{}_0.vtp", step)), SQUARE).unwrap();
            std::fs::write(dir.path().join(format!("Cells_{}.vtm", step)), "<VTKFile/>").unwrap();
        }
        let fig = dir.path().join("fig");
        let written = plot_mesh_dir(dir.path(), "Cells_", 10, (10, 10), 1, &fig).unwrap();
        assert_eq!(written.len(), 2);
        assert!(fig.join("Cells_1_cell_type.png").exists());
    }

    #[test]
    fn test_no_reporter_sets_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(count_reporter_sets(dir.path(), "Cells_").is_err());
    }
}
