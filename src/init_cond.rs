//! Initial geometry for LBIBCell: one round cell written in the solver's
//! plain-text node/connection format.

use anyhow::{Context, Result};
use log::info;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const NODES_HEADER: &str = "#Nodes (id\txPos\tyPos)";
const CONNECTION_HEADER: &str = "#Connection (nodeId1\tnodeId2\tdomainId\tbsolver\tcdesolver\t...)";

/// Where the cell goes and how finely its boundary is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Centered in a `size_x` x `size_y` box.
    Grid { size_x: u32, size_y: u32 },
    /// At an explicit lattice position.
    Center { x: i64, y: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleCell {
    pub center: (f64, f64),
    pub radius: f64,
    pub res: usize,
}

/// Center of the box, failing when the circle would not fit inside it.
pub fn grid_center(size_x: u32, size_y: u32, radius: f64) -> Result<(f64, f64)> {
    let x = size_x as f64 / 2.0;
    let y = size_y as f64 / 2.0;
    if size_x as f64 - x <= radius || size_y as f64 - y <= radius {
        anyhow::bail!("Radius {:?} is too large for grid ({}, {})", radius, size_x, size_y);
    }
    Ok((x, y))
}

impl CircleCell {
    pub fn new(placement: Placement, radius: f64, res: usize) -> Result<Self> {
        if res < 3 {
            anyhow::bail!("a cell needs at least 3 boundary nodes, got res = {}", res);
        }
        if !(radius > 0.0) {
            anyhow::bail!("radius must be positive, got {}", radius);
        }
        let center = match placement {
            Placement::Grid { size_x, size_y } => grid_center(size_x, size_y, radius)?,
            Placement::Center { x, y } => (x as f64, y as f64),
        };
        Ok(CircleCell { center, radius, res })
    }

    /// `res` boundary nodes, counter-clockwise from angle 0.
    pub fn points(&self) -> Vec<(f64, f64)> {
        let (cx, cy) = self.center;
        (0..self.res)
            .map(|i| {
                let angle = (2.0 * PI) * (i as f64 / self.res as f64);
                (cx + self.radius * angle.cos(), cy + self.radius * angle.sin())
            })
            .collect()
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let points = self.points();
        // The node block appears twice in the solver's input format.
        for _ in 0..2 {
            writeln!(w, "{}", NODES_HEADER)?;
            for (i, (x, y)) in points.iter().enumerate() {
                writeln!(w, "{}\t{:?}\t{:?}", i + 1, x, y)?;
            }
        }
        writeln!(w, "{}", CONNECTION_HEADER)?;
        for i in 0..self.res - 1 {
            writeln!(w, "{}\t{}\t1", i + 1, i + 2)?;
        }
        writeln!(w, "{}\t1\t1", self.res)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Output file {} cannot be created", path.display()))?;
        let mut w = BufWriter::new(file);
        self.write(&mut w)?;
        w.flush()?;
        info!("Parameters saved to {}", path.display());
        Ok(())
    }
}

/// File name encoding the placement, e.g. `parameters_1000_by_1000_radius_50.0_center.txt`.
pub fn parameters_path(out_dir: &Path, placement: Placement, radius: f64, res: usize) -> PathBuf {
    let name = match placement {
        Placement::Grid { size_x, size_y } => {
            format!("parameters_{}_by_{}_radius_{:?}_center.txt", size_x, size_y, radius)
        }
        Placement::Center { x, y } => {
            format!("parameters_{}_by_{}_radius_{}_res_{}.txt", x, y, radius.trunc() as i64, res)
        }
    };
    out_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_center_requires_room() {
        assert_eq!(grid_center(1000, 800, 50.0).unwrap(), (500.0, 400.0));
        assert!(grid_center(100, 1000, 50.0).is_err());
        assert!(grid_center(1000, 99, 49.6).is_err());
    }

    #[test]
    fn test_points_lie_on_circle() {
        let cell = CircleCell::new(Placement::Center { x: 100, y: 200 }, 10.0, 4).unwrap();
        let pts = cell.points();
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[0], (110.0, 200.0));
        assert!((pts[1].0 - 100.0).abs() < 1e-12 && (pts[1].1 - 210.0).abs() < 1e-12);
        for (x, y) in pts {
            let r = ((x - 100.0).powi(2) + (y - 200.0).powi(2)).sqrt();
            assert!((r - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_file_layout() {
        let cell = CircleCell::new(Placement::Center { x: 0, y: 0 }, 2.0, 3).unwrap();
        let mut buf = Vec::new();
        cell.write(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2 * (1 + 3) + 1 + 3);
        assert_eq!(lines[0], NODES_HEADER);
        assert_eq!(lines[1], "1\t2.0\t0.0");
        assert_eq!(lines[4], NODES_HEADER);
        assert_eq!(lines[5], lines[1]);
        assert_eq!(lines[8], CONNECTION_HEADER);
        assert_eq!(&lines[9..], &["1\t2\t1", "2\t3\t1", "3\t1\t1"]);
    }

    #[test]
    fn test_parameter_file_names() {
        let out = Path::new("build/config");
        assert_eq!(
            parameters_path(out, Placement::Grid { size_x: 1000, size_y: 1000 }, 50.0, 360),
            out.join("parameters_1000_by_1000_radius_50.0_center.txt")
        );
        assert_eq!(
            parameters_path(out, Placement::Center { x: 300, y: 120 }, 12.7, 90),
            out.join("parameters_300_by_120_radius_12_res_90.txt")
        );
    }

    #[test]
    fn test_rejects_degenerate_cells() {
        assert!(CircleCell::new(Placement::Center { x: 0, y: 0 }, 1.0, 2).is_err());
        assert!(CircleCell::new(Placement::Center { x: 0, y: 0 }, 0.0, 360).is_err());
    }
}
