//! Reporter meshes: VTK XML PolyData (`.vtp`) with ASCII data arrays.
//!
//! The solver's cell reporter writes one polygon per cell and labels every
//! point with a `cell_type` value. Only the parts needed for centroid
//! extraction, relabelling and translation are modelled here.

use anyhow::{Context, Result};
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CELL_TYPE_ARRAY: &str = "cell_type";

/// A named VTK data array; values are kept as f64 whatever the on-disk type.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub name: String,
    pub vtk_type: String,
    pub components: usize,
    pub values: Vec<f64>,
}

impl DataArray {
    fn is_integer(&self) -> bool {
        self.vtk_type.starts_with("Int") || self.vtk_type.starts_with("UInt")
    }
}

/// Axis-aligned limits, `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != 4 {
            anyhow::bail!("box needs exactly 4 values (MIN_X MIN_Y MAX_X MAX_Y), got {}", values.len());
        }
        let bbox = BoundingBox { min_x: values[0], min_y: values[1], max_x: values[2], max_y: values[3] };
        if bbox.min_x > bbox.max_x || bbox.min_y > bbox.max_y {
            anyhow::bail!("box minimum exceeds maximum: {:?}", values);
        }
        Ok(bbox)
    }

    /// Strict containment: touching the box edge counts as outside.
    pub fn strictly_contains(&self, other: &BoundingBox) -> bool {
        other.min_x > self.min_x && other.min_y > self.min_y && other.max_x < self.max_x && other.max_y < self.max_y
    }
}

/// Centroid of one cell polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub cell: usize,
    pub x: f64,
    pub y: f64,
}

/// Centroids of the cells carrying one `cell_type` label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidSet {
    pub cell_type: f64,
    pub total_cells: usize,
    pub centroids: Vec<Centroid>,
}

impl CentroidSet {
    /// Mean of all centroids, `None` when no cell matched.
    pub fn mean(&self) -> Option<(f64, f64)> {
        if self.centroids.is_empty() {
            return None;
        }
        let n = self.centroids.len() as f64;
        let (sx, sy) = self.centroids.iter().fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
        Some((sx / n, sy / n))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolyMesh {
    pub points: Vec<[f64; 3]>,
    /// VTK type name of the point coordinates, kept for writing back.
    pub points_type: String,
    pub polys: Vec<Vec<usize>>,
    pub point_data: Vec<DataArray>,
    pub cell_data: Vec<DataArray>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    PointData,
    CellData,
    Points,
    Polys,
    Other,
}

struct PendingArray {
    array: DataArray,
    text: String,
}

fn start_array(e: &BytesStart) -> Result<DataArray> {
    let mut name = String::new();
    let mut vtk_type = "Float32".to_string();
    let mut components = 1;
    let mut format = "ascii".to_string();
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"Name" => name = value,
            b"type" => vtk_type = value,
            b"NumberOfComponents" => {
                components = value.parse().with_context(|| format!("invalid NumberOfComponents '{}'", value))?
            }
            b"format" => format = value,
            _ => {}
        }
    }
    if format != "ascii" {
        anyhow::bail!(
            "DataArray '{}' uses format=\"{}\"; only ASCII reporter meshes are supported",
            name, format
        );
    }
    Ok(DataArray { name, vtk_type, components: components.max(1), values: Vec::new() })
}

fn parse_values(text: &str, name: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|t| t.parse::<f64>().with_context(|| format!("invalid value '{}' in DataArray '{}'", t, name)))
        .collect()
}

fn to_indices(values: &[f64], name: &str) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|&v| {
            if v < 0.0 || v.fract() != 0.0 {
                anyhow::bail!("DataArray '{}' holds a non-index value {}", name, v);
            }
            Ok(v as usize)
        })
        .collect()
}

impl PolyMesh {
    /// Parses an ASCII `.vtp` document.
    pub fn from_vtp_str(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut mesh = PolyMesh { points_type: "Float32".to_string(), ..Default::default() };
        let mut section = Section::None;
        let mut pending: Option<PendingArray> = None;
        let mut connectivity: Option<Vec<usize>> = None;
        let mut offsets: Option<Vec<usize>> = None;
        let mut saw_piece = false;

        loop {
            let event = reader
                .read_event()
                .with_context(|| format!("XML error at byte {}", reader.buffer_position()))?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    match e.name().as_ref() {
                        b"VTKFile" => {
                            for attr in e.attributes() {
                                let attr = attr?;
                                if attr.key.as_ref() == b"type" && attr.unescape_value()? != "PolyData" {
                                    anyhow::bail!("not a PolyData file (type=\"{}\")", attr.unescape_value()?);
                                }
                            }
                        }
                        b"Piece" => {
                            if saw_piece {
                                warn!("vtp has several pieces; only the first one is read");
                                break;
                            }
                            saw_piece = true;
                        }
                        b"PointData" if !is_empty => section = Section::PointData,
                        b"CellData" if !is_empty => section = Section::CellData,
                        b"Points" if !is_empty => section = Section::Points,
                        b"Polys" if !is_empty => section = Section::Polys,
                        b"Verts" | b"Lines" | b"Strips" if !is_empty => section = Section::Other,
                        b"DataArray" => {
                            let array = start_array(e)?;
                            if is_empty {
                                finish_array(&mut mesh, section, array, &mut connectivity, &mut offsets)?;
                            } else {
                                pending = Some(PendingArray { array, text: String::new() });
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(e) => {
                    if let Some(p) = pending.as_mut() {
                        p.text.push_str(&e.unescape()?);
                        p.text.push(' ');
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"DataArray" => {
                        if let Some(mut p) = pending.take() {
                            p.array.values = parse_values(&p.text, &p.array.name)?;
                            finish_array(&mut mesh, section, p.array, &mut connectivity, &mut offsets)?;
                        }
                    }
                    b"PointData" | b"CellData" | b"Points" | b"Polys" | b"Verts" | b"Lines" | b"Strips" => {
                        section = Section::None
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_piece {
            anyhow::bail!("vtp has no Piece element");
        }
        if let (Some(conn), Some(offs)) = (connectivity, offsets) {
            let mut start = 0;
            for &end in &offs {
                if end < start || end > conn.len() {
                    anyhow::bail!("polygon offsets are inconsistent with connectivity ({} > {})", end, conn.len());
                }
                mesh.polys.push(conn[start..end].to_vec());
                start = end;
            }
        }
        for poly in &mesh.polys {
            if let Some(&bad) = poly.iter().find(|&&id| id >= mesh.points.len()) {
                anyhow::bail!("polygon refers to point {} but only {} points exist", bad, mesh.points.len());
            }
        }
        for array in &mesh.point_data {
            if array.values.len() != mesh.points.len() * array.components {
                anyhow::bail!(
                    "point array '{}' has {} values for {} points",
                    array.name, array.values.len(), mesh.points.len()
                );
            }
        }
        debug!("Parsed vtp: {} points, {} polygons", mesh.points.len(), mesh.polys.len());
        Ok(mesh)
    }

    pub fn read_vtp<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mesh {}", path.display()))?;
        Self::from_vtp_str(&xml).with_context(|| format!("Failed to parse mesh {}", path.display()))
    }

    /// Writes the mesh back as an ASCII `.vtp`.
    pub fn write_vtp<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut w = BufWriter::new(file);

        writeln!(w, "<?xml version=\"1.0\"?>")?;
        writeln!(w, "<VTKFile type=\"PolyData\" version=\"0.1\" byte_order=\"LittleEndian\">")?;
        writeln!(w, "  <PolyData>")?;
        writeln!(
            w,
            "    <Piece NumberOfPoints=\"{}\" NumberOfVerts=\"0\" NumberOfLines=\"0\" NumberOfStrips=\"0\" NumberOfPolys=\"{}\">",
            self.points.len(),
            self.polys.len()
        )?;

        write_data_section(&mut w, "PointData", &self.point_data)?;
        write_data_section(&mut w, "CellData", &self.cell_data)?;

        writeln!(w, "      <Points>")?;
        let coords: Vec<f64> = self.points.iter().flat_map(|p| p.iter().copied()).collect();
        write_array(
            &mut w,
            &DataArray { name: "Points".into(), vtk_type: self.points_type.clone(), components: 3, values: coords },
        )?;
        writeln!(w, "      </Points>")?;

        writeln!(w, "      <Polys>")?;
        let mut conn = Vec::new();
        let mut offs = Vec::with_capacity(self.polys.len());
        for poly in &self.polys {
            conn.extend(poly.iter().map(|&i| i as f64));
            offs.push(conn.len() as f64);
        }
        write_array(&mut w, &DataArray { name: "connectivity".into(), vtk_type: "Int64".into(), components: 1, values: conn })?;
        write_array(&mut w, &DataArray { name: "offsets".into(), vtk_type: "Int64".into(), components: 1, values: offs })?;
        writeln!(w, "      </Polys>")?;

        writeln!(w, "    </Piece>")?;
        writeln!(w, "  </PolyData>")?;
        writeln!(w, "</VTKFile>")?;
        w.flush().with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn point_array(&self, name: &str) -> Option<&DataArray> {
        self.point_data.iter().find(|a| a.name == name)
    }

    pub fn cell_type(&self) -> Result<&[f64]> {
        self.point_array(CELL_TYPE_ARRAY)
            .map(|a| a.values.as_slice())
            .with_context(|| format!("mesh has no point array named '{}'", CELL_TYPE_ARRAY))
    }

    fn cell_type_mut(&mut self) -> Result<&mut Vec<f64>> {
        self.point_data
            .iter_mut()
            .find(|a| a.name == CELL_TYPE_ARRAY)
            .map(|a| &mut a.values)
            .with_context(|| format!("mesh has no point array named '{}'", CELL_TYPE_ARRAY))
    }

    /// Mean of the polygon's vertex coordinates. Exact only for regular shapes, which
    /// is close enough for the near-convex cells the reporter writes.
    pub fn polygon_centroid(&self, poly: &[usize]) -> Option<(f64, f64)> {
        if poly.is_empty() {
            return None;
        }
        let n = poly.len() as f64;
        let (sx, sy) = poly.iter().fold((0.0, 0.0), |(sx, sy), &i| (sx + self.points[i][0], sy + self.points[i][1]));
        Some((sx / n, sy / n))
    }

    pub fn poly_bounds(&self, poly: &[usize]) -> Option<BoundingBox> {
        let first = self.points[*poly.first()?];
        let init = BoundingBox { min_x: first[0], min_y: first[1], max_x: first[0], max_y: first[1] };
        Some(poly.iter().fold(init, |b, &i| {
            let p = self.points[i];
            BoundingBox {
                min_x: b.min_x.min(p[0]),
                min_y: b.min_y.min(p[1]),
                max_x: b.max_x.max(p[0]),
                max_y: b.max_y.max(p[1]),
            }
        }))
    }

    /// Bounds over every point, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let all: Vec<usize> = (0..self.points.len()).collect();
        self.poly_bounds(&all)
    }

    /// Centroids of the polygons whose every vertex is labelled `cell_type_id`.
    pub fn centroids_of_type(&self, cell_type_id: f64) -> Result<CentroidSet> {
        let labels = self.cell_type()?;
        let centroids = self
            .polys
            .iter()
            .enumerate()
            .filter(|(_, poly)| !poly.is_empty() && poly.iter().all(|&i| labels[i] == cell_type_id))
            .filter_map(|(cell, poly)| self.polygon_centroid(poly).map(|(x, y)| Centroid { cell, x, y }))
            .collect();
        Ok(CentroidSet { cell_type: cell_type_id, total_cells: self.polys.len(), centroids })
    }

    /// Sets `cell_type` to `new_id` on every point of the polygons lying strictly inside `bbox`.
    /// Returns how many polygons were relabelled.
    pub fn relabel_within_box(&mut self, bbox: &BoundingBox, new_id: f64) -> Result<usize> {
        let inside: Vec<usize> = self
            .polys
            .iter()
            .enumerate()
            .filter(|(_, poly)| self.poly_bounds(poly).is_some_and(|b| bbox.strictly_contains(&b)))
            .map(|(i, _)| i)
            .collect();
        let point_ids: Vec<usize> = inside.iter().flat_map(|&i| self.polys[i].iter().copied()).collect();
        let labels = self.cell_type_mut()?;
        for id in point_ids {
            labels[id] = new_id;
        }
        Ok(inside.len())
    }

    pub fn translate_x(&mut self, dx: f64) {
        for p in &mut self.points {
            p[0] += dx;
        }
    }
}

fn finish_array(
    mesh: &mut PolyMesh,
    section: Section,
    array: DataArray,
    connectivity: &mut Option<Vec<usize>>,
    offsets: &mut Option<Vec<usize>>,
) -> Result<()> {
    match section {
        Section::PointData => mesh.point_data.push(array),
        Section::CellData => mesh.cell_data.push(array),
        Section::Points => {
            if array.components != 3 || array.values.len() % 3 != 0 {
                anyhow::bail!("Points must have 3 components, got {}", array.components);
            }
            mesh.points_type = array.vtk_type.clone();
            mesh.points = array.values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        }
        Section::Polys => match array.name.as_str() {
            "connectivity" => *connectivity = Some(to_indices(&array.values, &array.name)?),
            "offsets" => *offsets = Some(to_indices(&array.values, &array.name)?),
            other => debug!("ignoring Polys array '{}'", other),
        },
        Section::Other => {
            if !array.values.is_empty() {
                warn!("vtp contains non-polygon cells; they are ignored");
            }
        }
        Section::None => debug!("ignoring stray DataArray '{}'", array.name),
    }
    Ok(())
}

fn write_data_section<W: Write>(w: &mut W, tag: &str, arrays: &[DataArray]) -> Result<()> {
    if arrays.is_empty() {
        writeln!(w, "      <{}>", tag)?;
    } else {
        writeln!(w, "      <{} Scalars=\"{}\">", tag, arrays[0].name)?;
    }
    for array in arrays {
        write_array(w, array)?;
    }
    writeln!(w, "      </{}>", tag)?;
    Ok(())
}

fn write_array<W: Write>(w: &mut W, array: &DataArray) -> Result<()> {
    write!(w, "        <DataArray type=\"{}\" Name=\"{}\"", array.vtk_type, array.name)?;
    if array.components > 1 {
        write!(w, " NumberOfComponents=\"{}\"", array.components)?;
    }
    writeln!(w, " format=\"ascii\">")?;
    let per_line = if array.components > 1 { array.components * 2 } else { 6 };
    for chunk in array.values.chunks(per_line) {
        write!(w, "          ")?;
        for (i, v) in chunk.iter().enumerate() {
            if i > 0 {
                write!(w, " ")?;
            }
            if array.is_integer() {
                write!(w, "{}", *v as i64)?;
            } else {
                write!(w, "{}", v)?;
            }
        }
        writeln!(w)?;
    }
    writeln!(w, "        </DataArray>")?;
    Ok(())
}

/// Where the reporter puts the polygon mesh of a given step: `Cells_<step>/Cells_<step>_0.vtp`.
pub fn reporter_vtp_path<P: AsRef<Path>>(dir: P, prefix: &str, step: u64) -> PathBuf {
    dir.as_ref()
        .join(format!("{}{}", prefix, step))
        .join(format!("{}{}_0.vtp", prefix, step))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two unit squares side by side plus a triangle; the right square and the
    /// triangle are labelled 1, the left square is mixed.
    pub(crate) const SAMPLE_VTP: &str = r#"<?xml version="1.0"?>
<VTKFile type="PolyData" version="0.1" byte_order="LittleEndian">
  <PolyData>
    <Piece NumberOfPoints="9" NumberOfVerts="0" NumberOfLines="0" NumberOfStrips="0" NumberOfPolys="3">
      <PointData Scalars="cell_type">
        <DataArray type="Float32" Name="cell_type" format="ascii">
          0 1 1 0 1 1 1 1 1
        </DataArray>
      </PointData>
      <CellData>
      </CellData>
      <Points>
        <DataArray type="Float32" NumberOfComponents="3" format="ascii">
          0 0 0  2 0 0  2 2 0  0 2 0
          4 0 0  4 2 0
          10 10 0  12 10 0  11 13 0
        </DataArray>
      </Points>
      <Polys>
        <DataArray type="Int32" Name="connectivity" format="ascii">
          0 1 2 3 1 4 5 2 6 7 8
        </DataArray>
        <DataArray type="Int32" Name="offsets" format="ascii">
          4 8 11
        </DataArray>
      </Polys>
    </Piece>
  </PolyData>
</VTKFile>
"#;

    #[test]
    fn test_parse_sample() {
        let mesh = PolyMesh::from_vtp_str(SAMPLE_VTP).unwrap();
        assert_eq!(mesh.points.len(), 9);
        assert_eq!(mesh.polys, vec![vec![0, 1, 2, 3], vec![1, 4, 5, 2], vec![6, 7, 8]]);
        assert_eq!(mesh.cell_type().unwrap()[0], 0.0);
        assert_eq!(mesh.points_type, "Float32");
    }

    #[test]
    fn test_centroids_only_for_fully_labelled_cells() {
        let mesh = PolyMesh::from_vtp_str(SAMPLE_VTP).unwrap();
        let set = mesh.centroids_of_type(1.0).unwrap();
        assert_eq!(set.total_cells, 3);
        assert_eq!(set.centroids.len(), 2);
        assert_eq!(set.centroids[0], Centroid { cell: 1, x: 3.0, y: 1.0 });
        assert_eq!(set.centroids[1], Centroid { cell: 2, x: 11.0, y: 11.0 });
        assert_eq!(set.mean(), Some((7.0, 6.0)));

        let none = mesh.centroids_of_type(5.0).unwrap();
        assert!(none.centroids.is_empty());
        assert_eq!(none.mean(), None);
    }

    #[test]
    fn test_relabel_uses_strict_bounds() {
        let mut mesh = PolyMesh::from_vtp_str(SAMPLE_VTP).unwrap();
        // The left square touches x = 0 and stays outside.
        let bbox = BoundingBox::from_slice(&[0.0, -1.0, 20.0, 20.0]).unwrap();
        let count = mesh.relabel_within_box(&bbox, 2.0).unwrap();
        assert_eq!(count, 2);
        let labels = mesh.cell_type().unwrap();
        assert_eq!(&labels[6..9], &[2.0, 2.0, 2.0]);
        assert_eq!(labels[4], 2.0);
        assert_eq!(labels[0], 0.0);
    }

    #[test]
    fn test_bounding_box_validation() {
        assert!(BoundingBox::from_slice(&[1.0, 25.0, 100.0]).is_err());
        assert!(BoundingBox::from_slice(&[100.0, 0.0, 1.0, 10.0]).is_err());
    }

    #[test]
    fn test_written_mesh_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moved.vtp");
        let mut mesh = PolyMesh::from_vtp_str(SAMPLE_VTP).unwrap();
        mesh.translate_x(-350.0);
        mesh.write_vtp(&path).unwrap();

        let loaded = PolyMesh::read_vtp(&path).unwrap();
        assert_eq!(loaded.polys, mesh.polys);
        assert_eq!(loaded.points[6], [-340.0, 10.0, 0.0]);
        assert_eq!(loaded.cell_type().unwrap(), mesh.cell_type().unwrap());
    }

    #[test]
    fn test_binary_arrays_rejected() {
        let xml = SAMPLE_VTP.replacen("format=\"ascii\"", "format=\"binary\"", 1);
        let err = PolyMesh::from_vtp_str(&xml).unwrap_err();
        assert!(format!("{:#}", err).contains("only ASCII"));
    }

    #[test]
    fn test_reporter_path_layout() {
        let p = reporter_vtp_path("out", "Cells_", 50);
        assert_eq!(p, PathBuf::from("out/Cells_50/Cells_50_0.vtp"));
    }
}
