use crate::export;
use anyhow::Result;
use lbibcell_common::{npy, CentroidSet, OutputFormat, PolyMesh};
use log::info;
use std::path::Path;

/// Centroids of the cells of one type in a reporter mesh.
///
/// When at least one cell matches, `<stem>.npy` (`float32`, shape `[2, n]`) and
/// `<stem>_centroids.<ext>` are written next to the mesh.
pub fn export_centroids(input: &Path, cell_type: f64, format: OutputFormat) -> Result<CentroidSet> {
    let mesh = PolyMesh::read_vtp(input)?;
    let set = mesh.centroids_of_type(cell_type)?;
    info!("{} of {} cells are type: {:.1}", set.centroids.len(), set.total_cells, cell_type);

    let Some((mean_x, mean_y)) = set.mean() else {
        info!("No cell of type {:.1} in {}, nothing written", cell_type, input.display());
        return Ok(set);
    };
    info!("Mean centroid: ({:.4}, {:.4})", mean_x, mean_y);

    let dir = input.parent().unwrap_or(Path::new("."));
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

    let rows = vec![
        set.centroids.iter().map(|c| c.x as f32).collect::<Vec<f32>>(),
        set.centroids.iter().map(|c| c.y as f32).collect::<Vec<f32>>(),
    ];
    let npy_path = dir.join(format!("{}.npy", stem));
    npy::write_f32_rows(&npy_path, &rows)?;
    info!("Centroids saved to {}", npy_path.display());

    let table = export::table_path(dir, &stem, "_centroids", format);
    export::save_records(&set.centroids, format, &table)?;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbibcell_common::npy::read_array;

    // Two unit squares labelled 1 and one triangle labelled 2.
    const MESH: &str = r#"<?xml version="1.0"?>
<VTKFile type="PolyData" version="0.1" byte_order="LittleEndian">
  <PolyData>
    <Piece NumberOfPoints="9" NumberOfPolys="3">
      <PointData Scalars="cell_type">
        <DataArray type="Float64" Name="cell_type" format="ascii">1 1 1 1 1 1 1 1 2</DataArray>
      </PointData>
      <Points>
        <DataArray type="Float32" NumberOfComponents="3" format="ascii">
          0 0 0 2 0 0 2 2 0 0 2 0
          4 4 0 6 4 0 6 6 0 4 6 0
          9 9 0
        </DataArray>
      </Points>
      <Polys>
        <DataArray type="Int64" Name="connectivity" format="ascii">0 1 2 3 4 5 6 7 8 8 8</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">4 8 11</DataArray>
      </Polys>
    </Piece>
  </PolyData>
</VTKFile>
"#;

    #[test]
    fn test_writes_npy_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let vtp = dir.path().join("Cells_100_0.vtp");
        std::fs::write(&vtp, MESH).unwrap();

        let set = export_centroids(&vtp, 1.0, OutputFormat::Csv).unwrap();
        assert_eq!(set.total_cells, 3);
        assert_eq!(set.mean(), Some((3.0, 3.0)));

        let arr = read_array(dir.path().join("Cells_100_0.npy")).unwrap();
        assert_eq!((arr.rows, arr.cols), (2, 2));
        assert_eq!(arr.data, vec![1.0, 5.0, 1.0, 5.0]);

        let table = std::fs::read_to_string(dir.path().join("Cells_100_0_centroids.csv")).unwrap();
        assert_eq!(table, "cell,x,y\n0,1.0,1.0\n1,5.0,5.0\n");
    }

    #[test]
    fn test_no_match_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vtp = dir.path().join("mesh.vtp");
        std::fs::write(&vtp, MESH).unwrap();

        let set = export_centroids(&vtp, 7.0, OutputFormat::Json).unwrap();
        assert!(set.centroids.is_empty());
        assert!(!dir.path().join("mesh.npy").exists());
        assert!(!dir.path().join("mesh_centroids.json").exists());
    }
}
