//! Minimal NPY (format version 1.0) codec for 2-D C-order float arrays.

use crate::matrix::ConcentrationMatrix;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use zerocopy::IntoBytes;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

/// Element types this codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    F32,
    F64,
}

impl Dtype {
    fn descr(self) -> &'static str {
        match (self, cfg!(target_endian = "little")) {
            (Dtype::F32, true) => "<f4",
            (Dtype::F32, false) => ">f4",
            (Dtype::F64, true) => "<f8",
            (Dtype::F64, false) => ">f8",
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

/// A loaded 2-D array, widened to f64.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

fn header_bytes(dtype: Dtype, rows: usize, cols: usize) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': ({}, {}), }}",
        dtype.descr(), rows, cols
    );
    // magic (6) + version (2) + header length (2)
    let prefix = MAGIC.len() + 4;
    let unpadded = prefix + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(prefix + header_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    out
}

fn write_payload<P: AsRef<Path>>(path: P, header: &[u8], payload: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header)?;
    writer.write_all(payload)?;
    writer.flush().with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Saves a concentration matrix as a `(size_x, size_y)` float64 array.
pub fn write_matrix<P: AsRef<Path>>(path: P, mat: &ConcentrationMatrix) -> Result<()> {
    let header = header_bytes(Dtype::F64, mat.size_x, mat.size_y);
    write_payload(path, &header, mat.data.as_slice().as_bytes())
}

/// Saves equally long rows as a `(rows.len(), n)` float32 array.
pub fn write_f32_rows<P: AsRef<Path>>(path: P, rows: &[Vec<f32>]) -> Result<()> {
    let cols = rows.first().map_or(0, |r| r.len());
    if rows.iter().any(|r| r.len() != cols) {
        anyhow::bail!("all rows of an npy array must have the same length");
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    let header = header_bytes(Dtype::F32, rows.len(), cols);
    write_payload(path, &header, flat.as_slice().as_bytes())
}

fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let start = dict.find(&format!("'{}':", key))? + key.len() + 3;
    let rest = dict[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(',')?
    };
    Some(rest[..end].trim())
}

fn parse_header(dict: &str) -> Result<(Dtype, bool, usize, usize)> {
    let descr = dict_value(dict, "descr").context("npy header has no descr")?.trim_matches('\'');
    let dtype = match &descr[1..] {
        "f4" => Dtype::F32,
        "f8" => Dtype::F64,
        other => anyhow::bail!("unsupported npy dtype '{}'", other),
    };
    let little = match descr.chars().next() {
        Some('<') | Some('|') => true,
        Some('>') => false,
        _ => anyhow::bail!("unsupported npy byte order in '{}'", descr),
    };
    if dict_value(dict, "fortran_order") != Some("False") {
        anyhow::bail!("Fortran-ordered npy arrays are not supported");
    }
    let shape = dict_value(dict, "shape").context("npy header has no shape")?;
    let dims: Vec<usize> = shape
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid npy shape {}", shape))?;
    if dims.len() != 2 {
        anyhow::bail!("expected a 2-D npy array, got shape {}", shape);
    }
    Ok((dtype, little, dims[0], dims[1]))
}

/// Loads a 2-D float32/float64 array.
pub fn read_array<P: AsRef<Path>>(path: P) -> Result<NpyArray> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut prefix = [0u8; 10];
    reader.read_exact(&mut prefix).with_context(|| format!("{} is not an npy file", path.display()))?;
    if &prefix[..6] != MAGIC {
        anyhow::bail!("{} is not an npy file", path.display());
    }
    let header_len = match prefix[6] {
        1 => u16::from_le_bytes([prefix[8], prefix[9]]) as usize,
        v => anyhow::bail!("unsupported npy version {}.{} in {}", v, prefix[7], path.display()),
    };
    let mut dict = vec![0u8; header_len];
    reader.read_exact(&mut dict)?;
    let dict = String::from_utf8_lossy(&dict);
    let (dtype, little, rows, cols) =
        parse_header(&dict).with_context(|| format!("bad npy header in {}", path.display()))?;

    let mut raw = Vec::with_capacity(rows * cols * dtype.size());
    reader.read_to_end(&mut raw)?;
    if raw.len() != rows * cols * dtype.size() {
        anyhow::bail!(
            "{}: payload has {} bytes, expected {}",
            path.display(), raw.len(), rows * cols * dtype.size()
        );
    }

    let data = match dtype {
        Dtype::F64 => raw
            .chunks_exact(8)
            .map(|c| {
                let b: [u8; 8] = c.try_into().unwrap_or_default();
                if little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) }
            })
            .collect(),
        Dtype::F32 => raw
            .chunks_exact(4)
            .map(|c| {
                let b: [u8; 4] = c.try_into().unwrap_or_default();
                (if little { f32::from_le_bytes(b) } else { f32::from_be_bytes(b) }) as f64
            })
            .collect(),
    };
    Ok(NpyArray { rows, cols, data })
}

/// Loads a matrix written by [`write_matrix`] (or by numpy with the same layout).
pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<ConcentrationMatrix> {
    let arr = read_array(path)?;
    ConcentrationMatrix::from_vec(arr.rows, arr.cols, arr.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_aligned() {
        let header = header_bytes(Dtype::F64, 300, 1000);
        assert_eq!(header.len() % HEADER_ALIGN, 0);
        assert_eq!(*header.last().unwrap(), b'\n');
        let text = String::from_utf8_lossy(&header[10..]);
        assert!(text.contains("'shape': (300, 1000)"));
    }

    #[test]
    fn test_matrix_file_keeps_values_and_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cells_0.npy");
        let mut mat = ConcentrationMatrix::zeros(3, 2);
        mat.set(2, 1, 1.5e-3);
        mat.set(0, 0, -4.0);
        write_matrix(&path, &mat).unwrap();

        let loaded = read_matrix(&path).unwrap();
        assert_eq!(loaded, mat);
    }

    #[test]
    fn test_f32_rows_load_as_two_by_n() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centroids.npy");
        write_f32_rows(&path, &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();

        let arr = read_array(&path).unwrap();
        assert_eq!((arr.rows, arr.cols), (2, 3));
        assert_eq!(arr.data[4], 5.0);
        assert!(write_f32_rows(&path, &[vec![1.0], vec![]]).is_err());
    }

    #[test]
    fn test_rejects_fortran_order_and_other_dtypes() {
        assert!(parse_header("{'descr': '<f8', 'fortran_order': True, 'shape': (2, 2), }").is_err());
        assert!(parse_header("{'descr': '<i8', 'fortran_order': False, 'shape': (2, 2), }").is_err());
        assert!(parse_header("{'descr': '<f8', 'fortran_order': False, 'shape': (4,), }").is_err());
    }
}
