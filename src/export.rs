use anyhow::{Context, Result};
use lbibcell_common::OutputFormat;
use log::{info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Refuses to replace an existing file unless `force` is set.
pub fn check_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() {
        if !force {
            anyhow::bail!("{} exists; pass --force to overwrite it", path.display());
        }
        warn!("Overwriting {}", path.display());
    }
    Ok(())
}

/// `<dir>/<stem><suffix>.<ext>` for the configured table format.
pub fn table_path(dir: &Path, stem: &str, suffix: &str, format: OutputFormat) -> PathBuf {
    dir.join(format!("{}{}.{}", stem, suffix, format.extension()))
}

/// Writes a list of records as a table in the requested format.
pub fn save_records<T: Serialize>(records: &[T], format: OutputFormat, path: &Path) -> Result<()> {
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_path(path)
                .with_context(|| format!("Error creating CSV file '{}'", path.display()))?;
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
            info!("Table saved to {}", path.display());
        }
        OutputFormat::Json => {
            let json_string = serde_json::to_string_pretty(records)
                .context("Error serializing records to JSON")?;
            let mut file = File::create(path)
                .with_context(|| format!("Error creating JSON file '{}'", path.display()))?;
            file.write_all(json_string.as_bytes())?;
            info!("Table saved to {}", path.display());
        }
        OutputFormat::Bincode => {
            // Binary format (compact, Rust-only)
            let file = File::create(path)
                .with_context(|| format!("Error creating file '{}'", path.display()))?;
            bincode::serialize_into(BufWriter::new(file), records)
                .context("Error serializing records to bincode")?;
            info!("Table saved to {} (binary format)", path.display());
        }
        OutputFormat::MessagePack => {
            let mut file = BufWriter::new(
                File::create(path).with_context(|| format!("Error creating file '{}'", path.display()))?,
            );
            rmp_serde::encode::write(&mut file, records)
                .context("Error serializing records to MessagePack")?;
            file.flush()?;
            info!("Table saved to {} (MessagePack format)", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        cell: usize,
        x: f64,
    }

    fn rows() -> Vec<Row> {
        vec![Row { cell: 0, x: 1.5 }, Row { cell: 3, x: -2.0 }]
    }

    #[test]
    fn test_check_overwrite() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_overwrite(file.path(), false).is_err());
        assert!(check_overwrite(file.path(), true).is_ok());
        assert!(check_overwrite(&file.path().with_extension("missing"), false).is_ok());
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(dir.path(), "mesh", "_centroids", OutputFormat::Csv);
        assert!(path.ends_with("mesh_centroids.csv"));
        save_records(&rows(), OutputFormat::Csv, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "cell,x\n0,1.5\n3,-2.0\n");
    }

    #[test]
    fn test_binary_formats_decode() {
        let dir = tempfile::tempdir().unwrap();

        let json = table_path(dir.path(), "m", "", OutputFormat::Json);
        save_records(&rows(), OutputFormat::Json, &json).unwrap();
        let back: Vec<Row> = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(back, rows());

        let bin = table_path(dir.path(), "m", "", OutputFormat::Bincode);
        save_records(&rows(), OutputFormat::Bincode, &bin).unwrap();
        let back: Vec<Row> = bincode::deserialize(&std::fs::read(&bin).unwrap()).unwrap();
        assert_eq!(back, rows());

        let mp = table_path(dir.path(), "m", "", OutputFormat::MessagePack);
        save_records(&rows(), OutputFormat::MessagePack, &mp).unwrap();
        let back: Vec<Row> = rmp_serde::from_slice(&std::fs::read(&mp).unwrap()).unwrap();
        assert_eq!(back, rows());
    }
}
