use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::csv_parser;
use crate::error::{DashboardError, Result};
use crate::table::{RawTable, Table};

/// File name of a dataset's compressed table snapshot.
pub const SNAPSHOT_FILENAME: &str = "data.tbl.gz";
/// File name of a dataset stored as raw CSV.
pub const CSV_FILENAME: &str = "data.csv";

/// Something that can produce a dataset by id.
pub trait DatasetReader: Send + Sync {
    fn read_dataset(&self, dataset_id: &str) -> Result<Table>;
}

/// Reads datasets from an object-storage bucket mounted on the local filesystem.
///
/// Layout: `<root>/<bucket>/<dataset_id>/data.tbl.gz`, falling back to
/// `<root>/<bucket>/<dataset_id>/data.csv`.
#[derive(Clone, Debug)]
pub struct BucketReader {
    root: PathBuf,
    bucket: String,
}

impl BucketReader {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        if let Some(endpoint) = &settings.s3_endpoint {
            log::debug!(
                "bucket {} served from {} (endpoint {}, region {})",
                settings.s3_bucket,
                settings.storage_root.display(),
                endpoint,
                settings.s3_region
            );
        }
        Self::new(settings.storage_root.clone(), settings.s3_bucket.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        self.root.join(&self.bucket).join(dataset_id)
    }

    fn object_uri(&self, dataset_id: &str) -> String {
        format!("s3://{}/{}/{}", self.bucket, dataset_id, SNAPSHOT_FILENAME)
    }

    /// Publish a dataset as a compressed snapshot, replacing any previous one.
    pub fn write_dataset(&self, dataset_id: &str, table: &Table) -> Result<()> {
        let dir = self.dataset_dir(dataset_id);
        fs::create_dir_all(&dir)?;
        save_table(table, dir.join(SNAPSHOT_FILENAME))
    }

    /// Store raw CSV bytes for a dataset.
    pub fn write_csv(&self, dataset_id: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.dataset_dir(dataset_id);
        fs::create_dir_all(&dir)?;
        let mut file = File::create(dir.join(CSV_FILENAME))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

impl DatasetReader for BucketReader {
    fn read_dataset(&self, dataset_id: &str) -> Result<Table> {
        if dataset_id.is_empty() || dataset_id.contains("..") || dataset_id.contains('/') {
            return Err(DashboardError::DatasetFileNotFound {
                path: self.object_uri(dataset_id),
                dataset_id: Some(dataset_id.to_string()),
            });
        }

        let dir = self.dataset_dir(dataset_id);
        let snapshot = dir.join(SNAPSHOT_FILENAME);
        if snapshot.is_file() {
            log::info!("reading dataset {} from snapshot", dataset_id);
            return load_table(&snapshot);
        }

        let csv = dir.join(CSV_FILENAME);
        if csv.is_file() {
            log::info!("reading dataset {} from csv", dataset_id);
            let bytes = fs::read(&csv)?;
            return csv_parser::parse_full(&bytes, None);
        }

        Err(DashboardError::DatasetFileNotFound {
            path: self.object_uri(dataset_id),
            dataset_id: Some(dataset_id.to_string()),
        })
    }
}

pub fn save_table(table: &Table, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, table)?;
    let encoder = writer
        .into_inner()
        .map_err(|e| DashboardError::Io(e.into_error()))?;
    encoder.finish()?;

    Ok(())
}

pub fn load_table(path: impl AsRef<Path>) -> Result<Table> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let raw: RawTable = deserialize_from(&mut reader)?;

    Table::try_from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, Value};
    use chrono::NaiveDate;
    use serde::Serialize;

    fn sample() -> Table {
        Table::from_rows(
            &["day", "area", "count"],
            vec![
                vec![
                    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().into(),
                    "APAC".into(),
                    Value::Int(4),
                ],
                vec![Value::Null, "EMEA".into(), Value::Float(0.5)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn snapshot_survives_a_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let reader = BucketReader::new(dir.path(), "bi-datasets");
        reader.write_dataset("sales", &sample()).unwrap();

        assert!(
            dir.path()
                .join("bi-datasets/sales")
                .join(SNAPSHOT_FILENAME)
                .is_file()
        );
        assert_eq!(reader.read_dataset("sales").unwrap(), sample());
    }

    #[test]
    fn csv_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let reader = BucketReader::new(dir.path(), "bi-datasets");
        reader
            .write_csv("raw", b"area,count\nAPAC,1\nEMEA,2\n")
            .unwrap();

        let table = reader.read_dataset("raw").unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(1, "count"), Some(&Value::Int(2)));
    }

    #[test]
    fn missing_dataset_reports_object_path() {
        let dir = tempfile::tempdir().unwrap();
        let reader = BucketReader::new(dir.path(), "bi-datasets");
        match reader.read_dataset("nope") {
            Err(DashboardError::DatasetFileNotFound { path, dataset_id }) => {
                assert_eq!(path, "s3://bi-datasets/nope/data.tbl.gz");
                assert_eq!(dataset_id.as_deref(), Some("nope"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn ragged_snapshot_is_rejected() {
        #[derive(Serialize)]
        struct Snapshot {
            columns: Vec<Column>,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILENAME);
        let ragged = Snapshot {
            columns: vec![
                Column::new("a", vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
                Column::new("b", vec!["x".into()]),
            ],
        };
        let mut writer = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        serialize_into(&mut writer, &ragged).unwrap();
        writer.finish().unwrap();

        assert!(matches!(load_table(&path), Err(DashboardError::InvalidTable(_))));
    }

    #[test]
    fn path_traversal_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reader = BucketReader::new(dir.path(), "bi-datasets");
        assert!(matches!(
            reader.read_dataset("../etc"),
            Err(DashboardError::DatasetFileNotFound { .. })
        ));
    }
}
