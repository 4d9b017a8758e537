//! Storage backend (Arrow/Parquet/CSV)
//!
//! Raw patient records are held as Arrow record batches, read once from a
//! column-oriented file and never mutated afterwards. Every batch in a
//! [`StorageEngine`] shares one schema.

use crate::{Error, Result};
use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rows per batch when decoding CSV.
const CSV_BATCH_SIZE: usize = 8192;

/// Storage engine for Arrow record batches
#[derive(Debug, Clone, Default)]
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Create a new storage engine from existing batches
    ///
    /// Useful for testing and for callers that already hold Arrow data
    #[must_use]
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    /// Load a table, choosing the reader from the file extension
    /// (`.parquet`/`.pq` or `.csv`).
    ///
    /// # Errors
    /// Returns error if the extension is unknown or the file cannot be read
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("parquet" | "pq") => Self::load_parquet(path),
            Some("csv") => Self::load_csv(path),
            _ => Err(Error::StorageError(format!(
                "Unsupported data file (expected .parquet or .csv): {}",
                path.display()
            ))),
        }
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file: {e}"))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut storage = Self::default();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            storage.append_batch(batch)?;
        }

        debug!(path = %path.as_ref().display(), rows = storage.num_rows(), "loaded parquet");
        Ok(storage)
    }

    /// Load table from a CSV file with a header row.
    ///
    /// Column types are inferred from the whole file; empty fields become nulls.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        use arrow::csv::reader::Format;
        use arrow::csv::ReaderBuilder;
        use std::sync::Arc;

        let mut file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open CSV file: {e}")))?;

        let format = Format::default().with_header(true);
        let (schema, _) = format
            .infer_schema(&mut file, None)
            .map_err(|e| Error::StorageError(format!("Failed to infer CSV schema: {e}")))?;
        file.seek(SeekFrom::Start(0))?;

        let reader = ReaderBuilder::new(Arc::new(schema))
            .with_format(format)
            .with_batch_size(CSV_BATCH_SIZE)
            .build(file)
            .map_err(|e| Error::StorageError(format!("Failed to create CSV reader: {e}")))?;

        let mut storage = Self::default();
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::StorageError(format!("Failed to read CSV batch: {e}")))?;
            storage.append_batch(batch)?;
        }

        debug!(path = %path.as_ref().display(), rows = storage.num_rows(), "loaded csv");
        Ok(storage)
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Schema shared by every batch, `None` when empty
    #[must_use]
    pub fn schema(&self) -> Option<SchemaRef> {
        self.batches.first().map(RecordBatch::schema)
    }

    /// Total row count across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Whether the table has a column with this name
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.schema()
            .is_some_and(|schema| schema.column_with_name(name).is_some())
    }

    /// One column across all batches, concatenated
    ///
    /// # Errors
    /// Returns [`Error::Schema`] if the column does not exist
    pub fn column(&self, name: &str) -> Result<ArrayRef> {
        let schema = self
            .schema()
            .ok_or_else(|| Error::schema(name, "table has no batches"))?;
        let (index, _) = schema
            .column_with_name(name)
            .ok_or_else(|| Error::schema(name, "column not found"))?;

        let parts: Vec<&dyn arrow::array::Array> = self
            .batches
            .iter()
            .map(|batch| batch.column(index).as_ref())
            .collect();
        Ok(arrow::compute::concat(&parts)?)
    }

    /// Append batches to storage
    ///
    /// # Errors
    ///
    /// Returns error if batch schema doesn't match existing batches
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if let Some(existing_schema) = self.schema() {
            if batch.schema() != existing_schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    existing_schema,
                    batch.schema()
                )));
            }
        }

        self.batches.push(batch);
        Ok(())
    }
}

/// Where a pipeline run reads its raw records from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// A Parquet or CSV file.
    File(PathBuf),
    /// Records already in memory.
    Table(StorageEngine),
}

impl DataSource {
    /// Read the source into a [`StorageEngine`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the source is unreachable or malformed.
    pub fn load(&self) -> Result<StorageEngine> {
        match self {
            Self::File(path) => StorageEngine::load(path).map_err(|e| {
                Error::Configuration(format!("data source {}: {e}", path.display()))
            }),
            Self::Table(storage) => Ok(storage.clone()),
        }
    }

    /// Short description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Table(storage) => format!("<in-memory table, {} rows>", storage.num_rows()),
        }
    }
}

impl From<PathBuf> for DataSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for DataSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<StorageEngine> for DataSource {
    fn from(storage: StorageEngine) -> Self {
        Self::Table(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::io::Write;
    use std::sync::Arc;

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    fn create_test_batch(num_rows: usize) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, false),
        ]);

        let id_array = Int32Array::from_iter_values(0..num_rows as i32);
        let name_array = StringArray::from_iter_values((0..num_rows).map(|i| format!("name_{i}")));

        RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(id_array), Arc::new(name_array)],
        )
        .unwrap()
    }

    #[test]
    fn test_append_batch() {
        let mut storage = StorageEngine::new(vec![]);
        storage.append_batch(create_test_batch(100)).unwrap();
        storage.append_batch(create_test_batch(200)).unwrap();

        assert_eq!(storage.batches().len(), 2);
        assert_eq!(storage.num_rows(), 300);
    }

    #[test]
    fn test_append_batch_schema_validation() {
        let mut storage = StorageEngine::new(vec![]);
        storage.append_batch(create_test_batch(100)).unwrap();

        let incompatible_schema = Schema::new(vec![
            Field::new("different_field", DataType::Int32, false),
        ]);
        let incompatible_batch = RecordBatch::try_new(
            Arc::new(incompatible_schema),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let result = storage.append_batch(incompatible_batch);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Schema mismatch"));
    }

    #[test]
    fn test_column_concatenates_batches() {
        let storage = StorageEngine::new(vec![create_test_batch(3), create_test_batch(2)]);
        let ids = storage.column("id").unwrap();
        assert_eq!(ids.len(), 5);

        let err = storage.column("missing").unwrap_err();
        assert!(matches!(err, Error::Schema { ref column, .. } if column == "missing"));
    }

    #[test]
    fn test_load_csv_infers_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "age,time_in_hospital,readmitted").unwrap();
        writeln!(file, "[70-80),5,<30").unwrap();
        writeln!(file, "[50-60),3,NO").unwrap();
        drop(file);

        let storage = StorageEngine::load(&path).unwrap();
        assert_eq!(storage.num_rows(), 2);
        let schema = storage.schema().unwrap();
        assert_eq!(schema.field_with_name("age").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(
            schema.field_with_name("time_in_hospital").unwrap().data_type(),
            &DataType::Int64
        );
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let err = StorageEngine::load("data/patients.xlsx").unwrap_err();
        assert!(err.to_string().contains("Unsupported data file"));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let source = DataSource::from(PathBuf::from("/nonexistent/patients.csv"));
        assert!(matches!(source.load(), Err(Error::Configuration(_))));
    }
}
