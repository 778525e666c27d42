//! In-memory view of one Parquet file: the original record batches plus the
//! three bookkeeping columns held as owned vectors so they can be updated in place.

use arrow::array::{ArrayRef, AsArray, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use super::error::StoreError;
use super::{RowId, RowStatus, RowUpdate};
use crate::storage;

pub const STATUS_COLUMN: &str = "status";
pub const ERROR_COLUMN: &str = "error";
pub const OUTPUT_PATH_COLUMN: &str = "filepath";

const BOOKKEEPING_COLUMNS: [&str; 3] = [STATUS_COLUMN, ERROR_COLUMN, OUTPUT_PATH_COLUMN];

pub(crate) struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    status: Vec<RowStatus>,
    error: Vec<Option<String>>,
    output_path: Vec<Option<String>>,
}

impl Table {
    pub(crate) fn read(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::read(path, e))?;
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| StoreError::read(path, e))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| StoreError::read(path, e))?;
        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::read(path, e))?;
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();

        let status = match read_text_column(path, &schema, &batches, STATUS_COLUMN)? {
            Some(values) => values
                .iter()
                .map(|v| RowStatus::parse(v.as_deref()))
                .collect(),
            None => vec![RowStatus::Pending; rows],
        };
        let error = read_text_column(path, &schema, &batches, ERROR_COLUMN)?
            .unwrap_or_else(|| vec![None; rows]);
        let output_path = read_text_column(path, &schema, &batches, OUTPUT_PATH_COLUMN)?
            .unwrap_or_else(|| vec![None; rows]);

        tracing::debug!(path = %path.display(), rows, batches = batches.len(), "read table");
        Ok(Self {
            schema,
            batches,
            status,
            error,
            output_path,
        })
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.status.len()
    }

    pub(crate) fn status(&self, row: usize) -> RowStatus {
        self.status[row]
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.status.iter().filter(|s| !s.is_terminal()).count()
    }

    /// Whether the file on disk already carries all bookkeeping columns.
    pub(crate) fn has_bookkeeping_columns(&self) -> bool {
        BOOKKEEPING_COLUMNS
            .iter()
            .all(|c| self.schema.column_with_name(c).is_some())
    }

    /// URL cell of every row; `None` for null cells.
    pub(crate) fn urls(&self, path: &Path, column: &str) -> Result<Vec<Option<String>>, StoreError> {
        read_text_column(path, &self.schema, &self.batches, column)?.ok_or_else(|| {
            StoreError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            }
        })
    }

    /// Apply an update to a pending row. Returns false (and changes nothing)
    /// if the row is unknown or already terminal.
    pub(crate) fn apply(&mut self, update: &RowUpdate) -> bool {
        let RowId(idx) = update.row;
        let Ok(idx) = usize::try_from(idx) else {
            return false;
        };
        match self.status.get(idx) {
            Some(RowStatus::Pending) => {
                self.status[idx] = update.status;
                self.error[idx] = update.error.clone();
                self.output_path[idx] = update.output_path.clone();
                true
            }
            _ => false,
        }
    }

    /// Rewrite the file at `path` atomically with the current bookkeeping columns.
    pub(crate) fn write(&self, path: &Path) -> Result<(), StoreError> {
        let tmp = storage::temp_path(path);
        if let Err(e) = self.write_to(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::write(path, e));
        }
        storage::finalize(&tmp, path).map_err(|e| StoreError::write(path, e))?;
        tracing::debug!(path = %path.display(), pending = self.pending_count(), "wrote table");
        Ok(())
    }

    fn write_to(&self, tmp: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let schema = self.output_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let file = File::create(tmp)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        let mut offset = 0;
        for batch in &self.batches {
            let rows = batch.num_rows();
            writer.write(&self.rebuild_batch(batch, &schema, offset, rows)?)?;
            offset += rows;
        }
        writer.close()?;
        Ok(())
    }

    /// Original schema with the bookkeeping columns retyped to nullable Utf8,
    /// appending any that are missing.
    fn output_schema(&self) -> SchemaRef {
        let mut fields: Vec<FieldRef> = self
            .schema
            .fields()
            .iter()
            .map(|f| {
                if BOOKKEEPING_COLUMNS.contains(&f.name().as_str()) {
                    Arc::new(Field::new(f.name(), DataType::Utf8, true))
                } else {
                    Arc::clone(f)
                }
            })
            .collect();
        for name in BOOKKEEPING_COLUMNS {
            if self.schema.column_with_name(name).is_none() {
                fields.push(Arc::new(Field::new(name, DataType::Utf8, true)));
            }
        }
        Arc::new(Schema::new_with_metadata(
            fields,
            self.schema.metadata().clone(),
        ))
    }

    fn rebuild_batch(
        &self,
        batch: &RecordBatch,
        schema: &SchemaRef,
        offset: usize,
        rows: usize,
    ) -> Result<RecordBatch, ArrowError> {
        let range = offset..offset + rows;
        let columns = schema
            .fields()
            .iter()
            .map(|field| -> Result<ArrayRef, ArrowError> {
                match field.name().as_str() {
                    STATUS_COLUMN => Ok(Arc::new(StringArray::from_iter(
                        self.status[range.clone()].iter().map(|s| s.stored()),
                    ))),
                    ERROR_COLUMN => Ok(text_array(&self.error[range.clone()])),
                    OUTPUT_PATH_COLUMN => Ok(text_array(&self.output_path[range.clone()])),
                    name => batch.column_by_name(name).cloned().ok_or_else(|| {
                        ArrowError::SchemaError(format!("batch is missing column '{}'", name))
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        RecordBatch::try_new(Arc::clone(schema), columns)
    }
}

fn text_array(values: &[Option<String>]) -> ArrayRef {
    Arc::new(StringArray::from_iter(values.iter().map(|v| v.as_deref())))
}

/// Read a column of any castable type as text. `None` if the column is absent.
fn read_text_column(
    path: &Path,
    schema: &Schema,
    batches: &[RecordBatch],
    name: &str,
) -> Result<Option<Vec<Option<String>>>, StoreError> {
    if schema.column_with_name(name).is_none() {
        return Ok(None);
    }
    let mut out = Vec::new();
    for batch in batches {
        let column = batch
            .column_by_name(name)
            .ok_or_else(|| StoreError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })?;
        let text = cast(column, &DataType::Utf8).map_err(|e| StoreError::read(path, e))?;
        let strings = text
            .as_string_opt::<i32>()
            .ok_or_else(|| StoreError::read(path, format!("column '{}' is not text", name)))?;
        out.extend(strings.iter().map(|v| v.map(str::to_string)));
    }
    Ok(Some(out))
}
