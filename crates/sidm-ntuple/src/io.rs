//! Parquet ntuple read/write.
//!
//! An ntuple file is one Parquet table, one column per branch. Numeric and
//! boolean columns become [`Branch::Scalar`]; `List`/`LargeList` columns of
//! numbers become [`Branch::Jagged`] (null rows read as empty rows). Columns
//! of any other type are skipped with a warning.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, GenericListArray, ListArray, OffsetSizeTrait,
};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{ArrowNativeType, DataType, Field, Float64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::branch::{Branch, BranchSet};
use crate::jagged::JaggedCol;
use crate::record::EventRecord;
use crate::schema::Schema as NtupleSchema;

/// Error type for ntuple file operations.
#[derive(Debug, thiserror::Error)]
pub enum NtupleIoError {
    #[error("Parquet read/write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ntuple: {0}")]
    Invalid(#[from] sidm_core::Error),

    #[error("Column '{name}': {reason}")]
    Column { name: String, reason: String },
}

impl From<NtupleIoError> for sidm_core::Error {
    fn from(e: NtupleIoError) -> Self {
        match e {
            NtupleIoError::Invalid(inner) => inner,
            NtupleIoError::Io(io) => sidm_core::Error::Io(io),
            other => sidm_core::Error::Ntuple(other.to_string()),
        }
    }
}

/// Read all branches of a Parquet ntuple file.
pub fn read_branches(path: &Path) -> Result<BranchSet, NtupleIoError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    let set = batches_to_branch_set(&schema, &batches)?;
    tracing::debug!(path = %path.display(), branches = set.len(), events = set.n_events(), "read ntuple");
    Ok(set)
}

/// Read all branches from in-memory Parquet bytes.
pub fn read_branches_bytes(data: &[u8]) -> Result<BranchSet, NtupleIoError> {
    let buf = bytes::Bytes::copy_from_slice(data);
    let builder = ParquetRecordBatchReaderBuilder::try_new(buf)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    batches_to_branch_set(&schema, &batches)
}

/// Read a Parquet ntuple and build its [`EventRecord`].
pub fn read_event_record(
    path: &Path,
    schema: &NtupleSchema,
    dataset: &str,
) -> Result<EventRecord, NtupleIoError> {
    let branches = read_branches(path)?;
    let mut record = schema.build(branches)?;
    record.metadata.dataset = dataset.to_string();
    record.metadata.source = Some(path.display().to_string());
    Ok(record)
}

/// Convert Arrow batches sharing `schema` into a [`BranchSet`].
pub fn batches_to_branch_set(
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<BranchSet, NtupleIoError> {
    let batch = concat_batches(schema, batches)?;
    let mut set = BranchSet::with_events(batch.num_rows());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        match column_to_branch(field.name(), column)? {
            Some(branch) => set.insert(field.name().clone(), branch)?,
            None => tracing::warn!(
                column = %field.name(),
                data_type = %field.data_type(),
                "skipping column with unsupported type"
            ),
        }
    }
    Ok(set)
}

fn is_number(dt: &DataType) -> bool {
    dt.is_numeric() || matches!(dt, DataType::Boolean)
}

/// Numeric/boolean array as `f64` values; nulls become NaN.
fn to_f64(name: &str, array: &ArrayRef) -> Result<Vec<f64>, NtupleIoError> {
    let converted = cast(array, &DataType::Float64).map_err(|e| NtupleIoError::Column {
        name: name.to_string(),
        reason: format!("cannot convert to f64: {e}"),
    })?;
    let values = converted.as_primitive::<Float64Type>();
    Ok((0..values.len())
        .map(|i| if values.is_null(i) { f64::NAN } else { values.value(i) })
        .collect())
}

fn column_to_branch(name: &str, column: &ArrayRef) -> Result<Option<Branch>, NtupleIoError> {
    let branch = match column.data_type() {
        dt if is_number(dt) => Branch::Scalar(to_f64(name, column)?),
        DataType::List(item) if is_number(item.data_type()) => {
            Branch::Jagged(list_to_jagged(name, column.as_list::<i32>())?)
        }
        DataType::LargeList(item) if is_number(item.data_type()) => {
            Branch::Jagged(list_to_jagged(name, column.as_list::<i64>())?)
        }
        _ => return Ok(None),
    };
    Ok(Some(branch))
}

fn list_to_jagged<O: OffsetSizeTrait>(
    name: &str,
    list: &GenericListArray<O>,
) -> Result<JaggedCol, NtupleIoError> {
    let values = to_f64(name, list.values())?;
    let offsets = list.value_offsets();
    let mut flat = Vec::with_capacity(values.len());
    let mut out = Vec::with_capacity(list.len() + 1);
    out.push(0);
    for row in 0..list.len() {
        if !list.is_null(row) {
            let (start, end) = (offsets[row].as_usize(), offsets[row + 1].as_usize());
            flat.extend_from_slice(&values[start..end]);
        }
        out.push(flat.len());
    }
    Ok(JaggedCol { flat, offsets: out })
}

/// Convert a [`BranchSet`] into a single Arrow batch (`Float64` / `List<Float64>`).
pub fn branch_set_to_record_batch(set: &BranchSet) -> Result<RecordBatch, NtupleIoError> {
    let mut fields = Vec::with_capacity(set.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(set.len());
    for (name, branch) in set.iter() {
        match branch {
            Branch::Scalar(values) => {
                fields.push(Field::new(name, DataType::Float64, false));
                columns.push(Arc::new(Float64Array::from(values.clone())));
            }
            Branch::Jagged(col) => {
                let item = Arc::new(Field::new_list_field(DataType::Float64, false));
                let offsets = col
                    .offsets
                    .iter()
                    .map(|&o| i32::try_from(o))
                    .collect::<Result<Vec<i32>, _>>()
                    .map_err(|_| NtupleIoError::Column {
                        name: name.to_string(),
                        reason: "too many values for 32-bit list offsets".into(),
                    })?;
                let list = ListArray::try_new(
                    item.clone(),
                    OffsetBuffer::new(ScalarBuffer::from(offsets)),
                    Arc::new(Float64Array::from(col.flat.clone())),
                    None,
                )?;
                fields.push(Field::new(name, DataType::List(item), false));
                columns.push(Arc::new(list));
            }
        }
    }
    let schema = Arc::new(Schema::new(fields));
    if columns.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder().set_compression(Compression::SNAPPY).build()
}

/// Write a [`BranchSet`] as a Parquet ntuple file.
pub fn write_branches(path: &Path, set: &BranchSet) -> Result<(), NtupleIoError> {
    let batch = branch_set_to_record_batch(set)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Write a [`BranchSet`] to Parquet bytes in memory.
pub fn write_branches_bytes(set: &BranchSet) -> Result<Vec<u8>, NtupleIoError> {
    let batch = branch_set_to_record_batch(set)?;
    let mut buf = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(writer_properties()))?;
        writer.write(&batch)?;
        writer.close()?;
    }
    Ok(buf)
}
