//! File encoders
//!
//! Encoders receive records in batches and produce the bytes of one object.
//! The Parquet column layout is fixed by the declared schema and the first
//! batch; later batches must fit it.

use crate::config::FileFormat;
use crate::error::{IngestError, Result};
use crate::record::{ColumnSpec, ColumnType, Record, Value};
use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder,
    StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Date32Type, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_jsonlines::JsonLinesWriter;
use std::collections::HashMap;
use std::sync::Arc;

pub trait FileEncoder: Send {
    fn write_batch(&mut self, records: &[Record]) -> Result<()>;

    /// Finish the file and return its bytes
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Encoder for `format`; `declared` pins Parquet column types
pub fn encoder_for(format: FileFormat, declared: &[ColumnSpec]) -> Box<dyn FileEncoder> {
    match format {
        FileFormat::Parquet => Box::new(ParquetEncoder::new(declared)),
        FileFormat::Jsonl => Box::new(JsonlEncoder::new()),
    }
}

// ============================================================================
// Parquet
// ============================================================================

pub struct ParquetEncoder {
    declared: HashMap<String, ColumnType>,
    columns: Vec<(String, ColumnType)>,
    writer: Option<ArrowWriter<Vec<u8>>>,
}

impl ParquetEncoder {
    pub fn new(declared: &[ColumnSpec]) -> Self {
        Self {
            declared: declared
                .iter()
                .map(|c| (c.name.clone(), c.column_type))
                .collect(),
            columns: Vec::new(),
            writer: None,
        }
    }

    /// Column order follows first appearance; types come from the declared
    /// schema, else from the values of the first batch.
    fn infer_columns(&self, records: &[Record]) -> Vec<(String, ColumnType)> {
        let mut order: Vec<String> = Vec::new();
        let mut inferred: HashMap<String, ColumnType> = HashMap::new();

        for record in records {
            for (name, value) in record.iter() {
                if !order.iter().any(|n| n == name) {
                    order.push(name.to_string());
                }
                if let Some(found) = value.column_type() {
                    inferred
                        .entry(name.to_string())
                        .and_modify(|current| *current = widen(*current, found))
                        .or_insert(found);
                }
            }
        }

        order
            .into_iter()
            .map(|name| {
                let column_type = self
                    .declared
                    .get(&name)
                    .or_else(|| inferred.get(&name))
                    .copied()
                    .unwrap_or(ColumnType::String);
                (name, column_type)
            })
            .collect()
    }

    fn schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|(name, column_type)| Field::new(name, arrow_type(*column_type), true))
            .collect();
        Arc::new(Schema::new(fields))
    }

    fn to_batch(&self, schema: SchemaRef, records: &[Record]) -> Result<RecordBatch> {
        for record in records {
            if let Some(extra) = record
                .columns()
                .find(|name| !self.columns.iter().any(|(c, _)| c == name))
            {
                return Err(IngestError::schema(format!(
                    "column '{extra}' appeared after the file schema was fixed"
                )));
            }
        }

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        for (name, column_type) in &self.columns {
            let mut builder = ColumnBuilder::new(*column_type, records.len());
            for record in records {
                let value = record.get(name).unwrap_or(&Value::Null);
                // Declared columns follow the declared cast; inferred ones only widen
                let converted = if self.declared.contains_key(name) {
                    value.cast(*column_type)
                } else {
                    value.coerce_lossless(*column_type)
                };
                let cast = converted.ok_or_else(|| {
                    IngestError::schema(format!(
                        "column '{name}': value '{value}' does not fit type {column_type}"
                    ))
                })?;
                builder.append(&cast);
            }
            arrays.push(builder.finish());
        }

        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

impl FileEncoder for ParquetEncoder {
    fn write_batch(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if self.writer.is_none() {
            self.columns = self.infer_columns(records);
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            self.writer = Some(ArrowWriter::try_new(Vec::new(), self.schema(), Some(props))?);
        }

        let batch = self.to_batch(self.schema(), records)?;
        match self.writer.as_mut() {
            Some(writer) => writer.write(&batch)?,
            None => return Err(IngestError::write("parquet writer was not initialized")),
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        match self.writer {
            Some(writer) => Ok(writer.into_inner()?),
            None => Err(IngestError::write("cannot finish a parquet file with no rows")),
        }
    }
}

/// Common supertype of two value types seen in one column
fn widen(current: ColumnType, found: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (current, found) {
        (a, b) if a == b => a,
        (Integer, Float) | (Float, Integer) => Float,
        (Date, Timestamp) | (Timestamp, Date) => Timestamp,
        _ => String,
    }
}

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::String => DataType::Utf8,
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Date => DataType::Date32,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

enum ColumnBuilder {
    Boolean(BooleanBuilder),
    Integer(Int64Builder),
    Float(Float64Builder),
    String(StringBuilder),
    Date(Date32Builder),
    Timestamp(TimestampMicrosecondBuilder),
}

impl ColumnBuilder {
    fn new(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            ColumnType::Integer => Self::Integer(Int64Builder::with_capacity(capacity)),
            ColumnType::Float => Self::Float(Float64Builder::with_capacity(capacity)),
            ColumnType::String => Self::String(StringBuilder::with_capacity(capacity, capacity * 16)),
            ColumnType::Date => Self::Date(Date32Builder::with_capacity(capacity)),
            ColumnType::Timestamp => {
                Self::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            },
        }
    }

    /// `value` has already been cast to this builder's type
    fn append(&mut self, value: &Value) {
        match (self, value) {
            (Self::Boolean(b), Value::Boolean(v)) => b.append_value(*v),
            (Self::Integer(b), Value::Integer(v)) => b.append_value(*v),
            (Self::Float(b), Value::Float(v)) => b.append_value(*v),
            (Self::String(b), Value::Text(v)) => b.append_value(v),
            (Self::Date(b), Value::Date(v)) => b.append_value(Date32Type::from_naive_date(*v)),
            (Self::Timestamp(b), Value::Timestamp(v)) => {
                b.append_value(v.and_utc().timestamp_micros())
            },
            (Self::Boolean(b), _) => b.append_null(),
            (Self::Integer(b), _) => b.append_null(),
            (Self::Float(b), _) => b.append_null(),
            (Self::String(b), _) => b.append_null(),
            (Self::Date(b), _) => b.append_null(),
            (Self::Timestamp(b), _) => b.append_null(),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            Self::Boolean(mut b) => Arc::new(b.finish()),
            Self::Integer(mut b) => Arc::new(b.finish()),
            Self::Float(mut b) => Arc::new(b.finish()),
            Self::String(mut b) => Arc::new(b.finish()),
            Self::Date(mut b) => Arc::new(b.finish()),
            Self::Timestamp(mut b) => Arc::new(b.finish()),
        }
    }
}

// ============================================================================
// JSONL
// ============================================================================

pub struct JsonlEncoder {
    writer: JsonLinesWriter<Vec<u8>>,
}

impl JsonlEncoder {
    pub fn new() -> Self {
        Self {
            writer: JsonLinesWriter::new(Vec::new()),
        }
    }
}

impl Default for JsonlEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FileEncoder for JsonlEncoder {
    fn write_batch(&mut self, records: &[Record]) -> Result<()> {
        self.writer
            .write_all(records)
            .map_err(|e| IngestError::write(format!("JSONL encoding failed: {e}")))
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.writer
            .flush()
            .map_err(|e| IngestError::write(format!("JSONL encoding failed: {e}")))?;
        Ok(self.writer.into_inner())
    }
}
