//! Parquet tables, as published in boundary packages.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType as ArrowType, Float64Type, Int64Type};
use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::is_text_column;
use crate::error::{EnrichError, Result};
use crate::models::{DataType, Field, Table, Value};

const MAGIC: &[u8; 4] = b"PAR1";

/// Serialized dataframe index columns, dropped on read
const INDEX_COLUMN_PREFIX: &str = "__index_level_";

/// Whether `path` is a parquet file, by extension or by its leading magic bytes
pub(super) fn is_parquet(path: &Path) -> Result<bool> {
    if path.extension().is_some_and(|e| e == "parquet") {
        return Ok(true);
    }
    let mut file = File::open(path).map_err(|source| EnrichError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut head = [0u8; 4];
    Ok(file.read_exact(&mut head).is_ok() && &head == MAGIC)
}

fn is_float(arrow_type: &ArrowType) -> bool {
    matches!(
        arrow_type,
        ArrowType::Float16 | ArrowType::Float32 | ArrowType::Float64
    )
}

fn column_type(name: &str, arrow_type: &ArrowType, text_columns: &[&str]) -> DataType {
    if is_text_column(name, text_columns) {
        return DataType::Text;
    }
    match arrow_type {
        ArrowType::Boolean => DataType::Bool,
        ArrowType::Int8
        | ArrowType::Int16
        | ArrowType::Int32
        | ArrowType::Int64
        | ArrowType::UInt8
        | ArrowType::UInt16
        | ArrowType::UInt32
        | ArrowType::UInt64 => DataType::Int,
        t if is_float(t) => DataType::Float,
        _ => DataType::Text,
    }
}

fn float_values(array: &ArrayRef) -> std::result::Result<Vec<Value>, ArrowError> {
    let floats = cast(array, &ArrowType::Float64)?;
    let floats = floats.as_primitive::<Float64Type>();
    Ok((0..floats.len())
        .map(|i| {
            if floats.is_null(i) {
                Value::Null
            } else {
                Value::Float(floats.value(i))
            }
        })
        .collect())
}

/// Convert one arrow column to cells of `dtype`.
///
/// Float identifiers are rendered like their integer form; binary columns
/// (WKB geometry) are not decoded and read as nulls.
fn column_values(
    array: &ArrayRef,
    dtype: DataType,
) -> std::result::Result<Vec<Value>, ArrowError> {
    let len = array.len();
    let values = match dtype {
        DataType::Bool => {
            let bools = cast(array, &ArrowType::Boolean)?;
            let bools = bools.as_boolean();
            (0..len)
                .map(|i| {
                    if bools.is_null(i) {
                        Value::Null
                    } else {
                        Value::Bool(bools.value(i))
                    }
                })
                .collect()
        }
        DataType::Int => {
            let ints = cast(array, &ArrowType::Int64)?;
            let ints = ints.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| {
                    if ints.is_null(i) {
                        Value::Null
                    } else {
                        Value::Int(ints.value(i))
                    }
                })
                .collect()
        }
        DataType::Float => float_values(array)?,
        DataType::Text if is_float(array.data_type()) => float_values(array)?
            .into_iter()
            .map(|v| v.as_key().map_or(Value::Null, Value::Text))
            .collect(),
        DataType::Text
            if matches!(
                array.data_type(),
                ArrowType::Binary | ArrowType::LargeBinary
            ) =>
        {
            vec![Value::Null; len]
        }
        DataType::Text => {
            let strings = cast(array, &ArrowType::Utf8)?;
            let strings = strings.as_string::<i32>();
            (0..len)
                .map(|i| {
                    if strings.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(strings.value(i).to_string())
                    }
                })
                .collect()
        }
        DataType::Point => vec![Value::Null; len],
    };
    Ok(values)
}

/// Read a parquet file into a table with a range index
pub(super) fn read_parquet(path: &Path, text_columns: &[&str]) -> Result<Table> {
    let file = File::open(path).map_err(|source| EnrichError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parquet_err = |source| EnrichError::Parquet {
        path: path.to_path_buf(),
        source,
    };
    let arrow_err = |source| EnrichError::Arrow {
        path: path.to_path_buf(),
        source,
    };

    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_err)?;
    let schema = builder.schema().clone();
    let columns: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.name().starts_with(INDEX_COLUMN_PREFIX))
        .map(|(i, _)| i)
        .collect();
    let fields: Vec<Field> = columns
        .iter()
        .map(|&i| {
            let field = schema.field(i);
            Field::new(
                field.name().as_str(),
                column_type(field.name(), field.data_type(), text_columns),
            )
        })
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for batch in builder.build().map_err(parquet_err)? {
        let batch = batch.map_err(arrow_err)?;
        let start = rows.len();
        rows.extend((0..batch.num_rows()).map(|_| Vec::with_capacity(fields.len())));
        for (&col, field) in columns.iter().zip(&fields) {
            let values = column_values(batch.column(col), field.dtype).map_err(arrow_err)?;
            for (row, value) in rows[start..].iter_mut().zip(values) {
                row.push(value);
            }
        }
    }

    debug!(
        "Read {} rows x {} columns from parquet {}",
        rows.len(),
        fields.len(),
        path.display()
    );
    Ok(Table::from_rows(fields, rows))
}
