use super::quote_ident;
use crate::errors::{AppError, AppResult};
use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float16Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::ChunkReader;
use rusqlite::types::Value;
use rusqlite::Connection;

/// A parquet source decoded into Arrow batches.
#[derive(Debug)]
pub struct DecodedTable {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl DecodedTable {
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.schema.fields().iter().any(|field| field.name() == name)
    }
}

pub fn decode_parquet<R: ChunkReader + 'static>(reader: R) -> AppResult<DecodedTable> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(reader)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DecodedTable { schema, batches })
}

pub fn create_and_fill(conn: &mut Connection, name: &str, table: &DecodedTable) -> AppResult<()> {
    let mut definitions = Vec::with_capacity(table.schema.fields().len());
    for field in table.schema.fields() {
        definitions.push(format!(
            "{} {}",
            quote_ident(field.name()),
            column_affinity(field.data_type())?
        ));
    }
    if definitions.is_empty() {
        return Err(AppError::Bootstrap(format!("Table '{}' has no columns", name)));
    }

    let table_ident = quote_ident(name);
    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE {} ({});",
        table_ident,
        definitions.join(", ")
    ))?;
    {
        let placeholders = vec!["?"; definitions.len()].join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} VALUES ({})",
            table_ident, placeholders
        ))?;
        for batch in &table.batches {
            let columns = batch.columns();
            for row in 0..batch.num_rows() {
                let values = columns
                    .iter()
                    .map(|column| cell_value(column, row))
                    .collect::<AppResult<Vec<_>>>()?;
                insert.execute(rusqlite::params_from_iter(values))?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn column_affinity(data_type: &DataType) -> AppResult<&'static str> {
    match data_type {
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Ok("INTEGER"),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => Ok("REAL"),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Ok("TEXT"),
        other => Err(AppError::Bootstrap(format!("Unsupported column type {}", other))),
    }
}

macro_rules! integer_cell {
    ($array:expr, $row:expr, $ty:ty) => {
        Value::Integer(i64::from($array.as_primitive::<$ty>().value($row)))
    };
}

fn cell_value(array: &ArrayRef, row: usize) -> AppResult<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => Value::Integer(i64::from(array.as_boolean().value(row))),
        DataType::Int8 => integer_cell!(array, row, Int8Type),
        DataType::Int16 => integer_cell!(array, row, Int16Type),
        DataType::Int32 => integer_cell!(array, row, Int32Type),
        DataType::Int64 => Value::Integer(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => integer_cell!(array, row, UInt8Type),
        DataType::UInt16 => integer_cell!(array, row, UInt16Type),
        DataType::UInt32 => integer_cell!(array, row, UInt32Type),
        DataType::UInt64 => {
            let raw = array.as_primitive::<UInt64Type>().value(row);
            i64::try_from(raw)
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::Text(raw.to_string()))
        }
        DataType::Float16 => Value::Real(f64::from(array.as_primitive::<Float16Type>().value(row))),
        DataType::Float32 => Value::Real(f64::from(array.as_primitive::<Float32Type>().value(row))),
        DataType::Float64 => Value::Real(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::Text(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::Text(array.as_string::<i64>().value(row).to_string()),
        DataType::Utf8View => Value::Text(array.as_string_view().value(row).to_string()),
        other => {
            return Err(AppError::Bootstrap(format!("Unsupported column type {}", other)));
        }
    };
    Ok(value)
}
