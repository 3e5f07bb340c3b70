//! Conversion between pipeline rows and Arrow record batches.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, StringArray,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use quarry_common::{QuarryError, Result};
use quarry_planner::Value;

use crate::stream::Row;

fn downcast<'a, T: 'static>(array: &'a ArrayRef, dt: &DataType) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        QuarryError::Execution(format!("column array does not match declared type {dt:?}"))
    })
}

fn column_values(array: &ArrayRef) -> Result<Vec<Value>> {
    let dt = array.data_type();
    let n = array.len();
    macro_rules! collect {
        ($arr:ty, $variant:ident, $conv:expr) => {{
            let a = downcast::<$arr>(array, dt)?;
            (0..n)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::$variant($conv(a.value(i)))
                    }
                })
                .collect()
        }};
    }
    let values = match dt {
        DataType::Null => vec![Value::Null; n],
        DataType::Boolean => collect!(BooleanArray, Boolean, |v| v),
        DataType::Int32 => collect!(Int32Array, Int32, |v| v),
        DataType::Int64 => collect!(Int64Array, Int64, |v| v),
        DataType::Float32 => collect!(Float32Array, Float32, |v| v),
        DataType::Float64 => collect!(Float64Array, Float64, |v| v),
        DataType::Utf8 => collect!(StringArray, Utf8, |v: &str| v.to_string()),
        DataType::LargeUtf8 => collect!(LargeStringArray, Utf8, |v: &str| v.to_string()),
        other => {
            return Err(QuarryError::Unsupported(format!(
                "record batch column of type {other:?}"
            )))
        }
    };
    Ok(values)
}

/// Rows of `batch`, in order.
pub fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<Row>> {
    let columns = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<Result<Vec<_>>>()?;
    let mut rows = vec![Vec::with_capacity(columns.len()); batch.num_rows()];
    for column in columns {
        for (row, v) in rows.iter_mut().zip(column) {
            row.push(v);
        }
    }
    Ok(rows)
}

fn build_column(rows: &[Row], index: usize, dt: &DataType) -> Result<ArrayRef> {
    let cell = |row: &Row| -> Result<Value> {
        let v = row.get(index).ok_or_else(|| {
            QuarryError::Execution(format!("row of {} values has no column ${index}", row.len()))
        })?;
        v.cast_to(dt)
    };
    macro_rules! build {
        ($arr:ty, $variant:ident) => {{
            let values = rows
                .iter()
                .map(|row| {
                    Ok(match cell(row)? {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(<$arr>::from(values)) as ArrayRef
        }};
    }
    let array = match dt {
        DataType::Boolean => build!(BooleanArray, Boolean),
        DataType::Int32 => build!(Int32Array, Int32),
        DataType::Int64 => build!(Int64Array, Int64),
        DataType::Float32 => build!(Float32Array, Float32),
        DataType::Float64 => build!(Float64Array, Float64),
        DataType::Utf8 => build!(StringArray, Utf8),
        DataType::LargeUtf8 => build!(LargeStringArray, Utf8),
        other => {
            return Err(QuarryError::Unsupported(format!(
                "record batch column of type {other:?}"
            )))
        }
    };
    Ok(array)
}

/// Pack `rows` into one record batch shaped like `schema`.
pub fn rows_to_batch(schema: SchemaRef, rows: &[Row]) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| build_column(rows, i, f.data_type()))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema, columns)
        .map_err(|e| QuarryError::Execution(format!("record batch: {e}")))
}

#[cfg(test)]
mod tests {
    use arrow_schema::{Field, Schema};

    use super::*;

    #[test]
    fn rows_survive_a_batch_round_trip() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let rows = vec![
            vec![Value::Int64(1), Value::Utf8("a".into())],
            vec![Value::Int64(2), Value::Null],
        ];
        let batch = rows_to_batch(schema, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(rows_from_batch(&batch).unwrap(), rows);
    }

    #[test]
    fn null_in_non_nullable_column_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        assert!(rows_to_batch(schema, &[vec![Value::Null]]).is_err());
    }
}
