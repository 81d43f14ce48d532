// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Parquet output.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use arrow::array::{Array, ArrayRef, AsArray, ListArray, StructArray};
use arrow::datatypes::{
    DataType, DurationMicrosecondType, Field, FieldRef, Fields, Int64Type, Schema, TimeUnit,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;

/// Field metadata key recording the unit of a duration stored as `Int64`.
pub const DURATION_UNIT_KEY: &str = "pg2arrow.duration_unit";

/// Compression codec for the written file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum Compression {
    Uncompressed,
    #[default]
    Snappy,
}

impl From<Compression> for ParquetCompression {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
        }
    }
}

/// Writes `batch` as the only row group of a new Parquet file at `path`,
/// returning the number of bytes written.
pub fn write_parquet(
    path: &Path,
    batch: &RecordBatch,
    compression: Compression,
) -> Result<u64, anyhow::Error> {
    let batch = parquet_compatible(batch)?;
    let file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(compression.into())
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    let written = std::fs::metadata(path)
        .with_context(|| format!("inspecting {}", path.display()))?
        .len();
    Ok(written)
}

/// Rewrites the columns Parquet cannot store, at any depth.
///
/// Parquet has no duration type, so microsecond durations become `Int64`
/// fields tagged with [`DURATION_UNIT_KEY`].
fn parquet_compatible(batch: &RecordBatch) -> Result<RecordBatch, anyhow::Error> {
    let schema = batch.schema();
    let fields: Vec<Field> = schema.fields().iter().map(rewrite_field).collect();
    let columns = batch
        .columns()
        .iter()
        .map(rewrite_array)
        .collect::<Result<Vec<_>, _>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new_with_options(
        Arc::new(schema),
        columns,
        &options,
    )?)
}

fn rewrite_type(typ: &DataType) -> DataType {
    match typ {
        DataType::Duration(_) => DataType::Int64,
        DataType::List(item) => DataType::List(Arc::new(rewrite_field(item))),
        DataType::Struct(fields) => DataType::Struct(rewrite_fields(fields)),
        typ => typ.clone(),
    }
}

fn rewrite_fields(fields: &Fields) -> Fields {
    fields.iter().map(rewrite_field).collect()
}

fn rewrite_field(field: &FieldRef) -> Field {
    let rewritten = field.as_ref().clone().with_data_type(rewrite_type(field.data_type()));
    match field.data_type() {
        DataType::Duration(unit) => {
            let unit = match unit {
                TimeUnit::Second => "s",
                TimeUnit::Millisecond => "ms",
                TimeUnit::Microsecond => "us",
                TimeUnit::Nanosecond => "ns",
            };
            let mut metadata = field.metadata().clone();
            metadata.insert(DURATION_UNIT_KEY.to_owned(), unit.to_owned());
            rewritten.with_metadata(metadata)
        }
        _ => rewritten,
    }
}

fn rewrite_array(array: &ArrayRef) -> Result<ArrayRef, anyhow::Error> {
    let rewritten: ArrayRef = match array.data_type() {
        DataType::Duration(TimeUnit::Microsecond) => Arc::new(
            array
                .as_primitive::<DurationMicrosecondType>()
                .reinterpret_cast::<Int64Type>(),
        ),
        DataType::Duration(unit) => {
            anyhow::bail!("only microsecond durations are written, not {unit:?}")
        }
        DataType::List(item) => {
            let list = array.as_list::<i32>();
            Arc::new(ListArray::try_new(
                Arc::new(rewrite_field(item)),
                list.offsets().clone(),
                rewrite_array(list.values())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::Struct(fields) if !fields.is_empty() => {
            let record = array.as_struct();
            let columns = record
                .columns()
                .iter()
                .map(rewrite_array)
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(StructArray::try_new(
                rewrite_fields(fields),
                columns,
                record.nulls().cloned(),
            )?)
        }
        _ => Arc::clone(array),
    };
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use arrow::array::{new_null_array, DurationMicrosecondArray, Int32Array};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
    use pg2arrow::{ScalarKind, StructField, TypeDesc, UTC};

    use super::*;

    fn read_back(path: &Path) -> RecordBatch {
        let file = File::open(path).unwrap();
        let mut reader = ParquetRecordBatchReader::try_new(file, 1024).unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert!(reader.next().is_none());
        batch
    }

    #[test]
    fn every_kind_is_writable() {
        let kinds = [
            ScalarKind::Bool,
            ScalarKind::Int16,
            ScalarKind::Int32,
            ScalarKind::Int64,
            ScalarKind::Float32,
            ScalarKind::Float64,
            ScalarKind::Utf8,
            ScalarKind::Binary,
            ScalarKind::FixedBinary(16),
            ScalarKind::Date32,
            ScalarKind::Time64Micros,
            ScalarKind::TimestampMicros { tz: None },
            ScalarKind::TimestampMicros {
                tz: Some(UTC.into()),
            },
            ScalarKind::DurationMicros,
        ];
        let mut types: Vec<TypeDesc> = kinds.into_iter().map(TypeDesc::Scalar).collect();
        types.push(TypeDesc::Dictionary);
        types.push(TypeDesc::List(Box::new(TypeDesc::Struct(vec![
            StructField {
                name: "label".into(),
                typ: TypeDesc::Scalar(ScalarKind::Utf8),
            },
            StructField {
                name: "span".into(),
                typ: TypeDesc::Scalar(ScalarKind::DurationMicros),
            },
        ]))));

        let dir = tempfile::tempdir().unwrap();
        for (idx, typ) in types.iter().enumerate() {
            let schema = Schema::new(vec![Field::new("c", typ.data_type(), true)]);
            let batch = RecordBatch::try_new(
                Arc::new(schema),
                vec![new_null_array(&typ.data_type(), 1)],
            )
            .unwrap();
            let path = dir.path().join(format!("{idx}.parquet"));
            write_parquet(&path, &batch, Compression::Snappy)
                .unwrap_or_else(|e| panic!("writing {typ}: {e}"));
            let read = read_back(&path);
            assert_eq!(read.num_rows(), 1, "{typ}");
            assert!(read.column(0).is_null(0), "{typ}");
        }
    }

    #[test]
    fn durations_are_stored_as_tagged_int64() {
        let spans = DurationMicrosecondArray::from(vec![Some(172_800_001_000), None]);
        let nested = ListArray::try_new(
            Arc::new(Field::new_list_field(spans.data_type().clone(), true)),
            arrow::buffer::OffsetBuffer::from_lengths([2, 0]),
            Arc::new(spans.clone()),
            None,
        )
        .unwrap();
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("span", spans.data_type().clone(), true),
            Field::new("spans", nested.data_type().clone(), true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(spans),
                Arc::new(nested),
            ],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.parquet");
        let written = write_parquet(&path, &batch, Compression::Uncompressed).unwrap();
        assert!(written > 0);

        let read = read_back(&path);
        let span_field = read.schema().field_with_name("span").unwrap().clone();
        assert_eq!(span_field.data_type(), &DataType::Int64);
        assert_eq!(
            span_field.metadata().get(DURATION_UNIT_KEY).map(String::as_str),
            Some("us")
        );
        let span = read.column_by_name("span").unwrap();
        let span = span.as_primitive::<Int64Type>();
        assert_eq!(span.value(0), 172_800_001_000);
        assert!(span.is_null(1));

        let spans = read.column_by_name("spans").unwrap().as_list::<i32>().clone();
        assert_eq!(spans.value_offsets(), &[0, 2, 2]);
        assert_eq!(
            spans.values().as_primitive::<Int64Type>().value(0),
            172_800_001_000
        );
    }

    #[test]
    fn compression_codecs() {
        assert_eq!(
            ParquetCompression::from(Compression::Uncompressed),
            ParquetCompression::UNCOMPRESSED
        );
        assert_eq!(
            ParquetCompression::from(Compression::default()),
            ParquetCompression::SNAPPY
        );
    }

    #[test]
    fn untouched_batches_keep_their_schema() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int32, false)])
            .with_metadata(HashMap::from([("k".to_owned(), "v".to_owned())]));
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )
        .unwrap();
        let rewritten = parquet_compatible(&batch).unwrap();
        assert_eq!(rewritten, batch);
    }
}
