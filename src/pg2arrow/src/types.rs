// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The columnar type model.
//!
//! A [`TypeDesc`] is the resolved, columnar description of a PostgreSQL
//! column or composite field. It is a closed sum type so that everything
//! downstream (buffer allocation, decoder selection, Arrow schema generation)
//! dispatches by matching on the tag exactly once.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields, Schema, TimeUnit};

/// A PostgreSQL object identifier.
pub type Oid = u32;

/// The time zone attached to `timestamptz` columns.
pub const UTC: &str = "UTC";

/// The scalar kinds a PostgreSQL base type can resolve to.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScalarKind {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Variable length UTF-8 text.
    Utf8,
    /// Variable length bytes.
    Binary,
    /// Bytes of exactly the given width.
    FixedBinary(i32),
    /// Days since 1970-01-01.
    Date32,
    /// Microseconds since midnight.
    Time64Micros,
    /// Microseconds since 1970-01-01 00:00:00, optionally in a time zone.
    TimestampMicros { tz: Option<Arc<str>> },
    /// A span of microseconds.
    DurationMicros,
}

impl ScalarKind {
    /// The Arrow [`DataType`] values of this kind are stored as.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarKind::Bool => DataType::Boolean,
            ScalarKind::Int16 => DataType::Int16,
            ScalarKind::Int32 => DataType::Int32,
            ScalarKind::Int64 => DataType::Int64,
            ScalarKind::Float32 => DataType::Float32,
            ScalarKind::Float64 => DataType::Float64,
            ScalarKind::Utf8 => DataType::Utf8,
            ScalarKind::Binary => DataType::Binary,
            ScalarKind::FixedBinary(width) => DataType::FixedSizeBinary(*width),
            ScalarKind::Date32 => DataType::Date32,
            ScalarKind::Time64Micros => DataType::Time64(TimeUnit::Microsecond),
            ScalarKind::TimestampMicros { tz } => {
                DataType::Timestamp(TimeUnit::Microsecond, tz.clone())
            }
            ScalarKind::DurationMicros => DataType::Duration(TimeUnit::Microsecond),
        }
    }
}

/// A named field of a [`TypeDesc::Struct`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StructField {
    pub name: String,
    pub typ: TypeDesc,
}

/// The columnar type of a column or nested field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeDesc {
    Scalar(ScalarKind),
    /// A flattened PostgreSQL array.
    List(Box<TypeDesc>),
    /// A PostgreSQL composite type, fields in declaration order.
    Struct(Vec<StructField>),
    /// A PostgreSQL enum: `int32` keys into a dictionary of `utf8` labels.
    Dictionary,
    /// A type with no columnar equivalent. Resolution succeeds, but building
    /// a decoder for a schema that contains this node fails.
    Unsupported { type_name: String },
}

impl TypeDesc {
    /// The Arrow [`DataType`] of this node.
    ///
    /// [`TypeDesc::Unsupported`] maps to [`DataType::Null`] so that schemas
    /// containing it can still be displayed; they can never be decoded into.
    pub fn data_type(&self) -> DataType {
        match self {
            TypeDesc::Scalar(kind) => kind.data_type(),
            TypeDesc::List(element) => DataType::List(Arc::new(element.list_item_field())),
            TypeDesc::Struct(fields) => DataType::Struct(struct_fields(fields)),
            TypeDesc::Dictionary => {
                DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
            }
            TypeDesc::Unsupported { .. } => DataType::Null,
        }
    }

    /// The Arrow field used for the items of a list whose element is `self`.
    pub(crate) fn list_item_field(&self) -> Field {
        Field::new_list_field(self.data_type(), true)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Scalar(kind) => write!(f, "{}", kind.data_type()),
            TypeDesc::List(element) => write!(f, "list<{element}>"),
            TypeDesc::Struct(fields) => {
                f.write_str("struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.typ)?;
                }
                f.write_str(">")
            }
            TypeDesc::Dictionary => f.write_str("dictionary<int32, utf8>"),
            TypeDesc::Unsupported { type_name } => write!(f, "unsupported<{type_name}>"),
        }
    }
}

pub(crate) fn struct_fields(fields: &[StructField]) -> Fields {
    fields
        .iter()
        .map(|f| Field::new(f.name.clone(), f.typ.data_type(), true))
        .collect()
}

/// A top-level column of a relation or query result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    pub typ: TypeDesc,
}

/// The ordered columns of a relation or query result.
///
/// This is the column list itself, not a [`TypeDesc::Struct`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RelationDesc {
    columns: Vec<ColumnDesc>,
}

impl RelationDesc {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        RelationDesc { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDesc> {
        self.columns.iter()
    }

    /// The Arrow schema of batches decoded with this description.
    pub fn arrow_schema(&self) -> Schema {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name.clone(), c.typ.data_type(), true))
            .collect();
        Schema::new(fields)
    }
}
