// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Mutable column buffers for one decode session.
//!
//! The buffers of a schema form a tree that mirrors its [`TypeDesc`]s. The
//! tree is stored flat: every node gets a [`NodeId`] and nested nodes refer to
//! their children by id. Nodes are allocated children first, so a node's id is
//! always greater than the ids of everything beneath it.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBufferBuilder, BooleanBuilder, Date32Builder,
    DurationMicrosecondBuilder, FixedSizeBinaryBuilder, Float32Builder, Float64Builder,
    Int16Builder, Int32Builder, Int64Builder, ListArray, StringBuilder, StringDictionaryBuilder,
    StructArray, Time64MicrosecondBuilder, TimestampMicrosecondBuilder,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::Int32Type;

use crate::error::Error;
use crate::types::{struct_fields, RelationDesc, ScalarKind, TypeDesc};

/// Index of a node in a [`ColumnTree`].
pub(crate) type NodeId = usize;

/// The accumulated values of one node.
pub(crate) enum ColumnBuffer {
    Bool(BooleanBuilder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
    FixedBinary(FixedSizeBinaryBuilder),
    Date32(Date32Builder),
    Time64(Time64MicrosecondBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Duration(DurationMicrosecondBuilder),
    Dictionary(StringDictionaryBuilder<Int32Type>),
    List(ListBuffer),
    Struct(StructBuffer),
    /// Placeholder for a node that can never be decoded into.
    Unsupported,
}

impl fmt::Debug for ColumnBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The string dictionary builder has no `Debug` impl.
        match self {
            ColumnBuffer::Bool(_) => f.write_str("Bool"),
            ColumnBuffer::Int16(_) => f.write_str("Int16"),
            ColumnBuffer::Int32(_) => f.write_str("Int32"),
            ColumnBuffer::Int64(_) => f.write_str("Int64"),
            ColumnBuffer::Float32(_) => f.write_str("Float32"),
            ColumnBuffer::Float64(_) => f.write_str("Float64"),
            ColumnBuffer::Utf8(_) => f.write_str("Utf8"),
            ColumnBuffer::Binary(_) => f.write_str("Binary"),
            ColumnBuffer::FixedBinary(_) => f.write_str("FixedBinary"),
            ColumnBuffer::Date32(_) => f.write_str("Date32"),
            ColumnBuffer::Time64(_) => f.write_str("Time64"),
            ColumnBuffer::Timestamp(_) => f.write_str("Timestamp"),
            ColumnBuffer::Duration(_) => f.write_str("Duration"),
            ColumnBuffer::Dictionary(_) => f.write_str("Dictionary"),
            ColumnBuffer::List(b) => f.debug_tuple("List").field(b).finish(),
            ColumnBuffer::Struct(b) => f.debug_tuple("Struct").field(b).finish(),
            ColumnBuffer::Unsupported => f.write_str("Unsupported"),
        }
    }
}

impl ColumnBuffer {
    fn new_scalar(kind: &ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => ColumnBuffer::Bool(BooleanBuilder::new()),
            ScalarKind::Int16 => ColumnBuffer::Int16(Int16Builder::new()),
            ScalarKind::Int32 => ColumnBuffer::Int32(Int32Builder::new()),
            ScalarKind::Int64 => ColumnBuffer::Int64(Int64Builder::new()),
            ScalarKind::Float32 => ColumnBuffer::Float32(Float32Builder::new()),
            ScalarKind::Float64 => ColumnBuffer::Float64(Float64Builder::new()),
            ScalarKind::Utf8 => ColumnBuffer::Utf8(StringBuilder::new()),
            ScalarKind::Binary => ColumnBuffer::Binary(BinaryBuilder::new()),
            ScalarKind::FixedBinary(width) => {
                ColumnBuffer::FixedBinary(FixedSizeBinaryBuilder::new(*width))
            }
            ScalarKind::Date32 => ColumnBuffer::Date32(Date32Builder::new()),
            ScalarKind::Time64Micros => ColumnBuffer::Time64(Time64MicrosecondBuilder::new()),
            ScalarKind::TimestampMicros { .. } => ColumnBuffer::Timestamp(
                TimestampMicrosecondBuilder::new().with_data_type(kind.data_type()),
            ),
            ScalarKind::DurationMicros => {
                ColumnBuffer::Duration(DurationMicrosecondBuilder::new())
            }
        }
    }
}

/// Offsets and validity of a list node; the values live in the element node.
#[derive(Debug)]
pub(crate) struct ListBuffer {
    pub(crate) element: NodeId,
    offsets: Vec<i32>,
    validity: BooleanBufferBuilder,
}

impl ListBuffer {
    /// Closes a list value whose `count` elements were appended to the
    /// element node.
    pub(crate) fn append(&mut self, count: usize) -> Result<(), Error> {
        let end = i32::try_from(count)
            .ok()
            .and_then(|count| self.last_offset().checked_add(count))
            .ok_or_else(|| Error::malformed("list elements overflow 32-bit offsets"))?;
        self.offsets.push(end);
        self.validity.append(true);
        Ok(())
    }

    fn append_null(&mut self) {
        self.offsets.push(self.last_offset());
        self.validity.append(false);
    }

    fn last_offset(&self) -> i32 {
        // Seeded with 0 on construction and only ever pushed to.
        self.offsets.last().copied().unwrap_or(0)
    }
}

/// Validity of a struct node; the values live in the field nodes.
#[derive(Debug)]
pub(crate) struct StructBuffer {
    pub(crate) fields: Arc<[NodeId]>,
    validity: BooleanBufferBuilder,
}

impl StructBuffer {
    pub(crate) fn append(&mut self) {
        self.validity.append(true);
    }
}

#[derive(Debug)]
pub(crate) struct ColumnNode {
    pub(crate) typ: TypeDesc,
    /// Dotted path from the top-level column, for diagnostics.
    pub(crate) path: String,
    pub(crate) buffer: ColumnBuffer,
}

/// Every column buffer of one schema instance.
#[derive(Debug)]
pub(crate) struct ColumnTree {
    nodes: Vec<ColumnNode>,
    roots: Vec<NodeId>,
}

impl ColumnTree {
    pub(crate) fn new(desc: &RelationDesc) -> Self {
        let mut tree = ColumnTree {
            nodes: Vec::new(),
            roots: Vec::with_capacity(desc.len()),
        };
        for column in desc.iter() {
            let root = tree.alloc(&column.typ, column.name.clone());
            tree.roots.push(root);
        }
        tree
    }

    fn alloc(&mut self, typ: &TypeDesc, path: String) -> NodeId {
        let buffer = match typ {
            TypeDesc::Scalar(kind) => ColumnBuffer::new_scalar(kind),
            TypeDesc::List(element) => {
                let element = self.alloc(element, format!("{path}[]"));
                ColumnBuffer::List(ListBuffer {
                    element,
                    offsets: vec![0],
                    validity: BooleanBufferBuilder::new(0),
                })
            }
            TypeDesc::Struct(fields) => {
                let fields: Arc<[NodeId]> = fields
                    .iter()
                    .map(|f| self.alloc(&f.typ, format!("{path}.{}", f.name)))
                    .collect();
                ColumnBuffer::Struct(StructBuffer {
                    fields,
                    validity: BooleanBufferBuilder::new(0),
                })
            }
            TypeDesc::Dictionary => ColumnBuffer::Dictionary(StringDictionaryBuilder::new()),
            TypeDesc::Unsupported { .. } => ColumnBuffer::Unsupported,
        };
        self.nodes.push(ColumnNode {
            typ: typ.clone(),
            path,
            buffer,
        });
        self.nodes.len() - 1
    }

    pub(crate) fn nodes(&self) -> &[ColumnNode] {
        &self.nodes
    }

    pub(crate) fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    #[inline]
    pub(crate) fn buffer_mut(&mut self, id: NodeId) -> &mut ColumnBuffer {
        &mut self.nodes[id].buffer
    }

    /// Appends one null to `id`. Struct nodes also append a null to each of
    /// their fields, so every child stays as long as its parent.
    pub(crate) fn append_null(&mut self, id: NodeId) {
        let fields = match &mut self.nodes[id].buffer {
            ColumnBuffer::Bool(b) => return b.append_null(),
            ColumnBuffer::Int16(b) => return b.append_null(),
            ColumnBuffer::Int32(b) => return b.append_null(),
            ColumnBuffer::Int64(b) => return b.append_null(),
            ColumnBuffer::Float32(b) => return b.append_null(),
            ColumnBuffer::Float64(b) => return b.append_null(),
            ColumnBuffer::Utf8(b) => return b.append_null(),
            ColumnBuffer::Binary(b) => return b.append_null(),
            ColumnBuffer::FixedBinary(b) => return b.append_null(),
            ColumnBuffer::Date32(b) => return b.append_null(),
            ColumnBuffer::Time64(b) => return b.append_null(),
            ColumnBuffer::Timestamp(b) => return b.append_null(),
            ColumnBuffer::Duration(b) => return b.append_null(),
            ColumnBuffer::Dictionary(b) => return b.append_null(),
            ColumnBuffer::List(b) => return b.append_null(),
            ColumnBuffer::Unsupported => return,
            ColumnBuffer::Struct(b) => {
                b.validity.append(false);
                Arc::clone(&b.fields)
            }
        };
        for &field in fields.iter() {
            self.append_null(field);
        }
    }

    /// Finishes every top-level column, in column order.
    pub(crate) fn finish(&mut self) -> Result<Vec<ArrayRef>, Error> {
        let roots = self.roots.clone();
        roots.into_iter().map(|root| self.finish_node(root)).collect()
    }

    fn finish_node(&mut self, id: NodeId) -> Result<ArrayRef, Error> {
        let array: ArrayRef = match &mut self.nodes[id].buffer {
            ColumnBuffer::Bool(b) => Arc::new(b.finish()),
            ColumnBuffer::Int16(b) => Arc::new(b.finish()),
            ColumnBuffer::Int32(b) => Arc::new(b.finish()),
            ColumnBuffer::Int64(b) => Arc::new(b.finish()),
            ColumnBuffer::Float32(b) => Arc::new(b.finish()),
            ColumnBuffer::Float64(b) => Arc::new(b.finish()),
            ColumnBuffer::Utf8(b) => Arc::new(b.finish()),
            ColumnBuffer::Binary(b) => Arc::new(b.finish()),
            ColumnBuffer::FixedBinary(b) => Arc::new(b.finish()),
            ColumnBuffer::Date32(b) => Arc::new(b.finish()),
            ColumnBuffer::Time64(b) => Arc::new(b.finish()),
            ColumnBuffer::Timestamp(b) => Arc::new(b.finish()),
            ColumnBuffer::Duration(b) => Arc::new(b.finish()),
            ColumnBuffer::Dictionary(b) => Arc::new(b.finish()),
            ColumnBuffer::List(b) => {
                let element = b.element;
                let offsets = std::mem::replace(&mut b.offsets, vec![0]);
                let nulls = finish_validity(&mut b.validity);
                let TypeDesc::List(element_typ) = &self.nodes[id].typ else {
                    unreachable!("list buffer allocated for {}", self.nodes[id].typ);
                };
                let item = Arc::new(element_typ.list_item_field());
                let values = self.finish_node(element)?;
                let offsets = OffsetBuffer::new(ScalarBuffer::from(offsets));
                Arc::new(ListArray::try_new(item, offsets, values, nulls)?)
            }
            ColumnBuffer::Struct(b) => {
                let len = b.validity.len();
                let children = Arc::clone(&b.fields);
                let nulls = finish_validity(&mut b.validity);
                let TypeDesc::Struct(fields) = &self.nodes[id].typ else {
                    unreachable!("struct buffer allocated for {}", self.nodes[id].typ);
                };
                let fields = struct_fields(fields);
                if fields.is_empty() {
                    Arc::new(StructArray::new_empty_fields(len, nulls))
                } else {
                    let arrays = children
                        .iter()
                        .map(|&child| self.finish_node(child))
                        .collect::<Result<Vec<_>, _>>()?;
                    Arc::new(StructArray::try_new(fields, arrays, nulls)?)
                }
            }
            ColumnBuffer::Unsupported => {
                unreachable!("unsupported column {} cannot be decoded", self.nodes[id].path)
            }
        };
        Ok(array)
    }
}

fn finish_validity(validity: &mut BooleanBufferBuilder) -> Option<NullBuffer> {
    let nulls = NullBuffer::new(validity.finish());
    (nulls.null_count() > 0).then_some(nulls)
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::Int16Type;

    use super::*;
    use crate::types::{ColumnDesc, StructField};

    fn desc(typ: TypeDesc) -> RelationDesc {
        RelationDesc::new(vec![ColumnDesc {
            name: "c".into(),
            typ,
        }])
    }

    #[test]
    fn children_are_allocated_first() {
        let tree = ColumnTree::new(&desc(TypeDesc::List(Box::new(TypeDesc::Struct(vec![
            StructField {
                name: "a".into(),
                typ: TypeDesc::Scalar(ScalarKind::Int16),
            },
            StructField {
                name: "b".into(),
                typ: TypeDesc::List(Box::new(TypeDesc::Scalar(ScalarKind::Utf8))),
            },
        ])))));

        let paths: Vec<_> = tree.nodes().iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["c[].a", "c[].b[]", "c[].b", "c[]", "c"]);
        assert_eq!(tree.roots(), &[4]);
    }

    #[test]
    fn buffers_are_printable() {
        let tree = ColumnTree::new(&desc(TypeDesc::List(Box::new(TypeDesc::Dictionary))));
        let printed = format!("{tree:?}");
        assert!(printed.contains("Dictionary"), "{printed}");
        assert!(printed.contains("List(ListBuffer { element: 0"), "{printed}");
    }

    #[test]
    fn null_struct_pads_fields() {
        let mut tree = ColumnTree::new(&desc(TypeDesc::Struct(vec![
            StructField {
                name: "a".into(),
                typ: TypeDesc::Scalar(ScalarKind::Int16),
            },
            StructField {
                name: "b".into(),
                typ: TypeDesc::Struct(vec![StructField {
                    name: "x".into(),
                    typ: TypeDesc::Scalar(ScalarKind::Bool),
                }]),
            },
        ])));
        let root = tree.roots()[0];
        tree.append_null(root);
        tree.append_null(root);

        let arrays = tree.finish().unwrap();
        let array = arrays[0].as_struct();
        assert_eq!(array.len(), 2);
        assert_eq!(array.null_count(), 2);
        assert_eq!(array.column(0).as_primitive::<Int16Type>().null_count(), 2);
        assert_eq!(array.column(1).as_struct().column(0).len(), 2);
    }

    #[test]
    fn null_list_repeats_offset() {
        let mut tree = ColumnTree::new(&desc(TypeDesc::List(Box::new(TypeDesc::Scalar(
            ScalarKind::Int16,
        )))));
        let root = tree.roots()[0];
        let ColumnBuffer::List(list) = tree.buffer_mut(root) else {
            panic!("expected a list buffer");
        };
        let element = list.element;
        tree.append_null(root);
        for v in [1, 2] {
            let ColumnBuffer::Int16(b) = tree.buffer_mut(element) else {
                panic!("expected an int16 buffer");
            };
            b.append_value(v);
        }
        let ColumnBuffer::List(list) = tree.buffer_mut(root) else {
            panic!("expected a list buffer");
        };
        list.append(2).unwrap();

        let arrays = tree.finish().unwrap();
        let array = arrays[0].as_list::<i32>();
        assert_eq!(array.len(), 2);
        assert!(array.is_null(0));
        assert_eq!(array.value_offsets(), &[0, 0, 2]);
    }
}
