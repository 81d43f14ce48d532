// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Decoding of binary COPY tuples into column buffers.
//!
//! # Wire format
//!
//! A tuple is an `int16` field count followed by that many fields. Each field
//! is an `int32` length (`-1` for NULL) and then that many bytes in the type's
//! binary send format. A field count of `-1` is the trailer that ends the
//! stream. All integers are big endian.
//!
//! Arrays and composites nest fields of this same shape inside their payload,
//! which is why [`decode_field`] recurses through the [`Registry`].
//!
//! # Useful references
//!
//!   * [PostgreSQL COPY](https://www.postgresql.org/docs/current/sql-copy.html#id-1.9.3.55.9.4)
//!   * `array_send` and `record_send` in the PostgreSQL sources

use std::str;

use byteorder::{ByteOrder, NetworkEndian, ReadBytesExt};
use tracing::debug;

use crate::batch::Batch;
use crate::columns::{ColumnBuffer, ColumnTree, NodeId};
use crate::error::Error;
use crate::registry::Registry;
use crate::types::{RelationDesc, ScalarKind, TypeDesc};

/// Days between 1970-01-01 and PostgreSQL's epoch, 2000-01-01.
pub const DATE_EPOCH_OFFSET_DAYS: i32 = 10_957;
/// Microseconds between 1970-01-01 and PostgreSQL's epoch, 2000-01-01.
pub const TIMESTAMP_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// The result of feeding one tuple to [`RowDecoder::decode_row`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RowStep {
    /// A row was appended to every column; the tuple was this many bytes.
    Row(usize),
    /// The stream trailer. Nothing was appended.
    Trailer,
}

impl RowStep {
    /// The number of bytes the tuple occupied.
    pub fn consumed(&self) -> usize {
        match self {
            RowStep::Row(consumed) => *consumed,
            RowStep::Trailer => 2,
        }
    }
}

/// A decode session: the column buffers of one schema instance and the
/// registry of routines that fill them.
#[derive(Debug)]
pub struct RowDecoder {
    desc: RelationDesc,
    tree: ColumnTree,
    registry: Registry,
    rows: usize,
    aborted: bool,
}

impl RowDecoder {
    /// Allocates buffers for `desc` and binds a decode routine to each.
    ///
    /// Fails with [`Error::UnsupportedType`] if any column, or any field nested
    /// in one, has no columnar equivalent.
    pub fn new(desc: RelationDesc) -> Result<Self, Error> {
        let tree = ColumnTree::new(&desc);
        let registry = Registry::build(&tree)?;
        debug!(
            columns = desc.len(),
            nodes = tree.nodes().len(),
            "built decoder registry"
        );
        Ok(RowDecoder {
            desc,
            tree,
            registry,
            rows: 0,
            aborted: false,
        })
    }

    pub fn desc(&self) -> &RelationDesc {
        &self.desc
    }

    /// The number of rows decoded so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Decodes the tuple at the start of `buf`, appending one value (or null)
    /// to every column.
    ///
    /// Any error aborts the session: the columns decoded before the failing
    /// field already hold a value for this row and the rest do not.
    pub fn decode_row(&mut self, buf: &[u8]) -> Result<RowStep, Error> {
        if self.aborted {
            return Err(Error::Aborted);
        }
        let result = self.decode_row_inner(buf);
        if result.is_err() {
            self.aborted = true;
        }
        result
    }

    fn decode_row_inner(&mut self, buf: &[u8]) -> Result<RowStep, Error> {
        let mut header = buf;
        let fields = read_i16(&mut header, "tuple field count")?;
        if fields == -1 {
            return Ok(RowStep::Trailer);
        }
        let columns = self.tree.roots().len();
        if usize::try_from(fields).ok() != Some(columns) {
            return Err(Error::malformed(format!(
                "tuple has {fields} fields but the schema has {columns} columns"
            )));
        }

        let mut consumed = 2;
        for idx in 0..columns {
            let root = self.tree.roots()[idx];
            consumed += decode_field(&mut self.tree, &self.registry, root, &buf[consumed..])?;
        }
        self.rows += 1;
        Ok(RowStep::Row(consumed))
    }

    /// Assembles the decoded rows into a [`Batch`], ending the session.
    pub fn finish(mut self) -> Result<Batch, Error> {
        if self.aborted {
            return Err(Error::Aborted);
        }
        let columns = self.tree.finish()?;
        Batch::new(self.desc, columns, self.rows)
    }
}

/// Decodes one length-prefixed field at the start of `cursor` into `node`,
/// returning the number of bytes consumed.
pub(crate) fn decode_field(
    tree: &mut ColumnTree,
    registry: &Registry,
    node: NodeId,
    cursor: &[u8],
) -> Result<usize, Error> {
    let mut rest = cursor;
    let len = read_i32(&mut rest, "field length")?;
    if len == -1 {
        tree.append_null(node);
        return Ok(4);
    }
    let len = usize::try_from(len)
        .map_err(|_| Error::malformed(format!("negative field length {len}")))?;
    let payload = rest.get(..len).ok_or_else(|| {
        Error::malformed(format!(
            "field length {len} exceeds the {} remaining bytes",
            rest.len()
        ))
    })?;
    (registry.get(node))(tree, registry, node, payload)?;
    Ok(4 + len)
}

fn read_i16(buf: &mut &[u8], what: &str) -> Result<i16, Error> {
    buf.read_i16::<NetworkEndian>()
        .map_err(|_| Error::malformed(format!("truncated {what}")))
}

fn read_i32(buf: &mut &[u8], what: &str) -> Result<i32, Error> {
    buf.read_i32::<NetworkEndian>()
        .map_err(|_| Error::malformed(format!("truncated {what}")))
}

fn skip(buf: &mut &[u8], n: usize, what: &str) -> Result<(), Error> {
    match buf.get(n..) {
        Some(rest) => {
            *buf = rest;
            Ok(())
        }
        None => Err(Error::malformed(format!("truncated {what}"))),
    }
}

fn expect_consumed(rest: &[u8], what: &str) -> Result<(), Error> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::malformed(format!(
            "{} trailing bytes after {what}",
            rest.len()
        )))
    }
}

fn expect_width(raw: &[u8], width: usize, what: &str) -> Result<(), Error> {
    if raw.len() == width {
        Ok(())
    } else {
        Err(Error::malformed(format!(
            "{what} value is {} bytes, expected {width}",
            raw.len()
        )))
    }
}

fn utf8<'a>(raw: &'a [u8], what: &str) -> Result<&'a str, Error> {
    str::from_utf8(raw).map_err(|e| Error::malformed(format!("invalid utf-8 in {what}: {e}")))
}

macro_rules! fixed_width_decoder {
    ($name:ident, $buffer:ident, $width:expr, |$raw:ident| $value:expr) => {
        pub(crate) fn $name(
            tree: &mut ColumnTree,
            _: &Registry,
            node: NodeId,
            $raw: &[u8],
        ) -> Result<(), Error> {
            let ColumnBuffer::$buffer(builder) = tree.buffer_mut(node) else {
                unreachable!(concat!(stringify!($name), " registered for another buffer"));
            };
            expect_width($raw, $width, stringify!($buffer))?;
            builder.append_value($value);
            Ok(())
        }
    };
}

fixed_width_decoder!(decode_bool, Bool, 1, |raw| raw[0] != 0);
fixed_width_decoder!(decode_int16, Int16, 2, |raw| NetworkEndian::read_i16(raw));
fixed_width_decoder!(decode_int32, Int32, 4, |raw| NetworkEndian::read_i32(raw));
fixed_width_decoder!(decode_int64, Int64, 8, |raw| NetworkEndian::read_i64(raw));
fixed_width_decoder!(decode_float32, Float32, 4, |raw| NetworkEndian::read_f32(raw));
fixed_width_decoder!(decode_float64, Float64, 8, |raw| NetworkEndian::read_f64(raw));
fixed_width_decoder!(decode_date, Date32, 4, |raw| {
    NetworkEndian::read_i32(raw).saturating_add(DATE_EPOCH_OFFSET_DAYS)
});
fixed_width_decoder!(decode_time, Time64, 8, |raw| NetworkEndian::read_i64(raw));
fixed_width_decoder!(decode_timestamp, Timestamp, 8, |raw| {
    NetworkEndian::read_i64(raw).saturating_add(TIMESTAMP_EPOCH_OFFSET_MICROS)
});
// An interval is microseconds, days, and months. Months have no fixed length
// in microseconds and are dropped.
fixed_width_decoder!(decode_interval, Duration, 16, |raw| {
    let micros = NetworkEndian::read_i64(&raw[..8]);
    let days = NetworkEndian::read_i32(&raw[8..12]);
    micros.saturating_add(i64::from(days).saturating_mul(MICROS_PER_DAY))
});

pub(crate) fn decode_utf8(
    tree: &mut ColumnTree,
    _: &Registry,
    node: NodeId,
    raw: &[u8],
) -> Result<(), Error> {
    let ColumnBuffer::Utf8(builder) = tree.buffer_mut(node) else {
        unreachable!("decode_utf8 registered for another buffer");
    };
    builder.append_value(utf8(raw, "text")?);
    Ok(())
}

pub(crate) fn decode_binary(
    tree: &mut ColumnTree,
    _: &Registry,
    node: NodeId,
    raw: &[u8],
) -> Result<(), Error> {
    let ColumnBuffer::Binary(builder) = tree.buffer_mut(node) else {
        unreachable!("decode_binary registered for another buffer");
    };
    builder.append_value(raw);
    Ok(())
}

pub(crate) fn decode_fixed_binary(
    tree: &mut ColumnTree,
    _: &Registry,
    node: NodeId,
    raw: &[u8],
) -> Result<(), Error> {
    let TypeDesc::Scalar(ScalarKind::FixedBinary(width)) = tree.nodes()[node].typ else {
        unreachable!("decode_fixed_binary registered for another type");
    };
    let width = usize::try_from(width)
        .map_err(|_| Error::malformed(format!("invalid fixed width {width}")))?;
    expect_width(raw, width, "FixedBinary")?;
    let ColumnBuffer::FixedBinary(builder) = tree.buffer_mut(node) else {
        unreachable!("decode_fixed_binary registered for another buffer");
    };
    builder.append_value(raw)?;
    Ok(())
}

pub(crate) fn decode_enum(
    tree: &mut ColumnTree,
    _: &Registry,
    node: NodeId,
    raw: &[u8],
) -> Result<(), Error> {
    let ColumnBuffer::Dictionary(builder) = tree.buffer_mut(node) else {
        unreachable!("decode_enum registered for another buffer");
    };
    builder.append(utf8(raw, "enum label")?)?;
    Ok(())
}

/// Decodes an array, flattening all of its dimensions into one list value.
///
/// The payload is `ndims`, a has-nulls flag, the element type OID, `ndims`
/// pairs of (length, lower bound), and then the elements as fields.
pub(crate) fn decode_array(
    tree: &mut ColumnTree,
    registry: &Registry,
    node: NodeId,
    raw: &[u8],
) -> Result<(), Error> {
    let mut cursor = raw;
    let ndims = read_i32(&mut cursor, "array dimension count")?;
    // The element type comes from the schema, not the wire.
    skip(&mut cursor, 8, "array header")?;

    let ndims = usize::try_from(ndims)
        .map_err(|_| Error::malformed(format!("negative array dimension count {ndims}")))?;
    let mut elements: usize = if ndims == 0 { 0 } else { 1 };
    for _ in 0..ndims {
        let len = read_i32(&mut cursor, "array dimension length")?;
        skip(&mut cursor, 4, "array dimension lower bound")?;
        let len = usize::try_from(len)
            .map_err(|_| Error::malformed(format!("negative array dimension length {len}")))?;
        elements = elements
            .checked_mul(len)
            .ok_or_else(|| Error::malformed("array element count overflows"))?;
    }

    let ColumnBuffer::List(list) = tree.buffer_mut(node) else {
        unreachable!("decode_array registered for another buffer");
    };
    let element = list.element;
    for _ in 0..elements {
        let consumed = decode_field(tree, registry, element, cursor)?;
        cursor = &cursor[consumed..];
    }
    expect_consumed(cursor, "array elements")?;

    let ColumnBuffer::List(list) = tree.buffer_mut(node) else {
        unreachable!("decode_array registered for another buffer");
    };
    list.append(elements)
}

/// Decodes a composite value.
///
/// The payload is the number of fields present, and then for each of them the
/// field's type OID followed by the field itself. Declared fields beyond the
/// number present are null.
pub(crate) fn decode_record(
    tree: &mut ColumnTree,
    registry: &Registry,
    node: NodeId,
    raw: &[u8],
) -> Result<(), Error> {
    let mut cursor = raw;
    let present = read_i32(&mut cursor, "composite field count")?;
    let present = usize::try_from(present)
        .map_err(|_| Error::malformed(format!("negative composite field count {present}")))?;

    let ColumnBuffer::Struct(record) = tree.buffer_mut(node) else {
        unreachable!("decode_record registered for another buffer");
    };
    if present > record.fields.len() {
        return Err(Error::malformed(format!(
            "composite has {present} fields but its type declares {}",
            record.fields.len()
        )));
    }
    record.append();
    let fields = std::sync::Arc::clone(&record.fields);

    for (idx, &field) in fields.iter().enumerate() {
        if idx >= present {
            tree.append_null(field);
            continue;
        }
        // The field type comes from the schema, not the wire.
        skip(&mut cursor, 4, "composite field type")?;
        let consumed = decode_field(tree, registry, field, cursor)?;
        cursor = &cursor[consumed..];
    }
    expect_consumed(cursor, "composite fields")
}
