// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The table of decode routines for a [`ColumnTree`].
//!
//! Routines are picked from each node's own [`TypeDesc`], never from the
//! PostgreSQL type it was resolved from, so any columnar schema can be decoded
//! into regardless of where it came from. The choice is made once per node
//! here; the decode loop only indexes into the table.

use std::fmt;

use crate::columns::{ColumnNode, ColumnTree, NodeId};
use crate::decode;
use crate::error::Error;
use crate::types::{ScalarKind, TypeDesc};

/// Decodes the payload of one non-null field into the node it is bound to.
///
/// The payload excludes the field's length prefix. The routine appends exactly
/// one value to the node.
pub(crate) type DecodeFn = fn(&mut ColumnTree, &Registry, NodeId, &[u8]) -> Result<(), Error>;

pub(crate) struct Registry {
    decoders: Vec<DecodeFn>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("decoders", &self.decoders.len())
            .finish()
    }
}

impl Registry {
    /// Builds the registry for every node of `tree`, or fails if any node is
    /// unsupported.
    pub(crate) fn build(tree: &ColumnTree) -> Result<Self, Error> {
        // Nodes are stored children first, so walking them in order registers
        // every child before its parent.
        let decoders = tree
            .nodes()
            .iter()
            .map(select)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Registry { decoders })
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> DecodeFn {
        self.decoders[id]
    }
}

fn select(node: &ColumnNode) -> Result<DecodeFn, Error> {
    let decoder: DecodeFn = match &node.typ {
        TypeDesc::Scalar(kind) => match kind {
            ScalarKind::Bool => decode::decode_bool,
            ScalarKind::Int16 => decode::decode_int16,
            ScalarKind::Int32 => decode::decode_int32,
            ScalarKind::Int64 => decode::decode_int64,
            ScalarKind::Float32 => decode::decode_float32,
            ScalarKind::Float64 => decode::decode_float64,
            ScalarKind::Utf8 => decode::decode_utf8,
            ScalarKind::Binary => decode::decode_binary,
            ScalarKind::FixedBinary(_) => decode::decode_fixed_binary,
            ScalarKind::Date32 => decode::decode_date,
            ScalarKind::Time64Micros => decode::decode_time,
            ScalarKind::TimestampMicros { .. } => decode::decode_timestamp,
            ScalarKind::DurationMicros => decode::decode_interval,
        },
        TypeDesc::List(_) => decode::decode_array,
        TypeDesc::Struct(_) => decode::decode_record,
        TypeDesc::Dictionary => decode::decode_enum,
        TypeDesc::Unsupported { type_name } => {
            return Err(Error::UnsupportedType {
                column: node.path.clone(),
                type_name: type_name.clone(),
            })
        }
    };
    Ok(decoder)
}
