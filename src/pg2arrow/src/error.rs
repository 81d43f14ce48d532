// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors produced while resolving schemas and decoding COPY data.

use std::fmt;

use arrow::error::ArrowError;

use crate::types::Oid;

/// A catalog object that a lookup expected to find.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CatalogObject {
    /// A row of `pg_type`.
    Type(Oid),
    /// The attributes of a composite type's relation.
    Attributes(Oid),
    /// A single attribute position of a composite type's relation.
    Attribute {
        /// The relation that owns the attribute.
        relation: Oid,
        /// The 1-based position that was missing.
        position: u32,
    },
}

impl fmt::Display for CatalogObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogObject::Type(oid) => write!(f, "type with oid {oid}"),
            CatalogObject::Attributes(relid) => {
                write!(f, "attributes of relation with oid {relid}")
            }
            CatalogObject::Attribute { relation, position } => {
                write!(f, "attribute {position} of relation with oid {relation}")
            }
        }
    }
}

/// An error from schema resolution or from a decode session.
///
/// Every variant is fatal to the operation that produced it. A decode session
/// that has returned an error refuses all further work with [`Error::Aborted`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A catalog lookup returned no row.
    #[error("catalog lookup found no {0}")]
    MetadataNotFound(CatalogObject),
    /// A composite type contains itself, directly or through other types.
    #[error("type with oid {oid} is self-referential (via {path})")]
    CyclicType {
        /// The type that was reached a second time.
        oid: Oid,
        /// The chain of OIDs that led back to `oid`.
        path: String,
    },
    /// A column, or a field nested inside one, has a type with no columnar
    /// equivalent.
    #[error("column {column} has unsupported type {type_name}")]
    UnsupportedType {
        /// Dotted path to the offending node, e.g. `col.field[]`.
        column: String,
        /// The source type's name.
        type_name: String,
    },
    /// The COPY data does not match the expected binary layout.
    #[error("malformed tuple: {0}")]
    MalformedTuple(String),
    /// The byte collaborator failed to deliver COPY data.
    #[error("copy stream failed: {0}")]
    Stream(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The metadata collaborator failed.
    #[error(transparent)]
    Catalog(#[from] anyhow::Error),
    /// Arrow refused to assemble the finished arrays.
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    /// The decode session already failed and cannot be used anymore.
    #[error("decode session aborted by an earlier error")]
    Aborted,
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedTuple(msg.into())
    }

    /// Wraps a transport error from the byte collaborator.
    pub fn stream<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Stream(err.into())
    }
}
