// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Decoding of PostgreSQL binary COPY data into Apache Arrow arrays.
//!
//! Decoding happens in two steps. A [`TypeResolver`] first turns the type
//! OIDs of a table or query into a [`RelationDesc`] by consulting a
//! [`Catalog`]. Then a [`CopyDecoder`] (or, for callers that frame tuples
//! themselves, a [`RowDecoder`]) replays the binary COPY stream into one
//! column buffer per node of that description, and finishes them into a
//! [`Batch`].
//!
//! ```text
//! Source -> TypeResolver -> RelationDesc -> CopyDecoder -> Batch
//!                ^                              ^
//!             Catalog                     COPY ... (FORMAT binary)
//! ```
//!
//! # Useful references
//!
//!   * [PostgreSQL COPY](https://www.postgresql.org/docs/current/sql-copy.html)
//!   * [Arrow columnar format](https://arrow.apache.org/docs/format/Columnar.html)

mod batch;
mod catalog;
mod columns;
mod copy;
mod decode;
mod error;
mod registry;
mod resolve;
mod types;

pub use batch::Batch;
pub use catalog::{AttributeInfo, Catalog, MemoryCatalog, Source, TypeCategory, TypeInfo};
pub use copy::{CopyDecoder, COPY_HEADER_LEN, COPY_SIGNATURE};
pub use decode::{RowDecoder, RowStep, DATE_EPOCH_OFFSET_DAYS, TIMESTAMP_EPOCH_OFFSET_MICROS};
pub use error::{CatalogObject, Error};
pub use resolve::{TypeNameMap, TypeResolver};
pub use types::{ColumnDesc, Oid, RelationDesc, ScalarKind, StructField, TypeDesc, UTC};
