// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Finished decode results.

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use crate::error::Error;
use crate::types::RelationDesc;

/// The immutable columnar result of a decode session.
#[derive(Clone, Debug)]
pub struct Batch {
    desc: RelationDesc,
    batch: RecordBatch,
}

impl Batch {
    pub(crate) fn new(desc: RelationDesc, columns: Vec<ArrayRef>, rows: usize) -> Result<Self, Error> {
        // The row count is explicit so that schemas with no columns still
        // report the rows that were decoded.
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        let batch = RecordBatch::try_new_with_options(
            Arc::new(desc.arrow_schema()),
            columns,
            &options,
        )?;
        Ok(Batch { desc, batch })
    }

    pub fn desc(&self) -> &RelationDesc {
        &self.desc
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// The columns, in schema order, with their names.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ArrayRef)> {
        self.desc
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.batch.columns())
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }
}
