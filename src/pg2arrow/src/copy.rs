// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Framing of a binary COPY stream.
//!
//! The transport hands over COPY data in chunks that have no relation to tuple
//! boundaries. [`CopyDecoder`] buffers whatever is incomplete, validates the
//! stream header once, and passes each complete tuple to a [`RowDecoder`].

use std::io;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::batch::Batch;
use crate::decode::{RowDecoder, RowStep};
use crate::error::Error;
use crate::types::RelationDesc;

/// The 11 byte signature every binary COPY stream begins with.
pub const COPY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";
/// Signature, flags, and header extension length.
pub const COPY_HEADER_LEN: usize = 19;
/// Flags bit 16: each tuple carries an OID field.
const FLAG_HAS_OIDS: u32 = 1 << 16;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Header,
    Tuples,
    Done,
    Failed,
}

/// A push-based decoder for one binary COPY stream.
#[derive(Debug)]
pub struct CopyDecoder {
    rows: RowDecoder,
    pending: BytesMut,
    state: State,
}

impl CopyDecoder {
    pub fn new(desc: RelationDesc) -> Result<Self, Error> {
        Ok(CopyDecoder {
            rows: RowDecoder::new(desc)?,
            pending: BytesMut::new(),
            state: State::Header,
        })
    }

    pub fn desc(&self) -> &RelationDesc {
        self.rows.desc()
    }

    /// The number of rows decoded so far.
    pub fn rows(&self) -> usize {
        self.rows.rows()
    }

    /// Decodes every complete tuple in `chunk` and buffers the remainder.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if self.state == State::Failed {
            return Err(Error::Aborted);
        }
        let result = self.feed_inner(chunk);
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    fn feed_inner(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.pending.extend_from_slice(chunk);
        loop {
            match self.state {
                State::Header => match header_len(&self.pending)? {
                    Some(len) => {
                        self.pending.advance(len);
                        self.state = State::Tuples;
                    }
                    None => return Ok(()),
                },
                State::Tuples => match tuple_len(&self.pending)? {
                    Some(len) => {
                        let step = self.rows.decode_row(&self.pending[..len])?;
                        debug_assert_eq!(step.consumed(), len);
                        self.pending.advance(len);
                        if step == RowStep::Trailer {
                            trace!(rows = self.rows.rows(), "reached copy trailer");
                            self.state = State::Done;
                        }
                    }
                    None => return Ok(()),
                },
                State::Done => {
                    if self.pending.is_empty() {
                        return Ok(());
                    }
                    return Err(Error::malformed(format!(
                        "{} bytes after the copy trailer",
                        self.pending.len()
                    )));
                }
                State::Failed => return Err(Error::Aborted),
            }
        }
    }

    /// Feeds everything `reader` produces until it reports end of file.
    pub fn read_from<R: io::Read>(&mut self, mut reader: R) -> Result<(), Error> {
        let mut buf = vec![0; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = State::Failed;
                    return Err(Error::stream(e));
                }
            };
            self.feed(&buf[..n])?;
        }
    }

    /// Ends the stream, which must have reached its trailer, and returns the
    /// decoded rows.
    pub fn finish(self) -> Result<Batch, Error> {
        match self.state {
            State::Done => {}
            State::Failed => return Err(Error::Aborted),
            State::Header | State::Tuples => {
                return Err(Error::stream(format!(
                    "copy stream ended before its trailer with {} bytes pending",
                    self.pending.len()
                )))
            }
        }
        let batch = self.rows.finish()?;
        debug!(rows = batch.num_rows(), "finished copy stream");
        Ok(batch)
    }
}

/// Validates the stream header at the start of `buf` and returns its length
/// including the extension area, or `None` if `buf` does not hold all of it.
fn header_len(buf: &[u8]) -> Result<Option<usize>, Error> {
    let prefix = &buf[..buf.len().min(COPY_SIGNATURE.len())];
    if !COPY_SIGNATURE.starts_with(prefix) {
        return Err(Error::malformed("missing binary copy signature"));
    }
    if buf.len() < COPY_HEADER_LEN {
        return Ok(None);
    }
    let mut fields = &buf[COPY_SIGNATURE.len()..COPY_HEADER_LEN];
    let flags = fields.get_u32();
    let extension = fields.get_u32();
    if flags & FLAG_HAS_OIDS != 0 {
        return Err(Error::malformed("copy streams with oids are not supported"));
    }
    let extension = usize::try_from(extension)
        .map_err(|_| Error::malformed("copy header extension too long"))?;
    let len = COPY_HEADER_LEN
        .checked_add(extension)
        .ok_or_else(|| Error::malformed("copy header extension too long"))?;
    Ok((buf.len() >= len).then_some(len))
}

/// Returns the length of the tuple at the start of `buf` by walking its
/// top-level field lengths, or `None` if `buf` does not hold all of it.
fn tuple_len(buf: &[u8]) -> Result<Option<usize>, Error> {
    let mut cursor = buf;
    if cursor.remaining() < 2 {
        return Ok(None);
    }
    let fields = cursor.get_i16();
    if fields == -1 {
        return Ok(Some(2));
    }
    if fields < 0 {
        return Err(Error::malformed(format!("negative field count {fields}")));
    }
    let mut len = 2;
    for _ in 0..fields {
        if cursor.remaining() < 4 {
            return Ok(None);
        }
        let field = cursor.get_i32();
        len += 4;
        if field == -1 {
            continue;
        }
        let field = usize::try_from(field)
            .map_err(|_| Error::malformed(format!("negative field length {field}")))?;
        if cursor.remaining() < field {
            return Ok(None);
        }
        cursor.advance(field);
        len += field;
    }
    Ok(Some(len))
}
