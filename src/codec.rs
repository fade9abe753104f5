//! Binary frame encoding and decoding.
//!
//! Frames are the record's values packed big-endian in schema order,
//! optionally followed by the schema's delimiter byte. Decoding checks the
//! length once against the schema size, then reads fixed-width fields; it
//! never panics on malformed input.

use std::io::{self, Read};

use thiserror::Error;
use tracing::debug;

use crate::record::{Record, Value};
use crate::schema::{FieldKind, Schema};

/// Errors that can occur while decoding a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame for schema '{schema}' must be {expected} bytes, got {actual}")]
    SizeMismatch {
        schema: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Packs a record into a frame, appending the delimiter if the schema has one.
pub fn encode(record: &Record) -> Vec<u8> {
    let schema = record.schema();
    let mut frame = Vec::with_capacity(schema.frame_size());
    for value in record.values() {
        match *value {
            Value::F32(v) => frame.extend_from_slice(&v.to_be_bytes()),
            Value::F64(v) => frame.extend_from_slice(&v.to_be_bytes()),
            Value::U32(v) => frame.extend_from_slice(&v.to_be_bytes()),
            Value::I32(v) => frame.extend_from_slice(&v.to_be_bytes()),
        }
    }
    if let Some(delimiter) = schema.delimiter {
        frame.push(delimiter);
    }
    frame
}

/// Unpacks a frame into a record of `schema`.
///
/// The delimiter is optional: it is stripped only from a frame exactly one
/// byte longer than the schema size. Any other length than the schema size
/// is rejected whole.
pub fn decode(schema: &'static Schema, frame: &[u8]) -> Result<Record, DecodeError> {
    let body = match (schema.delimiter, frame.split_last()) {
        (Some(delimiter), Some((last, rest)))
            if *last == delimiter && rest.len() == schema.size() =>
        {
            rest
        }
        _ => frame,
    };

    let expected = schema.size();
    if body.len() != expected {
        return Err(DecodeError::SizeMismatch {
            schema: schema.name,
            expected,
            actual: body.len(),
        });
    }

    let mut values = Vec::with_capacity(schema.len());
    let mut offset = 0;
    for field in schema.fields {
        let value = match field.kind {
            FieldKind::F32 => Value::F32(f32::from_be_bytes(read_array(body, offset))),
            FieldKind::F64 => Value::F64(f64::from_be_bytes(read_array(body, offset))),
            FieldKind::U32 => Value::U32(u32::from_be_bytes(read_array(body, offset))),
            FieldKind::I32 => Value::I32(i32::from_be_bytes(read_array(body, offset))),
        };
        values.push(value);
        offset += field.kind.width();
    }

    Ok(Record::from_values_unchecked(schema, values))
}

// Callers guarantee `offset + N <= data.len()` via the size check in `decode`.
#[inline(always)]
fn read_array<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[offset..offset + N]);
    buf
}

/// Splits a byte stream into candidate frames for one schema.
///
/// Delimited schemas: a frame ends at the first delimiter that has at least
/// `schema.size()` bytes before it, so delimiter-valued data bytes inside a
/// frame do not split it. Undelimited schemas: every `schema.size()` bytes is
/// a frame.
///
/// Timeouts and empty reads yield `Ok(None)`. For delimited schemas the bytes
/// already received stay buffered for the next call, since the delimiter
/// realigns the stream. Undelimited schemas have nothing to realign on, so a
/// partial frame left when the read runs dry is discarded.
pub struct FrameReader<R> {
    inner: R,
    schema: &'static Schema,
    buf: Vec<u8>,
}

const READ_CHUNK: usize = 64;

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, schema: &'static Schema) -> Self {
        Self {
            inner,
            schema,
            buf: Vec::with_capacity(schema.frame_size() * 2),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Number of received bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next candidate frame, or `None` if none is complete yet.
    pub fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Ok(self.run_dry()),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Ok(self.run_dry());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_dry(&mut self) -> Option<Vec<u8>> {
        if self.schema.delimiter.is_none() && !self.buf.is_empty() {
            debug!("Discarding {} bytes of a partial frame", self.buf.len());
            self.buf.clear();
        }
        None
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let size = self.schema.size();
        match self.schema.delimiter {
            None => (self.buf.len() >= size).then(|| self.buf.drain(..size).collect()),
            Some(delimiter) => {
                let end = self
                    .buf
                    .get(size..)?
                    .iter()
                    .position(|b| *b == delimiter)
                    .map(|p| p + size);
                match end {
                    Some(end) => Some(self.buf.drain(..=end).collect()),
                    None => {
                        let limit = self.schema.frame_size() * 4;
                        if self.buf.len() > limit {
                            debug!(
                                "Discarding {} bytes with no frame delimiter",
                                self.buf.len()
                            );
                            self.buf.clear();
                        }
                        None
                    }
                }
            }
        }
    }
}
