//! The four stream contracts that compose the engine: typed pull
//! ([`Source`]), typed push ([`Sink`]), byte pull ([`ByteSource`]), and byte
//! push ([`ByteSink`]), plus the [`stream_data`] pump that drains one into
//! the other.

use bytes::{Bytes, BytesMut};

use crate::bytestr::ByteString;
use crate::descriptor::{FieldDescriptor, FieldType, Label};
use crate::encoding::{zigzag_decode32, zigzag_decode64};
use crate::error::{Error, ErrorCode, Result};

/// One decoded scalar value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Float(f32),
    Double(f64),
    Enum(i32),
}

impl Value {
    /// Interprets a decoded varint according to the declared type.
    /// Sign-extended `int32` truncates; `sint32`/`sint64` un-zig-zag.
    pub(crate) fn from_varint(field_type: FieldType, raw: u64) -> Result<Value> {
        Ok(match field_type {
            FieldType::Int32 => Value::Int32(raw as i32),
            FieldType::Int64 => Value::Int64(raw as i64),
            FieldType::UInt32 => Value::UInt32(raw as u32),
            FieldType::UInt64 => Value::UInt64(raw),
            FieldType::SInt32 => Value::Int32(zigzag_decode32(raw)),
            FieldType::SInt64 => Value::Int64(zigzag_decode64(raw)),
            FieldType::Bool => Value::Bool(raw != 0),
            FieldType::Enum => Value::Enum(raw as i32),
            _ => {
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    format!("{:?} is not a varint type", field_type),
                ))
            }
        })
    }

    pub(crate) fn from_fixed32(field_type: FieldType, bits: u32) -> Result<Value> {
        Ok(match field_type {
            FieldType::Fixed32 => Value::UInt32(bits),
            FieldType::SFixed32 => Value::Int32(bits as i32),
            FieldType::Float => Value::Float(f32::from_bits(bits)),
            _ => {
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    format!("{:?} is not a 32-bit type", field_type),
                ))
            }
        })
    }

    pub(crate) fn from_fixed64(field_type: FieldType, bits: u64) -> Result<Value> {
        Ok(match field_type {
            FieldType::Fixed64 => Value::UInt64(bits),
            FieldType::SFixed64 => Value::Int64(bits as i64),
            FieldType::Double => Value::Double(f64::from_bits(bits)),
            _ => {
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    format!("{:?} is not a 64-bit type", field_type),
                ))
            }
        })
    }
}

/// A copyable summary of the field a [`Source`] is positioned on.
///
/// Name and target-type details stay in the [`FieldDescriptor`]; consumers
/// that need them hold the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub number: u32,
    pub field_type: FieldType,
    pub label: Label,
    pub packed: bool,
}

impl From<&FieldDescriptor> for FieldInfo {
    fn from(field: &FieldDescriptor) -> FieldInfo {
        FieldInfo {
            number: field.number(),
            field_type: field.field_type(),
            label: field.label(),
            packed: field.is_packed(),
        }
    }
}

/// Pulls typed values out of a wire stream.
///
/// `next_field` must be called before each value; it yields `None` at the
/// end of the current submessage (or, at the top level, at end of stream).
/// `start_message` is legal only immediately after a `next_field` that
/// yielded a message or group field. `end_message` may be called early; the
/// implementation then skips the remainder of the submessage.
pub trait Source {
    fn next_field(&mut self) -> Result<Option<FieldInfo>>;

    /// The scalar value following the most recent `next_field`.
    fn value(&mut self) -> Result<Value>;

    /// The bytes of the string, bytes, or pre-serialized submessage field
    /// following the most recent `next_field`. Aliases the input buffer
    /// when the byte source supports it.
    fn string(&mut self) -> Result<ByteString>;

    /// Discards the value following the most recent `next_field`.
    fn skip(&mut self) -> Result<()>;

    fn start_message(&mut self) -> Result<()>;

    fn end_message(&mut self) -> Result<()>;

    /// C `feof` semantics: true only after a read already failed at end of
    /// stream, never predictively. Submessage-scope eof is cleared by
    /// `end_message`.
    fn eof(&self) -> bool;
}

/// Accepts typed values; the mirror of [`Source`].
pub trait Sink {
    /// Declares the field the next value(s) belong to.
    fn begin_field(&mut self, field: FieldInfo) -> Result<()>;

    fn put_value(&mut self, value: Value) -> Result<()>;

    /// Emits a length-delimited payload: string and bytes contents, or a
    /// pre-serialized submessage blob in place of explicit framing.
    fn put_string(&mut self, bytes: &[u8]) -> Result<()>;

    fn start_message(&mut self) -> Result<()>;

    fn end_message(&mut self) -> Result<()>;
}

/// Pulls raw bytes.
pub trait ByteSource {
    /// Recycles `buf` and fills it with at least `min_len` bytes unless the
    /// stream ends first. Returns the number of bytes made available; 0
    /// means end of stream.
    fn pull(&mut self, buf: &mut ByteString, min_len: usize) -> Result<usize>;

    /// Appends further bytes to `buf` in place, at least `len` unless the
    /// stream ends first. Returns the number appended; 0 means end of
    /// stream.
    fn extend(&mut self, buf: &mut ByteString, len: usize) -> Result<usize>;

    fn eof(&self) -> bool;
}

/// Accepts raw bytes.
pub trait ByteSink {
    /// Consumes a prefix of `bytes`, returning how many were taken. A short
    /// count is not an error; the caller retries with the remainder.
    fn put(&mut self, bytes: &[u8]) -> Result<usize>;
}

/// A [`ByteSource`] over an in-memory buffer.
///
/// The single backing `Bytes` region is handed out whole on the first pull,
/// so decoder strings alias the input with no copying.
#[derive(Debug)]
pub struct BufferSource {
    data: Option<Bytes>,
    eof: bool,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>) -> BufferSource {
        BufferSource {
            data: Some(data.into()),
            eof: false,
        }
    }
}

impl ByteSource for BufferSource {
    fn pull(&mut self, buf: &mut ByteString, _min_len: usize) -> Result<usize> {
        buf.recycle();
        match self.data.take() {
            Some(data) if !data.is_empty() => {
                let len = data.len();
                *buf = ByteString::from(data);
                Ok(len)
            }
            _ => {
                self.eof = true;
                Ok(0)
            }
        }
    }

    fn extend(&mut self, buf: &mut ByteString, _len: usize) -> Result<usize> {
        match self.data.take() {
            Some(data) if !data.is_empty() => {
                buf.append(&data)?;
                Ok(data.len())
            }
            _ => {
                self.eof = true;
                Ok(0)
            }
        }
    }

    fn eof(&self) -> bool {
        self.eof
    }
}

/// A [`ByteSink`] over a growable in-memory buffer.
#[derive(Debug, Default)]
pub struct BufferSink {
    buf: BytesMut,
}

impl BufferSink {
    pub fn new() -> BufferSink {
        BufferSink::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl ByteSink for BufferSink {
    fn put(&mut self, bytes: &[u8]) -> Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

/// Pumps `src` into `sink` until end of stream or error, propagating
/// submessage nesting.
pub fn stream_data(src: &mut dyn Source, sink: &mut dyn Sink) -> Result<()> {
    let mut depth = 0usize;
    loop {
        match src.next_field()? {
            Some(field) => {
                sink.begin_field(field)?;
                match field.field_type {
                    FieldType::Message | FieldType::Group => {
                        src.start_message()?;
                        sink.start_message()?;
                        depth += 1;
                    }
                    FieldType::String | FieldType::Bytes => {
                        let bytes = src.string()?;
                        sink.put_string(&bytes)?;
                    }
                    _ => sink.put_value(src.value()?)?,
                }
            }
            None if depth > 0 => {
                src.end_message()?;
                sink.end_message()?;
                depth -= 1;
            }
            None => return Ok(()),
        }
    }
}
