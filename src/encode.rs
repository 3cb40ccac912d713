//! The wire encoder: a typed [`Sink`] that serializes into a [`ByteSink`].
//!
//! Submessage framing is explicit. Since a length prefix cannot be written
//! before its payload is known, each nested message buffers into its own
//! frame and is prefixed when `end_message` closes it; groups need no
//! buffering and emit START_GROUP/END_GROUP tags inline. Values for a
//! repeated field declared packed accumulate into a single run that is
//! flushed as one length-delimited field.

use bytes::BufMut;

use crate::descriptor::{FieldType, Label};
use crate::encoding::{encode_key, encode_varint, zigzag_encode32, zigzag_encode64, WireType};
use crate::error::{Error, ErrorCode, Result};
use crate::stream::{ByteSink, FieldInfo, Sink, Value};

enum Frame {
    Message { number: u32, buf: Vec<u8> },
    Group { number: u32 },
}

pub struct Encoder<S> {
    sink: S,
    root: Vec<u8>,
    frames: Vec<Frame>,
    field: Option<FieldInfo>,
    packed: Option<(FieldInfo, Vec<u8>)>,
}

impl<S: ByteSink> Encoder<S> {
    pub fn new(sink: S) -> Encoder<S> {
        Encoder {
            sink,
            root: Vec::new(),
            frames: Vec::new(),
            field: None,
            packed: None,
        }
    }

    /// Flushes the encoded message to the byte sink and returns it.
    pub fn finish(mut self) -> Result<S> {
        self.flush_packed();
        if !self.frames.is_empty() {
            return Err(Error::new(
                ErrorCode::PrematureEof,
                "finish with an open submessage or group",
            ));
        }
        let mut written = 0;
        while written < self.root.len() {
            let taken = self.sink.put(&self.root[written..])?;
            if taken == 0 {
                return Err(Error::new(
                    ErrorCode::OutOfMemory,
                    "byte sink refused further output",
                ));
            }
            written += taken;
        }
        Ok(self.sink)
    }

    /// The buffer wire data is currently written into: the innermost
    /// buffered message, or the root. Group frames write inline into their
    /// container.
    fn cur(&mut self) -> &mut Vec<u8> {
        for frame in self.frames.iter_mut().rev() {
            if let Frame::Message { buf, .. } = frame {
                return buf;
            }
        }
        &mut self.root
    }

    fn flush_packed(&mut self) {
        if let Some((info, run)) = self.packed.take() {
            let out = self.cur();
            encode_key(info.number, WireType::LengthDelimited, out);
            encode_varint(run.len() as u64, out);
            out.extend_from_slice(&run);
        }
    }

    fn pending_field(&self) -> Result<FieldInfo> {
        self.field.ok_or_else(|| {
            Error::new(
                ErrorCode::BadWireType,
                "no field declared; call begin_field first",
            )
        })
    }
}

impl<S: ByteSink> Sink for Encoder<S> {
    fn begin_field(&mut self, field: FieldInfo) -> Result<()> {
        if let Some((run_info, _)) = &self.packed {
            if run_info.number != field.number {
                self.flush_packed();
            }
        }
        self.field = Some(field);
        Ok(())
    }

    fn put_value(&mut self, value: Value) -> Result<()> {
        let info = self.pending_field()?;
        if info.label == Label::Repeated && info.packed && info.field_type.is_packable() {
            let run = &mut self.packed.get_or_insert_with(|| (info, Vec::new())).1;
            return encode_scalar(info.field_type, value, run);
        }
        self.flush_packed();
        let out = self.cur();
        encode_key(info.number, info.field_type.wire_type(), out);
        encode_scalar(info.field_type, value, out)
    }

    fn put_string(&mut self, bytes: &[u8]) -> Result<()> {
        let info = self.pending_field()?;
        match info.field_type {
            FieldType::String | FieldType::Bytes | FieldType::Message => {}
            other => {
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    format!("{:?} cannot be emitted as a length-delimited blob", other),
                ));
            }
        }
        self.flush_packed();
        let out = self.cur();
        encode_key(info.number, WireType::LengthDelimited, out);
        encode_varint(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn start_message(&mut self) -> Result<()> {
        let info = self.pending_field()?;
        self.flush_packed();
        self.field = None;
        match info.field_type {
            FieldType::Message => {
                self.frames.push(Frame::Message {
                    number: info.number,
                    buf: Vec::new(),
                });
                Ok(())
            }
            FieldType::Group => {
                let number = info.number;
                encode_key(number, WireType::StartGroup, self.cur());
                self.frames.push(Frame::Group { number });
                Ok(())
            }
            other => Err(Error::new(
                ErrorCode::BadWireType,
                format!("{:?} is not a submessage type", other),
            )),
        }
    }

    fn end_message(&mut self) -> Result<()> {
        self.flush_packed();
        match self.frames.pop() {
            Some(Frame::Message { number, buf }) => {
                let out = self.cur();
                encode_key(number, WireType::LengthDelimited, out);
                encode_varint(buf.len() as u64, out);
                out.extend_from_slice(&buf);
                Ok(())
            }
            Some(Frame::Group { number }) => {
                encode_key(number, WireType::EndGroup, self.cur());
                Ok(())
            }
            None => Err(Error::new(
                ErrorCode::BadWireType,
                "end_message at the top level",
            )),
        }
    }
}

/// Writes one value in its base encoding (no key).
fn encode_scalar(field_type: FieldType, value: Value, out: &mut Vec<u8>) -> Result<()> {
    match (field_type, value) {
        (FieldType::Int32, Value::Int32(v)) => encode_varint(v as u64, out),
        (FieldType::Int64, Value::Int64(v)) => encode_varint(v as u64, out),
        (FieldType::UInt32, Value::UInt32(v)) => encode_varint(u64::from(v), out),
        (FieldType::UInt64, Value::UInt64(v)) => encode_varint(v, out),
        (FieldType::SInt32, Value::Int32(v)) => encode_varint(zigzag_encode32(v), out),
        (FieldType::SInt64, Value::Int64(v)) => encode_varint(zigzag_encode64(v), out),
        (FieldType::Bool, Value::Bool(v)) => encode_varint(u64::from(v), out),
        (FieldType::Enum, Value::Enum(v)) => encode_varint(v as u64, out),
        (FieldType::Fixed32, Value::UInt32(v)) => out.put_u32_le(v),
        (FieldType::SFixed32, Value::Int32(v)) => out.put_i32_le(v),
        (FieldType::Float, Value::Float(v)) => out.put_f32_le(v),
        (FieldType::Fixed64, Value::UInt64(v)) => out.put_u64_le(v),
        (FieldType::SFixed64, Value::Int64(v)) => out.put_i64_le(v),
        (FieldType::Double, Value::Double(v)) => out.put_f64_le(v),
        (declared, got) => {
            return Err(Error::new(
                ErrorCode::BadWireType,
                format!("{:?} value for field declared {:?}", got, declared),
            ));
        }
    }
    Ok(())
}
