//! A streaming, reflection-driven Protocol Buffers engine.
//!
//! No code generation: a [`DescriptorPool`] loaded from a serialized
//! `FileDescriptorSet` binds field numbers to types at parse time, and the
//! wire format flows through one of two front ends sharing the same codec
//! core:
//!
//! * [`Decoder`], a pull [`Source`]: the consumer asks for the next field
//!   and fetches its value, entering and leaving submessages explicitly.
//! * [`Parser`], a resumable push parser: the consumer implements
//!   [`Events`] and is driven one callback per wire element, feeding input
//!   buffers as they arrive.
//!
//! [`Encoder`] is the matching [`Sink`], and [`stream_data`] pumps any
//! `Source` into any `Sink`. Byte-level I/O goes through the
//! [`ByteSource`]/[`ByteSink`] contracts; [`ByteString`] carries decoded
//! strings, aliasing the input buffer whenever the source allows it.

mod bootstrap;
mod bytestr;
mod decode;
mod descriptor;
mod encode;
mod error;
mod loader;
mod parse;
mod stream;

pub mod encoding;

pub use crate::bytestr::ByteString;
pub use crate::decode::Decoder;
pub use crate::descriptor::{
    DefaultValue, DescriptorPool, EnumDescriptor, EnumIndex, FieldDescriptor, FieldType, Label,
    MessageDescriptor, MessageIndex, TypeRef, NO_PRESENCE_BIT,
};
pub use crate::encode::Encoder;
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::parse::{Events, Parser};
pub use crate::stream::{
    stream_data, BufferSink, BufferSource, ByteSink, ByteSource, FieldInfo, Sink, Source, Value,
};

/// Default maximum submessage/group nesting depth.
pub const DEFAULT_NESTING_LIMIT: usize = 64;
