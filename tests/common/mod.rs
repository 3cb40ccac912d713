//! Shared helpers: hand-assembled descriptor sets and event recording.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use pbstream::encoding::{encode_key, encode_varint, WireType};
use pbstream::{
    ByteString, DescriptorPool, Events, FieldInfo, FieldType, MessageIndex, Result, Source, Value,
};

pub fn varint_field(out: &mut Vec<u8>, number: u32, value: u64) {
    encode_key(number, WireType::Varint, out);
    encode_varint(value, out);
}

pub fn bytes_field(out: &mut Vec<u8>, number: u32, payload: &[u8]) {
    encode_key(number, WireType::LengthDelimited, out);
    encode_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

pub fn str_field(out: &mut Vec<u8>, number: u32, text: &str) {
    bytes_field(out, number, text.as_bytes());
}

// -- FileDescriptorSet assembly, via the canonical field numbers ------------

pub fn field_descriptor(
    name: &str,
    number: u64,
    label: u64,
    field_type: u64,
    type_name: Option<&str>,
) -> Vec<u8> {
    let mut out = Vec::new();
    str_field(&mut out, 1, name);
    varint_field(&mut out, 3, number);
    varint_field(&mut out, 4, label);
    varint_field(&mut out, 5, field_type);
    if let Some(type_name) = type_name {
        str_field(&mut out, 6, type_name);
    }
    out
}

pub fn with_default(mut field: Vec<u8>, default: &str) -> Vec<u8> {
    str_field(&mut field, 7, default);
    field
}

pub fn with_packed_option(mut field: Vec<u8>) -> Vec<u8> {
    let mut options = Vec::new();
    varint_field(&mut options, 2, 1);
    bytes_field(&mut field, 8, &options);
    field
}

pub fn message_descriptor(name: &str, fields: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    str_field(&mut out, 1, name);
    for field in fields {
        bytes_field(&mut out, 2, field);
    }
    out
}

pub fn with_nested(mut message: Vec<u8>, nested: &[Vec<u8>]) -> Vec<u8> {
    for child in nested {
        bytes_field(&mut message, 3, child);
    }
    message
}

pub fn enum_descriptor(name: &str, values: &[(&str, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    str_field(&mut out, 1, name);
    for (value_name, number) in values {
        let mut value = Vec::new();
        str_field(&mut value, 1, value_name);
        varint_field(&mut value, 2, *number);
        bytes_field(&mut out, 2, &value);
    }
    out
}

pub fn file_descriptor(package: &str, messages: &[Vec<u8>], enums: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    str_field(&mut out, 1, "test.proto");
    if !package.is_empty() {
        str_field(&mut out, 2, package);
    }
    for message in messages {
        bytes_field(&mut out, 4, message);
    }
    for decl in enums {
        bytes_field(&mut out, 5, decl);
    }
    out
}

pub fn descriptor_set(files: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for file in files {
        bytes_field(&mut out, 1, file);
    }
    out
}

/// Loads a pool holding the given messages/enums under package `test`.
pub fn test_pool(messages: &[Vec<u8>], enums: &[Vec<u8>]) -> Arc<DescriptorPool> {
    let set = descriptor_set(&[file_descriptor("test", messages, enums)]);
    Arc::new(DescriptorPool::load(set).expect("test schema loads"))
}

pub fn root(pool: &DescriptorPool, name: &str) -> MessageIndex {
    pool.message_by_name(name).expect("root message registered")
}

// -- Event recording, shared by the push and pull front ends ----------------

#[derive(Clone, Debug, PartialEq)]
pub enum Ev {
    Tag(u32, WireType),
    Val(Value),
    Str(Vec<u8>),
    Start,
    End,
}

/// An [`Events`] impl that records everything, deciding declared types
/// from a number -> type table the way a schema lookup would.
pub struct Recorder {
    pub types: HashMap<u32, FieldType>,
    pub events: Vec<Ev>,
}

impl Recorder {
    pub fn new(types: &[(u32, FieldType)]) -> Recorder {
        Recorder {
            types: types.iter().copied().collect(),
            events: Vec::new(),
        }
    }
}

impl Events for Recorder {
    type Frame = ();

    fn tag(&mut self, _frame: &mut (), number: u32, wire_type: WireType) -> Result<Option<FieldType>> {
        let declared = self.types.get(&number).copied();
        if declared.is_some() {
            self.events.push(Ev::Tag(number, wire_type));
        }
        Ok(declared)
    }

    fn value(&mut self, _frame: &mut (), value: Value) -> Result<()> {
        self.events.push(Ev::Val(value));
        Ok(())
    }

    fn string(&mut self, _frame: &mut (), bytes: ByteString) -> Result<()> {
        self.events.push(Ev::Str(bytes.as_bytes().to_vec()));
        Ok(())
    }

    fn submsg_start(&mut self, _frame: &mut ()) -> Result<()> {
        self.events.push(Ev::Start);
        Ok(())
    }

    fn submsg_end(&mut self, _frame: &mut ()) -> Result<()> {
        self.events.push(Ev::End);
        Ok(())
    }
}

/// Drains a [`Source`] to completion, recording the same event stream the
/// push parser would deliver.
pub fn drain(src: &mut dyn Source) -> Result<Vec<Ev>> {
    let mut events = Vec::new();
    let mut depth = 0usize;
    loop {
        match src.next_field()? {
            Some(FieldInfo {
                number,
                field_type,
                ..
            }) => {
                events.push(Ev::Tag(number, field_type.wire_type()));
                match field_type {
                    FieldType::Message | FieldType::Group => {
                        events.push(Ev::Start);
                        src.start_message()?;
                        depth += 1;
                    }
                    FieldType::String | FieldType::Bytes => {
                        events.push(Ev::Str(src.string()?.as_bytes().to_vec()));
                    }
                    _ => events.push(Ev::Val(src.value()?)),
                }
            }
            None if depth > 0 => {
                src.end_message()?;
                events.push(Ev::End);
                depth -= 1;
            }
            None => return Ok(events),
        }
    }
}
