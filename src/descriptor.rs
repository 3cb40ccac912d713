//! Typed descriptors for messages, fields, and enums, and the pool that
//! owns them.
//!
//! A [`DescriptorPool`] is an arena: messages and enums live in flat
//! vectors and refer to one another by index, so cyclic schemas (a message
//! with a field of its own type) need no special casing. A pool is mutable
//! while descriptor sets are being loaded and read-only once sealed; share
//! a sealed pool across threads behind an `Arc`.

use std::collections::HashMap;

use crate::bytestr::ByteString;
use crate::encoding::WireType;
use crate::error::{Error, ErrorCode, Result};

/// The declared protobuf field types, numbered as in `descriptor.proto`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    UInt64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    UInt32 = 13,
    Enum = 14,
    SFixed32 = 15,
    SFixed64 = 16,
    SInt32 = 17,
    SInt64 = 18,
}

impl FieldType {
    pub(crate) fn from_descriptor(value: u64) -> Result<FieldType> {
        Ok(match value {
            1 => FieldType::Double,
            2 => FieldType::Float,
            3 => FieldType::Int64,
            4 => FieldType::UInt64,
            5 => FieldType::Int32,
            6 => FieldType::Fixed64,
            7 => FieldType::Fixed32,
            8 => FieldType::Bool,
            9 => FieldType::String,
            10 => FieldType::Group,
            11 => FieldType::Message,
            12 => FieldType::Bytes,
            13 => FieldType::UInt32,
            14 => FieldType::Enum,
            15 => FieldType::SFixed32,
            16 => FieldType::SFixed64,
            17 => FieldType::SInt32,
            18 => FieldType::SInt64,
            _ => {
                return Err(Error::new(
                    ErrorCode::MalformedDescriptor,
                    format!("unknown field type: {}", value),
                ))
            }
        })
    }

    /// The wire type this declared type is encoded with (ignoring packing).
    pub fn wire_type(self) -> WireType {
        match self {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt32
            | FieldType::UInt64
            | FieldType::SInt32
            | FieldType::SInt64
            | FieldType::Bool
            | FieldType::Enum => WireType::Varint,
            FieldType::Fixed64 | FieldType::SFixed64 | FieldType::Double => WireType::SixtyFourBit,
            FieldType::Fixed32 | FieldType::SFixed32 | FieldType::Float => WireType::ThirtyTwoBit,
            FieldType::String | FieldType::Bytes | FieldType::Message => WireType::LengthDelimited,
            FieldType::Group => WireType::StartGroup,
        }
    }

    /// Whether a repeated field of this type may use the packed encoding.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }

    /// In-memory footprint of one value, for message layout purposes.
    /// Reference-holding types occupy a pointer-sized slot.
    fn layout_size(self) -> u32 {
        match self {
            FieldType::Bool => 1,
            FieldType::Int32
            | FieldType::UInt32
            | FieldType::SInt32
            | FieldType::Fixed32
            | FieldType::SFixed32
            | FieldType::Float
            | FieldType::Enum => 4,
            _ => 8,
        }
    }
}

/// Field cardinality, as declared in the schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

impl Label {
    pub(crate) fn from_descriptor(value: u64) -> Result<Label> {
        Ok(match value {
            1 => Label::Optional,
            2 => Label::Required,
            3 => Label::Repeated,
            _ => {
                return Err(Error::new(
                    ErrorCode::MalformedDescriptor,
                    format!("unknown field label: {}", value),
                ))
            }
        })
    }
}

/// Index of a message descriptor within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageIndex(pub(crate) u32);

/// Index of an enum descriptor within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EnumIndex(pub(crate) u32);

/// A field's message or enum target. Symbolic until the pool is sealed,
/// a direct index afterwards.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeRef {
    Unresolved(String),
    Message(MessageIndex),
    Enum(EnumIndex),
}

/// Default value for a primitive field, parsed at seal time.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    Unset,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Bytes(ByteString),
    Enum(i32),
}

/// An immutable description of one message field.
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) number: u32,
    pub(crate) label: Label,
    pub(crate) field_type: FieldType,
    pub(crate) packed: bool,
    pub(crate) type_ref: Option<TypeRef>,
    pub(crate) default: DefaultValue,
    pub(crate) offset: u32,
    pub(crate) bit_index: u32,
}

/// Sentinel for fields that carry no presence bit (repeated fields).
pub const NO_PRESENCE_BIT: u32 = u32::MAX;

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Whether a repeated field was declared with the packed option.
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// The resolved message target of a message or group field.
    pub fn message_type(&self) -> Option<MessageIndex> {
        match self.type_ref {
            Some(TypeRef::Message(index)) => Some(index),
            _ => None,
        }
    }

    /// The resolved enum target of an enum field.
    pub fn enum_type(&self) -> Option<EnumIndex> {
        match self.type_ref {
            Some(TypeRef::Enum(index)) => Some(index),
            _ => None,
        }
    }

    pub fn default_value(&self) -> &DefaultValue {
        &self.default
    }

    /// Byte offset of this field's slot within the message layout.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Index of this field's presence bit within the set-bitmap, or
    /// [`NO_PRESENCE_BIT`] for repeated fields.
    pub fn bit_index(&self) -> u32 {
        self.bit_index
    }
}

/// An immutable description of one message type.
#[derive(Clone, Debug)]
pub struct MessageDescriptor {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldDescriptor>,
    // Sorted (number, field index) pairs for wire-time lookup.
    pub(crate) by_number: Vec<(u32, u32)>,
    pub(crate) size: u32,
    pub(crate) presence_bits: u32,
}

impl MessageDescriptor {
    /// The fully-qualified dotted name, without a leading dot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// The wire-time lookup: field number to field descriptor.
    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.by_number
            .binary_search_by_key(&number, |&(n, _)| n)
            .ok()
            .map(|slot| &self.fields[self.by_number[slot].1 as usize])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Total instance size in bytes: field slots at natural alignment,
    /// the set-bitmap at the tail, rounded up to pointer alignment.
    pub fn instance_size(&self) -> u32 {
        self.size
    }

    /// Number of presence bits in the set-bitmap.
    pub fn presence_bits(&self) -> u32 {
        self.presence_bits
    }
}

/// An immutable description of one enum type.
#[derive(Clone, Debug)]
pub struct EnumDescriptor {
    pub(crate) name: String,
    pub(crate) by_name: HashMap<String, i32>,
    pub(crate) by_value: HashMap<i32, String>,
    pub(crate) default: i32,
}

impl EnumDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn value_name(&self, value: i32) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    /// The first declared value, per proto2 semantics.
    pub fn default_value(&self) -> i32 {
        self.default
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Symbol {
    Message(MessageIndex),
    Enum(EnumIndex),
}

/// Owns every descriptor loaded from one or more descriptor sets and
/// resolves fully-qualified dotted names.
#[derive(Clone, Debug, Default)]
pub struct DescriptorPool {
    pub(crate) messages: Vec<MessageDescriptor>,
    pub(crate) enums: Vec<EnumDescriptor>,
    pub(crate) symbols: HashMap<String, Symbol>,
}

impl DescriptorPool {
    pub fn new() -> DescriptorPool {
        DescriptorPool::default()
    }

    pub fn message(&self, index: MessageIndex) -> &MessageDescriptor {
        &self.messages[index.0 as usize]
    }

    pub fn enumeration(&self, index: EnumIndex) -> &EnumDescriptor {
        &self.enums[index.0 as usize]
    }

    /// Looks up a message by fully-qualified dotted name. A leading dot is
    /// accepted and ignored.
    pub fn message_by_name(&self, name: &str) -> Option<MessageIndex> {
        match self.symbols.get(name.strip_prefix('.').unwrap_or(name)) {
            Some(&Symbol::Message(index)) => Some(index),
            _ => None,
        }
    }

    /// Looks up an enum by fully-qualified dotted name.
    pub fn enum_by_name(&self, name: &str) -> Option<EnumIndex> {
        match self.symbols.get(name.strip_prefix('.').unwrap_or(name)) {
            Some(&Symbol::Enum(index)) => Some(index),
            _ => None,
        }
    }

    pub(crate) fn insert_symbol(&mut self, name: String, symbol: Symbol) -> Result<()> {
        if self.symbols.contains_key(&name) {
            return Err(Error::new(
                ErrorCode::DuplicateSymbol,
                format!("symbol defined twice: {}", name),
            ));
        }
        self.symbols.insert(name, symbol);
        Ok(())
    }

    /// Computes a message's wire lookup table and instance layout. Called
    /// once per message during the seal pass.
    pub(crate) fn finish_message(message: &mut MessageDescriptor) -> Result<()> {
        let mut by_number: Vec<(u32, u32)> = message
            .fields
            .iter()
            .enumerate()
            .map(|(slot, field)| (field.number, slot as u32))
            .collect();
        by_number.sort_unstable();
        for pair in by_number.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(Error::new(
                    ErrorCode::MalformedDescriptor,
                    format!(
                        "field number {} defined twice in {}",
                        pair[0].0, message.name
                    ),
                ));
            }
        }
        message.by_number = by_number;

        const PTR_ALIGN: u32 = std::mem::size_of::<usize>() as u32;
        let mut offset = 0u32;
        let mut bits = 0u32;
        for field in &mut message.fields {
            let size = if field.label == Label::Repeated {
                // A repeated slot holds a vector reference, whatever the
                // element type.
                8
            } else {
                field.field_type.layout_size()
            };
            offset = round_up(offset, size.min(PTR_ALIGN));
            field.offset = offset;
            offset += size;
            if field.label == Label::Repeated {
                field.bit_index = NO_PRESENCE_BIT;
            } else {
                field.bit_index = bits;
                bits += 1;
            }
        }
        offset += (bits + 7) / 8;
        message.size = round_up(offset.max(1), PTR_ALIGN);
        message.presence_bits = bits;
        Ok(())
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align * align
}
