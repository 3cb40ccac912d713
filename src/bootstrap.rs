//! The built-in schema for `descriptor.proto`.
//!
//! The loader parses serialized `FileDescriptorSet`s, which are themselves
//! protobuf messages; this module supplies the descriptors for the subset
//! of `descriptor.proto` the loader consumes, so the engine can parse its
//! own schema format with no external input. Field numbers match the
//! canonical `google/protobuf/descriptor.proto`.

use crate::descriptor::{
    DefaultValue, DescriptorPool, EnumDescriptor, EnumIndex, FieldDescriptor, FieldType, Label,
    MessageDescriptor, MessageIndex, Symbol, TypeRef,
};
use crate::error::Result;

pub(crate) const FILE_DESCRIPTOR_SET: MessageIndex = MessageIndex(0);
pub(crate) const FILE_DESCRIPTOR_PROTO: MessageIndex = MessageIndex(1);
pub(crate) const DESCRIPTOR_PROTO: MessageIndex = MessageIndex(2);
pub(crate) const FIELD_DESCRIPTOR_PROTO: MessageIndex = MessageIndex(3);
pub(crate) const ENUM_DESCRIPTOR_PROTO: MessageIndex = MessageIndex(4);
pub(crate) const ENUM_VALUE_DESCRIPTOR_PROTO: MessageIndex = MessageIndex(5);
pub(crate) const FIELD_OPTIONS: MessageIndex = MessageIndex(6);

const LABEL_ENUM: EnumIndex = EnumIndex(0);
const TYPE_ENUM: EnumIndex = EnumIndex(1);

fn field(
    name: &str,
    number: u32,
    label: Label,
    field_type: FieldType,
    type_ref: Option<TypeRef>,
) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_owned(),
        number,
        label,
        field_type,
        packed: false,
        type_ref,
        default: DefaultValue::Unset,
        offset: 0,
        bit_index: 0,
    }
}

fn message_ref(index: MessageIndex) -> Option<TypeRef> {
    Some(TypeRef::Message(index))
}

fn build() -> Result<DescriptorPool> {
    use FieldType::{Bool, Enum, Int32, String as Str};
    use Label::{Optional, Repeated};

    let mut pool = DescriptorPool::new();

    let messages = [
        MessageDescriptor {
            name: "google.protobuf.FileDescriptorSet".to_owned(),
            fields: vec![field(
                "file",
                1,
                Repeated,
                FieldType::Message,
                message_ref(FILE_DESCRIPTOR_PROTO),
            )],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
        MessageDescriptor {
            name: "google.protobuf.FileDescriptorProto".to_owned(),
            fields: vec![
                field("name", 1, Optional, Str, None),
                field("package", 2, Optional, Str, None),
                field(
                    "message_type",
                    4,
                    Repeated,
                    FieldType::Message,
                    message_ref(DESCRIPTOR_PROTO),
                ),
                field(
                    "enum_type",
                    5,
                    Repeated,
                    FieldType::Message,
                    message_ref(ENUM_DESCRIPTOR_PROTO),
                ),
            ],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
        MessageDescriptor {
            name: "google.protobuf.DescriptorProto".to_owned(),
            fields: vec![
                field("name", 1, Optional, Str, None),
                field(
                    "field",
                    2,
                    Repeated,
                    FieldType::Message,
                    message_ref(FIELD_DESCRIPTOR_PROTO),
                ),
                field(
                    "nested_type",
                    3,
                    Repeated,
                    FieldType::Message,
                    message_ref(DESCRIPTOR_PROTO),
                ),
                field(
                    "enum_type",
                    4,
                    Repeated,
                    FieldType::Message,
                    message_ref(ENUM_DESCRIPTOR_PROTO),
                ),
            ],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
        MessageDescriptor {
            name: "google.protobuf.FieldDescriptorProto".to_owned(),
            fields: vec![
                field("name", 1, Optional, Str, None),
                field("number", 3, Optional, Int32, None),
                field("label", 4, Optional, Enum, Some(TypeRef::Enum(LABEL_ENUM))),
                field("type", 5, Optional, Enum, Some(TypeRef::Enum(TYPE_ENUM))),
                field("type_name", 6, Optional, Str, None),
                field("default_value", 7, Optional, Str, None),
                field(
                    "options",
                    8,
                    Optional,
                    FieldType::Message,
                    message_ref(FIELD_OPTIONS),
                ),
            ],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
        MessageDescriptor {
            name: "google.protobuf.EnumDescriptorProto".to_owned(),
            fields: vec![
                field("name", 1, Optional, Str, None),
                field(
                    "value",
                    2,
                    Repeated,
                    FieldType::Message,
                    message_ref(ENUM_VALUE_DESCRIPTOR_PROTO),
                ),
            ],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
        MessageDescriptor {
            name: "google.protobuf.EnumValueDescriptorProto".to_owned(),
            fields: vec![
                field("name", 1, Optional, Str, None),
                field("number", 2, Optional, Int32, None),
            ],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
        MessageDescriptor {
            name: "google.protobuf.FieldOptions".to_owned(),
            fields: vec![field("packed", 2, Optional, Bool, None)],
            by_number: Vec::new(),
            size: 0,
            presence_bits: 0,
        },
    ];

    for (slot, mut message) in messages.into_iter().enumerate() {
        DescriptorPool::finish_message(&mut message)?;
        pool.insert_symbol(message.name.clone(), Symbol::Message(MessageIndex(slot as u32)))?;
        pool.messages.push(message);
    }

    let label_values = [("LABEL_OPTIONAL", 1), ("LABEL_REQUIRED", 2), ("LABEL_REPEATED", 3)];
    let type_values = [
        ("TYPE_DOUBLE", 1),
        ("TYPE_FLOAT", 2),
        ("TYPE_INT64", 3),
        ("TYPE_UINT64", 4),
        ("TYPE_INT32", 5),
        ("TYPE_FIXED64", 6),
        ("TYPE_FIXED32", 7),
        ("TYPE_BOOL", 8),
        ("TYPE_STRING", 9),
        ("TYPE_GROUP", 10),
        ("TYPE_MESSAGE", 11),
        ("TYPE_BYTES", 12),
        ("TYPE_UINT32", 13),
        ("TYPE_ENUM", 14),
        ("TYPE_SFIXED32", 15),
        ("TYPE_SFIXED64", 16),
        ("TYPE_SINT32", 17),
        ("TYPE_SINT64", 18),
    ];
    for (slot, (name, values)) in [
        ("google.protobuf.FieldDescriptorProto.Label", &label_values[..]),
        ("google.protobuf.FieldDescriptorProto.Type", &type_values[..]),
    ]
    .into_iter()
    .enumerate()
    {
        let descriptor = EnumDescriptor {
            name: name.to_owned(),
            by_name: values.iter().map(|&(n, v)| (n.to_owned(), v)).collect(),
            by_value: values.iter().map(|&(n, v)| (v, n.to_owned())).collect(),
            default: values[0].1,
        };
        pool.insert_symbol(name.to_owned(), Symbol::Enum(EnumIndex(slot as u32)))?;
        pool.enums.push(descriptor);
    }

    Ok(pool)
}

/// The sealed bootstrap pool.
pub(crate) fn pool() -> DescriptorPool {
    build().expect("bootstrap schema is well-formed")
}
