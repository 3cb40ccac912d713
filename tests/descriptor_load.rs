//! End-to-end descriptor-set loading: the two-pass protocol, symbol
//! resolution, layouts, defaults, and every loader failure mode.

mod common;

use common::{
    descriptor_set, enum_descriptor, field_descriptor, file_descriptor, message_descriptor,
    with_default, with_nested, with_packed_option,
};
use pbstream::{DefaultValue, DescriptorPool, ErrorCode, FieldType, Label, NO_PRESENCE_BIT};

fn person_set() -> Vec<u8> {
    let contact = message_descriptor(
        "Contact",
        &[field_descriptor("address", 1, 1, 9, None)],
    );
    let person = with_nested(
        message_descriptor(
            "Person",
            &[
                field_descriptor("name", 1, 1, 9, None),
                with_default(field_descriptor("id", 2, 2, 5, None), "-1"),
                field_descriptor("email", 3, 1, 9, None),
                // Relative reference: resolution walks outward from
                // pkg.Person to pkg.Color.
                with_default(field_descriptor("color", 4, 1, 14, Some("Color")), "RED"),
                field_descriptor("contact", 5, 1, 11, Some(".pkg.Person.Contact")),
                with_packed_option(field_descriptor("scores", 6, 3, 5, None)),
            ],
        ),
        &[contact],
    );
    let color = enum_descriptor("Color", &[("RED", 1), ("GREEN", 2), ("BLUE", 3)]);
    descriptor_set(&[file_descriptor("pkg", &[person], &[color])])
}

#[test]
fn load_resolves_and_seals() {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = DescriptorPool::load(person_set()).unwrap();

    let person = pool
        .message(pool.message_by_name("pkg.Person").unwrap());
    assert_eq!(person.name(), "pkg.Person");
    assert_eq!(person.fields().len(), 6);

    let id = person.field_by_number(2).unwrap();
    assert_eq!(id.name(), "id");
    assert_eq!(id.label(), Label::Required);
    assert_eq!(id.field_type(), FieldType::Int32);
    assert_eq!(*id.default_value(), DefaultValue::Int(-1));

    let color = person.field_by_name("color").unwrap();
    let color_enum = pool.enumeration(color.enum_type().unwrap());
    assert_eq!(color_enum.name(), "pkg.Color");
    assert_eq!(color_enum.value("GREEN"), Some(2));
    assert_eq!(color_enum.value_name(3), Some("BLUE"));
    assert_eq!(color_enum.default_value(), 1);
    assert_eq!(*color.default_value(), DefaultValue::Enum(1));

    let contact = person.field_by_number(5).unwrap();
    let contact_msg = pool.message(contact.message_type().unwrap());
    assert_eq!(contact_msg.name(), "pkg.Person.Contact");

    let scores = person.field_by_number(6).unwrap();
    assert_eq!(scores.label(), Label::Repeated);
    assert!(scores.is_packed());
    assert_eq!(scores.bit_index(), NO_PRESENCE_BIT);

    // Layout: five presence bits, every slot placed, total size rounded
    // to pointer alignment.
    assert_eq!(person.presence_bits(), 5);
    assert!(person.instance_size() as usize % std::mem::size_of::<usize>() == 0);
    let mut offsets: Vec<u32> = person.fields().iter().map(|f| f.offset()).collect();
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), person.fields().len());
}

#[test]
fn recursive_message_is_allowed() {
    let set = descriptor_set(&[file_descriptor(
        "pkg",
        &[message_descriptor(
            "Tree",
            &[field_descriptor("child", 1, 3, 11, Some(".pkg.Tree"))],
        )],
        &[],
    )]);
    let pool = DescriptorPool::load(set).unwrap();
    let tree_index = pool.message_by_name("pkg.Tree").unwrap();
    let tree = pool.message(tree_index);
    assert_eq!(tree.field_by_number(1).unwrap().message_type(), Some(tree_index));
}

#[test]
fn cross_set_references_resolve() {
    let base = descriptor_set(&[file_descriptor(
        "base",
        &[message_descriptor(
            "Leaf",
            &[field_descriptor("n", 1, 1, 5, None)],
        )],
        &[],
    )]);
    let dependent = descriptor_set(&[file_descriptor(
        "app",
        &[message_descriptor(
            "Holder",
            &[field_descriptor("leaf", 1, 1, 11, Some(".base.Leaf"))],
        )],
        &[],
    )]);

    let mut pool = DescriptorPool::new();
    pool.add_descriptor_set(base).unwrap();
    pool.add_descriptor_set(dependent).unwrap();
    let holder = pool.message(pool.message_by_name("app.Holder").unwrap());
    let leaf = pool.message(holder.field_by_number(1).unwrap().message_type().unwrap());
    assert_eq!(leaf.name(), "base.Leaf");
}

#[test]
fn bad_reference_reported_and_pool_unchanged() {
    let set = descriptor_set(&[file_descriptor(
        "pkg",
        &[message_descriptor(
            "M",
            &[field_descriptor("x", 1, 1, 11, Some(".pkg.Missing"))],
        )],
        &[],
    )]);
    let mut pool = DescriptorPool::new();
    let err = pool.add_descriptor_set(set).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadReference);
    assert!(pool.message_by_name("pkg.M").is_none());
}

#[test]
fn duplicate_symbol_rejected() {
    let mut pool = DescriptorPool::load(person_set()).unwrap();
    let err = pool.add_descriptor_set(person_set()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateSymbol);
    // The failed load must not have touched the pool.
    assert!(pool.message_by_name("pkg.Person").is_some());
    assert_eq!(
        pool.message(pool.message_by_name("pkg.Person").unwrap())
            .fields()
            .len(),
        6
    );
}

#[test]
fn malformed_input_rejected() {
    // Truncated garbage.
    let err = DescriptorPool::load(&[0x0A, 0xFF][..]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedDescriptor);

    // Structurally valid protobuf, but the field has no number.
    let mut nameless = Vec::new();
    common::str_field(&mut nameless, 1, "f");
    common::varint_field(&mut nameless, 5, 5);
    let set = descriptor_set(&[file_descriptor(
        "pkg",
        &[message_descriptor("M", &[nameless])],
        &[],
    )]);
    let err = DescriptorPool::load(set).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedDescriptor);

    // A message with two fields sharing a number.
    let set = descriptor_set(&[file_descriptor(
        "pkg",
        &[message_descriptor(
            "M",
            &[
                field_descriptor("a", 1, 1, 5, None),
                field_descriptor("b", 1, 1, 5, None),
            ],
        )],
        &[],
    )]);
    let err = DescriptorPool::load(set).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedDescriptor);
}

#[test]
fn bootstrap_schema_is_self_describing() {
    let bootstrap = DescriptorPool::bootstrap();
    let file = bootstrap
        .message(bootstrap.message_by_name("google.protobuf.FileDescriptorProto").unwrap());
    assert_eq!(file.field_by_number(4).unwrap().name(), "message_type");

    let field_proto = bootstrap
        .message(bootstrap.message_by_name("google.protobuf.FieldDescriptorProto").unwrap());
    let type_field = field_proto.field_by_number(5).unwrap();
    let type_enum = bootstrap.enumeration(type_field.enum_type().unwrap());
    assert_eq!(type_enum.value("TYPE_SINT64"), Some(18));
}

#[test]
fn unmodeled_descriptor_fields_are_ignored() {
    // FileDescriptorProto.syntax (field 12) is not modeled; a set carrying
    // it still loads.
    let mut file = file_descriptor(
        "pkg",
        &[message_descriptor(
            "M",
            &[field_descriptor("a", 1, 1, 5, None)],
        )],
        &[],
    );
    common::str_field(&mut file, 12, "proto2");
    let pool = DescriptorPool::load(descriptor_set(&[file])).unwrap();
    assert!(pool.message_by_name("pkg.M").is_some());
}
