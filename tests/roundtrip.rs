//! Encoder -> decoder round trips, including the generic `stream_data`
//! pump, plus randomized packed and bytes-field properties.

mod common;

use quickcheck::quickcheck;

use common::{
    drain, field_descriptor, message_descriptor, root, test_pool, Ev, with_packed_option,
};
use pbstream::encoding::WireType;
use pbstream::{
    stream_data, BufferSink, BufferSource, Decoder, Encoder, FieldInfo, MessageDescriptor, Sink,
    Source, Value,
};

fn all_types_pool() -> std::sync::Arc<pbstream::DescriptorPool> {
    test_pool(
        &[
            message_descriptor(
                "All",
                &[
                    field_descriptor("a", 1, 1, 5, None),
                    field_descriptor("b", 2, 1, 9, None),
                    field_descriptor("inner", 3, 1, 11, Some(".test.All")),
                    with_packed_option(field_descriptor("xs", 4, 3, 5, None)),
                    field_descriptor("d", 5, 1, 1, None),
                    field_descriptor("g", 6, 1, 10, Some(".test.G")),
                    field_descriptor("f64", 7, 1, 6, None),
                    field_descriptor("sz", 8, 1, 17, None),
                ],
            ),
            message_descriptor("G", &[field_descriptor("x", 1, 1, 5, None)]),
        ],
        &[],
    )
}

fn info(message: &MessageDescriptor, number: u32) -> FieldInfo {
    FieldInfo::from(message.field_by_number(number).unwrap())
}

#[test]
fn encode_then_decode() {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = all_types_pool();
    let all_index = root(&pool, "test.All");
    let all = pool.message(all_index);
    let group = pool.message(root(&pool, "test.G"));

    let mut encoder = Encoder::new(BufferSink::new());
    encoder.begin_field(info(all, 1)).unwrap();
    encoder.put_value(Value::Int32(150)).unwrap();
    encoder.begin_field(info(all, 2)).unwrap();
    encoder.put_string(b"hello").unwrap();

    encoder.begin_field(info(all, 3)).unwrap();
    encoder.start_message().unwrap();
    encoder.begin_field(info(all, 1)).unwrap();
    encoder.put_value(Value::Int32(-1)).unwrap();
    encoder.end_message().unwrap();

    encoder.begin_field(info(all, 4)).unwrap();
    encoder.put_value(Value::Int32(3)).unwrap();
    encoder.begin_field(info(all, 4)).unwrap();
    encoder.put_value(Value::Int32(270)).unwrap();
    encoder.begin_field(info(all, 4)).unwrap();
    encoder.put_value(Value::Int32(86942)).unwrap();

    encoder.begin_field(info(all, 5)).unwrap();
    encoder.put_value(Value::Double(6.25)).unwrap();

    encoder.begin_field(info(all, 6)).unwrap();
    encoder.start_message().unwrap();
    encoder.begin_field(info(group, 1)).unwrap();
    encoder.put_value(Value::Int32(42)).unwrap();
    encoder.end_message().unwrap();

    encoder.begin_field(info(all, 7)).unwrap();
    encoder.put_value(Value::UInt64(u64::MAX)).unwrap();
    encoder.begin_field(info(all, 8)).unwrap();
    encoder.put_value(Value::Int32(-2)).unwrap();

    let encoded = encoder.finish().unwrap().into_bytes();

    // sint32 -2 zig-zags to 3 at the very end of the buffer.
    assert_eq!(&encoded[encoded.len() - 2..], &[0x40u8, 0x03][..]);

    let mut decoder = Decoder::new(pool.clone(), all_index, BufferSource::new(encoded));
    let events = drain(&mut decoder).unwrap();
    assert_eq!(
        events,
        vec![
            Ev::Tag(1, WireType::Varint),
            Ev::Val(Value::Int32(150)),
            Ev::Tag(2, WireType::LengthDelimited),
            Ev::Str(b"hello".to_vec()),
            Ev::Tag(3, WireType::LengthDelimited),
            Ev::Start,
            Ev::Tag(1, WireType::Varint),
            Ev::Val(Value::Int32(-1)),
            Ev::End,
            Ev::Tag(4, WireType::Varint),
            Ev::Val(Value::Int32(3)),
            Ev::Tag(4, WireType::Varint),
            Ev::Val(Value::Int32(270)),
            Ev::Tag(4, WireType::Varint),
            Ev::Val(Value::Int32(86942)),
            Ev::Tag(5, WireType::SixtyFourBit),
            Ev::Val(Value::Double(6.25)),
            Ev::Tag(6, WireType::StartGroup),
            Ev::Start,
            Ev::Tag(1, WireType::Varint),
            Ev::Val(Value::Int32(42)),
            Ev::End,
            Ev::Tag(7, WireType::SixtyFourBit),
            Ev::Val(Value::UInt64(u64::MAX)),
            Ev::Tag(8, WireType::Varint),
            Ev::Val(Value::Int32(-2)),
        ]
    );
}

#[test]
fn stream_data_reproduces_the_wire() {
    let pool = all_types_pool();
    let all_index = root(&pool, "test.All");
    let all = pool.message(all_index);
    let group = pool.message(root(&pool, "test.G"));

    let mut encoder = Encoder::new(BufferSink::new());
    encoder.begin_field(info(all, 1)).unwrap();
    encoder.put_value(Value::Int32(7)).unwrap();
    encoder.begin_field(info(all, 3)).unwrap();
    encoder.start_message().unwrap();
    encoder.begin_field(info(all, 2)).unwrap();
    encoder.put_string(b"nested").unwrap();
    encoder.end_message().unwrap();
    for x in [1i32, 200, 40000] {
        encoder.begin_field(info(all, 4)).unwrap();
        encoder.put_value(Value::Int32(x)).unwrap();
    }
    encoder.begin_field(info(all, 6)).unwrap();
    encoder.start_message().unwrap();
    encoder.begin_field(info(group, 1)).unwrap();
    encoder.put_value(Value::Int32(9)).unwrap();
    encoder.end_message().unwrap();
    let original = encoder.finish().unwrap().into_bytes();

    let mut decoder = Decoder::new(pool.clone(), all_index, BufferSource::new(original.clone()));
    let mut reencoder = Encoder::new(BufferSink::new());
    stream_data(&mut decoder, &mut reencoder).unwrap();
    let copied = reencoder.finish().unwrap().into_bytes();

    assert_eq!(original, copied);
}

quickcheck! {
    fn packed_int32_roundtrip(values: Vec<i32>) -> bool {
        let pool = test_pool(
            &[message_descriptor(
                "M",
                &[with_packed_option(field_descriptor("xs", 1, 3, 5, None))],
            )],
            &[],
        );
        let index = root(&pool, "test.M");
        let field = FieldInfo::from(pool.message(index).field_by_number(1).unwrap());

        let mut encoder = Encoder::new(BufferSink::new());
        for &value in &values {
            encoder.begin_field(field).unwrap();
            encoder.put_value(Value::Int32(value)).unwrap();
        }
        let encoded = encoder.finish().unwrap().into_bytes();

        let mut decoder = Decoder::new(pool.clone(), index, BufferSource::new(encoded));
        let mut decoded = Vec::new();
        loop {
            match decoder.next_field().unwrap() {
                None => break,
                Some(_) => match decoder.value().unwrap() {
                    Value::Int32(v) => decoded.push(v),
                    other => panic!("unexpected value {:?}", other),
                },
            }
        }
        decoded == values
    }

    fn bytes_field_roundtrip(payload: Vec<u8>) -> bool {
        let pool = test_pool(
            &[message_descriptor(
                "M",
                &[field_descriptor("b", 1, 1, 12, None)],
            )],
            &[],
        );
        let index = root(&pool, "test.M");
        let field = FieldInfo::from(pool.message(index).field_by_number(1).unwrap());

        let mut encoder = Encoder::new(BufferSink::new());
        encoder.begin_field(field).unwrap();
        encoder.put_string(&payload).unwrap();
        let encoded = encoder.finish().unwrap().into_bytes();

        let mut decoder = Decoder::new(pool.clone(), index, BufferSource::new(encoded));
        decoder.next_field().unwrap().expect("bytes field");
        decoder.string().unwrap().as_bytes() == payload.as_slice()
    }
}
