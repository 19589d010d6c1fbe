//! Contract tests for positional payload encoding, covering the argument
//! orderings documented for representative opcodes across all four brokers.

use nexo_protocol::{AnyValue, DataType, PayloadReader, PayloadWriter};
use uuid::Uuid;

#[test]
fn kv_set_payload_roundtrips() {
    // SET(key, ttl_seconds_or_0, any)
    let mut w = PayloadWriter::new();
    w.write_string("session:42").write_u64(30).write_any(&AnyValue::String("active".into()));
    let bytes = w.into_bytes();

    let mut r = PayloadReader::new(&bytes);
    assert_eq!(r.read_string().unwrap(), "session:42");
    assert_eq!(r.read_u64().unwrap(), 30);
    let value = r.read_any().unwrap();
    assert_eq!(value, AnyValue::String("active".into()));
    assert!(r.is_exhausted());
}

#[test]
fn queue_push_payload_roundtrips_with_binary_payload() {
    // Q_PUSH(name, priority, delay_ms, any)
    let raw_payload: Vec<u8> = (0u8..=255).collect();
    let mut w = PayloadWriter::new();
    w.write_string("orders")
        .write_u8(10)
        .write_u64(0)
        .write_any(&AnyValue::Raw(raw_payload.clone()));
    let bytes = w.into_bytes();

    let mut r = PayloadReader::new(&bytes);
    assert_eq!(r.read_string().unwrap(), "orders");
    assert_eq!(r.read_u8().unwrap(), 10);
    assert_eq!(r.read_u64().unwrap(), 0);
    let any = r.read_any().unwrap();
    assert_eq!(any, AnyValue::Raw(raw_payload));
}

#[test]
fn queue_consume_response_roundtrips_uuid_and_length_prefixed_payloads() {
    // response body: u32 count | [uuid id | u32 payload_len | payload_any]*
    let id1 = Uuid::new_v4();
    let id2 = Uuid::new_v4();

    let mut w = PayloadWriter::new();
    w.write_u32(2);
    w.write_uuid(id1);
    let p1 = AnyValue::String("first".into());
    w.write_u32(p1.as_bytes().len() as u32 + 1);
    w.write_any(&p1);
    w.write_uuid(id2);
    let p2 = AnyValue::Raw(vec![1, 2, 3]);
    w.write_u32(p2.as_bytes().len() as u32 + 1);
    w.write_any(&p2);
    let bytes = w.into_bytes();

    let mut r = PayloadReader::new(&bytes);
    let count = r.read_u32().unwrap();
    assert_eq!(count, 2);

    let got_id1 = r.read_uuid().unwrap();
    assert_eq!(got_id1, id1);
    let len1 = r.read_u32().unwrap();
    let tag = r.read_u8().unwrap();
    assert_eq!(DataType::from_tag(tag).unwrap(), DataType::String);
    // len1 includes the tag byte already consumed above.
    assert_eq!(len1 as usize, "first".len() + 1);

    let got_id2 = r.read_uuid().unwrap();
    assert_eq!(got_id2, id2);
    let _len2 = r.read_u32().unwrap();
    let any2 = r.read_any().unwrap();
    assert_eq!(any2, AnyValue::Raw(vec![1, 2, 3]));
}

#[test]
fn pubsub_publish_payload_roundtrips() {
    // PUB(topic, flags, any)
    let mut w = PayloadWriter::new();
    w.write_string("sensors/kitchen/temp")
        .write_u8(1) // retain flag
        .write_any(&AnyValue::Json(br#"{"celsius":21.5}"#.to_vec()));
    let bytes = w.into_bytes();

    let mut r = PayloadReader::new(&bytes);
    assert_eq!(r.read_string().unwrap(), "sensors/kitchen/temp");
    assert_eq!(r.read_u8().unwrap(), 1);
    let value = r.read_any().unwrap();
    assert_eq!(value, AnyValue::Json(br#"{"celsius":21.5}"#.to_vec()));
}

#[test]
fn push_frame_body_roundtrips_topic_and_payload() {
    // push body = string topic | any payload
    let mut w = PayloadWriter::new();
    w.write_string("config/app/#").write_any(&AnyValue::Raw(b"binary-tail".to_vec()));
    let bytes = w.into_bytes();

    let mut r = PayloadReader::new(&bytes);
    assert_eq!(r.read_string().unwrap(), "config/app/#");
    assert_eq!(r.read_any().unwrap(), AnyValue::Raw(b"binary-tail".to_vec()));
}

#[test]
fn string_length_prefix_exceeding_buffer_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&100u32.to_be_bytes());
    bytes.extend_from_slice(b"short");
    let mut r = PayloadReader::new(&bytes);
    let err = r.read_string().unwrap_err();
    assert!(matches!(err, nexo_protocol::FrameError::BadStringLength { .. }));
}

#[test]
fn binary_payloads_survive_byte_for_byte_across_all_256_values() {
    let payload: Vec<u8> = (0u8..=255).chain(0u8..=255).collect();
    let mut w = PayloadWriter::new();
    w.write_any(&AnyValue::Raw(payload.clone()));
    let bytes = w.into_bytes();
    let mut r = PayloadReader::new(&bytes);
    assert_eq!(r.read_any().unwrap(), AnyValue::Raw(payload));
}
