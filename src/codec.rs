// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Type-directed byte-level encode/decode.
//!
//! There is no type tag on the wire beyond the per-slot nullability byte: both sides must agree
//! on the [`ValueDescriptor`] out of band (the RPC layer does this by decoding the operation name
//! first and looking its signature up in a registry, see [`crate::dispatch`]).

use std::io::{Read, Write};

use crate::descriptor::{Primitive, RecordDescriptor, ValueDescriptor};
use crate::value::Value;
use crate::Error;

/// Hard recursion limit for nested arrays/records, shared by encode and decode so both sides
/// reject the same depth.
pub const MAX_DEPTH: u32 = 20;

const PRESENT: u8 = 0;
const NULL: u8 = 1;

/// Encodes `value` according to `descriptor`, appending the result to `writer`.
pub fn encode<W: Write>(writer: &mut W, descriptor: &ValueDescriptor, value: &Value) -> Result<(), Error> {
    encode_slot(writer, descriptor, value, 0)
}

/// Decodes a single value slot described by `descriptor` from `reader`.
pub fn decode<R: Read>(reader: &mut R, descriptor: &ValueDescriptor) -> Result<Value, Error> {
    decode_slot(reader, descriptor, 0)
}

fn encode_slot<W: Write>(
    writer: &mut W,
    descriptor: &ValueDescriptor,
    value: &Value,
    depth: u32,
) -> Result<(), Error> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthExceeded);
    }

    if value.is_null() {
        writer.write_all(&[NULL])?;
        return Ok(());
    }

    writer.write_all(&[PRESENT])?;
    encode_body(writer, descriptor, value, depth)
}

fn encode_body<W: Write>(
    writer: &mut W,
    descriptor: &ValueDescriptor,
    value: &Value,
    depth: u32,
) -> Result<(), Error> {
    match descriptor {
        ValueDescriptor::Primitive(p) => encode_primitive(writer, *p, value),
        ValueDescriptor::Utf8String => {
            let Value::Str(s) = value else {
                panic!("value {value:?} does not conform to descriptor Utf8String")
            };
            let len = i32::try_from(s.len()).map_err(|_| Error::MalformedLength)?;
            writer.write_all(&len.to_be_bytes())?;
            writer.write_all(s.as_bytes())?;
            Ok(())
        }
        ValueDescriptor::Array(element) => {
            let Value::Array(items) = value else {
                panic!("value {value:?} does not conform to descriptor {descriptor:?}")
            };
            let len = i32::try_from(items.len()).map_err(|_| Error::MalformedLength)?;
            writer.write_all(&len.to_be_bytes())?;

            if let ValueDescriptor::Primitive(p) = element.as_ref() {
                for item in items {
                    encode_primitive(writer, *p, item)?;
                }
            } else {
                for item in items {
                    encode_slot(writer, element, item, depth + 1)?;
                }
            }
            Ok(())
        }
        ValueDescriptor::Record(record) => {
            let Value::Record(fields) = value else {
                panic!("value {value:?} does not conform to descriptor {descriptor:?}")
            };
            if fields.len() != record.fields.len() {
                panic!(
                    "record value has {} fields, descriptor {} declares {}",
                    fields.len(),
                    record.name,
                    record.fields.len()
                );
            }
            for (field, field_value) in record.fields.iter().zip(fields) {
                if field.immutable {
                    continue;
                }
                encode_slot(writer, &field.descriptor, field_value, depth + 1)?;
            }
            Ok(())
        }
    }
}

fn encode_primitive<W: Write>(writer: &mut W, primitive: Primitive, value: &Value) -> Result<(), Error> {
    match (primitive, value) {
        (Primitive::Bool, Value::Bool(v)) => writer.write_all(&[u8::from(*v)])?,
        (Primitive::I8, Value::I8(v)) => writer.write_all(&v.to_be_bytes())?,
        (Primitive::U16Char, Value::U16Char(v)) => writer.write_all(&v.to_be_bytes())?,
        (Primitive::I16, Value::I16(v)) => writer.write_all(&v.to_be_bytes())?,
        (Primitive::I32, Value::I32(v)) => writer.write_all(&v.to_be_bytes())?,
        (Primitive::I64, Value::I64(v)) => writer.write_all(&v.to_be_bytes())?,
        (Primitive::F32, Value::F32(v)) => writer.write_all(&v.to_be_bytes())?,
        (Primitive::F64, Value::F64(v)) => writer.write_all(&v.to_be_bytes())?,
        (p, v) => panic!("value {v:?} does not conform to primitive descriptor {p:?}"),
    }
    Ok(())
}

fn decode_slot<R: Read>(reader: &mut R, descriptor: &ValueDescriptor, depth: u32) -> Result<Value, Error> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthExceeded);
    }

    let mut tag = [0u8; 1];
    read_exact(reader, &mut tag)?;

    match tag[0] {
        PRESENT => decode_body(reader, descriptor, depth),
        NULL => {
            // Every slot carries a null tag, including standalone primitives, for uniformity
            // with composites -- but a primitive is never actually allowed to be absent.
            if descriptor.is_primitive() {
                Err(Error::NullPrimitive)
            } else {
                Ok(Value::Null)
            }
        }
        _ => Err(Error::MalformedTag),
    }
}

fn decode_body<R: Read>(reader: &mut R, descriptor: &ValueDescriptor, depth: u32) -> Result<Value, Error> {
    match descriptor {
        ValueDescriptor::Primitive(p) => decode_primitive(reader, *p),
        ValueDescriptor::Utf8String => {
            let len = read_len(reader)?;
            let mut buf = vec![0u8; len];
            read_exact(reader, &mut buf)?;
            let s = String::from_utf8(buf).map_err(|e| Error::InvalidText(e.utf8_error()))?;
            Ok(Value::Str(s))
        }
        ValueDescriptor::Array(element) => {
            let len = read_len(reader)?;
            let mut items = Vec::with_capacity(len.min(1 << 20));

            if let ValueDescriptor::Primitive(p) = element.as_ref() {
                for _ in 0..len {
                    items.push(decode_primitive(reader, *p)?);
                }
            } else {
                for _ in 0..len {
                    items.push(decode_slot(reader, element, depth + 1)?);
                }
            }
            Ok(Value::Array(items))
        }
        ValueDescriptor::Record(record) => decode_record(reader, record, depth),
    }
}

fn decode_record<R: Read>(reader: &mut R, record: &RecordDescriptor, depth: u32) -> Result<Value, Error> {
    let factory = record.factory.ok_or(Error::UnconstructibleRecord)?;
    let mut instance = factory();
    let Value::Record(fields) = &mut instance else {
        panic!("factory for record {} did not produce a Value::Record", record.name)
    };
    if fields.len() != record.fields.len() {
        panic!(
            "factory for record {} produced {} fields, descriptor declares {}",
            record.name,
            fields.len(),
            record.fields.len()
        );
    }

    for (field, slot) in record.fields.iter().zip(fields.iter_mut()) {
        if field.immutable {
            continue;
        }
        *slot = decode_slot(reader, &field.descriptor, depth + 1)?;
    }

    Ok(instance)
}

fn decode_primitive<R: Read>(reader: &mut R, primitive: Primitive) -> Result<Value, Error> {
    let mut buf = [0u8; 8];
    let body = &mut buf[..primitive.size()];
    read_exact(reader, body)?;

    Ok(match primitive {
        Primitive::Bool => Value::Bool(body[0] != 0),
        Primitive::I8 => Value::I8(body[0] as i8),
        Primitive::U16Char => Value::U16Char(u16::from_be_bytes(body.try_into().unwrap())),
        Primitive::I16 => Value::I16(i16::from_be_bytes(body.try_into().unwrap())),
        Primitive::I32 => Value::I32(i32::from_be_bytes(body.try_into().unwrap())),
        Primitive::I64 => Value::I64(i64::from_be_bytes(body.try_into().unwrap())),
        Primitive::F32 => Value::F32(f32::from_be_bytes(body.try_into().unwrap())),
        Primitive::F64 => Value::F64(f64::from_be_bytes(body.try_into().unwrap())),
    })
}

fn read_len<R: Read>(reader: &mut R) -> Result<usize, Error> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    let len = i32::from_be_bytes(buf);
    usize::try_from(len).map_err(|_| Error::MalformedLength)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEnd
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(descriptor: &ValueDescriptor, value: &Value) -> Value {
        let mut buf = Vec::new();
        encode(&mut buf, descriptor, value).expect("encode");
        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = decode(&mut cursor, descriptor).expect("decode");
        assert_eq!(cursor.position() as usize, buf.len(), "decode must consume every byte");
        decoded
    }

    #[test]
    fn empty_string_encodes_to_five_bytes() {
        let mut buf = Vec::new();
        encode(&mut buf, &ValueDescriptor::Utf8String, &Value::Str(String::new())).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn null_string_encodes_to_one_byte() {
        let mut buf = Vec::new();
        encode(&mut buf, &ValueDescriptor::Utf8String, &Value::Null).unwrap();
        assert_eq!(buf, vec![1]);
    }

    #[test]
    fn primitive_array_round_trip_matches_wire_bytes() {
        let descriptor = ValueDescriptor::array(ValueDescriptor::Primitive(Primitive::I32));
        let value = Value::Array(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);

        let mut buf = Vec::new();
        encode(&mut buf, &descriptor, &value).unwrap();
        assert_eq!(
            buf,
            vec![0, 0, 0, 0, 0, 3, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
        );

        assert_eq!(roundtrip(&descriptor, &value), value);
    }

    #[test]
    fn empty_primitive_array_is_five_bytes() {
        let descriptor = ValueDescriptor::array(ValueDescriptor::Primitive(Primitive::I32));
        let value = Value::Array(vec![]);
        let mut buf = Vec::new();
        encode(&mut buf, &descriptor, &value).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn unexpected_end_on_truncated_buffer() {
        let descriptor = ValueDescriptor::Primitive(Primitive::I32);
        let mut cursor = Cursor::new(&[0u8, 0, 0][..]);
        let err = decode(&mut cursor, &descriptor).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEnd));
    }

    #[test]
    fn malformed_tag_is_rejected() {
        let descriptor = ValueDescriptor::Primitive(Primitive::Bool);
        let mut cursor = Cursor::new(&[2u8, 0][..]);
        let err = decode(&mut cursor, &descriptor).unwrap_err();
        assert!(matches!(err, Error::MalformedTag));
    }

    #[test]
    fn negative_array_length_is_rejected() {
        let descriptor = ValueDescriptor::array(ValueDescriptor::Primitive(Primitive::I32));
        let mut cursor = Cursor::new(&[0u8, 0xff, 0xff, 0xff, 0xff][..]);
        let err = decode(&mut cursor, &descriptor).unwrap_err();
        assert!(matches!(err, Error::MalformedLength));
    }

    #[test]
    fn null_primitive_is_rejected() {
        let descriptor = ValueDescriptor::Primitive(Primitive::I32);
        let mut cursor = Cursor::new(&[1u8][..]);
        let err = decode(&mut cursor, &descriptor).unwrap_err();
        assert!(matches!(err, Error::NullPrimitive));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let descriptor = ValueDescriptor::Utf8String;
        let mut buf = vec![0u8, 0, 0, 0, 2];
        buf.extend_from_slice(&[0xff, 0xfe]);
        let mut cursor = Cursor::new(buf.as_slice());
        let err = decode(&mut cursor, &descriptor).unwrap_err();
        assert!(matches!(err, Error::InvalidText(_)));
    }

    fn nested_array_descriptor(depth: u32) -> ValueDescriptor {
        let mut d = ValueDescriptor::Primitive(Primitive::I32);
        for _ in 0..depth {
            d = ValueDescriptor::array(d);
        }
        d
    }

    fn nested_array_value(depth: u32) -> Value {
        let mut v = Value::I32(7);
        for _ in 0..depth {
            v = Value::Array(vec![v]);
        }
        v
    }

    #[test]
    fn depth_exactly_twenty_succeeds() {
        let descriptor = nested_array_descriptor(MAX_DEPTH);
        let value = nested_array_value(MAX_DEPTH);
        assert_eq!(roundtrip(&descriptor, &value), value);
    }

    #[test]
    fn depth_twenty_one_fails() {
        let descriptor = nested_array_descriptor(MAX_DEPTH + 1);
        let value = nested_array_value(MAX_DEPTH + 1);
        let mut buf = Vec::new();
        let err = encode(&mut buf, &descriptor, &value).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded));
    }

    #[test]
    fn record_skips_immutable_field_on_wire_and_leaves_it_at_default() {
        use crate::descriptor::{FieldDescriptor, RecordDescriptor};

        fn default_point() -> Value {
            Value::Record(vec![Value::I32(-1), Value::I32(0)])
        }

        let record = RecordDescriptor::new(
            "Point",
            vec![
                FieldDescriptor::new("id", ValueDescriptor::Primitive(Primitive::I32)).immutable(),
                FieldDescriptor::new("y", ValueDescriptor::Primitive(Primitive::I32)),
            ],
            default_point,
        );
        let descriptor = ValueDescriptor::Record(record);
        let original = Value::Record(vec![Value::I32(42), Value::I32(99)]);

        let mut buf = Vec::new();
        encode(&mut buf, &descriptor, &original).unwrap();
        // Only the mutable field is on the wire: tag + i32.
        assert_eq!(buf.len(), 5);

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = decode(&mut cursor, &descriptor).unwrap();
        let Value::Record(fields) = decoded else {
            panic!("expected record")
        };
        assert_eq!(fields[0], Value::I32(-1)); // immutable field left at factory default
        assert_eq!(fields[1], Value::I32(99)); // mutable field round-tripped
    }

    #[test]
    fn unconstructible_record_without_factory() {
        use crate::descriptor::{FieldDescriptor, RecordDescriptor};

        let record = RecordDescriptor::without_factory(
            "Opaque",
            vec![FieldDescriptor::new("x", ValueDescriptor::Primitive(Primitive::I32))],
        );
        let descriptor = ValueDescriptor::Record(record);
        let mut cursor = Cursor::new(&[0u8, 0, 0, 0, 1][..]);
        let err = decode(&mut cursor, &descriptor).unwrap_err();
        assert!(matches!(err, Error::UnconstructibleRecord));
    }
}
