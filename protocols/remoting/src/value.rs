//! The tagged value union exchanged in call arguments and return values.
//!
//! Every value starts with a single tag byte followed by a tag-specific
//! payload. Scalars are little-endian, strings and byte buffers carry a
//! 7-bit encoded length prefix. Interface instances travel as [`ProxyRef`]
//! surrogates, cancellation tokens as a per-call token id, and arbitrary
//! structured data as a self-describing CBOR document under the `Other` tag.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::primitives::*;

/// Value tags as they appear on the wire
pub mod tag {
    pub const NULL: u8 = 0;
    pub const FALSE: u8 = 1;
    pub const TRUE: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const SBYTE: u8 = 4;
    pub const INT16: u8 = 5;
    pub const UINT16: u8 = 6;
    pub const CHAR: u8 = 7;
    pub const INT32: u8 = 8;
    pub const UINT32: u8 = 9;
    pub const INT64: u8 = 10;
    pub const UINT64: u8 = 11;
    pub const SINGLE: u8 = 12;
    pub const DOUBLE: u8 = 13;
    pub const DECIMAL: u8 = 14;
    pub const STRING: u8 = 15;
    pub const TYPE: u8 = 16;
    pub const BYTE_ARRAY: u8 = 17;
    pub const CANCELLATION_TOKEN: u8 = 18;
    pub const PROXY: u8 = 19;
    pub const OTHER: u8 = 20;
}

/// Token id marking a token that cannot be cancelled
pub const TOKEN_NONE: i32 = -1;

/// Which side of the connection owns the referenced object, from the
/// sender's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The sender owns the object; the receiver sees a remote proxy
    Local = 0,
    /// The sender forwards a handle it received from the receiver
    Remote = 1,
}

impl Ownership {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Ownership::Local),
            1 => Ok(Ownership::Remote),
            other => Err(Error::BadOwnership(other)),
        }
    }
}

/// Wire surrogate for an interface instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRef {
    pub ownership: Ownership,
    /// Declared static type name
    pub remote_type: String,
    /// Dynamic type name of the actual instance
    pub object_type: String,
    /// Proxy id, unique within the owning host
    pub id: u32,
}

/// A 128-bit scaled decimal: 96-bit unsigned mantissa plus a flags word
/// carrying the sign bit and the decimal scale. Serialized as four
/// little-endian `u32` words, mantissa first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decimal {
    /// Mantissa words, least significant first
    pub mantissa: [u32; 3],
    /// Bit 31 is the sign, bits 16..24 the scale
    pub flags: u32,
}

impl Decimal {
    pub const SIGN_MASK: u32 = 1 << 31;
    pub const SCALE_SHIFT: u32 = 16;
    pub const SCALE_MASK: u32 = 0xff << Self::SCALE_SHIFT;

    pub fn new(mantissa: [u32; 3], scale: u8, negative: bool) -> Self {
        let mut flags = u32::from(scale) << Self::SCALE_SHIFT;
        if negative {
            flags |= Self::SIGN_MASK;
        }
        Self { mantissa, flags }
    }

    pub fn is_negative(&self) -> bool {
        self.flags & Self::SIGN_MASK != 0
    }

    pub fn scale(&self) -> u8 {
        ((self.flags & Self::SCALE_MASK) >> Self::SCALE_SHIFT) as u8
    }
}

/// A single argument or return value in its wire form
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    UInt16(u16),
    Char(char),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    /// A type reference, serialized as its qualified type name
    Type(String),
    ByteArray(Vec<u8>),
    /// Token id local to the enclosing call; negative means "cannot be
    /// cancelled"
    CancellationToken(i32),
    Proxy(ProxyRef),
    /// Self-describing CBOR document for structured data
    Other(Vec<u8>),
}

impl Value {
    /// Encodes an arbitrary serializable object under the `Other` tag
    pub fn other<T: Serialize>(value: &T) -> Result<Value> {
        let mut raw = Vec::with_capacity(64);
        ciborium::ser::into_writer(value, &mut raw)
            .map_err(|e| Error::Structured(e.to_string()))?;
        Ok(Value::Other(raw))
    }

    /// Recovers a structured object from an `Other` value
    pub fn decode_other<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Value::Other(raw) => ciborium::de::from_reader(&raw[..])
                .map_err(|e| Error::Structured(e.to_string())),
            other => Err(Error::Structured(format!(
                "expected a structured value, found {:?}",
                other
            ))),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Value::Null => dst.put_u8(tag::NULL),
            Value::Bool(false) => dst.put_u8(tag::FALSE),
            Value::Bool(true) => dst.put_u8(tag::TRUE),
            Value::Byte(v) => {
                dst.put_u8(tag::BYTE);
                dst.put_u8(*v);
            }
            Value::SByte(v) => {
                dst.put_u8(tag::SBYTE);
                dst.put_i8(*v);
            }
            Value::Int16(v) => {
                dst.put_u8(tag::INT16);
                dst.put_i16_le(*v);
            }
            Value::UInt16(v) => {
                dst.put_u8(tag::UINT16);
                dst.put_u16_le(*v);
            }
            Value::Char(v) => {
                dst.put_u8(tag::CHAR);
                dst.put_u32_le(*v as u32);
            }
            Value::Int32(v) => {
                dst.put_u8(tag::INT32);
                dst.put_i32_le(*v);
            }
            Value::UInt32(v) => {
                dst.put_u8(tag::UINT32);
                dst.put_u32_le(*v);
            }
            Value::Int64(v) => {
                dst.put_u8(tag::INT64);
                dst.put_i64_le(*v);
            }
            Value::UInt64(v) => {
                dst.put_u8(tag::UINT64);
                dst.put_u64_le(*v);
            }
            Value::Single(v) => {
                dst.put_u8(tag::SINGLE);
                dst.put_u32_le(v.to_bits());
            }
            Value::Double(v) => {
                dst.put_u8(tag::DOUBLE);
                dst.put_u64_le(v.to_bits());
            }
            Value::Decimal(v) => {
                dst.put_u8(tag::DECIMAL);
                for word in &v.mantissa {
                    dst.put_u32_le(*word);
                }
                dst.put_u32_le(v.flags);
            }
            Value::String(v) => {
                dst.put_u8(tag::STRING);
                put_string(dst, v);
            }
            Value::Type(v) => {
                dst.put_u8(tag::TYPE);
                put_string(dst, v);
            }
            Value::ByteArray(v) => {
                dst.put_u8(tag::BYTE_ARRAY);
                put_bytes(dst, v);
            }
            Value::CancellationToken(id) => {
                dst.put_u8(tag::CANCELLATION_TOKEN);
                dst.put_i32_le(*id);
            }
            Value::Proxy(proxy) => {
                dst.put_u8(tag::PROXY);
                dst.put_u8(proxy.ownership as u8);
                put_string(dst, &proxy.remote_type);
                put_string(dst, &proxy.object_type);
                dst.put_u32_le(proxy.id);
            }
            Value::Other(raw) => {
                dst.put_u8(tag::OTHER);
                put_bytes(dst, raw);
            }
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Value> {
        let value = match get_u8(src)? {
            tag::NULL => Value::Null,
            tag::FALSE => Value::Bool(false),
            tag::TRUE => Value::Bool(true),
            tag::BYTE => Value::Byte(get_u8(src)?),
            tag::SBYTE => Value::SByte(get_u8(src)? as i8),
            tag::INT16 => Value::Int16(get_u16_le(src)? as i16),
            tag::UINT16 => Value::UInt16(get_u16_le(src)?),
            tag::CHAR => {
                let scalar = get_u32_le(src)?;
                let c = std::char::from_u32(scalar).ok_or(Error::BadChar(scalar))?;
                Value::Char(c)
            }
            tag::INT32 => Value::Int32(get_i32_le(src)?),
            tag::UINT32 => Value::UInt32(get_u32_le(src)?),
            tag::INT64 => Value::Int64(get_u64_le(src)? as i64),
            tag::UINT64 => Value::UInt64(get_u64_le(src)?),
            tag::SINGLE => Value::Single(f32::from_bits(get_u32_le(src)?)),
            tag::DOUBLE => Value::Double(f64::from_bits(get_u64_le(src)?)),
            tag::DECIMAL => {
                let mut mantissa = [0u32; 3];
                for word in mantissa.iter_mut() {
                    *word = get_u32_le(src)?;
                }
                let flags = get_u32_le(src)?;
                Value::Decimal(Decimal { mantissa, flags })
            }
            tag::STRING => Value::String(get_string(src)?),
            tag::TYPE => Value::Type(get_string(src)?),
            tag::BYTE_ARRAY => Value::ByteArray(get_bytes(src)?),
            tag::CANCELLATION_TOKEN => Value::CancellationToken(get_i32_le(src)?),
            tag::PROXY => {
                let ownership = Ownership::from_u8(get_u8(src)?)?;
                let remote_type = get_string(src)?;
                let object_type = get_string(src)?;
                let id = get_u32_le(src)?;
                Value::Proxy(ProxyRef {
                    ownership,
                    remote_type,
                    object_type,
                    id,
                })
            }
            tag::OTHER => Value::Other(get_bytes(src)?),
            unknown => return Err(Error::UnknownValueTag(unknown)),
        };
        Ok(value)
    }
}

/// Encodes a value list prefixed with a `u16` element count
pub fn encode_values(values: &[Value], dst: &mut BytesMut) {
    assert!(
        values.len() <= usize::from(u16::MAX),
        "BUG: value list too long: {} elements",
        values.len()
    );
    dst.put_u16_le(values.len() as u16);
    for value in values {
        value.encode(dst);
    }
}

/// Decodes a `u16`-count-prefixed value list
pub fn decode_values(src: &mut BytesMut) -> Result<Vec<Value>> {
    let count = get_u16_le(src)? as usize;
    let mut values = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        values.push(Value::decode(src)?);
    }
    Ok(values)
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::ByteArray(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    fn roundtrip(value: Value) -> Value {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        let decoded = Value::decode(&mut buf).expect("BUG: value decoding failed");
        assert!(buf.is_empty(), "BUG: trailing bytes after {:?}", decoded);
        decoded
    }

    #[test]
    fn serialize_numerals() {
        let mut buf = BytesMut::new();
        Value::Int32(123).encode(&mut buf);
        assert_eq!(&buf[..], &[tag::INT32, 123, 0, 0, 0]);

        let mut buf = BytesMut::new();
        Value::Single(1.0).encode(&mut buf);
        assert_eq!(&buf[..], &[tag::SINGLE, 0, 0, 0x80, 0x3f]);

        let mut buf = BytesMut::new();
        Value::UInt64(0xaabb).encode(&mut buf);
        assert_eq!(&buf[..], &[tag::UINT64, 0xbb, 0xaa, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn roundtrip_scalars() {
        let values = vec![
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Byte(0xff),
            Value::SByte(-2),
            Value::Int16(-30_000),
            Value::UInt16(60_000),
            Value::Char('λ'),
            Value::Int32(i32::MIN),
            Value::UInt32(u32::MAX),
            Value::Int64(i64::MIN),
            Value::UInt64(u64::MAX),
            Value::Single(3.25),
            Value::Double(-1.5e300),
            Value::Decimal(Decimal::new([1, 2, 3], 4, true)),
        ];
        for value in values {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn serialize_string() {
        let mut buf = BytesMut::new();
        Value::String("abc".into()).encode(&mut buf);
        assert_eq!(&buf[..], &[tag::STRING, 3, 0x61, 0x62, 0x63]);

        assert_eq!(
            roundtrip(Value::String("příliš žluťoučký".into())),
            Value::String("příliš žluťoučký".into())
        );
    }

    #[test]
    fn roundtrip_type_and_bytes() {
        assert_eq!(
            roundtrip(Value::Type("test.Calculator".into())),
            Value::Type("test.Calculator".into())
        );
        assert_eq!(
            roundtrip(Value::ByteArray(vec![1, 2, 3, 4])),
            Value::ByteArray(vec![1, 2, 3, 4])
        );
    }

    #[test]
    fn serialize_proxy_ref() {
        let proxy = ProxyRef {
            ownership: Ownership::Local,
            remote_type: "ICalc".into(),
            object_type: "Calc".into(),
            id: 0x8000_0001,
        };
        let mut buf = BytesMut::new();
        Value::Proxy(proxy.clone()).encode(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                tag::PROXY,
                0, // Ownership::Local
                5, 0x49, 0x43, 0x61, 0x6c, 0x63, // "ICalc"
                4, 0x43, 0x61, 0x6c, 0x63, // "Calc"
                0x01, 0x00, 0x00, 0x80, // id
            ]
        );
        assert_eq!(roundtrip(Value::Proxy(proxy.clone())), Value::Proxy(proxy));
    }

    #[test]
    fn serialize_cancellation_token() {
        let mut buf = BytesMut::new();
        Value::CancellationToken(TOKEN_NONE).encode(&mut buf);
        assert_eq!(&buf[..], &[tag::CANCELLATION_TOKEN, 0xff, 0xff, 0xff, 0xff]);

        assert_eq!(
            roundtrip(Value::CancellationToken(2)),
            Value::CancellationToken(2)
        );
    }

    #[test]
    fn structured_other_roundtrip() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Sample {
            id: u32,
            label: String,
            points: Vec<(i32, i32)>,
        }

        let sample = Sample {
            id: 42,
            label: "origin".into(),
            points: vec![(0, 0), (-1, 1)],
        };

        let value = Value::other(&sample).expect("BUG: structured encoding failed");
        let value = roundtrip(value);
        let recovered: Sample = value.decode_other().expect("BUG: structured decoding failed");
        assert_eq!(recovered, sample);
    }

    #[test]
    fn decode_other_wrong_tag() {
        Value::Int32(1)
            .decode_other::<u32>()
            .expect_err("BUG: decode_other on a scalar should fail");
    }

    #[test]
    fn unknown_tag() {
        let mut buf = BytesMut::from(&[0x7f][..]);
        match Value::decode(&mut buf) {
            Err(Error::UnknownValueTag(0x7f)) => {}
            other => panic!("BUG: expected UnknownValueTag, got: {:?}", other),
        }
    }

    #[test]
    fn truncated_value() {
        let mut buf = BytesMut::from(&[tag::INT32, 1, 2][..]);
        match Value::decode(&mut buf) {
            Err(Error::Eof) => {}
            other => panic!("BUG: expected Eof, got: {:?}", other),
        }
    }

    #[test]
    fn bad_char_scalar() {
        let mut buf = BytesMut::new();
        buf.put_u8(tag::CHAR);
        buf.put_u32_le(0xdead_beef);
        match Value::decode(&mut buf) {
            Err(Error::BadChar(0xdead_beef)) => {}
            other => panic!("BUG: expected BadChar, got: {:?}", other),
        }
    }

    #[test]
    fn value_list_roundtrip() {
        let values = vec![
            Value::Int32(5),
            Value::String("x".into()),
            Value::Null,
            Value::CancellationToken(0),
        ];
        let mut buf = BytesMut::new();
        encode_values(&values, &mut buf);
        let decoded = decode_values(&mut buf).expect("BUG: value list decoding failed");
        assert!(buf.is_empty());
        assert_eq!(decoded, values);
    }
}
