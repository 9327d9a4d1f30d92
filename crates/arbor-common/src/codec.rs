//! Tagged binary codec.
//!
//! Values are written with a one-byte type tag followed by their payload:
//! fixed-width little-endian integers, length-prefixed UTF-8 strings, and
//! recursively tagged composites. Decoding checks every tag; an unknown or
//! mismatched tag, a truncated buffer or invalid UTF-8 is reported as
//! [`ArborError::Corruption`] and never retried.
//!
//! ```text
//! Identifier "a/bc":  [05][02 00 00 00][01 00 00 00]a[02 00 00 00]bc
//! Value::Int(7):      [02][07 00 00 00 00 00 00 00]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ArborError, ArborResult};
use crate::types::{Identifier, Revision, Value};

/// Tag of the unit value.
pub const TAG_UNIT: u8 = 0;
/// Tag of a boolean.
pub const TAG_BOOL: u8 = 1;
/// Tag of a signed 64-bit integer.
pub const TAG_INT: u8 = 2;
/// Tag of a 64-bit float.
pub const TAG_FLOAT: u8 = 3;
/// Tag of a length-prefixed string.
pub const TAG_TEXT: u8 = 4;
/// Tag of an identifier.
pub const TAG_ID: u8 = 5;
/// Tag of an unsigned 64-bit integer.
pub const TAG_U64: u8 = 6;
/// Tag of a counted list of tagged values.
pub const TAG_LIST: u8 = 7;
/// Tag of an absent optional value.
pub const TAG_NONE: u8 = 8;
/// Tag of a present optional value, followed by the value.
pub const TAG_SOME: u8 = 9;

/// Types that can be written with the tagged codec.
pub trait Encode {
    /// Appends the tagged encoding of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// Types that can be read back from the tagged codec.
pub trait Decode: Sized {
    /// Reads one tagged value from `buf`.
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self>;
}

/// Encodes a value into a standalone buffer.
#[must_use]
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

/// Decodes exactly one value from `bytes`; trailing bytes are corruption.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> ArborResult<T> {
    let mut buf = bytes;
    let value = T::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(ArborError::corruption(format!(
            "{} trailing bytes after decoded value",
            buf.remaining()
        )));
    }
    Ok(value)
}

/// Fails with corruption if fewer than `needed` bytes remain.
pub fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> ArborResult<()> {
    if buf.remaining() < needed {
        return Err(ArborError::corruption(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Reads a tag and checks it against the expected one.
pub fn expect_tag<B: Buf>(buf: &mut B, expected: u8, what: &str) -> ArborResult<()> {
    ensure_remaining(buf, 1, what)?;
    let tag = buf.get_u8();
    if tag != expected {
        return Err(ArborError::corruption(format!(
            "type tag mismatch for {what}: expected {expected}, found {tag}"
        )));
    }
    Ok(())
}

/// Writes an untagged length-prefixed string.
pub fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Reads an untagged length-prefixed string.
pub fn get_str<B: Buf>(buf: &mut B) -> ArborResult<String> {
    ensure_remaining(buf, 4, "string length")?;
    let len = buf.get_u32_le() as usize;
    ensure_remaining(buf, len, "string body")?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|e| ArborError::corruption(format!("invalid UTF-8: {e}")))
}

/// Reads an untagged little-endian `u32`.
pub fn get_u32<B: Buf>(buf: &mut B, what: &str) -> ArborResult<u32> {
    ensure_remaining(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

/// Reads an untagged little-endian `u64`.
pub fn get_u64<B: Buf>(buf: &mut B, what: &str) -> ArborResult<u64> {
    ensure_remaining(buf, 8, what)?;
    Ok(buf.get_u64_le())
}

impl Encode for () {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_UNIT);
    }
}

impl Decode for () {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        expect_tag(buf, TAG_UNIT, "unit")
    }
}

impl Encode for u64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_U64);
        buf.put_u64_le(*self);
    }
}

impl Decode for u64 {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        expect_tag(buf, TAG_U64, "u64")?;
        get_u64(buf, "u64")
    }
}

impl Encode for i64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_INT);
        buf.put_i64_le(*self);
    }
}

impl Decode for i64 {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        expect_tag(buf, TAG_INT, "int")?;
        ensure_remaining(buf, 8, "int")?;
        Ok(buf.get_i64_le())
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_TEXT);
        put_str(buf, self);
    }
}

impl Decode for String {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        expect_tag(buf, TAG_TEXT, "text")?;
        get_str(buf)
    }
}

impl Encode for Revision {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_u64().encode(buf);
    }
}

impl Decode for Revision {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        u64::decode(buf).map(Revision::new)
    }
}

impl Encode for Identifier {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_ID);
        buf.put_u32_le(self.depth() as u32);
        for segment in self.segments() {
            put_str(buf, segment);
        }
    }
}

impl Decode for Identifier {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        expect_tag(buf, TAG_ID, "identifier")?;
        let count = get_u32(buf, "identifier depth")? as usize;
        // Each segment needs at least its 4-byte length prefix.
        ensure_remaining(buf, count.saturating_mul(4), "identifier segments")?;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(get_str(buf)?);
        }
        Ok(Identifier::from_segments(segments))
    }
}

impl Encode for Value {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Bool(v) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(u8::from(*v));
            }
            Value::Int(v) => v.encode(buf),
            Value::Float(v) => {
                buf.put_u8(TAG_FLOAT);
                buf.put_f64_le(*v);
            }
            Value::Text(v) => v.encode(buf),
            Value::Id(v) => v.encode(buf),
        }
    }
}

impl Decode for Value {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        ensure_remaining(buf, 1, "value tag")?;
        match buf.chunk()[0] {
            TAG_BOOL => {
                buf.advance(1);
                ensure_remaining(buf, 1, "bool")?;
                match buf.get_u8() {
                    0 => Ok(Value::Bool(false)),
                    1 => Ok(Value::Bool(true)),
                    other => Err(ArborError::corruption(format!("invalid bool byte {other}"))),
                }
            }
            TAG_INT => i64::decode(buf).map(Value::Int),
            TAG_FLOAT => {
                buf.advance(1);
                ensure_remaining(buf, 8, "float")?;
                Ok(Value::Float(buf.get_f64_le()))
            }
            TAG_TEXT => String::decode(buf).map(Value::Text),
            TAG_ID => Identifier::decode(buf).map(Value::Id),
            tag => Err(ArborError::corruption(format!("unknown value tag {tag}"))),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_LIST);
        buf.put_u32_le(self.len() as u32);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        expect_tag(buf, TAG_LIST, "list")?;
        let count = get_u32(buf, "list length")? as usize;
        // Every element carries at least its tag byte.
        ensure_remaining(buf, count, "list elements")?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            None => buf.put_u8(TAG_NONE),
            Some(value) => {
                buf.put_u8(TAG_SOME);
                value.encode(buf);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        ensure_remaining(buf, 1, "option tag")?;
        match buf.get_u8() {
            TAG_NONE => Ok(None),
            TAG_SOME => T::decode(buf).map(Some),
            tag => Err(ArborError::corruption(format!("invalid option tag {tag}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_identifier_layout() {
        let bytes = to_bytes(&Identifier::parse("a/bc"));
        assert_eq!(bytes[0], TAG_ID);
        assert_eq!(&bytes[1..5], &2u32.to_le_bytes());
        let back: Identifier = from_bytes(&bytes).unwrap();
        assert_eq!(back, Identifier::parse("a/bc"));
    }

    #[test]
    fn test_value_variants_decode() {
        for value in [
            Value::Bool(true),
            Value::Int(-42),
            Value::Float(1.5),
            Value::text("hello"),
            Value::Id(Identifier::parse("x/y")),
        ] {
            let back: Value = from_bytes(&to_bytes(&value)).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_tag_mismatch_is_corruption() {
        let bytes = to_bytes(&7u64);
        let err = from_bytes::<String>(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Corruption);
    }

    #[test]
    fn test_unknown_value_tag_is_corruption() {
        let err = from_bytes::<Value>(&[0xEE, 0, 0]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Corruption);
        assert!(err.to_string().contains("unknown value tag"));
    }

    #[test]
    fn test_truncated_string() {
        let mut bytes = to_bytes(&"abcdef".to_string()).to_vec();
        bytes.truncate(bytes.len() - 2);
        assert!(from_bytes::<String>(&bytes).is_err());
    }

    #[test]
    fn test_nested_list_and_option() {
        let value: Vec<Option<Identifier>> = vec![Some(Identifier::parse("a/b")), None];
        let back: Vec<Option<Identifier>> = from_bytes(&to_bytes(&value)).unwrap();
        assert_eq!(back, value);

        let mut forged = to_bytes(&value).to_vec();
        forged[5] = 0x42;
        assert!(from_bytes::<Vec<Option<Identifier>>>(&forged).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = to_bytes(&1i64).to_vec();
        bytes.push(0);
        assert!(from_bytes::<i64>(&bytes).is_err());
    }
}
