//! Entries of a property index.

use arbor_common::codec::{self, Decode, Encode};
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::Identifier;
use bytes::{Buf, BufMut, BytesMut};

const POSTING_SINGLE: u8 = 0x31;
const POSTING_SET: u8 = 0x2A;

/// The identifiers recorded for one property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Posting {
    /// Exactly one object carries the value.
    Single(Identifier),
    /// Several objects carry it; the payload names the satellite tree holding
    /// their identifiers.
    Set(Identifier),
}

impl Encode for Posting {
    fn encode(&self, buf: &mut BytesMut) {
        let (kind, id) = match self {
            Self::Single(id) => (POSTING_SINGLE, id),
            Self::Set(id) => (POSTING_SET, id),
        };
        buf.put_u8(kind);
        id.encode(buf);
    }
}

impl Decode for Posting {
    fn decode<B: Buf>(buf: &mut B) -> ArborResult<Self> {
        codec::ensure_remaining(buf, 1, "posting kind")?;
        match buf.get_u8() {
            POSTING_SINGLE => Ok(Self::Single(Identifier::decode(buf)?)),
            POSTING_SET => Ok(Self::Set(Identifier::decode(buf)?)),
            other => Err(ArborError::corruption(format!(
                "unknown posting kind {other:#04x}"
            ))),
        }
    }
}
