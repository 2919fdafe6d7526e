//! Tagged byte encoding of leaf values.
//!
//! Every stored value starts with one tag byte naming its encoding, so it
//! can be decoded without a schema:
//!
//! | Tag    | Encoding | Payload |
//! |--------|----------|---------|
//! | `0x00` | unknown  | rejected |
//! | `0x01` | raw      | kind byte, then the primitive (little-endian) |
//! | `0x02` | binary   | opaque bytes |
//! | `0x03` | text     | UTF-8 |
//! | `0x04` | proto    | protobuf message, decoded as opaque bytes |
//! | `0x05` | JSON     | JSON document |

use lorastack_core::Error;

use crate::errors::{ERR_INVALID_DATA, ERR_UNKNOWN_ENCODING};
use crate::flatten::{Diff, Fields};
use crate::value::Value;

/// Encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Unknown = 0x00,
    Raw = 0x01,
    Binary = 0x02,
    Text = 0x03,
    Proto = 0x04,
    Json = 0x05,
}

impl Encoding {
    const fn from_tag(tag: u8) -> Self {
        match tag {
            0x01 => Self::Raw,
            0x02 => Self::Binary,
            0x03 => Self::Text,
            0x04 => Self::Proto,
            0x05 => Self::Json,
            _ => Self::Unknown,
        }
    }
}

const KIND_BOOL: u8 = 1;
const KIND_INT: u8 = 2;
const KIND_UINT: u8 = 3;
const KIND_FLOAT: u8 = 4;

/// Byte-encoded fields.
pub type ByteFields = std::collections::BTreeMap<String, Vec<u8>>;

fn raw(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(Encoding::Raw as u8);
    out.push(kind);
    out.extend_from_slice(payload);
    out
}

fn tagged(encoding: Encoding, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(encoding as u8);
    out.extend_from_slice(payload);
    out
}

/// Encode one value.
pub fn encode(value: &Value) -> Result<Vec<u8>, Error> {
    Ok(match value {
        Value::Null => {
            return Err(ERR_INVALID_DATA.with_attribute("reason", "null value"));
        }
        Value::Bool(b) => raw(KIND_BOOL, &[u8::from(*b)]),
        Value::Int(i) => raw(KIND_INT, &i.to_le_bytes()),
        Value::Uint(u) => raw(KIND_UINT, &u.to_le_bytes()),
        Value::Float(f) => raw(KIND_FLOAT, &f.to_bits().to_le_bytes()),
        Value::String(s) => tagged(Encoding::Text, s.as_bytes()),
        Value::Bytes(b) => tagged(Encoding::Binary, b),
        Value::List(_) | Value::Map(_) => tagged(Encoding::Json, &serde_json::to_vec(value)?),
    })
}

/// Encode a protobuf message as an opaque proto leaf.
pub fn encode_proto<M: prost::Message>(message: &M) -> Vec<u8> {
    tagged(Encoding::Proto, &message.encode_to_vec())
}

fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N], Error> {
    payload
        .try_into()
        .map_err(|_| ERR_INVALID_DATA.with_attribute("reason", format!("expected {N} bytes")))
}

fn decode_raw(payload: &[u8]) -> Result<Value, Error> {
    let Some((&kind, rest)) = payload.split_first() else {
        return Err(ERR_INVALID_DATA.with_attribute("reason", "missing raw kind"));
    };
    Ok(match kind {
        KIND_BOOL => Value::Bool(fixed::<1>(rest)?[0] != 0),
        KIND_INT => Value::Int(i64::from_le_bytes(fixed(rest)?)),
        KIND_UINT => Value::Uint(u64::from_le_bytes(fixed(rest)?)),
        KIND_FLOAT => Value::Float(f64::from_bits(u64::from_le_bytes(fixed(rest)?))),
        other => {
            return Err(ERR_INVALID_DATA.with_attribute("reason", format!("unknown raw kind {other}")));
        }
    })
}

/// Decode one value stored at `path`.
pub fn decode(path: &str, bytes: &[u8]) -> Result<Value, Error> {
    let Some((&tag, payload)) = bytes.split_first() else {
        return Err(ERR_INVALID_DATA.with_attribute("reason", format!("empty value at `{path}`")));
    };
    match Encoding::from_tag(tag) {
        Encoding::Raw => decode_raw(payload),
        Encoding::Binary | Encoding::Proto => Ok(Value::Bytes(payload.to_vec())),
        Encoding::Text => String::from_utf8(payload.to_vec())
            .map(Value::String)
            .map_err(|e| ERR_INVALID_DATA.with_attribute("reason", e.to_string())),
        Encoding::Json => Ok(serde_json::from_slice(payload)?),
        Encoding::Unknown => Err(ERR_UNKNOWN_ENCODING
            .with_attribute("tag", format!("{tag:#04x}"))
            .with_attribute("path", path)),
    }
}

pub fn encode_fields(fields: &Fields) -> Result<ByteFields, Error> {
    fields
        .iter()
        .map(|(path, value)| Ok((path.clone(), encode(value)?)))
        .collect()
}

pub fn decode_fields(fields: &ByteFields) -> Result<Fields, Error> {
    fields
        .iter()
        .map(|(path, bytes)| Ok((path.clone(), decode(path, bytes)?)))
        .collect()
}

pub fn encode_diff(diff: &Diff<Value>) -> Result<Diff<Vec<u8>>, Error> {
    diff.iter()
        .map(|(path, value)| Ok((path.clone(), value.as_ref().map(encode).transpose()?)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn leaves_carry_their_tag() {
        assert_eq!(encode(&Value::Bool(true)).unwrap(), [0x01, KIND_BOOL, 1]);
        assert_eq!(
            encode(&Value::Uint(0x0102)).unwrap(),
            [0x01, KIND_UINT, 2, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(encode(&Value::from("ab")).unwrap(), [0x03, b'a', b'b']);
        assert_eq!(encode(&Value::Bytes(vec![9])).unwrap(), [0x02, 9]);
    }

    #[test]
    fn decodes_each_encoding() {
        for value in [
            Value::Bool(true),
            Value::Int(-42),
            Value::Uint(u64::MAX),
            Value::Float(2.5),
            Value::from("gateway"),
            Value::Bytes(vec![0, 1, 2]),
        ] {
            let bytes = encode(&value).unwrap();
            assert_eq!(decode("p", &bytes).unwrap(), value);
        }
        let json = decode("p", b"\x05{\"a\":\"b\"}").unwrap();
        assert_eq!(json.as_map().unwrap()["a"], Value::from("b"));
    }

    #[test]
    fn proto_leaves_decode_as_bytes() {
        let details = sample_details();
        let bytes = encode_proto(&details);
        assert_eq!(bytes[0], 0x04);
        assert_eq!(decode("p", &bytes).unwrap(), Value::Bytes(bytes[1..].to_vec()));
    }

    fn sample_details() -> lorastack_core::errors::ErrorDetails {
        lorastack_core::errors::ErrorDetails {
            namespace: "pkg/store".to_string(),
            name: "example".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = decode("attributes.x", &[0x00, 1]).unwrap_err();
        assert!(err.is(&ERR_UNKNOWN_ENCODING));
        assert!(decode("p", &[0x09]).is_err());
        assert!(decode("p", &[]).is_err());
        assert!(decode("p", &[0x01, KIND_INT, 1]).is_err());
    }
}
