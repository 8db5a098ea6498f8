//! uuid, mapped to the `uuid` crate.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

use super::{Codec, text_fallback, utf8};

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    codecs.insert(
        oid::UUID,
        Codec {
            name: "uuid",
            encode: encode_uuid,
            decode_text: decode_uuid_text,
            decode_binary: Some(decode_uuid_binary),
        },
    );
}

fn encode_uuid(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    match value {
        Value::Uuid(u) => Ok((FormatCode::Binary, u.as_bytes().to_vec())),
        other => text_fallback(other, target),
    }
}

fn decode_uuid_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    uuid::Uuid::parse_str(s)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid {s:?}: {e}")))
}

fn decode_uuid_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    uuid::Uuid::from_slice(bytes)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_text() {
        let value = decode_uuid_text(oid::UUID, b"a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11").unwrap();
        assert_eq!(
            value,
            Value::Uuid(uuid::Uuid::from_u128(0xa0eebc99_9c0b_4ef8_bb6d_6bb9bd380a11))
        );
        assert!(decode_uuid_text(oid::UUID, b"not-a-uuid").is_err());
    }

    #[test]
    fn test_uuid_binary_length() {
        assert!(decode_uuid_binary(oid::UUID, &[0; 15]).is_err());
        let (format, bytes) = encode_uuid(&Value::Uuid(uuid::Uuid::nil()), oid::UUID).unwrap();
        assert_eq!(format, FormatCode::Binary);
        assert_eq!(bytes, [0; 16]);
    }

    #[test]
    fn test_text_bound_as_uuid() {
        let (format, bytes) =
            encode_uuid(&Value::Text("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11".into()), oid::UUID)
                .unwrap();
        assert_eq!(format, FormatCode::Text);
        assert_eq!(bytes.len(), 36);
    }
}
