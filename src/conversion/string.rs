//! Text-like types: text, varchar, bpchar, name, json and jsonb.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

use super::{Codec, checked_text, mismatch, utf8};

/// Leading byte of the binary jsonb representation.
const JSONB_VERSION: u8 = 1;

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    for (oid, name) in [
        (oid::TEXT, "text"),
        (oid::VARCHAR, "varchar"),
        (oid::BPCHAR, "bpchar"),
        (oid::NAME, "name"),
    ] {
        codecs.insert(
            oid,
            Codec {
                name,
                encode: encode_text,
                decode_text: decode_text,
                decode_binary: Some(decode_text),
            },
        );
    }
    codecs.insert(
        oid::JSON,
        Codec {
            name: "json",
            encode: encode_json,
            decode_text: decode_json,
            decode_binary: Some(decode_json),
        },
    );
    codecs.insert(
        oid::JSONB,
        Codec {
            name: "jsonb",
            encode: encode_json,
            decode_text: decode_jsonb_text,
            decode_binary: Some(decode_jsonb_binary),
        },
    );
}

/// Binary text is the raw UTF-8 bytes, identical to the text form.
fn encode_text(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let s = match value {
        Value::Text(s)
        | Value::Untyped(s)
        | Value::Numeric(s)
        | Value::Json(s)
        | Value::Jsonb(s) => s.as_str(),
        Value::Bytea(bytes) => simdutf8::basic::from_utf8(bytes).map_err(|_| {
            Error::BindValueInvalid("bytes bound to a text type are not valid UTF-8".to_string())
        })?,
        other => return Err(mismatch(other, target)),
    };
    Ok((FormatCode::Binary, checked_text(s)?.as_bytes().to_vec()))
}

fn encode_json(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let s = match value {
        Value::Json(s) | Value::Jsonb(s) | Value::Text(s) | Value::Untyped(s) => checked_text(s)?,
        other => return Err(mismatch(other, target)),
    };
    let mut bytes = Vec::with_capacity(s.len() + 1);
    if target == oid::JSONB {
        bytes.push(JSONB_VERSION);
    }
    bytes.extend_from_slice(s.as_bytes());
    Ok((FormatCode::Binary, bytes))
}

fn decode_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Text(utf8(bytes)?.to_string()))
}

fn decode_json(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Json(utf8(bytes)?.to_string()))
}

fn decode_jsonb_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Jsonb(utf8(bytes)?.to_string()))
}

fn decode_jsonb_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    match bytes.split_first() {
        Some((&JSONB_VERSION, body)) => Ok(Value::Jsonb(utf8(body)?.to_string())),
        Some((version, _)) => Err(Error::Decode(format!(
            "unsupported jsonb version {version}"
        ))),
        None => Err(Error::Decode("empty jsonb value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_family() {
        assert_eq!(
            decode_text(oid::VARCHAR, "héllo".as_bytes()).unwrap(),
            Value::Text("héllo".into())
        );
        assert!(decode_text(oid::TEXT, &[0xff, 0xfe]).is_err());
        assert!(encode_text(&Value::Int4(1), oid::TEXT).is_err());
    }

    #[test]
    fn test_jsonb_version_byte() {
        let (format, bytes) = encode_json(&Value::Jsonb("[1]".into()), oid::JSONB).unwrap();
        assert_eq!(format, FormatCode::Binary);
        assert_eq!(bytes, b"\x01[1]");
        assert_eq!(
            decode_jsonb_binary(oid::JSONB, &bytes).unwrap(),
            Value::Jsonb("[1]".into())
        );
        assert!(decode_jsonb_binary(oid::JSONB, b"\x02[1]").is_err());
        assert!(decode_jsonb_binary(oid::JSONB, b"").is_err());

        let (_, json) = encode_json(&Value::Json("{}".into()), oid::JSON).unwrap();
        assert_eq!(json, b"{}");
    }
}
