//! bytea.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

use super::{Codec, text_fallback};

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    codecs.insert(
        oid::BYTEA,
        Codec {
            name: "bytea",
            encode: encode_bytea,
            decode_text: decode_bytea_text,
            decode_binary: Some(decode_bytea_binary),
        },
    );
}

fn encode_bytea(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    match value {
        Value::Bytea(bytes) => Ok((FormatCode::Binary, bytes.clone())),
        // `\x...` or escape syntax, parsed by the server
        other => text_fallback(other, target),
    }
}

fn decode_bytea_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Bytea(bytes.to_vec()))
}

/// Accepts both output formats: `\x` hex (the default since 9.0) and the
/// older escape format.
fn decode_bytea_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let decoded = match bytes.strip_prefix(b"\\x") {
        Some(hex) => decode_hex(hex)?,
        None => decode_escape(bytes)?,
    };
    Ok(Value::Bytea(decoded))
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("bytea: odd number of hex digits".to_string()));
    }
    hex.chunks_exact(2)
        .map(|pair| Ok((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?))
        .collect()
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("bytea: invalid hex digit {:?}", b as char))),
    }
}

/// `\\` is a backslash and `\ooo` an octal byte; everything else is literal.
fn decode_escape(text: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] != b'\\' {
            out.push(text[i]);
            i += 1;
            continue;
        }
        match text.get(i + 1..i + 4) {
            _ if text.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(octal) if octal.iter().all(|b| (b'0'..=b'7').contains(b)) => {
                let value = octal
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                let byte = u8::try_from(value)
                    .map_err(|_| Error::Decode(format!("bytea: octal escape {value} out of range")))?;
                out.push(byte);
                i += 4;
            }
            _ => return Err(Error::Decode("bytea: invalid escape sequence".to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(
            decode_bytea_text(oid::BYTEA, b"\\xDEADbeef").unwrap(),
            Value::Bytea(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(
            decode_bytea_text(oid::BYTEA, b"\\x").unwrap(),
            Value::Bytea(vec![])
        );
        assert!(decode_bytea_text(oid::BYTEA, b"\\xabc").is_err());
        assert!(decode_bytea_text(oid::BYTEA, b"\\xzz").is_err());
    }

    #[test]
    fn test_escape_format() {
        assert_eq!(
            decode_bytea_text(oid::BYTEA, b"a\\\\b\\000\\377").unwrap(),
            Value::Bytea(vec![b'a', b'\\', b'b', 0, 255])
        );
        assert!(decode_bytea_text(oid::BYTEA, b"\\9").is_err());
    }
}
