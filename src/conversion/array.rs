//! One-dimensional arrays of the registered scalar types.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::{Array, Value};

use super::{Codec, encode_as, text_fallback, utf8};

/// (array oid, element oid, array type name)
const ARRAY_TYPES: [(Oid, Oid, &str); 20] = [
    (oid::BOOL_ARRAY, oid::BOOL, "_bool"),
    (oid::BYTEA_ARRAY, oid::BYTEA, "_bytea"),
    (oid::NAME_ARRAY, oid::NAME, "_name"),
    (oid::INT2_ARRAY, oid::INT2, "_int2"),
    (oid::INT4_ARRAY, oid::INT4, "_int4"),
    (oid::INT8_ARRAY, oid::INT8, "_int8"),
    (oid::OID_ARRAY, oid::OID, "_oid"),
    (oid::TEXT_ARRAY, oid::TEXT, "_text"),
    (oid::BPCHAR_ARRAY, oid::BPCHAR, "_bpchar"),
    (oid::VARCHAR_ARRAY, oid::VARCHAR, "_varchar"),
    (oid::FLOAT4_ARRAY, oid::FLOAT4, "_float4"),
    (oid::FLOAT8_ARRAY, oid::FLOAT8, "_float8"),
    (oid::NUMERIC_ARRAY, oid::NUMERIC, "_numeric"),
    (oid::DATE_ARRAY, oid::DATE, "_date"),
    (oid::TIME_ARRAY, oid::TIME, "_time"),
    (oid::TIMESTAMP_ARRAY, oid::TIMESTAMP, "_timestamp"),
    (oid::TIMESTAMPTZ_ARRAY, oid::TIMESTAMPTZ, "_timestamptz"),
    (oid::UUID_ARRAY, oid::UUID, "_uuid"),
    (oid::JSON_ARRAY, oid::JSON, "_json"),
    (oid::JSONB_ARRAY, oid::JSONB, "_jsonb"),
];

/// Array type whose elements are `element`.
pub fn array_oid_of(element: Oid) -> Option<Oid> {
    ARRAY_TYPES
        .iter()
        .find(|(_, elem, _)| *elem == element)
        .map(|(array, _, _)| *array)
}

/// Element type of the array type `array`.
pub fn element_oid_of(array: Oid) -> Option<Oid> {
    ARRAY_TYPES
        .iter()
        .find(|(arr, _, _)| *arr == array)
        .map(|(_, elem, _)| *elem)
}

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    for (array, _, name) in ARRAY_TYPES {
        codecs.insert(
            array,
            Codec {
                name,
                encode: encode_array,
                decode_text: decode_array_text,
                decode_binary: Some(decode_array_binary),
            },
        );
    }
}

fn encode_array(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let Value::Array(array) = value else {
        return text_fallback(value, target);
    };
    let element_oid = element_oid_of(target).ok_or_else(|| super::mismatch(value, target))?;
    let len = i32::try_from(array.elements.len())
        .map_err(|_| Error::BindValueInvalid("array has too many elements".to_string()))?;

    let mut encoded = Vec::with_capacity(array.elements.len());
    for element in &array.elements {
        if let Value::Array(_) = element {
            return Err(Error::BindValueInvalid(
                "multi-dimensional arrays are not supported".to_string(),
            ));
        }
        encoded.push(encode_as(element, element_oid)?);
    }

    let text_elements = encoded
        .iter()
        .filter(|p| !p.is_null() && p.format == FormatCode::Text)
        .count();
    let non_null = encoded.iter().filter(|p| !p.is_null()).count();
    if text_elements > 0 && text_elements != non_null {
        return Err(Error::BindValueInvalid(
            "array elements mix text and binary encodings".to_string(),
        ));
    }

    if text_elements > 0 {
        let mut out = Vec::new();
        if array.lower_bound != 1 && len > 0 {
            let upper = array.lower_bound + len - 1;
            out.extend_from_slice(format!("[{}:{}]=", array.lower_bound, upper).as_bytes());
        }
        out.push(b'{');
        for (i, param) in encoded.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            match &param.payload {
                None => out.extend_from_slice(b"NULL"),
                Some(bytes) => {
                    out.push(b'"');
                    for &b in bytes {
                        if b == b'"' || b == b'\\' {
                            out.push(b'\\');
                        }
                        out.push(b);
                    }
                    out.push(b'"');
                }
            }
        }
        out.push(b'}');
        return Ok((FormatCode::Text, out));
    }

    let has_null = encoded.iter().any(|p| p.is_null());
    let mut out = Vec::new();
    out.extend_from_slice(&i32::from(len > 0).to_be_bytes());
    out.extend_from_slice(&i32::from(has_null).to_be_bytes());
    out.extend_from_slice(&element_oid.to_be_bytes());
    if len > 0 {
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&array.lower_bound.to_be_bytes());
    }
    for param in &encoded {
        match &param.payload {
            None => out.extend_from_slice(&(-1_i32).to_be_bytes()),
            Some(bytes) => {
                let size = i32::try_from(bytes.len()).map_err(|_| {
                    Error::BindValueInvalid("array element is too large".to_string())
                })?;
                out.extend_from_slice(&size.to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
    Ok((FormatCode::Binary, out))
}

fn multi_dimensional() -> Error {
    Error::Decode("multi-dimensional arrays are not supported".to_string())
}

fn malformed(text: &str) -> Error {
    Error::Decode(format!("malformed array literal: {text:?}"))
}

/// Parses `{a,"b c",NULL}` with an optional `[lower:upper]=` prefix.
fn decode_array_text(array_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let element_oid = element_oid_of(array_oid).unwrap_or(oid::TEXT);
    let text = utf8(bytes)?;
    let mut rest = text.trim_start();
    let mut lower_bound = 1;

    if let Some(dims) = rest.strip_prefix('[') {
        let (bounds, after) = dims.split_once(']').ok_or_else(|| malformed(text))?;
        if after.starts_with('[') {
            return Err(multi_dimensional());
        }
        let (lower, _) = bounds.split_once(':').ok_or_else(|| malformed(text))?;
        lower_bound = lower.trim().parse().map_err(|_| malformed(text))?;
        rest = after.strip_prefix('=').ok_or_else(|| malformed(text))?;
    }

    let body = rest.strip_prefix('{').ok_or_else(|| malformed(text))?;
    let mut chars = body.char_indices().peekable();
    let mut elements = Vec::new();

    if body.trim_start().starts_with('}') {
        if !body.trim_start()[1..].trim().is_empty() {
            return Err(malformed(text));
        }
        return Ok(Value::Array(Array {
            element_oid,
            lower_bound,
            elements,
        }));
    }

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let mut item = String::new();
        let quoted = match chars.peek() {
            Some((_, '{')) => return Err(multi_dimensional()),
            Some((_, '"')) => {
                chars.next();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => {
                            let (_, escaped) = chars.next().ok_or_else(|| malformed(text))?;
                            item.push(escaped);
                        }
                        Some((_, '"')) => break,
                        Some((_, c)) => item.push(c),
                        None => return Err(malformed(text)),
                    }
                }
                true
            }
            _ => {
                while let Some((_, c)) = chars.next_if(|(_, c)| *c != ',' && *c != '}') {
                    if c == '\\' {
                        let (_, escaped) = chars.next().ok_or_else(|| malformed(text))?;
                        item.push(escaped);
                    } else {
                        item.push(c);
                    }
                }
                let trimmed = item.trim_end().len();
                item.truncate(trimmed);
                if item.is_empty() {
                    return Err(malformed(text));
                }
                false
            }
        };

        let element = if !quoted && item.eq_ignore_ascii_case("NULL") {
            Value::Null
        } else {
            super::decode(element_oid, FormatCode::Text, Some(item.as_bytes()))?
        };
        elements.push(element);

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some((_, ',')) => continue,
            Some((pos, '}')) => {
                if !body[pos + 1..].trim().is_empty() {
                    return Err(malformed(text));
                }
                break;
            }
            _ => return Err(malformed(text)),
        }
    }

    Ok(Value::Array(Array {
        element_oid,
        lower_bound,
        elements,
    }))
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if bytes.len() < n {
        return Err(Error::Decode("truncated array".to_string()));
    }
    let (head, tail) = bytes.split_at(n);
    *bytes = tail;
    Ok(head)
}

fn take_i32(bytes: &mut &[u8]) -> Result<i32> {
    let head = take(bytes, 4)?;
    Ok(i32::from_be_bytes([head[0], head[1], head[2], head[3]]))
}

fn decode_array_binary(_array_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let mut cursor = bytes;
    let ndim = take_i32(&mut cursor)?;
    let _flags = take_i32(&mut cursor)?;
    let element_oid = take_i32(&mut cursor)? as Oid;

    match ndim {
        0 => {
            return Ok(Value::Array(Array::new(element_oid, Vec::new())));
        }
        1 => {}
        n if n > 1 => return Err(multi_dimensional()),
        n => return Err(Error::Decode(format!("invalid array dimension count {n}"))),
    }

    let len = take_i32(&mut cursor)?;
    let lower_bound = take_i32(&mut cursor)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::Decode(format!("invalid array length {len}")))?;

    let mut elements = Vec::with_capacity(len.min(cursor.len() / 4));
    for _ in 0..len {
        let size = take_i32(&mut cursor)?;
        let element = if size < 0 {
            Value::Null
        } else {
            let cell = take(&mut cursor, size as usize)?;
            super::decode(element_oid, FormatCode::Binary, Some(cell))?
        };
        elements.push(element);
    }
    if !cursor.is_empty() {
        return Err(Error::Decode(format!(
            "{} trailing bytes after array",
            cursor.len()
        )));
    }

    Ok(Value::Array(Array {
        element_oid,
        lower_bound,
        elements,
    }))
}
