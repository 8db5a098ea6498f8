//! Encoding of [`Value`]s into parameters and decoding of result cells.
//!
//! Every supported type oid maps to a [`Codec`] in a process-wide registry
//! that is built once and never mutated. Text decoding exists for every
//! registered type; binary decoding exists where a codec provides one, and
//! result columns are only requested in binary for those types.

mod array;
mod bytes;
mod numeric;
mod primitives;
mod string;
mod time;
mod uuid;

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::params::BoundParameter;
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

pub use array::{array_oid_of, element_oid_of};
pub use numeric::numeric_to_string;

/// Encodes a value for the codec's oid (the second argument).
pub(crate) type EncodeFn = fn(&Value, Oid) -> Result<(FormatCode, Vec<u8>)>;

/// Decodes a non-NULL cell of the given oid.
pub(crate) type DecodeFn = fn(Oid, &[u8]) -> Result<Value>;

/// Conversion functions for one type oid.
#[derive(Clone, Copy)]
pub(crate) struct Codec {
    pub name: &'static str,
    pub encode: EncodeFn,
    pub decode_text: DecodeFn,
    pub decode_binary: Option<DecodeFn>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("name", &self.name)
            .field("binary", &self.decode_binary.is_some())
            .finish()
    }
}

static REGISTRY: LazyLock<HashMap<Oid, Codec>> = LazyLock::new(|| {
    let mut codecs = HashMap::new();
    primitives::register(&mut codecs);
    numeric::register(&mut codecs);
    string::register(&mut codecs);
    bytes::register(&mut codecs);
    time::register(&mut codecs);
    uuid::register(&mut codecs);
    array::register(&mut codecs);
    codecs
});

pub(crate) fn codec(oid: Oid) -> Option<&'static Codec> {
    REGISTRY.get(&oid)
}

/// Name of a registered type, e.g. `"int4"`.
pub fn type_name(oid: Oid) -> Option<&'static str> {
    codec(oid).map(|c| c.name)
}

/// Returns true if cells of this type can be requested in binary format.
pub fn has_binary_decoder(oid: Oid) -> bool {
    codec(oid).is_some_and(|c| c.decode_binary.is_some())
}

/// Encode a value with its natural type.
pub fn encode(value: &Value) -> Result<BoundParameter> {
    encode_as(value, value.type_oid())
}

/// Encode a value for an explicit target type.
///
/// Narrowing is range-checked and strings bound to non-text types are sent
/// as text for the server to parse. Anything that cannot be represented
/// exactly fails with [`Error::BindValueInvalid`].
pub fn encode_as(value: &Value, target: Oid) -> Result<BoundParameter> {
    match value {
        Value::Null => return Ok(BoundParameter::null(target)),
        Value::Unknown { oid, format, bytes } => {
            return Ok(BoundParameter {
                oid: if target == oid::UNSPECIFIED { *oid } else { target },
                format: *format,
                payload: Some(bytes.clone()),
            });
        }
        _ => {}
    }

    if target == oid::UNSPECIFIED {
        return match value {
            Value::Text(s) | Value::Untyped(s) => Ok(BoundParameter {
                oid: oid::UNSPECIFIED,
                format: FormatCode::Text,
                payload: Some(checked_text(s)?.as_bytes().to_vec()),
            }),
            other if other.type_oid() != oid::UNSPECIFIED => {
                let mut param = encode_as(other, other.type_oid())?;
                param.oid = oid::UNSPECIFIED;
                Ok(param)
            }
            other => Err(Error::BindValueInvalid(format!(
                "cannot infer a type for {} value",
                other.variant_name()
            ))),
        };
    }

    match codec(target) {
        Some(codec) => {
            let (format, payload) = (codec.encode)(value, target)?;
            Ok(BoundParameter {
                oid: target,
                format,
                payload: Some(payload),
            })
        }
        None => {
            let (format, payload) = text_fallback(value, target)?;
            Ok(BoundParameter {
                oid: target,
                format,
                payload: Some(payload),
            })
        }
    }
}

/// Decode one cell. `None` is SQL NULL and decodes to [`Value::Null`].
///
/// Unregistered types, and binary cells of types without a binary decoder,
/// come back as [`Value::Unknown`].
pub fn decode(oid: Oid, format: FormatCode, cell: Option<&[u8]>) -> Result<Value> {
    let Some(bytes) = cell else {
        return Ok(Value::Null);
    };
    let unknown = || Value::Unknown {
        oid,
        format,
        bytes: bytes.to_vec(),
    };
    let Some(codec) = codec(oid) else {
        return Ok(unknown());
    };
    match format {
        FormatCode::Text => (codec.decode_text)(oid, bytes),
        FormatCode::Binary => match codec.decode_binary {
            Some(decode_binary) => decode_binary(oid, bytes),
            None => Ok(unknown()),
        },
    }
}

/// Strings bound to any type are sent as text and parsed by the server.
pub(crate) fn text_fallback(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    match value {
        Value::Text(s) | Value::Untyped(s) => {
            Ok((FormatCode::Text, checked_text(s)?.as_bytes().to_vec()))
        }
        other => Err(mismatch(other, target)),
    }
}

pub(crate) fn mismatch(value: &Value, target: Oid) -> Error {
    Error::BindValueInvalid(format!(
        "cannot bind {} value as {} (oid {})",
        value.variant_name(),
        type_name(target).unwrap_or("unknown type"),
        target
    ))
}

/// Text payloads cannot carry NUL.
pub(crate) fn checked_text(s: &str) -> Result<&str> {
    if memchr::memchr(0, s.as_bytes()).is_some() {
        return Err(Error::BindValueInvalid(
            "text value contains a NUL byte".to_string(),
        ));
    }
    Ok(s)
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes)
        .map_err(|_| Error::Decode("cell is not valid UTF-8".to_string()))
}

pub(crate) fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::Decode(format!(
            "invalid {} length: {} (expected {})",
            what,
            bytes.len(),
            N
        ))
    })
}
