//! bool, integer, oid and floating point types.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

use super::{Codec, fixed, mismatch, text_fallback, utf8};

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    codecs.insert(
        oid::BOOL,
        Codec {
            name: "bool",
            encode: encode_bool,
            decode_text: decode_bool_text,
            decode_binary: Some(decode_bool_binary),
        },
    );
    for (oid, name) in [
        (oid::INT2, "int2"),
        (oid::INT4, "int4"),
        (oid::INT8, "int8"),
        (oid::OID, "oid"),
    ] {
        codecs.insert(
            oid,
            Codec {
                name,
                encode: encode_int,
                decode_text: decode_int_text,
                decode_binary: Some(decode_int_binary),
            },
        );
    }
    for (oid, name) in [(oid::FLOAT4, "float4"), (oid::FLOAT8, "float8")] {
        codecs.insert(
            oid,
            Codec {
                name,
                encode: encode_float,
                decode_text: decode_float_text,
                decode_binary: Some(decode_float_binary),
            },
        );
    }
}

fn encode_bool(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    match value {
        Value::Bool(v) => Ok((FormatCode::Binary, vec![u8::from(*v)])),
        other => text_fallback(other, target),
    }
}

fn decode_bool_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    match bytes {
        b"t" | b"true" => Ok(Value::Bool(true)),
        b"f" | b"false" => Ok(Value::Bool(false)),
        _ => Err(Error::Decode(format!(
            "invalid bool: {:?}",
            String::from_utf8_lossy(bytes)
        ))),
    }
}

fn decode_bool_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let [b] = fixed::<1>(bytes, "bool")?;
    Ok(Value::Bool(b != 0))
}

fn out_of_range(value: i64, target: Oid) -> Error {
    Error::BindValueInvalid(format!(
        "{} is out of range for {}",
        value,
        super::type_name(target).unwrap_or("integer")
    ))
}

fn encode_int(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let Some(wide) = value.as_i64() else {
        return text_fallback(value, target);
    };
    let bytes = match target {
        oid::INT2 => i16::try_from(wide)
            .map_err(|_| out_of_range(wide, target))?
            .to_be_bytes()
            .to_vec(),
        oid::INT4 => i32::try_from(wide)
            .map_err(|_| out_of_range(wide, target))?
            .to_be_bytes()
            .to_vec(),
        oid::INT8 => wide.to_be_bytes().to_vec(),
        oid::OID => u32::try_from(wide)
            .map_err(|_| out_of_range(wide, target))?
            .to_be_bytes()
            .to_vec(),
        _ => return Err(mismatch(value, target)),
    };
    Ok((FormatCode::Binary, bytes))
}

fn decode_int_text(oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let invalid = |_| Error::Decode(format!("invalid integer: {s:?}"));
    Ok(match oid {
        oid::INT2 => Value::Int2(s.parse().map_err(invalid)?),
        oid::INT4 => Value::Int4(s.parse().map_err(invalid)?),
        oid::OID => Value::Int8(i64::from(s.parse::<u32>().map_err(invalid)?)),
        _ => Value::Int8(s.parse().map_err(invalid)?),
    })
}

fn decode_int_binary(oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(match oid {
        oid::INT2 => Value::Int2(i16::from_be_bytes(fixed(bytes, "int2")?)),
        oid::INT4 => Value::Int4(i32::from_be_bytes(fixed(bytes, "int4")?)),
        oid::OID => Value::Int8(i64::from(u32::from_be_bytes(fixed(bytes, "oid")?))),
        _ => Value::Int8(i64::from_be_bytes(fixed(bytes, "int8")?)),
    })
}

fn encode_float(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let wide = match value {
        Value::Float4(v) => f64::from(*v),
        Value::Float8(v) => *v,
        Value::Int2(v) => f64::from(*v),
        Value::Int4(v) => f64::from(*v),
        Value::Int8(v) => {
            let converted = *v as f64;
            // through i128: `as i64` saturates, hiding 2^63 != i64::MAX
            if converted as i128 != i128::from(*v) {
                return Err(Error::BindValueInvalid(format!(
                    "{v} cannot be represented exactly as a float"
                )));
            }
            converted
        }
        other => return text_fallback(other, target),
    };
    if target == oid::FLOAT4 {
        let narrow = wide as f32;
        if !wide.is_nan() && f64::from(narrow) != wide {
            return Err(Error::BindValueInvalid(format!(
                "{wide} cannot be represented exactly as float4"
            )));
        }
        return Ok((FormatCode::Binary, narrow.to_be_bytes().to_vec()));
    }
    Ok((FormatCode::Binary, wide.to_be_bytes().to_vec()))
}

fn decode_float_text(oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let wide = match s {
        "NaN" => f64::NAN,
        "Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => s
            .parse::<f64>()
            .map_err(|_| Error::Decode(format!("invalid float: {s:?}")))?,
    };
    Ok(if oid == oid::FLOAT4 {
        Value::Float4(wide as f32)
    } else {
        Value::Float8(wide)
    })
}

fn decode_float_binary(oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(if oid == oid::FLOAT4 {
        Value::Float4(f32::from_be_bytes(fixed(bytes, "float4")?))
    } else {
        Value::Float8(f64::from_be_bytes(fixed(bytes, "float8")?))
    })
}
