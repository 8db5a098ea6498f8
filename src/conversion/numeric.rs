//! NUMERIC, carried as exact decimal text.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

use super::{Codec, checked_text, mismatch, utf8};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    codecs.insert(
        oid::NUMERIC,
        Codec {
            name: "numeric",
            encode: encode_numeric,
            decode_text: decode_numeric_text,
            decode_binary: Some(decode_numeric_binary),
        },
    );
}

/// Parameters are always sent as text so no digit is ever lost.
fn encode_numeric(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let text = match value {
        Value::Numeric(s) | Value::Text(s) | Value::Untyped(s) => {
            let s = checked_text(s)?.trim();
            if !is_numeric_literal(s) {
                return Err(Error::BindValueInvalid(format!(
                    "{s:?} is not a numeric value"
                )));
            }
            s.to_string()
        }
        Value::Int2(v) => v.to_string(),
        Value::Int4(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Float4(v) => float_literal(f64::from(*v)),
        Value::Float8(v) => float_literal(*v),
        other => return Err(mismatch(other, target)),
    };
    Ok((FormatCode::Text, text.into_bytes()))
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let literal = if v > 0.0 { "Infinity" } else { "-Infinity" };
        literal.to_string()
    } else {
        v.to_string()
    }
}

/// Accepts what the server's numeric input accepts: an optionally signed
/// decimal with an optional exponent, or NaN / Infinity.
fn is_numeric_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.eq_ignore_ascii_case("infinity") || unsigned.eq_ignore_ascii_case("inf") {
        return true;
    }
    if s.eq_ignore_ascii_case("nan") {
        return true;
    }

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return false;
    }
    match exponent {
        None => true,
        Some(exp) => {
            let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !digits.is_empty() && all_digits(digits)
        }
    }
}

fn decode_numeric_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(Value::Numeric(utf8(bytes)?.to_string()))
}

fn decode_numeric_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    numeric_to_string(bytes).map(Value::Numeric)
}

/// Render the binary NUMERIC form as its decimal text.
///
/// Layout: ndigits, weight, sign and dscale (each 16 bits), then `ndigits`
/// base-10000 digits. `weight` is the power of 10000 of the first digit.
pub fn numeric_to_string(bytes: &[u8]) -> Result<String> {
    let header = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
    if bytes.len() < 8 {
        return Err(Error::Decode(format!(
            "invalid numeric length: {}",
            bytes.len()
        )));
    }
    let ndigits = header(0) as usize;
    let weight = header(2) as i16 as i32;
    let sign = header(4);
    let dscale = header(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => {
            return Err(Error::Decode(format!("invalid numeric sign 0x{other:04x}")));
        }
    }
    if bytes.len() != 8 + ndigits * 2 {
        return Err(Error::Decode(format!(
            "invalid numeric length: {} for {} digits",
            bytes.len(),
            ndigits
        )));
    }

    let digits: Vec<u16> = bytes[8..]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if let Some(bad) = digits.iter().find(|d| **d > 9999) {
        return Err(Error::Decode(format!("invalid numeric digit {bad}")));
    }
    let group = |index: i32| -> u16 {
        usize::try_from(index)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && !digits.iter().all(|d| *d == 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for index in 1..=weight {
            out.push_str(&format!("{:04}", group(index)));
        }
    }

    if dscale > 0 {
        out.push('.');
        let mut fraction = String::with_capacity(dscale + 4);
        let mut index = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(index)));
            index += 1;
        }
        fraction.truncate(dscale);
        out.push_str(&fraction);
    }

    Ok(out)
}
