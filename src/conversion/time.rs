//! date, time, timestamp and timestamptz, mapped to the `time` crate.
//!
//! The server keeps microseconds; values with a finer fraction are rejected
//! when encoding. `24:00:00` is a valid server `time` but has no `time::Time`
//! counterpart, so decoding it fails.

use std::collections::HashMap;

use time::format_description::FormatItem;
use time::macros::{datetime, format_description};
use time::{Date, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::Value;

use super::{Codec, fixed, text_fallback, utf8};

/// 2000-01-01, the server's epoch, as a Julian day
const PG_EPOCH_JULIAN_DAY: i32 = 2_451_545;
const PG_EPOCH: PrimitiveDateTime = datetime!(2000-01-01 00:00:00);

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]");
const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);

pub(super) fn register(codecs: &mut HashMap<Oid, Codec>) {
    let entries: [(Oid, &'static str, super::DecodeFn, super::DecodeFn); 4] = [
        (oid::DATE, "date", decode_date_text, decode_date_binary),
        (oid::TIME, "time", decode_time_text, decode_time_binary),
        (oid::TIMESTAMP, "timestamp", decode_timestamp_text, decode_timestamp_binary),
        (oid::TIMESTAMPTZ, "timestamptz", decode_timestamptz_text, decode_timestamptz_binary),
    ];
    for (oid, name, decode_text, decode_binary) in entries {
        codecs.insert(
            oid,
            Codec {
                name,
                encode: encode_temporal,
                decode_text,
                decode_binary: Some(decode_binary),
            },
        );
    }
}

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Nanoseconds as microseconds, refusing to drop a sub-microsecond remainder.
fn exact_micros(nano: u32, shown: &dyn std::fmt::Display) -> Result<i64> {
    if nano % 1_000 != 0 {
        return Err(Error::BindValueInvalid(format!(
            "{shown} has sub-microsecond precision the server cannot store"
        )));
    }
    Ok(i64::from(nano / 1_000))
}

fn micros_since_epoch(ts: PrimitiveDateTime) -> Result<i64> {
    exact_micros(ts.nanosecond(), &ts)?;
    i64::try_from((ts - PG_EPOCH).whole_microseconds())
        .map_err(|_| Error::BindValueInvalid(format!("timestamp {ts} is out of range")))
}

fn encode_temporal(value: &Value, target: Oid) -> Result<(FormatCode, Vec<u8>)> {
    let bytes = match (value, target) {
        (Value::Date(d), oid::DATE) => (d.to_julian_day() - PG_EPOCH_JULIAN_DAY)
            .to_be_bytes()
            .to_vec(),
        (Value::Time(t), oid::TIME) => {
            let (hour, minute, second, nano) = t.as_hms_nano();
            let micros = i64::from(hour) * 3_600_000_000
                + i64::from(minute) * 60_000_000
                + i64::from(second) * 1_000_000
                + exact_micros(nano, t)?;
            micros.to_be_bytes().to_vec()
        }
        (Value::Timestamp(ts), oid::TIMESTAMP) => micros_since_epoch(*ts)?.to_be_bytes().to_vec(),
        (Value::TimestampTz(ts), oid::TIMESTAMPTZ) => {
            let utc = ts.to_offset(UtcOffset::UTC);
            micros_since_epoch(PrimitiveDateTime::new(utc.date(), utc.time()))?
                .to_be_bytes()
                .to_vec()
        }
        (other, _) => return text_fallback(other, target),
    };
    Ok((FormatCode::Binary, bytes))
}

fn infinite(text: &str) -> bool {
    matches!(text, "infinity" | "-infinity")
}

fn invalid(kind: &str, text: &str) -> Error {
    if infinite(text) {
        Error::Decode(format!("{kind} {text} cannot be represented"))
    } else {
        Error::Decode(format!("invalid {kind}: {text:?}"))
    }
}

fn decode_date_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    Date::parse(s, DATE_FORMAT)
        .map(Value::Date)
        .map_err(|_| invalid("date", s))
}

fn decode_date_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let days = i32::from_be_bytes(fixed(bytes, "date")?);
    if days == i32::MAX || days == i32::MIN {
        return Err(Error::Decode("infinite date cannot be represented".to_string()));
    }
    days.checked_add(PG_EPOCH_JULIAN_DAY)
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .map(Value::Date)
        .ok_or_else(|| Error::Decode(format!("date out of range: {days} days")))
}

fn decode_time_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    if s.starts_with("24:00:00") {
        return Err(Error::Decode("time 24:00:00 cannot be represented".to_string()));
    }
    Time::parse(s, TIME_FORMAT)
        .map(Value::Time)
        .map_err(|_| invalid("time", s))
}

fn decode_time_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let micros = i64::from_be_bytes(fixed(bytes, "time")?);
    if micros == MICROS_PER_DAY {
        return Err(Error::Decode("time 24:00:00 cannot be represented".to_string()));
    }
    let out_of_range = || Error::Decode(format!("time out of range: {micros} us"));
    let hour = u8::try_from(micros / 3_600_000_000).map_err(|_| out_of_range())?;
    let minute = ((micros / 60_000_000) % 60) as u8;
    let second = ((micros / 1_000_000) % 60) as u8;
    let micro = (micros % 1_000_000) as u32;
    Time::from_hms_micro(hour, minute, second, micro)
        .map(Value::Time)
        .map_err(|_| out_of_range())
}

fn decode_timestamp_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    PrimitiveDateTime::parse(s, TIMESTAMP_FORMAT)
        .map(Value::Timestamp)
        .map_err(|_| invalid("timestamp", s))
}

fn timestamp_from_micros(bytes: &[u8]) -> Result<PrimitiveDateTime> {
    let micros = i64::from_be_bytes(fixed(bytes, "timestamp")?);
    if micros == i64::MAX || micros == i64::MIN {
        return Err(Error::Decode(
            "infinite timestamp cannot be represented".to_string(),
        ));
    }
    PG_EPOCH
        .checked_add(time::Duration::microseconds(micros))
        .ok_or_else(|| Error::Decode(format!("timestamp out of range: {micros} us")))
}

fn decode_timestamp_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    timestamp_from_micros(bytes).map(Value::Timestamp)
}

/// `2024-01-15 10:30:00.5+05:30`; the offset may be `+HH`, `+HH:MM` or `+HH:MM:SS`.
fn decode_timestamptz_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let split = s.rfind(['+', '-']).filter(|pos| *pos > 10);
    let Some(pos) = split else {
        return Err(invalid("timestamptz", s));
    };
    let (local, offset) = s.split_at(pos);
    let local = PrimitiveDateTime::parse(local, TIMESTAMP_FORMAT)
        .map_err(|_| invalid("timestamptz", s))?;
    let offset = parse_offset(offset).ok_or_else(|| invalid("timestamptz", s))?;
    Ok(Value::TimestampTz(local.assume_offset(offset)))
}

fn parse_offset(text: &str) -> Option<UtcOffset> {
    let negative = text.starts_with('-');
    let mut parts = text[1..].split(':').map(|p| p.parse::<i8>().ok());
    let hours = parts.next()??;
    let minutes = parts.next().unwrap_or(Some(0))?;
    let seconds = parts.next().unwrap_or(Some(0))?;
    let sign = if negative { -1 } else { 1 };
    UtcOffset::from_hms(sign * hours, sign * minutes, sign * seconds).ok()
}

fn decode_timestamptz_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let utc = timestamp_from_micros(bytes)?.assume_utc();
    Ok(Value::TimestampTz(utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, offset, time};

    #[test]
    fn test_date() {
        assert_eq!(
            decode_date_text(oid::DATE, b"2024-01-15").unwrap(),
            Value::Date(date!(2024-01-15))
        );
        // 2024-01-15 is 8780 days after 2000-01-01
        assert_eq!(
            decode_date_binary(oid::DATE, &8780_i32.to_be_bytes()).unwrap(),
            Value::Date(date!(2024-01-15))
        );
        let (_, bytes) = encode_temporal(&Value::Date(date!(1999-12-31)), oid::DATE).unwrap();
        assert_eq!(bytes, (-1_i32).to_be_bytes());
    }

    #[test]
    fn test_infinity_rejected() {
        let err = decode_date_text(oid::DATE, b"infinity").unwrap_err();
        assert!(err.to_string().contains("cannot be represented"));
        assert!(decode_timestamp_binary(oid::TIMESTAMP, &i64::MAX.to_be_bytes()).is_err());
    }

    #[test]
    fn test_time() {
        assert_eq!(
            decode_time_text(oid::TIME, b"10:30:45").unwrap(),
            Value::Time(time!(10:30:45))
        );
        assert_eq!(
            decode_time_text(oid::TIME, b"10:30:45.123456").unwrap(),
            Value::Time(time!(10:30:45.123456))
        );
        let micros: i64 = (10 * 3600 + 30 * 60 + 45) * 1_000_000 + 7;
        assert_eq!(
            decode_time_binary(oid::TIME, &micros.to_be_bytes()).unwrap(),
            Value::Time(time!(10:30:45.000007))
        );
    }

    #[test]
    fn test_sub_microsecond_rejected() {
        let value = Value::Time(time!(10:00:00.123456789));
        let err = encode_temporal(&value, oid::TIME).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BindValueInvalid);

        let ts = datetime!(2024-01-15 10:30:45.000000001);
        assert!(encode_temporal(&Value::Timestamp(ts), oid::TIMESTAMP).is_err());
        assert!(encode_temporal(&Value::TimestampTz(ts.assume_utc()), oid::TIMESTAMPTZ).is_err());

        let exact = Value::Time(time!(00:00:00.000001));
        let (_, bytes) = encode_temporal(&exact, oid::TIME).unwrap();
        assert_eq!(bytes, 1_i64.to_be_bytes());
        assert_eq!(decode_time_binary(oid::TIME, &bytes).unwrap(), exact);
    }

    #[test]
    fn test_end_of_day_not_representable() {
        let err = decode_time_binary(oid::TIME, &MICROS_PER_DAY.to_be_bytes()).unwrap_err();
        assert!(err.to_string().contains("24:00:00 cannot be represented"));
        let err = decode_time_text(oid::TIME, b"24:00:00").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn test_timestamp() {
        let expected = datetime!(2024-01-15 10:30:45.5);
        assert_eq!(
            decode_timestamp_text(oid::TIMESTAMP, b"2024-01-15 10:30:45.5").unwrap(),
            Value::Timestamp(expected)
        );
        let (_, bytes) = encode_temporal(&Value::Timestamp(expected), oid::TIMESTAMP).unwrap();
        assert_eq!(
            decode_timestamp_binary(oid::TIMESTAMP, &bytes).unwrap(),
            Value::Timestamp(expected)
        );
    }

    #[test]
    fn test_timestamptz_text_offsets() {
        let utc = datetime!(2024-01-15 10:30:00 UTC);
        assert_eq!(
            decode_timestamptz_text(oid::TIMESTAMPTZ, b"2024-01-15 10:30:00+00").unwrap(),
            Value::TimestampTz(utc)
        );
        let Value::TimestampTz(shifted) =
            decode_timestamptz_text(oid::TIMESTAMPTZ, b"2024-01-15 16:00:00+05:30").unwrap()
        else {
            panic!("expected timestamptz");
        };
        assert_eq!(shifted, utc);
        assert_eq!(shifted.offset(), offset!(+05:30));
        assert!(decode_timestamptz_text(oid::TIMESTAMPTZ, b"2024-01-15 10:30:00").is_err());
    }

    #[test]
    fn test_timestamptz_binary_is_utc() {
        let local = datetime!(2024-01-15 12:30:00 +02:00);
        let (_, bytes) = encode_temporal(&Value::TimestampTz(local), oid::TIMESTAMPTZ).unwrap();
        let Value::TimestampTz(decoded) =
            decode_timestamptz_binary(oid::TIMESTAMPTZ, &bytes).unwrap()
        else {
            panic!("expected timestamptz");
        };
        assert_eq!(decoded, local);
        assert_eq!(decoded.offset(), UtcOffset::UTC);
    }
}
