//! Native values exchanged with the server.

use crate::conversion;
use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

/// A native value bound as a parameter or decoded from a result cell.
///
/// `Untyped` is sent with oid 0 so the server infers the parameter type.
/// `Unknown` carries the raw payload of a type without a registered codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Exact decimal digits, e.g. `"-12.50"`, `"NaN"`
    Numeric(String),
    Text(String),
    Untyped(String),
    Bytea(Vec<u8>),
    Date(time::Date),
    Time(time::Time),
    Timestamp(time::PrimitiveDateTime),
    TimestampTz(time::OffsetDateTime),
    Uuid(uuid::Uuid),
    Json(String),
    Jsonb(String),
    Array(Array),
    Unknown {
        oid: Oid,
        format: FormatCode,
        bytes: Vec<u8>,
    },
}

/// A one-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// Oid of the element type
    pub element_oid: Oid,
    /// Index of the first element; PostgreSQL defaults to 1
    pub lower_bound: i32,
    pub elements: Vec<Value>,
}

impl Array {
    /// Array with the default lower bound of 1.
    pub fn new(element_oid: Oid, elements: Vec<Value>) -> Self {
        Self {
            element_oid,
            lower_bound: 1,
            elements,
        }
    }
}

impl Value {
    /// The oid this value binds as when no target type is given.
    pub fn type_oid(&self) -> Oid {
        match self {
            Value::Null | Value::Untyped(_) => oid::UNSPECIFIED,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::TEXT,
            Value::Bytea(_) => oid::BYTEA,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Uuid(_) => oid::UUID,
            Value::Json(_) => oid::JSON,
            Value::Jsonb(_) => oid::JSONB,
            Value::Array(array) => {
                conversion::array_oid_of(array.element_oid).unwrap_or(oid::UNSPECIFIED)
            }
            Value::Unknown { oid, .. } => *oid,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Any integer variant, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(i64::from(*v)),
            Value::Int4(v) => Some(i64::from(*v)),
            Value::Int8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(f64::from(*v)),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload of the textual variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s)
            | Value::Untyped(s)
            | Value::Numeric(s)
            | Value::Json(s)
            | Value::Jsonb(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytea(b) => Some(b),
            Value::Unknown { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub(crate) fn variant_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Untyped(_) => "untyped",
            Value::Bytea(_) => "bytea",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Jsonb(_) => "jsonb",
            Value::Array(_) => "array",
            Value::Unknown { .. } => "unknown",
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    Vec<u8> => Bytea,
    time::Date => Date,
    time::Time => Time,
    time::PrimitiveDateTime => Timestamp,
    time::OffsetDateTime => TimestampTz,
    uuid::Uuid => Uuid,
    Array => Array,
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int2(i16::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int2(i16::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int4(i32::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytea(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

macro_rules! impl_try_from_wide {
    ($($t:ty),*) => {
        $(
            impl TryFrom<$t> for Value {
                type Error = Error;

                fn try_from(v: $t) -> Result<Self> {
                    i64::try_from(v).map(Value::Int8).map_err(|_| {
                        Error::BindValueInvalid(format!(
                            "{} {} does not fit in int8",
                            stringify!($t),
                            v
                        ))
                    })
                }
            }
        )*
    };
}

impl_try_from_wide!(u32, u64, usize, i128, u128);

/// Typed extraction from a decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::Decode(format!(
        "cannot read {} value as {}",
        value.variant_name(),
        target
    )))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().map_or_else(|| mismatch(&value, "bool"), Ok)
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self> {
                    let Some(wide) = value.as_i64() else {
                        return mismatch(&value, stringify!($t));
                    };
                    <$t>::try_from(wide).map_err(|e| {
                        Error::Decode(format!("{} out of range for {}: {}", wide, stringify!($t), e))
                    })
                }
            }
        )*
    };
}

impl_from_value_int!(i16, i32, i64);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(f64::from(v)),
            Value::Float8(v) => Ok(v),
            Value::Int2(v) => Ok(f64::from(v)),
            Value::Int4(v) => Ok(f64::from(v)),
            other => mismatch(&other, "f64"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(v),
            Value::Int2(v) => Ok(f32::from(v)),
            other => mismatch(&other, "f32"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s)
            | Value::Untyped(s)
            | Value::Numeric(s)
            | Value::Json(s)
            | Value::Jsonb(s) => Ok(s),
            other => mismatch(&other, "String"),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytea(b) => Ok(b),
            other => mismatch(&other, "Vec<u8>"),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            other => mismatch(&other, "Uuid"),
        }
    }
}

impl FromValue for time::Date {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(d),
            other => mismatch(&other, "Date"),
        }
    }
}

impl FromValue for time::Time {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Time(t) => Ok(t),
            other => mismatch(&other, "Time"),
        }
    }
}

impl FromValue for time::PrimitiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => mismatch(&other, "PrimitiveDateTime"),
        }
    }
}

impl FromValue for time::OffsetDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::TimestampTz(t) => Ok(t),
            other => mismatch(&other, "OffsetDateTime"),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(array) => array.elements.into_iter().map(T::from_value).collect(),
            other => mismatch(&other, "Vec"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_natural_oids() {
        assert_eq!(Value::from(42_i32).type_oid(), oid::INT4);
        assert_eq!(Value::from("x").type_oid(), oid::TEXT);
        assert_eq!(Value::Untyped("1".into()).type_oid(), 0);
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(
            Value::Array(Array::new(oid::INT4, vec![])).type_oid(),
            oid::INT4_ARRAY
        );
    }

    #[test]
    fn test_wide_integers_checked() {
        assert_eq!(Value::try_from(7_u64).unwrap(), Value::Int8(7));
        let err = Value::try_from(u64::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BindValueInvalid);
        assert!(Value::try_from(i128::MIN).is_err());
    }

    #[test]
    fn test_from_value() {
        assert_eq!(i32::from_value(Value::Int2(5)).unwrap(), 5);
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert!(i16::from_value(Value::Int8(70_000)).is_err());
        assert!(bool::from_value(Value::Text("t".into())).is_err());
        assert_eq!(
            Vec::<i32>::from_value(Value::Array(Array::new(
                oid::INT4,
                vec![Value::Int4(1), Value::Int4(2)]
            )))
            .unwrap(),
            vec![1, 2]
        );
        let err = String::from_value(Value::Int4(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
