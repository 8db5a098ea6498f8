//! Bound parameters for the extended query protocol.

use crate::conversion;
use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};
use crate::value::Value;

/// One parameter as it travels in Parse and Bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParameter {
    /// Declared type; 0 lets the server infer it
    pub oid: Oid,
    pub format: FormatCode,
    /// Encoded value; `None` is SQL NULL
    pub payload: Option<Vec<u8>>,
}

impl BoundParameter {
    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            format: FormatCode::Text,
            payload: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.payload.is_none()
    }
}

/// Ordered parameters for `$1..$N`. Index 0 binds `$1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterList {
    params: Vec<BoundParameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode each value with its natural type.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        let mut list = Self {
            params: Vec::with_capacity(values.len()),
        };
        for value in values {
            list.push(value)?;
        }
        Ok(list)
    }

    /// Encode and append a value with its natural type.
    pub fn push(&mut self, value: &Value) -> Result<()> {
        self.params.push(conversion::encode(value)?);
        Ok(())
    }

    /// Encode and append a value for an explicit target type.
    pub fn push_as(&mut self, value: &Value, oid: Oid) -> Result<()> {
        self.params.push(conversion::encode_as(value, oid)?);
        Ok(())
    }

    /// Append an already-encoded parameter.
    pub fn push_bound(&mut self, param: BoundParameter) {
        self.params.push(param);
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BoundParameter> {
        self.params.iter()
    }

    /// Fail unless there is exactly one parameter per placeholder in `query`.
    pub fn check_arity(&self, query: &str) -> Result<()> {
        let expected = placeholder_count(query);
        if expected != self.params.len() {
            return Err(Error::BindValueInvalid(format!(
                "statement has {} placeholder(s) but {} value(s) were bound",
                expected,
                self.params.len()
            )));
        }
        if self.params.len() > i16::MAX as usize {
            return Err(Error::BindValueInvalid(format!(
                "too many parameters: {}",
                self.params.len()
            )));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ParameterList {
    type Item = &'a BoundParameter;
    type IntoIter = std::slice::Iter<'a, BoundParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

/// Highest `$N` placeholder index in `sql`.
///
/// Placeholders inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies are ignored.
pub fn placeholder_count(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && !is_ident_byte_before(bytes, i - 1);
                i = skip_quoted(bytes, i + 1, b'\'', escapes);
            }
            b'"' => i = skip_quoted(bytes, i + 1, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = memchr::memchr(b'\n', &bytes[i..]).map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i + 2),
            // `price$1` is an identifier, not a placeholder
            b'$' if is_ident_byte_before(bytes, i) => {
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
            }
            b'$' => {
                if let Some(end) = dollar_tag_end(bytes, i) {
                    let tag = &bytes[i..=end];
                    i = memchr::memmem::find(&bytes[end + 1..], tag)
                        .map_or(bytes.len(), |p| end + 1 + p + tag.len());
                } else {
                    let start = i + 1;
                    let mut j = start;
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        j += 1;
                    }
                    if j > start
                        && let Ok(n) = sql[start..j].parse::<usize>()
                    {
                        max = max.max(n);
                    }
                    i = j.max(i + 1);
                }
            }
            _ => i += 1,
        }
    }

    max
}

fn is_ident_byte_before(bytes: &[u8], pos: usize) -> bool {
    pos > 0 && (bytes[pos - 1].is_ascii_alphanumeric() || bytes[pos - 1] == b'_')
}

/// Bytes that may continue an unquoted identifier.
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Position just past the closing quote. A doubled quote is an escaped quote.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8, backslash_escapes: bool) -> usize {
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Block comments nest.
fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 1;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// If a dollar-quote tag (`$$` or `$tag$`) starts at `start`, the index of its
/// closing `$`.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    if is_ident_byte_before(bytes, start) {
        return None;
    }
    let mut j = start + 1;
    if bytes.get(j).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    while j < bytes.len() {
        match bytes[j] {
            b'$' => return Some(j),
            b if b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80 => j += 1,
            _ => return None,
        }
    }
    None
}
