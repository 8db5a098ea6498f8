//! CopyInResponse and CopyOutResponse.

use crate::error::Result;
use crate::protocol::codec::{read_i16, read_u8};
use crate::protocol::types::FormatCode;

/// Shared body of CopyInResponse and CopyOutResponse.
#[derive(Debug, Clone)]
pub struct CopyResponse {
    /// Overall format; binary COPY when `Binary`
    pub format: FormatCode,
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let format = FormatCode::from_wire(u16::from(format))?;
        let (count, mut rest) = read_i16(rest)?;
        let mut column_formats = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let (code, remaining) = read_i16(rest)?;
            column_formats.push(FormatCode::from_wire(code as u16)?);
            rest = remaining;
        }
        Ok(Self {
            format,
            column_formats,
        })
    }
}
