//! RowDescription, DataRow and CommandComplete.

use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    pub table_oid: U32BE,
    pub column_id: I16BE,
    pub type_oid: U32BE,
    pub type_size: I16BE,
    pub type_modifier: I32BE,
    pub format: U16BE,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// -1 for varlena, -2 for NUL-terminated
    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> Result<FormatCode> {
        FormatCode::from_wire(self.tail.format.get())
    }
}

#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (count, mut data) = read_i16(payload)?;
        let mut fields = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            fields.push(FieldDescription {
                name,
                tail: FieldDescriptionTail::ref_from_bytes(tail)?,
            });
            data = rest;
        }
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// One row of cells; `None` is SQL NULL.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: usize,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, columns_data) = read_i16(payload)?;
        Ok(Self {
            num_columns: count.max(0) as usize,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Split into cells, failing on a truncated row.
    pub fn cells(&self) -> Result<Vec<Option<&'a [u8]>>> {
        let mut cells = Vec::with_capacity(self.num_columns);
        let mut data = self.columns_data;
        for _ in 0..self.num_columns {
            let (len, rest) = read_i32(data)?;
            if len < 0 {
                cells.push(None);
                data = rest;
            } else {
                let (cell, rest) = read_bytes(rest, len as usize)?;
                cells.push(Some(cell));
                data = rest;
            }
        }
        if !data.is_empty() {
            return Err(Error::protocol(format!(
                "DataRow: {} trailing bytes",
                data.len()
            )));
        }
        Ok(cells)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// e.g. "SELECT 5", "INSERT 0 1", "UPDATE 10"
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count carried by the tag, for commands that report one.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut parts = self.tag.split_whitespace();
        let command = parts.next()?;
        let count = match command {
            // INSERT carries the (always zero) oid first
            "INSERT" => parts.nth(1)?,
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH" => parts.next()?,
            _ => return None,
        };
        count.parse().ok()
    }
}
