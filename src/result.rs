//! Completed command results.

use crate::conversion;
use crate::error::{Error, Result};
use crate::protocol::backend::FieldDescription;
use crate::protocol::types::{FormatCode, Oid};
use crate::value::{FromValue, Value};

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Type oid
    pub oid: Oid,
    /// -1 for varlena, -2 for NUL-terminated
    pub type_size: i16,
    pub type_modifier: i32,
    /// Source table, or 0 when the column is computed
    pub table_oid: Oid,
    pub column_id: i16,
    /// Format the cells arrive in
    pub format: FormatCode,
}

impl Column {
    /// Build from a field description, overriding its format with the one
    /// requested in Bind.
    pub fn from_field(field: &FieldDescription<'_>, format: FormatCode) -> Self {
        Self {
            name: field.name.to_string(),
            oid: field.type_oid(),
            type_size: field.type_size(),
            type_modifier: field.type_modifier(),
            table_oid: field.table_oid(),
            column_id: field.column_id(),
            format,
        }
    }
}

/// Outcome of one `execute`.
///
/// Owns its data; it stays valid after the connection is closed. For a
/// multi-statement simple query it describes the last command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    command_tag: String,
    affected_rows: Option<u64>,
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
}

impl QueryResult {
    pub(crate) fn new(
        command_tag: String,
        affected_rows: Option<u64>,
        columns: Vec<Column>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
    ) -> Self {
        Self {
            command_tag,
            affected_rows,
            columns,
            rows,
        }
    }

    /// e.g. `"SELECT 3"`, `"INSERT 0 1"`; empty for an empty query string.
    pub fn command_tag(&self) -> &str {
        &self.command_tag
    }

    /// Row count reported in the command tag, if the command reports one.
    pub fn affected_rows(&self) -> Option<u64> {
        self.affected_rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn column(&self, index: usize) -> Result<&Column> {
        self.columns.get(index).ok_or_else(|| {
            Error::InvalidUsage(format!(
                "column {} out of range ({} columns)",
                index,
                self.columns.len()
            ))
        })
    }

    pub fn column_name(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.name)
    }

    pub fn column_oid(&self, index: usize) -> Result<Oid> {
        Ok(self.column(index)?.oid)
    }

    /// Index of the first column with this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Raw cell bytes in the column's format; `None` is SQL NULL.
    pub fn raw(&self, row: usize, col: usize) -> Result<Option<&[u8]>> {
        self.column(col)?;
        let cells = self.rows.get(row).ok_or_else(|| {
            Error::InvalidUsage(format!(
                "row {} out of range ({} rows)",
                row,
                self.rows.len()
            ))
        })?;
        Ok(cells[col].as_deref())
    }

    pub fn is_null(&self, row: usize, col: usize) -> Result<bool> {
        Ok(self.raw(row, col)?.is_none())
    }

    /// Decode one cell into a native value.
    pub fn value(&self, row: usize, col: usize) -> Result<Value> {
        let raw = self.raw(row, col)?;
        let column = &self.columns[col];
        conversion::decode(column.oid, column.format, raw)
    }

    pub fn value_by_name(&self, row: usize, name: &str) -> Result<Value> {
        let col = self
            .column_index(name)
            .ok_or_else(|| Error::InvalidUsage(format!("no column named {name:?}")))?;
        self.value(row, col)
    }

    /// Decode one cell into a Rust type.
    pub fn get<T: FromValue>(&self, row: usize, col: usize) -> Result<T> {
        T::from_value(self.value(row, col)?)
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = RowRef<'_>> {
        (0..self.rows.len()).map(move |index| RowRef {
            result: self,
            index,
        })
    }
}

/// Borrowed view of one row of a [`QueryResult`].
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    result: &'a QueryResult,
    index: usize,
}

impl RowRef<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self, col: usize) -> Result<Value> {
        self.result.value(self.index, col)
    }

    pub fn get<T: FromValue>(&self, col: usize) -> Result<T> {
        self.result.get(self.index, col)
    }

    pub fn by_name(&self, name: &str) -> Result<Value> {
        self.result.value_by_name(self.index, name)
    }

    pub fn is_null(&self, col: usize) -> Result<bool> {
        self.result.is_null(self.index, col)
    }
}
