//! Callbacks fed by the query state machine.

use crate::error::{Error, Result};
use crate::protocol::backend::{CommandComplete, DataRow};
use crate::result::{Column, QueryResult};

/// Receives the result of one query exchange.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// For multi-statement queries like `"SELECT 1; UPDATE foo SET x=1"`:
/// ```text
/// result_start → row* → result_end   // SELECT 1
/// result_end                          // UPDATE
/// ```
pub trait ResultHandler {
    /// Called when a result set begins. Formats in `columns` are the ones the
    /// rows will actually arrive in.
    fn result_start(&mut self, columns: Vec<Column>) -> Result<()> {
        let _ = columns;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, row: DataRow<'_>) -> Result<()>;

    /// Called when a command completes.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// Collects the last command's result into a [`QueryResult`].
#[derive(Debug, Default)]
pub struct ResultCollector {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    command_tag: String,
    affected_rows: Option<u64>,
    ended: bool,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn discard_previous(&mut self) {
        if self.ended {
            self.columns.clear();
            self.rows.clear();
            self.command_tag.clear();
            self.affected_rows = None;
            self.ended = false;
        }
    }

    pub fn into_result(self) -> QueryResult {
        QueryResult::new(self.command_tag, self.affected_rows, self.columns, self.rows)
    }
}

impl ResultHandler for ResultCollector {
    fn result_start(&mut self, columns: Vec<Column>) -> Result<()> {
        self.discard_previous();
        self.columns = columns;
        Ok(())
    }

    fn row(&mut self, row: DataRow<'_>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::protocol(format!(
                "DataRow has {} cells for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        let cells = row.cells()?;
        self.rows
            .push(cells.into_iter().map(|cell| cell.map(<[u8]>::to_vec)).collect());
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        // A command without a result set follows one that had rows
        self.discard_previous();
        self.command_tag = complete.tag.to_string();
        self.affected_rows = complete.rows_affected();
        self.ended = true;
        Ok(())
    }
}
