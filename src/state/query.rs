//! Statement execution over the simple or extended query protocol.
//!
//! - No parameters and text results: one Query message.
//! - Text results with parameters: Parse, Bind, Describe, Execute, Sync.
//! - Binary results: the statement is described first so each column can be
//!   requested in binary only when its type has a binary decoder, then bound
//!   and executed in a second round trip.

use crate::buffer_set::BufferSet;
use crate::conversion;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::params::ParameterList;
use crate::protocol::backend::{
    CommandComplete, DataRow, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_copy_fail, write_describe_portal, write_describe_statement, write_execute,
    write_parse, write_query, write_sync,
};
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::result::Column;

use super::StateMachine;
use super::action::{Action, async_action, statement_error, unexpected};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    /// Waiting for the statement description of a binary-result query
    Describing,
    Executing,
    /// COPY TO STDOUT started by a plain statement; data is discarded
    CopyingOut,
    /// An error is pending; skip to ReadyForQuery
    Draining,
    Finished,
}

/// Runs one statement and feeds its results to a [`ResultHandler`].
pub struct QueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    query: &'a str,
    params: &'a ParameterList,
    format: FormatCode,
    result_formats: Vec<FormatCode>,
    failure: Option<Error>,
    transaction_status: TransactionStatus,
}

impl<'a, H: ResultHandler> QueryStateMachine<'a, H> {
    pub fn new(
        handler: &'a mut H,
        query: &'a str,
        params: &'a ParameterList,
        format: FormatCode,
    ) -> Self {
        Self {
            state: State::Initial,
            handler,
            query,
            params,
            format,
            result_formats: Vec::new(),
            failure: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Returns true if the statement goes out as a single Query message.
    pub fn is_simple(&self) -> bool {
        self.params.is_empty() && self.format == FormatCode::Text
    }

    fn start(&mut self, buffer_set: &mut BufferSet) -> Action {
        let buf = &mut buffer_set.write_buffer;
        if self.is_simple() {
            tracing::debug!(query = self.query, "simple query");
            write_query(buf, self.query);
            self.state = State::Executing;
        } else if self.format == FormatCode::Text {
            tracing::debug!(query = self.query, params = self.params.len(), "extended query");
            write_parse(buf, self.query, self.params);
            write_bind(buf, self.params, &[]);
            write_describe_portal(buf);
            write_execute(buf);
            write_sync(buf);
            self.state = State::Executing;
        } else {
            tracing::debug!(query = self.query, params = self.params.len(), "describing statement");
            write_parse(buf, self.query, self.params);
            write_describe_statement(buf);
            write_sync(buf);
            self.state = State::Describing;
        }
        Action::WriteAndReadMessage
    }

    /// Keep the first failure and skip the rest of the exchange.
    fn fail(&mut self, error: Error) -> Action {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.state = State::Draining;
        Action::ReadMessage
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
        self.state = State::Finished;
        match self.failure.take() {
            Some(error) => Err(error),
            None => Ok(Action::Finished),
        }
    }

    fn handle_describe(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::PARSE_COMPLETE | msg_type::PARAMETER_DESCRIPTION | msg_type::NO_DATA => {
                Ok(Action::ReadMessage)
            }
            msg_type::ROW_DESCRIPTION => {
                let description = RowDescription::parse(payload)?;
                self.result_formats = description
                    .fields()
                    .iter()
                    .map(|field| {
                        if conversion::has_binary_decoder(field.type_oid()) {
                            FormatCode::Binary
                        } else {
                            FormatCode::Text
                        }
                    })
                    .collect();
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
                let buf = &mut buffer_set.write_buffer;
                write_bind(buf, self.params, &self.result_formats);
                write_describe_portal(buf);
                write_execute(buf);
                write_sync(buf);
                self.state = State::Executing;
                Ok(Action::WriteAndReadMessage)
            }
            other => Err(unexpected(other, "while describing a statement")),
        }
    }

    fn handle_execute(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::PARSE_COMPLETE
            | msg_type::BIND_COMPLETE
            | msg_type::NO_DATA
            | msg_type::EMPTY_QUERY_RESPONSE
            | msg_type::PORTAL_SUSPENDED => Ok(Action::ReadMessage),
            msg_type::ROW_DESCRIPTION => {
                let description = RowDescription::parse(payload)?;
                let mut columns = Vec::with_capacity(description.len());
                for field in description.fields() {
                    columns.push(Column::from_field(field, field.format()?));
                }
                match self.handler.result_start(columns) {
                    Ok(()) => Ok(Action::ReadMessage),
                    Err(error) => Ok(self.fail(error)),
                }
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                match self.handler.row(row) {
                    Ok(()) => Ok(Action::ReadMessage),
                    Err(error) => Ok(self.fail(error)),
                }
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                match self.handler.result_end(complete) {
                    Ok(()) => Ok(Action::ReadMessage),
                    Err(error) => Ok(self.fail(error)),
                }
            }
            msg_type::COPY_IN_RESPONSE => {
                tracing::debug!("refusing COPY FROM STDIN started by execute");
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN is not available through execute",
                );
                self.fail(Error::InvalidUsage(
                    "COPY FROM STDIN must be run with copy_in".to_string(),
                ));
                Ok(Action::WriteAndReadMessage)
            }
            msg_type::COPY_OUT_RESPONSE => {
                self.state = State::CopyingOut;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => self.finish(payload),
            other => Err(unexpected(other, "in query response")),
        }
    }

    fn handle_copy_out(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::COPY_DATA => Ok(Action::ReadMessage),
            msg_type::COPY_DONE => {
                self.state = State::Executing;
                Ok(Action::ReadMessage)
            }
            other => Err(unexpected(other, "during COPY TO STDOUT")),
        }
    }
}

impl<H: ResultHandler> StateMachine for QueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        let type_byte = buffer_set.type_byte;
        match self.state {
            State::Initial => return Ok(self.start(buffer_set)),
            State::Finished => return Err(Error::protocol("query already finished")),
            _ => {}
        }

        if RawMessage::is_async_type(type_byte) {
            return async_action(type_byte, &buffer_set.read_buffer);
        }
        if type_byte == msg_type::ERROR_RESPONSE {
            let error = statement_error(&buffer_set.read_buffer, self.query)?;
            return Ok(self.fail(error));
        }

        match self.state {
            State::Describing => self.handle_describe(buffer_set),
            State::Executing => self.handle_execute(buffer_set),
            State::CopyingOut => self.handle_copy_out(buffer_set),
            State::Draining => match type_byte {
                msg_type::READY_FOR_QUERY => self.finish(&buffer_set.read_buffer),
                _ => Ok(Action::ReadMessage),
            },
            State::Initial | State::Finished => Err(Error::protocol("query out of sequence")),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::handler::ResultCollector;
    use crate::protocol::types::{Oid, oid};
    use crate::value::Value;

    fn row_description(columns: &[(&str, Oid, FormatCode)]) -> Vec<u8> {
        let mut payload = (columns.len() as i16).to_be_bytes().to_vec();
        for (name, type_oid, format) in columns {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend(0_u32.to_be_bytes());
            payload.extend(0_i16.to_be_bytes());
            payload.extend(type_oid.to_be_bytes());
            payload.extend((-1_i16).to_be_bytes());
            payload.extend((-1_i32).to_be_bytes());
            payload.extend(format.as_wire().to_be_bytes());
        }
        payload
    }

    fn data_row(cells: &[Option<&[u8]>]) -> Vec<u8> {
        let mut payload = (cells.len() as i16).to_be_bytes().to_vec();
        for cell in cells {
            match cell {
                None => payload.extend((-1_i32).to_be_bytes()),
                Some(bytes) => {
                    payload.extend((bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
            }
        }
        payload
    }

    fn error_payload(severity: &str, code: &str, message: &str) -> Vec<u8> {
        format!("S{severity}\0V{severity}\0C{code}\0M{message}\0\0").into_bytes()
    }

    fn expect_read(sm: &mut impl StateMachine, buffers: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffers.feed(type_byte, payload);
        assert!(matches!(sm.step(buffers).unwrap(), Action::ReadMessage));
    }

    #[test]
    fn test_simple_query() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        {
            let mut sm =
                QueryStateMachine::new(&mut collector, "SELECT 1 AS n", &params, FormatCode::Text);
            assert!(sm.is_simple());
            assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
            assert_eq!(buffers.write_buffer[0], b'Q');

            expect_read(&mut sm, &mut buffers, b'T', &row_description(&[("n", oid::INT4, FormatCode::Text)]));
            expect_read(&mut sm, &mut buffers, b'D', &data_row(&[Some(&b"1"[..])]));
            expect_read(&mut sm, &mut buffers, b'C', b"SELECT 1\0");
            buffers.feed(b'Z', b"I");
            assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
        }
        let result = collector.into_result();
        assert_eq!(result.command_tag(), "SELECT 1");
        assert_eq!(result.value(0, 0).unwrap(), Value::Int4(1));
    }

    #[test]
    fn test_extended_text_query() {
        let params = ParameterList::from_values(&[Value::Int4(7)]).unwrap();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        let mut sm = QueryStateMachine::new(&mut collector, "SELECT $1", &params, FormatCode::Text);

        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        // Parse, Bind, Describe, Execute, Sync in one write
        let kinds: Vec<u8> = message_types(&buffers.write_buffer);
        assert_eq!(kinds, b"PBDES");

        expect_read(&mut sm, &mut buffers, b'1', b"");
        expect_read(&mut sm, &mut buffers, b'2', b"");
        expect_read(&mut sm, &mut buffers, b'T', &row_description(&[("?column?", oid::INT4, FormatCode::Text)]));
        expect_read(&mut sm, &mut buffers, b'D', &data_row(&[Some(&b"7"[..])]));
        expect_read(&mut sm, &mut buffers, b'C', b"SELECT 1\0");
        buffers.feed(b'Z', b"T");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(sm.transaction_status(), TransactionStatus::InTransaction);
    }

    fn message_types(mut buf: &[u8]) -> Vec<u8> {
        let mut kinds = Vec::new();
        while buf.len() >= 5 {
            let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
            kinds.push(buf[0]);
            buf = &buf[1 + len..];
        }
        kinds
    }

    #[test]
    fn test_binary_query_describes_first() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        {
            let mut sm =
                QueryStateMachine::new(&mut collector, "SELECT n, p", &params, FormatCode::Binary);
            assert!(!sm.is_simple());
            sm.step(&mut buffers).unwrap();
            assert_eq!(message_types(&buffers.write_buffer), b"PDS");

            expect_read(&mut sm, &mut buffers, b'1', b"");
            expect_read(&mut sm, &mut buffers, b't', &0_i16.to_be_bytes());
            // point (600) has no binary decoder and stays text
            expect_read(
                &mut sm,
                &mut buffers,
                b'T',
                &row_description(&[("n", oid::INT8, FormatCode::Text), ("p", 600, FormatCode::Text)]),
            );
            buffers.feed(b'Z', b"I");
            assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
            assert_eq!(message_types(&buffers.write_buffer), b"BDES");
            // result format codes at the end of Bind: count 2, binary, text
            let bind_len = u32::from_be_bytes(buffers.write_buffer[1..5].try_into().unwrap()) as usize;
            let bind = &buffers.write_buffer[..1 + bind_len];
            assert_eq!(&bind[bind.len() - 6..], &[0, 2, 0, 1, 0, 0]);

            expect_read(&mut sm, &mut buffers, b'2', b"");
            expect_read(
                &mut sm,
                &mut buffers,
                b'T',
                &row_description(&[("n", oid::INT8, FormatCode::Binary), ("p", 600, FormatCode::Text)]),
            );
            expect_read(&mut sm, &mut buffers, b'D', &data_row(&[Some(&5_i64.to_be_bytes()[..]), Some(&b"(1,2)"[..])]));
            expect_read(&mut sm, &mut buffers, b'C', b"SELECT 1\0");
            buffers.feed(b'Z', b"I");
            assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
        }
        let result = collector.into_result();
        assert_eq!(result.columns()[0].format, FormatCode::Binary);
        assert_eq!(result.value(0, 0).unwrap(), Value::Int8(5));
        assert!(matches!(result.value(0, 1).unwrap(), Value::Unknown { oid: 600, .. }));
    }

    #[test]
    fn test_statement_error_waits_for_ready() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        let mut sm = QueryStateMachine::new(&mut collector, "SELEC 1", &params, FormatCode::Text);
        sm.step(&mut buffers).unwrap();

        expect_read(&mut sm, &mut buffers, b'E', &error_payload("ERROR", "42601", "syntax error"));
        buffers.feed(b'Z', b"I");
        let err = sm.step(&mut buffers).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StatementFailed);
        assert_eq!(err.sqlstate(), Some("42601"));
        assert_eq!(err.statement(), Some("SELEC 1"));
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn test_fatal_error_is_immediate() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        let mut sm = QueryStateMachine::new(&mut collector, "SELECT 1", &params, FormatCode::Text);
        sm.step(&mut buffers).unwrap();

        buffers.feed(b'E', &error_payload("FATAL", "57P01", "terminating connection"));
        let err = sm.step(&mut buffers).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolBroken);
    }

    #[test]
    fn test_query_canceled() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        let mut sm = QueryStateMachine::new(&mut collector, "SELECT pg_sleep(10)", &params, FormatCode::Text);
        sm.step(&mut buffers).unwrap();
        expect_read(&mut sm, &mut buffers, b'E', &error_payload("ERROR", "57014", "canceling statement due to user request"));
        buffers.feed(b'Z', b"I");
        assert_eq!(sm.step(&mut buffers).unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_notice_passes_through() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        let mut sm = QueryStateMachine::new(&mut collector, "DROP TABLE IF EXISTS t", &params, FormatCode::Text);
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'N', &error_payload("NOTICE", "00000", "table \"t\" does not exist, skipping"));
        assert!(matches!(
            sm.step(&mut buffers).unwrap(),
            Action::HandleAsyncMessageAndReadMessage(_)
        ));
        expect_read(&mut sm, &mut buffers, b'C', b"DROP TABLE\0");
        buffers.feed(b'Z', b"I");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
    }

    #[test]
    fn test_copy_in_refused() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        let mut sm = QueryStateMachine::new(&mut collector, "COPY t FROM STDIN", &params, FormatCode::Text);
        sm.step(&mut buffers).unwrap();

        buffers.feed(b'G', &[0, 0, 0]);
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer[0], b'f');
        expect_read(&mut sm, &mut buffers, b'E', &error_payload("ERROR", "57014", "COPY from stdin failed"));
        buffers.feed(b'Z', b"I");
        assert_eq!(sm.step(&mut buffers).unwrap_err().kind(), ErrorKind::InvalidUsage);
    }

    #[test]
    fn test_empty_query() {
        let params = ParameterList::new();
        let mut collector = ResultCollector::new();
        let mut buffers = BufferSet::new();
        {
            let mut sm = QueryStateMachine::new(&mut collector, "", &params, FormatCode::Text);
            sm.step(&mut buffers).unwrap();
            expect_read(&mut sm, &mut buffers, b'I', b"");
            buffers.feed(b'Z', b"I");
            assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
        }
        let result = collector.into_result();
        assert_eq!(result.command_tag(), "");
        assert_eq!(result.row_count(), 0);
    }
}
