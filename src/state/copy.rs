//! COPY FROM STDIN and COPY TO STDOUT.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{CommandComplete, CopyResponse, RawMessage, ReadyForQuery, msg_type};
use crate::protocol::frontend::{write_copy_data, write_copy_done, write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, async_action, statement_error, unexpected};

/// Largest CopyData payload sent at once.
const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    Transferring,
    WaitingComplete,
    Draining,
    Finished,
}

/// Outcome shared by both directions.
#[derive(Debug)]
struct Progress {
    state: State,
    rows: Option<u64>,
    failure: Option<Error>,
    transaction_status: TransactionStatus,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: State::Initial,
            rows: None,
            failure: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

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

    /// Messages every state handles the same way. `None` means the caller
    /// should look at the message.
    fn common(&mut self, buffer_set: &BufferSet, query: &str) -> Result<Option<Action>> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;
        if RawMessage::is_async_type(type_byte) {
            return async_action(type_byte, payload).map(Some);
        }
        if type_byte == msg_type::ERROR_RESPONSE {
            let error = statement_error(payload, query)?;
            return Ok(Some(self.fail(error)));
        }
        if self.state == State::Draining {
            return match type_byte {
                msg_type::READY_FOR_QUERY => self.finish(payload).map(Some),
                _ => Ok(Some(Action::ReadMessage)),
            };
        }
        Ok(None)
    }

    fn not_a_copy(&mut self, type_byte: u8, expected: &str) -> Result<Action> {
        match type_byte {
            msg_type::ROW_DESCRIPTION
            | msg_type::DATA_ROW
            | msg_type::COMMAND_COMPLETE
            | msg_type::EMPTY_QUERY_RESPONSE => Ok(self.fail(Error::InvalidUsage(format!(
                "statement is not {expected}"
            )))),
            msg_type::READY_FOR_QUERY => Err(Error::protocol(format!(
                "ReadyForQuery before {expected} started"
            ))),
            other => Err(unexpected(other, "while waiting for a COPY response")),
        }
    }
}

/// Streams a caller buffer to `COPY ... FROM STDIN`.
pub struct CopyInStateMachine<'a> {
    query: &'a str,
    data: &'a [u8],
    sent: usize,
    progress: Progress,
}

impl<'a> CopyInStateMachine<'a> {
    pub fn new(query: &'a str, data: &'a [u8]) -> Self {
        Self {
            query,
            data,
            sent: 0,
            progress: Progress::new(),
        }
    }

    /// Row count from the final CommandComplete.
    pub fn rows_copied(&self) -> u64 {
        self.progress.rows.unwrap_or(0)
    }

    fn send_next(&mut self, buffer_set: &mut BufferSet) -> Action {
        let remaining = &self.data[self.sent..];
        if remaining.is_empty() {
            write_copy_done(&mut buffer_set.write_buffer);
            self.progress.state = State::WaitingComplete;
            return Action::WriteAndReadMessage;
        }
        let chunk = &remaining[..remaining.len().min(COPY_CHUNK)];
        write_copy_data(&mut buffer_set.write_buffer, chunk);
        self.sent += chunk.len();
        Action::Write
    }
}

impl StateMachine for CopyInStateMachine<'_> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        match self.progress.state {
            State::Initial => {
                tracing::debug!(query = self.query, bytes = self.data.len(), "COPY FROM STDIN");
                write_query(&mut buffer_set.write_buffer, self.query);
                self.progress.state = State::WaitingResponse;
                return Ok(Action::WriteAndReadMessage);
            }
            // Nothing was read since the last write
            State::Transferring => return Ok(self.send_next(buffer_set)),
            State::Finished => return Err(Error::protocol("COPY already finished")),
            _ => {}
        }

        if let Some(action) = self.progress.common(buffer_set, self.query)? {
            return Ok(action);
        }

        let payload = &buffer_set.read_buffer;
        match (self.progress.state, buffer_set.type_byte) {
            (State::WaitingResponse, msg_type::COPY_IN_RESPONSE) => {
                CopyResponse::parse(payload)?;
                self.progress.state = State::Transferring;
                Ok(self.send_next(buffer_set))
            }
            (State::WaitingResponse, msg_type::COPY_OUT_RESPONSE) => {
                // The server streams everything anyway; drain it
                Ok(self.progress.fail(Error::InvalidUsage(
                    "statement is COPY TO STDOUT; use copy_out".to_string(),
                )))
            }
            (State::WaitingResponse, other) => self.progress.not_a_copy(other, "COPY FROM STDIN"),
            (State::WaitingComplete, msg_type::COMMAND_COMPLETE) => {
                self.progress.rows = CommandComplete::parse(payload)?.rows_affected();
                Ok(Action::ReadMessage)
            }
            (State::WaitingComplete, msg_type::READY_FOR_QUERY) => self.progress.finish(payload),
            (_, other) => Err(unexpected(other, "during COPY FROM STDIN")),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.progress.transaction_status
    }
}

/// Collects the output of `COPY ... TO STDOUT`.
pub struct CopyOutStateMachine<'a> {
    query: &'a str,
    data: Vec<u8>,
    progress: Progress,
}

impl<'a> CopyOutStateMachine<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            data: Vec::new(),
            progress: Progress::new(),
        }
    }

    /// Row count from the final CommandComplete.
    pub fn rows_copied(&self) -> u64 {
        self.progress.rows.unwrap_or(0)
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl StateMachine for CopyOutStateMachine<'_> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        match self.progress.state {
            State::Initial => {
                tracing::debug!(query = self.query, "COPY TO STDOUT");
                write_query(&mut buffer_set.write_buffer, self.query);
                self.progress.state = State::WaitingResponse;
                return Ok(Action::WriteAndReadMessage);
            }
            State::Finished => return Err(Error::protocol("COPY already finished")),
            _ => {}
        }

        if let Some(action) = self.progress.common(buffer_set, self.query)? {
            return Ok(action);
        }

        let payload = &buffer_set.read_buffer;
        match (self.progress.state, buffer_set.type_byte) {
            (State::WaitingResponse, msg_type::COPY_OUT_RESPONSE) => {
                CopyResponse::parse(payload)?;
                self.progress.state = State::Transferring;
                Ok(Action::ReadMessage)
            }
            (State::WaitingResponse, msg_type::COPY_IN_RESPONSE) => {
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN is not available through copy_out",
                );
                self.progress.fail(Error::InvalidUsage(
                    "statement is COPY FROM STDIN; use copy_in".to_string(),
                ));
                Ok(Action::WriteAndReadMessage)
            }
            (State::WaitingResponse, other) => self.progress.not_a_copy(other, "COPY TO STDOUT"),
            (State::Transferring, msg_type::COPY_DATA) => {
                self.data.extend_from_slice(payload);
                Ok(Action::ReadMessage)
            }
            (State::Transferring, msg_type::COPY_DONE) => {
                self.progress.state = State::WaitingComplete;
                Ok(Action::ReadMessage)
            }
            (State::WaitingComplete, msg_type::COMMAND_COMPLETE) => {
                self.progress.rows = CommandComplete::parse(payload)?.rows_affected();
                Ok(Action::ReadMessage)
            }
            (State::WaitingComplete, msg_type::READY_FOR_QUERY) => self.progress.finish(payload),
            (_, other) => Err(unexpected(other, "during COPY TO STDOUT")),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.progress.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn copy_response() -> [u8; 5] {
        // text format, one text column
        [0, 0, 1, 0, 0]
    }

    #[test]
    fn test_copy_in_chunks() {
        let data = vec![b'x'; COPY_CHUNK + 10];
        let mut sm = CopyInStateMachine::new("COPY t FROM STDIN", &data);
        let mut buffers = BufferSet::new();

        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer[0], b'Q');

        buffers.feed(b'G', &copy_response());
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Write));
        assert_eq!(buffers.write_buffer[0], b'd');
        assert_eq!(buffers.write_buffer.len(), 5 + COPY_CHUNK);

        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Write));
        assert_eq!(buffers.write_buffer.len(), 5 + 10);

        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer, b"c\0\0\0\x04");

        buffers.feed(b'C', b"COPY 2\0");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::ReadMessage));
        buffers.feed(b'Z', b"I");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(sm.rows_copied(), 2);
    }

    #[test]
    fn test_copy_in_rejects_plain_statement() {
        let mut sm = CopyInStateMachine::new("SELECT 1", b"");
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();

        buffers.feed(b'T', &0_i16.to_be_bytes());
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::ReadMessage));
        buffers.feed(b'C', b"SELECT 0\0");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::ReadMessage));
        buffers.feed(b'Z', b"I");
        assert_eq!(sm.step(&mut buffers).unwrap_err().kind(), ErrorKind::InvalidUsage);
    }

    #[test]
    fn test_copy_in_server_error() {
        let mut sm = CopyInStateMachine::new("COPY t FROM STDIN", b"bad\n");
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'G', &copy_response());
        sm.step(&mut buffers).unwrap();
        sm.step(&mut buffers).unwrap();

        buffers.feed(
            b'E',
            b"SERROR\0VERROR\0C22P02\0Minvalid input syntax for type integer\0\0",
        );
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::ReadMessage));
        buffers.feed(b'Z', b"I");
        let err = sm.step(&mut buffers).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StatementFailed);
        assert_eq!(err.sqlstate(), Some("22P02"));
    }

    #[test]
    fn test_copy_out() {
        let mut sm = CopyOutStateMachine::new("COPY t TO STDOUT");
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();

        buffers.feed(b'H', &copy_response());
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::ReadMessage));
        buffers.feed(b'd', b"1\n");
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'd', b"2\n");
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'c', b"");
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'C', b"COPY 2\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'Z', b"I");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));
        assert_eq!(sm.rows_copied(), 2);
        assert_eq!(sm.into_data(), b"1\n2\n");
    }

    #[test]
    fn test_copy_out_refuses_copy_in() {
        let mut sm = CopyOutStateMachine::new("COPY t FROM STDIN");
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();

        buffers.feed(b'G', &copy_response());
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer[0], b'f');
        buffers.feed(b'E', b"SERROR\0VERROR\0C57014\0MCOPY from stdin failed\0\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(b'Z', b"I");
        assert_eq!(sm.step(&mut buffers).unwrap_err().kind(), ErrorKind::InvalidUsage);
    }
}
