//! What a state machine asks its driver to do next.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::backend::{
    ErrorResponse, NoticeResponse, NotificationResponse, ParameterStatus, msg_type,
};

/// I/O requested by a state machine.
///
/// Every variant that writes sends `buffer_set.write_buffer` and clears it.
/// Every variant that reads leaves the message in `buffer_set` before the
/// next `step()`.
#[derive(Debug)]
pub enum Action {
    /// Write, then read a single byte into `buffer_set.type_byte`.
    ///
    /// Used for the SSLRequest answer (`S` or `N`), which is not framed.
    WriteAndReadByte,

    /// Read one message.
    ReadMessage,

    /// Write without reading, then step again.
    Write,

    /// Write, then read one message.
    WriteAndReadMessage,

    /// Upgrade the transport to TLS, then step again.
    TlsHandshake,

    /// Deliver an asynchronous message, then read the next message.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The exchange is complete and the session is idle again.
    Finished,
}

/// Message the server may send at any point in an exchange.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// LISTEN/NOTIFY delivery
    Notification {
        pid: u32,
        channel: String,
        payload: String,
    },

    /// NoticeResponse (warnings, `RAISE NOTICE`, ...)
    Notice(ErrorFields),

    /// ParameterStatus reported after a `SET` or at startup
    ParameterChanged { name: String, value: String },
}

/// Translate an asynchronous message into the matching action.
pub(crate) fn async_action(type_byte: u8, payload: &[u8]) -> Result<Action> {
    let message = match type_byte {
        msg_type::NOTICE_RESPONSE => AsyncMessage::Notice(NoticeResponse::parse(payload)?.0),
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            }
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(payload)?;
            AsyncMessage::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            }
        }
        other => {
            return Err(Error::protocol(format!(
                "not an asynchronous message: '{}'",
                other as char
            )));
        }
    };
    Ok(Action::HandleAsyncMessageAndReadMessage(message))
}

/// Error for a message that is not legal at this point of an exchange.
pub(crate) fn unexpected(type_byte: u8, context: &str) -> Error {
    Error::protocol(format!(
        "unexpected message '{}' {}",
        type_byte as char, context
    ))
}

/// Classify an ErrorResponse received while a statement runs.
///
/// FATAL and PANIC errors come back as `Err` and end the exchange at once.
/// Anything else is returned as `Ok` and reported after ReadyForQuery.
pub(crate) fn statement_error(payload: &[u8], statement: &str) -> Result<Error> {
    let ErrorResponse(fields) = ErrorResponse::parse(payload)?;
    let error = Error::from_statement(fields, Some(statement));
    if error.is_connection_broken() {
        return Err(error);
    }
    Ok(error)
}
