//! Error types for pgclientkit.

use thiserror::Error;

/// Result type for pgclientkit operations.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLSTATE reported when a statement was cancelled by request.
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// PostgreSQL error/notice fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
}

impl ErrorFields {
    /// Fields for an error raised on the client side, carrying only a message.
    pub fn client(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// Returns true for FATAL and PANIC, after which the server closes the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadUrl,
    ConnectionRefused,
    AuthenticationFailed,
    NotConnected,
    BindValueInvalid,
    StatementFailed,
    ProtocolBroken,
    Cancelled,
    Timeout,
    InvalidUsage,
    Decode,
}

/// Error type for pgclientkit.
#[derive(Debug, Error)]
pub enum Error {
    /// URL is malformed, the scheme is unknown, or an option is out of range
    #[error("Bad URL: {0}")]
    BadUrl(String),

    /// Transport-level failure while establishing the session
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The server rejected the credentials, or they could not be produced
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(ErrorFields),

    /// The operation requires a connected session
    #[error("Not connected")]
    NotConnected,

    /// A caller value cannot be bound to its target type
    #[error("Invalid bind value: {0}")]
    BindValueInvalid(String),

    /// The server returned an ErrorResponse for a statement
    #[error("Statement failed: {fields}")]
    StatementFailed {
        fields: ErrorFields,
        statement: Option<String>,
    },

    /// Malformed frame, lost transport, or a FATAL server error
    #[error("Protocol error: {message}")]
    ProtocolBroken {
        message: String,
        fields: Option<ErrorFields>,
    },

    /// The operation was cancelled by request or by deadline expiry
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Connecting exceeded `connect_timeout`
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The request is not valid in the current state
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A returned value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Shorthand for a [`Error::ProtocolBroken`] without server fields.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::ProtocolBroken {
            message: message.into(),
            fields: None,
        }
    }

    /// Shorthand for a client-side [`Error::AuthenticationFailed`].
    pub fn auth(message: impl Into<String>) -> Self {
        Error::AuthenticationFailed(ErrorFields::client(message))
    }

    /// Classify an ErrorResponse received while a statement was running.
    pub fn from_statement(fields: ErrorFields, statement: Option<&str>) -> Self {
        if fields.is_fatal() {
            return Error::ProtocolBroken {
                message: fields.to_string(),
                fields: Some(fields),
            };
        }
        if fields.code.as_deref() == Some(SQLSTATE_QUERY_CANCELED) {
            return Error::Cancelled(
                fields
                    .message
                    .clone()
                    .unwrap_or_else(|| "canceling statement".into()),
            );
        }
        Error::StatementFailed {
            fields,
            statement: statement.map(str::to_string),
        }
    }

    /// Classify an ErrorResponse received during the startup handshake.
    pub fn from_startup(fields: ErrorFields) -> Self {
        match fields.code.as_deref() {
            Some(code) if code.starts_with("28") => Error::AuthenticationFailed(fields),
            _ => Error::ConnectionRefused(fields.to_string()),
        }
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadUrl(_) => ErrorKind::BadUrl,
            Error::ConnectionRefused(_) => ErrorKind::ConnectionRefused,
            Error::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::BindValueInvalid(_) => ErrorKind::BindValueInvalid,
            Error::StatementFailed { .. } => ErrorKind::StatementFailed,
            Error::ProtocolBroken { .. } => ErrorKind::ProtocolBroken,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::InvalidUsage(_) => ErrorKind::InvalidUsage,
            Error::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Server-reported fields, if this error came from an ErrorResponse.
    pub fn fields(&self) -> Option<&ErrorFields> {
        match self {
            Error::StatementFailed { fields, .. } | Error::AuthenticationFailed(fields) => {
                Some(fields)
            }
            Error::ProtocolBroken { fields, .. } => fields.as_ref(),
            _ => None,
        }
    }

    /// Get the SQLSTATE code if the server reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Cancelled(_) => Some(SQLSTATE_QUERY_CANCELED),
            _ => self.fields().and_then(|f| f.code.as_deref()),
        }
    }

    /// Server severity, if the server reported one.
    pub fn severity(&self) -> Option<&str> {
        self.fields().and_then(ErrorFields::severity)
    }

    /// The statement that failed, when applicable.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Error::StatementFailed { statement, .. } => statement.as_deref(),
            _ => None,
        }
    }

    /// Returns true if the session can no longer be used after this error.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProtocolBroken
                | ErrorKind::ConnectionRefused
                | ErrorKind::AuthenticationFailed
                | ErrorKind::Timeout
        )
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}
