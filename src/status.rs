//! Connection lifecycle status.

use std::fmt;

use crate::error::{Error, Result};

/// Where a [`Connection`](crate::sync::Connection) is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A statement is in flight
    Busy,
    /// The session failed; only `reset` and `disconnect` are accepted
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Disconnected => "disconnected",
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::Busy => "busy",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Connect,
    /// The handshake succeeded
    Ok,
    /// The handshake failed
    Fail,
    ExecuteBegin,
    ExecuteEnd,
    Reset,
    Disconnect,
    /// The session is unusable
    Fatal,
}

/// The five-state lifecycle and its legal transitions.
///
/// ```text
/// Disconnected --connect-->      Connecting
/// Connecting   --ok-->           Connected
/// Connecting   --fail-->         Error
/// Connected    --execute-begin-> Busy
/// Busy         --execute-end-->  Connected
/// Connected    --reset-->        Connecting
/// Connected    --disconnect-->   Disconnected
/// Error        --reset-->        Connecting
/// Error        --disconnect-->   Disconnected
/// any          --fatal-->        Error
/// ```
#[derive(Debug, Default)]
pub struct StatusMachine {
    status: Status,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The status `event` leads to, without applying it.
    pub fn next(&self, event: Event) -> Result<Status> {
        use Event as E;
        use Status as S;

        let next = match (self.status, event) {
            (_, E::Fatal) => S::Error,
            (S::Disconnected, E::Disconnect) => S::Disconnected,
            (S::Disconnected, E::Connect) => S::Connecting,
            (S::Connecting, E::Ok) => S::Connected,
            (S::Connecting, E::Fail) => S::Error,
            (S::Connected, E::ExecuteBegin) => S::Busy,
            (S::Busy, E::ExecuteEnd) => S::Connected,
            (S::Connected | S::Error, E::Reset) => S::Connecting,
            (S::Connected | S::Error, E::Disconnect) => S::Disconnected,
            (status, event) => {
                return Err(Error::InvalidUsage(format!(
                    "{event:?} is not allowed while {status}"
                )));
            }
        };
        Ok(next)
    }

    /// Apply `event`.
    ///
    /// Returns `Some(status)` when a new state was entered and must be
    /// published, `None` for the no-op events (`disconnect` while
    /// disconnected, `fatal` while already in error). An illegal event leaves
    /// the state untouched.
    pub fn apply(&mut self, event: Event) -> Result<Option<Status>> {
        let next = self.next(event)?;
        if next == self.status && matches!(event, Event::Disconnect | Event::Fatal) {
            return Ok(None);
        }
        tracing::debug!(from = %self.status, to = %next, ?event, "status transition");
        self.status = next;
        Ok(Some(next))
    }
}
