//! One authenticated session: the transport plus what the server told us
//! during startup. Drives state machines with blocking I/O.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::TransactionStatus;
use crate::state::{Action, AsyncMessage, ConnectionStateMachine, StateMachine};

use super::stream::Stream;

/// Open a transport to `host:port`, or to `socket_path` when set.
pub(crate) fn connect_transport(
    host: &str,
    port: u16,
    socket_path: Option<&str>,
    timeout: Option<Duration>,
) -> Result<Stream> {
    if let Some(path) = socket_path {
        tracing::debug!(path, "connecting over unix socket");
        let socket = UnixStream::connect(path).map_err(|e| handshake_io(&e, path))?;
        return Ok(Stream::unix(socket));
    }
    if host.is_empty() {
        return Err(Error::BadUrl("host is empty".to_string()));
    }

    let target = format!("{host}:{port}");
    tracing::debug!(target = %target, ?timeout, "connecting over tcp");
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::ConnectionRefused(format!("cannot resolve {target}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(limit) => TcpStream::connect_timeout(&addr, limit),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(tcp) => {
                tcp.set_nodelay(true)
                    .map_err(|e| handshake_io(&e, &target))?;
                return Ok(Stream::tcp(tcp));
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => handshake_io(&e, &target),
        None => Error::ConnectionRefused(format!("{target} resolved to no addresses")),
    })
}

/// Timeouts become [`Error::Timeout`], anything else [`Error::ConnectionRefused`].
fn handshake_io(err: &io::Error, target: &str) -> Error {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            Error::Timeout(format!("connecting to {target}: {err}"))
        }
        _ => Error::ConnectionRefused(format!("{target}: {err}")),
    }
}

fn connection_lost(err: &io::Error) -> Error {
    Error::protocol(format!("connection lost: {err}"))
}

pub struct Session {
    stream: Stream,
    buffer_set: BufferSet,
    opts: Opts,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    password_used: bool,
}

impl Session {
    /// Connect and run the startup handshake.
    ///
    /// `connect_timeout` bounds the TCP connect and every read and write of
    /// the handshake.
    pub fn open(opts: &Opts) -> Result<Self> {
        let socket_path = opts.socket_path();
        let target = socket_path
            .clone()
            .unwrap_or_else(|| format!("{}:{}", opts.host, opts.port));
        let mut stream =
            connect_transport(&opts.host, opts.port, socket_path.as_deref(), opts.connect_timeout)?;
        stream
            .set_timeouts(opts.connect_timeout)
            .map_err(|e| handshake_io(&e, &target))?;

        let mut buffer_set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts, stream.supports_tls());

        loop {
            let action = machine.step(&mut buffer_set)?;
            let io_result = match action {
                Action::WriteAndReadByte => stream
                    .send(&buffer_set.write_buffer)
                    .and_then(|()| stream.read_byte())
                    .map(|byte| buffer_set.type_byte = byte),
                Action::ReadMessage => stream.read_message(&mut buffer_set),
                Action::Write => stream.send(&buffer_set.write_buffer),
                Action::WriteAndReadMessage => stream
                    .send(&buffer_set.write_buffer)
                    .and_then(|()| stream.read_message(&mut buffer_set)),
                Action::TlsHandshake => {
                    tracing::debug!(peer = %stream.peer(), "starting TLS handshake");
                    stream = stream
                        .upgrade_tls(&opts.host, opts.ssl_mode)
                        .map_err(|e| Error::ConnectionRefused(format!("TLS handshake: {e}")))?;
                    stream
                        .set_timeouts(opts.connect_timeout)
                        .map_err(|e| handshake_io(&e, &target))?;
                    Ok(())
                }
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    log_async(&message);
                    stream.read_message(&mut buffer_set)
                }
                Action::Finished => break,
            };
            io_result.map_err(|e| handshake_io(&e, &target))?;
            buffer_set.write_buffer.clear();
        }

        stream
            .set_timeouts(None)
            .map_err(|e| handshake_io(&e, &target))?;
        tracing::debug!(peer = %stream.peer(), user = %opts.user, "session established");

        Ok(Self {
            stream,
            buffer_set,
            opts: opts.clone(),
            backend_key: machine.backend_key(),
            server_params: machine.take_server_params(),
            transaction_status: machine.transaction_status(),
            password_used: machine.password_used(),
        })
    }

    /// Run a state machine to completion.
    ///
    /// An error for which [`Error::is_connection_broken`] is true leaves the
    /// session out of sync; it must be dropped.
    pub fn drive<S: StateMachine>(&mut self, machine: &mut S) -> Result<()> {
        loop {
            let action = match machine.step(&mut self.buffer_set) {
                Ok(action) => action,
                Err(e) => {
                    // A failed statement still ends at ReadyForQuery
                    self.transaction_status = machine.transaction_status();
                    return Err(e);
                }
            };
            let io_result = match action {
                Action::ReadMessage => self.stream.read_message(&mut self.buffer_set),
                Action::Write => self.stream.send(&self.buffer_set.write_buffer),
                Action::WriteAndReadMessage => self
                    .stream
                    .send(&self.buffer_set.write_buffer)
                    .and_then(|()| self.stream.read_message(&mut self.buffer_set)),
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    self.handle_async(message);
                    self.stream.read_message(&mut self.buffer_set)
                }
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::protocol("handshake action requested after startup"));
                }
                Action::Finished => {
                    self.transaction_status = machine.transaction_status();
                    return Ok(());
                }
            };
            io_result.map_err(|e| connection_lost(&e))?;
            self.buffer_set.write_buffer.clear();
        }
    }

    fn handle_async(&mut self, message: AsyncMessage) {
        log_async(&message);
        if let AsyncMessage::ParameterChanged { name, value } = message {
            match self.server_params.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = value,
                None => self.server_params.push((name, value)),
            }
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Process id and secret key for CancelRequest.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn password_used(&self) -> bool {
        self.password_used
    }

    /// Send Terminate and close. Failures are logged; the socket is closed
    /// either way.
    pub fn terminate(mut self) {
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        if let Err(e) = self.stream.send(&self.buffer_set.write_buffer) {
            tracing::warn!(error = %e, "failed to send Terminate");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.stream.peer())
            .field("backend_key", &self.backend_key.map(|(pid, _)| pid))
            .field("transaction_status", &self.transaction_status)
            .finish()
    }
}

fn log_async(message: &AsyncMessage) {
    match message {
        AsyncMessage::Notice(fields) => {
            tracing::info!(
                severity = fields.severity().unwrap_or(""),
                code = fields.code.as_deref().unwrap_or(""),
                "{}",
                fields.message.as_deref().unwrap_or("")
            );
        }
        AsyncMessage::Notification {
            pid,
            channel,
            payload,
        } => {
            tracing::debug!(pid, channel = %channel, payload = %payload, "notification");
        }
        AsyncMessage::ParameterChanged { name, value } => {
            tracing::debug!(name = %name, value = %value, "server parameter changed");
        }
    }
}
