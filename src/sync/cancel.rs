//! Out-of-band cancellation of a running statement.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::frontend::write_cancel_request;

use super::session::connect_transport;

/// Everything needed to cancel the statement running on one session.
///
/// The request travels on a new connection; the session being cancelled is
/// never touched, so a handle can be used from any thread while that session
/// is blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelHandle {
    host: String,
    port: u16,
    socket_path: Option<String>,
    connect_timeout: Option<Duration>,
    process_id: u32,
    secret: u32,
}

impl CancelHandle {
    pub(crate) fn new(
        host: String,
        port: u16,
        socket_path: Option<String>,
        connect_timeout: Option<Duration>,
        (process_id, secret): (u32, u32),
    ) -> Self {
        Self {
            host,
            port,
            socket_path,
            connect_timeout,
            process_id,
            secret,
        }
    }

    /// Backend process whose statement this handle cancels.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Send a CancelRequest.
    ///
    /// Success only means the request was delivered; the server may have
    /// finished the statement already.
    pub fn cancel(&self) -> Result<()> {
        tracing::debug!(pid = self.process_id, "sending CancelRequest");
        let mut stream = connect_transport(
            &self.host,
            self.port,
            self.socket_path.as_deref(),
            self.connect_timeout,
        )?;
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, self.process_id, self.secret);
        stream
            .send(&buf)
            .map_err(|e| Error::ConnectionRefused(format!("sending CancelRequest: {e}")))?;
        // The server closes the socket without answering; wait for that so
        // the request is processed before we return.
        match stream.read_byte() {
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
            Err(e) => tracing::debug!(error = %e, "waiting for cancel connection to close"),
            Ok(byte) => tracing::debug!(byte, "unexpected reply to CancelRequest"),
        }
        Ok(())
    }
}

/// Cancels through a [`CancelHandle`] unless disarmed before `deadline`.
pub(crate) struct Watchdog {
    disarm: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn arm(handle: CancelHandle, deadline: Duration) -> Result<Self> {
        let (disarm, disarmed) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("pgclientkit-watchdog".to_string())
            .spawn(move || match disarmed.recv_timeout(deadline) {
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(pid = handle.process_id(), ?deadline, "deadline expired");
                    if let Err(e) = handle.cancel() {
                        tracing::warn!(error = %e, "deadline cancellation failed");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })
            .map_err(|e| Error::InvalidUsage(format!("cannot start deadline watchdog: {e}")))?;
        Ok(Self {
            disarm: Some(disarm),
            thread: Some(thread),
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread
        self.disarm.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("deadline watchdog panicked");
        }
    }
}
