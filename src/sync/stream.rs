//! Blocking transport: TCP, TLS over TCP, or a Unix socket.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "tls")]
use native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::opts::SslMode;

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tls")]
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Returns true if the transport can be upgraded with [`Stream::upgrade_tls`].
    pub fn supports_tls(&self) -> bool {
        cfg!(feature = "tls") && matches!(self, Stream::Tcp(_))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Unix(r) => r.read_exact(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
            Stream::Unix(r) => r.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().flush(),
            Stream::Unix(r) => r.get_mut().flush(),
        }
    }

    /// Write and flush.
    pub fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)?;
        self.flush()
    }

    /// Read one unframed byte (the SSLRequest answer).
    pub fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0_u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Read one framed message into `buffer_set`.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet) -> io::Result<()> {
        let mut header = [0_u8; 5];
        self.read_exact(&mut header)?;
        buffer_set.type_byte = header[0];

        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if length < 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid message length {length}"),
            ));
        }
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize((length - 4) as usize, 0);
        self.read_exact(&mut buffer_set.read_buffer)
    }

    /// Bound every blocking read and write. `None` waits forever.
    pub fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => {
                r.get_ref().set_read_timeout(timeout)?;
                r.get_ref().set_write_timeout(timeout)
            }
            #[cfg(feature = "tls")]
            Stream::Tls(r) => {
                r.get_ref().get_ref().set_read_timeout(timeout)?;
                r.get_ref().get_ref().set_write_timeout(timeout)
            }
            Stream::Unix(r) => {
                r.get_ref().set_read_timeout(timeout)?;
                r.get_ref().set_write_timeout(timeout)
            }
        }
    }

    /// Replace a plain TCP transport with TLS.
    ///
    /// `require` accepts any certificate, `verify-ca` checks the chain only,
    /// `verify-full` checks the chain and the host name.
    #[cfg(feature = "tls")]
    pub fn upgrade_tls(self, host: &str, mode: SslMode) -> io::Result<Self> {
        let Stream::Tcp(reader) = self else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "TLS is only available over TCP",
            ));
        };
        let mut builder = native_tls::TlsConnector::builder();
        match mode {
            SslMode::VerifyFull => {}
            SslMode::VerifyCa => {
                builder.danger_accept_invalid_hostnames(true);
            }
            _ => {
                builder.danger_accept_invalid_certs(true);
                builder.danger_accept_invalid_hostnames(true);
            }
        }
        let connector = builder.build().map_err(io::Error::other)?;
        let tls = connector
            .connect(host, reader.into_inner())
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Stream::Tls(Box::new(BufReader::new(tls))))
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade_tls(self, _host: &str, mode: SslMode) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("sslmode={} needs the `tls` feature", mode.as_str()),
        ))
    }

    /// Peer description for logs.
    pub fn peer(&self) -> String {
        match self {
            Stream::Tcp(r) => r
                .get_ref()
                .peer_addr()
                .map_or_else(|_| "tcp".to_string(), |a| a.to_string()),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r
                .get_ref()
                .get_ref()
                .peer_addr()
                .map_or_else(|_| "tls".to_string(), |a| format!("{a} (tls)")),
            Stream::Unix(_) => "unix socket".to_string(),
        }
    }
}
