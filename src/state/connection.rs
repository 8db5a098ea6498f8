//! Startup handshake: SSL negotiation, authentication, session parameters.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion,
    ParameterStatus, RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient};
use crate::protocol::frontend::{
    md5_password, write_password, write_sasl_initial_response, write_sasl_response,
    write_ssl_request, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, async_action, unexpected};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
}

/// Drives one startup handshake to the first ReadyForQuery.
pub struct ConnectionStateMachine {
    state: State,
    opts: Opts,
    tls_supported: bool,
    scram: Option<ScramClient>,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    password_used: bool,
}

impl ConnectionStateMachine {
    /// `tls_supported` tells whether the driver can perform [`Action::TlsHandshake`].
    pub fn new(opts: &Opts, tls_supported: bool) -> Self {
        Self {
            state: State::Initial,
            opts: opts.clone(),
            tls_supported,
            scram: None,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            password_used: false,
        }
    }

    /// Process id and secret key from BackendKeyData.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// ParameterStatus values reported during startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    /// Returns true if the server asked for a password and one was sent.
    pub fn password_used(&self) -> bool {
        self.password_used
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    fn wants_tls(&self) -> bool {
        self.tls_supported
            && matches!(
                self.opts.ssl_mode,
                SslMode::Prefer | SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
            )
    }

    fn send_startup(&mut self, buffer_set: &mut BufferSet) -> Action {
        tracing::debug!(user = %self.opts.user, database = ?self.opts.database, "sending startup message");
        write_startup(&mut buffer_set.write_buffer, &self.opts.startup_params());
        self.state = State::WaitingAuth;
        Action::WriteAndReadMessage
    }

    fn password(&self) -> Result<&str> {
        self.opts
            .password
            .as_deref()
            .ok_or_else(|| Error::auth("server requested a password but none was provided"))
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.wants_tls() {
            tracing::debug!(sslmode = self.opts.ssl_mode.as_str(), "requesting TLS");
            write_ssl_request(&mut buffer_set.write_buffer);
            self.state = State::WaitingSslResponse;
            return Ok(Action::WriteAndReadByte);
        }
        if self.opts.ssl_mode.is_required() {
            return Err(Error::ConnectionRefused(format!(
                "sslmode={} requires TLS support, which is not available",
                self.opts.ssl_mode.as_str()
            )));
        }
        Ok(self.send_startup(buffer_set))
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            b'S' => {
                self.state = State::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                if self.opts.ssl_mode.is_required() {
                    return Err(Error::ConnectionRefused(
                        "server does not support TLS".to_string(),
                    ));
                }
                tracing::debug!("server declined TLS, continuing in plaintext");
                Ok(self.send_startup(buffer_set))
            }
            other => Err(Error::protocol(format!(
                "unexpected SSLRequest answer {:?}",
                other as char
            ))),
        }
    }

    fn handle_auth(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(unexpected(buffer_set.type_byte, "while waiting for authentication"));
        }

        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::Ok => {
                tracing::debug!("authenticated without password");
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                tracing::debug!("cleartext password requested");
                let password = self.password()?.to_string();
                write_password(&mut buffer_set.write_buffer, &password);
                self.password_used = true;
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Md5Password { salt } => {
                tracing::debug!("md5 password requested");
                let hashed = md5_password(&self.opts.user, self.password()?, &salt);
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.password_used = true;
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::auth(format!(
                        "no supported SASL mechanism, server offers {mechanisms:?}"
                    )));
                }
                tracing::debug!("starting SCRAM-SHA-256");
                let scram = ScramClient::new(self.password()?);
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram = Some(scram);
                self.password_used = true;
                self.state = State::SaslInProgress;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Unsupported(code) => Err(Error::auth(format!(
                "unsupported authentication method (request code {code})"
            ))),
            other => Err(Error::protocol(format!(
                "unexpected authentication message {other:?}"
            ))),
        }
    }

    fn handle_sasl(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(unexpected(buffer_set.type_byte, "during SASL exchange"));
        }
        let scram = self
            .scram
            .as_mut()
            .ok_or_else(|| Error::protocol("SASL message without SASL exchange"))?;

        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::basic::from_utf8(data)
                    .map_err(|_| Error::auth("server-first-message is not UTF-8"))?;
                let client_final = scram.process_server_first(server_first)?;
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::basic::from_utf8(data)
                    .map_err(|_| Error::auth("server-final-message is not UTF-8"))?;
                scram.verify_server_final(server_final)?;
                self.state = State::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::protocol(format!(
                "unexpected SASL message {other:?}"
            ))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(unexpected(buffer_set.type_byte, "while waiting for AuthenticationOk"));
        }
        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::Ok => {
                tracing::debug!("authenticated");
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::auth(format!(
                "unexpected authentication result {other:?}"
            ))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some((key.process_id(), key.secret()));
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                self.server_params
                    .push((param.name.to_string(), param.value.to_string()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
                self.state = State::Ready;
                Ok(Action::Finished)
            }
            other => Err(unexpected(other, "during startup")),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        match self.state {
            State::Initial => return self.handle_initial(buffer_set),
            State::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            State::SslHandshake => return Ok(self.send_startup(buffer_set)),
            _ => {}
        }

        let type_byte = buffer_set.type_byte;
        if type_byte == msg_type::ERROR_RESPONSE {
            let ErrorResponse(fields) = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return Err(Error::from_startup(fields));
        }
        if type_byte == msg_type::NEGOTIATE_PROTOCOL_VERSION {
            let negotiate = NegotiateProtocolVersion::parse(&buffer_set.read_buffer)?;
            tracing::warn!(
                newest_minor_version = negotiate.newest_minor_version,
                unrecognized = ?negotiate.unrecognized_options,
                "server negotiated protocol version"
            );
            return Ok(Action::ReadMessage);
        }
        if RawMessage::is_async_type(type_byte)
            && !(self.state == State::WaitingReady && type_byte == msg_type::PARAMETER_STATUS)
        {
            return async_action(type_byte, &buffer_set.read_buffer);
        }

        match self.state {
            State::WaitingAuth => self.handle_auth(buffer_set),
            State::SaslInProgress => self.handle_sasl(buffer_set),
            State::WaitingAuthResult => self.handle_auth_result(buffer_set),
            State::WaitingReady => self.handle_ready(buffer_set),
            State::Ready => Err(unexpected(type_byte, "after startup completed")),
            State::Initial | State::WaitingSslResponse | State::SslHandshake => {
                Err(Error::protocol("startup state machine out of sequence"))
            }
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}
