//! The connection object: one PostgreSQL session shared between threads.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use crate::delegate::{ConnectionDelegate, DelegateSlot};
use crate::dispatch::{Dispatcher, ThreadDispatcher};
use crate::error::{Error, Result};
use crate::handler::ResultCollector;
use crate::opts::{ConnectionUrl, Opts};
use crate::params::ParameterList;
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::result::QueryResult;
use crate::state::{CopyInStateMachine, CopyOutStateMachine, QueryStateMachine};
use crate::status::{Event, Status, StatusMachine};
use crate::value::Value;

use super::cancel::{CancelHandle, Watchdog};
use super::queue::OpQueue;
use super::session::Session;

/// What the last session told us. Readable without waiting for a turn.
#[derive(Debug, Default)]
struct SessionInfo {
    process_id: Option<u32>,
    user: Option<String>,
    database: Option<String>,
    password_used: bool,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    cancel: Option<CancelHandle>,
}

/// A client connection to one PostgreSQL server.
///
/// Every method takes `&self`; share the connection as `Arc<Connection>`.
/// Operations that use the session (`connect`, `execute`, `reset`, ...) are
/// admitted one at a time in the order they were submitted, and each one
/// keeps its turn until the server has answered completely. Accessors such
/// as [`Connection::status`] never wait for a turn.
///
/// ```no_run
/// use pgclientkit::{Connection, FormatCode, Value};
///
/// # fn main() -> pgclientkit::Result<()> {
/// let conn = Connection::new();
/// conn.connect("postgres://postgres@localhost/postgres")?;
/// let result = conn.execute("SELECT $1::int4 + 1", FormatCode::Binary, &[Value::Int4(41)])?;
/// assert_eq!(result.get::<i32>(0, 0)?, 42);
/// conn.disconnect()?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    queue: OpQueue,
    session: Mutex<Option<Session>>,
    status: Mutex<StatusMachine>,
    delegate: DelegateSlot,
    tag: AtomicI64,
    info: RwLock<SessionInfo>,
    /// Effective options of the last successful connect, reused by `reset`
    last_opts: Mutex<Option<Opts>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// A disconnected connection whose background operations run on
    /// dedicated threads.
    pub fn new() -> Self {
        Self::with_dispatcher(Arc::new(ThreadDispatcher::new()))
    }

    /// A disconnected connection whose background operations go through
    /// `dispatcher`.
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            queue: OpQueue::new(),
            session: Mutex::new(None),
            status: Mutex::new(StatusMachine::new()),
            delegate: DelegateSlot::default(),
            tag: AtomicI64::new(0),
            info: RwLock::new(SessionInfo::default()),
            last_opts: Mutex::new(None),
            dispatcher,
        }
    }

    /// Construct and connect in one call.
    pub fn connect_url<U>(url: U) -> Result<Self>
    where
        U: TryInto<ConnectionUrl>,
        Error: From<U::Error>,
    {
        let conn = Self::new();
        conn.connect(url)?;
        Ok(conn)
    }

    // === Lifecycle ===

    /// Open a session.
    ///
    /// Only allowed while [`Status::Disconnected`]. The URL is turned into a
    /// parameter dictionary which the delegate may edit in
    /// [`ConnectionDelegate::will_open`] before the handshake.
    pub fn connect<U>(&self, url: U) -> Result<()>
    where
        U: TryInto<ConnectionUrl>,
        Error: From<U::Error>,
    {
        let url = url.try_into().map_err(Error::from);
        let _turn = self.queue.enqueue().wait();
        self.reported(self.open(url))
    }

    /// [`Connection::connect`] on a background worker.
    ///
    /// The position in the operation queue is taken before this returns.
    /// Returns `false` if the worker could not be started; `completion` is
    /// then never called. Otherwise it is called exactly once, on the worker,
    /// after the turn has been released.
    pub fn connect_in_background<U, F>(self: &Arc<Self>, url: U, completion: F) -> bool
    where
        U: TryInto<ConnectionUrl>,
        Error: From<U::Error>,
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let url = url.try_into().map_err(Error::from);
        self.submit(move |conn| conn.open(url), completion)
    }

    /// Open a throwaway session to `url` and close it again.
    ///
    /// Status and cached session details are not affected. Queued like any
    /// other operation.
    pub fn ping<U>(&self, url: U) -> Result<()>
    where
        U: TryInto<ConnectionUrl>,
        Error: From<U::Error>,
    {
        let url = url.try_into().map_err(Error::from);
        let _turn = self.queue.enqueue().wait();
        self.reported(Self::probe(url))
    }

    /// Close the session and open a new one with the options of the last
    /// successful connect.
    pub fn reset(&self) -> Result<()> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.reopen())
    }

    /// [`Connection::reset`] on a background worker. Same contract as
    /// [`Connection::connect_in_background`].
    pub fn reset_in_background<F>(self: &Arc<Self>, completion: F) -> bool
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(Connection::reopen, completion)
    }

    /// Send Terminate and close. Does nothing when already disconnected.
    pub fn disconnect(&self) -> Result<()> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.close())
    }

    // === Statements ===

    /// Run `query` with `values` bound to `$1..$N`.
    ///
    /// Without values and with [`FormatCode::Text`] the statement is sent as
    /// a simple Query, so it may hold several `;`-separated commands; the
    /// result then describes the last one. Otherwise the extended protocol
    /// is used and `format` picks the result format. Binary is requested
    /// only for column types that can be decoded from binary.
    pub fn execute(&self, query: &str, format: FormatCode, values: &[Value]) -> Result<QueryResult> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.run_values(query, format, values, None))
    }

    /// [`Connection::execute`] with a single bound value.
    pub fn execute_value(&self, query: &str, format: FormatCode, value: Value) -> Result<QueryResult> {
        self.execute(query, format, std::slice::from_ref(&value))
    }

    /// [`Connection::execute`] without values, text results.
    pub fn query(&self, query: &str) -> Result<QueryResult> {
        self.execute(query, FormatCode::Text, &[])
    }

    /// Run `query` with pre-encoded parameters.
    ///
    /// The delegate's `will_execute` sees an empty value list.
    pub fn execute_params(
        &self,
        query: &str,
        format: FormatCode,
        params: &ParameterList,
    ) -> Result<QueryResult> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.require_connected().and_then(|()| {
            self.will_execute(query, &[]);
            self.run_statement(query, format, params, None)
        }))
    }

    /// [`Connection::execute`] that cancels the statement server-side once
    /// `deadline` has passed. The call then fails with [`Error::Cancelled`]
    /// and the connection stays usable.
    pub fn execute_with_deadline(
        &self,
        query: &str,
        format: FormatCode,
        values: &[Value],
        deadline: Duration,
    ) -> Result<QueryResult> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.run_values(query, format, values, Some(deadline)))
    }

    /// [`Connection::execute`] on a background worker. Same contract as
    /// [`Connection::connect_in_background`].
    pub fn execute_in_background<F>(
        self: &Arc<Self>,
        query: impl Into<String>,
        format: FormatCode,
        values: Vec<Value>,
        completion: F,
    ) -> bool
    where
        F: FnOnce(Result<QueryResult>) + Send + 'static,
    {
        let query = query.into();
        self.submit(
            move |conn| conn.run_values(&query, format, &values, None),
            completion,
        )
    }

    /// Run `COPY ... FROM STDIN` feeding it `data`. Returns the row count.
    pub fn copy_in(&self, query: &str, data: &[u8]) -> Result<u64> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.require_connected().and_then(|()| {
            self.will_execute(query, &[]);
            let mut machine = CopyInStateMachine::new(query, data);
            self.with_session(|session| session.drive(&mut machine))?;
            Ok(machine.rows_copied())
        }))
    }

    /// Run `COPY ... TO STDOUT` and collect everything the server sent.
    pub fn copy_out(&self, query: &str) -> Result<Vec<u8>> {
        let _turn = self.queue.enqueue().wait();
        self.reported(self.require_connected().and_then(|()| {
            self.will_execute(query, &[]);
            let mut machine = CopyOutStateMachine::new(query);
            self.with_session(|session| session.drive(&mut machine))?;
            tracing::debug!(rows = machine.rows_copied(), "copy out finished");
            Ok(machine.into_data())
        }))
    }

    /// Handle for cancelling the running statement from another thread.
    /// `None` unless connected.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        match self.status() {
            Status::Connected | Status::Busy => self.read_info().cancel.clone(),
            _ => None,
        }
    }

    // === Accessors ===

    pub fn status(&self) -> Status {
        self.lock_status().status()
    }

    /// Caller-owned value, never interpreted.
    pub fn tag(&self) -> i64 {
        self.tag.load(Ordering::Relaxed)
    }

    pub fn set_tag(&self, tag: i64) {
        self.tag.store(tag, Ordering::Relaxed);
    }

    /// User of the last successful connect.
    pub fn user(&self) -> Option<String> {
        self.read_info().user.clone()
    }

    /// Database of the last successful connect. The server defaults it to
    /// the user name.
    pub fn database(&self) -> Option<String> {
        self.read_info().database.clone()
    }

    /// Backend process id of the last successful connect.
    pub fn server_process_id(&self) -> Option<u32> {
        self.read_info().process_id
    }

    /// A parameter reported through ParameterStatus, e.g. `server_version`.
    pub fn server_parameter(&self, name: &str) -> Option<String> {
        self.read_info()
            .server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    /// Transaction status from the most recent ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.read_info().transaction_status
    }

    /// Returns true if the server asked for a password during the handshake
    /// of the current session.
    pub fn connection_used_password(&self) -> bool {
        matches!(self.status(), Status::Connected | Status::Busy) && self.read_info().password_used
    }

    /// Observe this connection. Only a weak reference is kept.
    pub fn set_delegate(&self, delegate: &Arc<dyn ConnectionDelegate>) {
        self.delegate.set(delegate);
    }

    pub fn clear_delegate(&self) {
        self.delegate.clear();
    }

    // === Operation bodies; the caller holds the turn ===

    pub(crate) fn probe(url: Result<ConnectionUrl>) -> Result<()> {
        let opts = Opts::try_from(&url?)?;
        tracing::debug!(host = %opts.host, port = opts.port, "ping");
        Session::open(&opts)?.terminate();
        Ok(())
    }

    pub(crate) fn open(&self, url: Result<ConnectionUrl>) -> Result<()> {
        let url = url?;
        self.transition(Event::Connect)?;

        let mut params = url.to_parameters();
        if let Some(delegate) = self.delegate.get() {
            delegate.will_open(self, &mut params);
        }
        self.establish(|| Opts::from_parameters(&params))
    }

    pub(crate) fn reopen(&self) -> Result<()> {
        let Some(opts) = self.lock_last_opts().clone() else {
            return Err(Error::NotConnected);
        };
        if self.status() == Status::Disconnected {
            return Err(Error::NotConnected);
        }
        self.transition(Event::Reset)?;
        self.release_session();
        self.establish(|| Ok(opts))
    }

    /// Handshake from `Connecting`, ending in `Connected` or `Error`.
    fn establish(&self, opts: impl FnOnce() -> Result<Opts>) -> Result<()> {
        match opts().and_then(|opts| Session::open(&opts).map(|session| (opts, session))) {
            Ok((opts, session)) => {
                self.install(session);
                *self.lock_last_opts() = Some(opts);
                self.transition(Event::Ok)?;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "handshake failed");
                self.transition(Event::Fail)?;
                Err(e)
            }
        }
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.release_session();
        self.transition(Event::Disconnect)?;
        Ok(())
    }

    pub(crate) fn run_values(
        &self,
        query: &str,
        format: FormatCode,
        values: &[Value],
        deadline: Option<Duration>,
    ) -> Result<QueryResult> {
        self.require_connected()?;
        self.will_execute(query, values);
        let params = ParameterList::from_values(values)?;
        self.run_statement(query, format, &params, deadline)
    }

    fn run_statement(
        &self,
        query: &str,
        format: FormatCode,
        params: &ParameterList,
        deadline: Option<Duration>,
    ) -> Result<QueryResult> {
        params.check_arity(query)?;
        let watchdog = match deadline {
            Some(limit) => {
                let handle = self.cancel_handle().ok_or(Error::NotConnected)?;
                Some(Watchdog::arm(handle, limit)?)
            }
            None => None,
        };

        tracing::debug!(query, params = params.len(), ?format, "execute");
        let mut collector = ResultCollector::new();
        let outcome = self.with_session(|session| {
            let mut machine = QueryStateMachine::new(&mut collector, query, params, format);
            session.drive(&mut machine)
        });
        drop(watchdog);
        outcome.map(|()| collector.into_result())
    }

    /// Run `exchange` on the session between `Busy` and `Connected`.
    ///
    /// An error that leaves the session unusable drops it and moves the
    /// connection to `Error`.
    fn with_session<T>(&self, exchange: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        self.transition(Event::ExecuteBegin)?;

        let mut slot = self.lock_session();
        let outcome = match slot.as_mut() {
            Some(session) => {
                let outcome = exchange(session);
                let mut info = self.write_info();
                info.transaction_status = session.transaction_status();
                info.server_params = session.server_params().to_vec();
                outcome
            }
            None => Err(Error::protocol("connected without a session")),
        };

        let broken = outcome.as_ref().is_err_and(Error::is_connection_broken);
        if broken {
            // Out of sync with the server; close without Terminate
            drop(slot.take());
            drop(slot);
            self.forget_session();
            self.transition(Event::Fatal)?;
        } else {
            drop(slot);
            self.transition(Event::ExecuteEnd)?;
        }
        outcome
    }

    fn require_connected(&self) -> Result<()> {
        match self.status() {
            Status::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    fn will_execute(&self, query: &str, values: &[Value]) {
        if let Some(delegate) = self.delegate.get() {
            delegate.will_execute(self, query, values);
        }
    }

    fn install(&self, session: Session) {
        let opts = session.opts();
        let cancel = session.backend_key().map(|key| {
            CancelHandle::new(
                opts.host.clone(),
                opts.port,
                opts.socket_path(),
                opts.connect_timeout,
                key,
            )
        });
        {
            let mut info = self.write_info();
            *info = SessionInfo {
                process_id: session.backend_key().map(|(pid, _)| pid),
                user: Some(opts.user.clone()),
                database: Some(opts.database.clone().unwrap_or_else(|| opts.user.clone())),
                password_used: session.password_used(),
                server_params: session.server_params().to_vec(),
                transaction_status: session.transaction_status(),
                cancel,
            };
        }
        *self.lock_session() = Some(session);
    }

    /// Terminate and drop the current session, if any.
    fn release_session(&self) {
        let session = self.lock_session().take();
        if let Some(session) = session {
            session.terminate();
        }
        self.forget_session();
    }

    /// Clear what only makes sense while a session is open. User, database
    /// and process id are kept as last-known values.
    fn forget_session(&self) {
        let mut info = self.write_info();
        info.password_used = false;
        info.cancel = None;
        info.transaction_status = TransactionStatus::Idle;
    }

    // === Plumbing ===

    /// Queue `op` now and run it on the dispatcher once its turn comes.
    pub(crate) fn submit<T, Op, F>(self: &Arc<Self>, op: Op, completion: F) -> bool
    where
        Op: FnOnce(&Connection) -> Result<T> + Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let ticket = self.queue.enqueue();
        let conn = Arc::clone(self);
        // If the job is dropped unrun, so is the ticket, and its position is skipped
        self.dispatcher.dispatch(Box::new(move || {
            let outcome = {
                let _turn = ticket.wait();
                conn.reported(op(&conn))
            };
            completion(outcome);
        }))
    }

    /// Apply `event` and tell the delegate about the state entered.
    fn transition(&self, event: Event) -> Result<()> {
        let entered = self.lock_status().apply(event)?;
        if let Some(status) = entered
            && let Some(delegate) = self.delegate.get()
        {
            delegate.status_change(self, status);
        }
        Ok(())
    }

    /// Pass an error to the delegate on its way out.
    fn reported<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            tracing::debug!(error = %e, kind = ?e.kind(), "operation failed");
            if let Some(delegate) = self.delegate.get() {
                delegate.error(self, e);
            }
        }
        outcome
    }

    fn lock_status(&self) -> MutexGuard<'_, StatusMachine> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_opts(&self) -> MutexGuard<'_, Option<Opts>> {
        self.last_opts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_info(&self) -> std::sync::RwLockReadGuard<'_, SessionInfo> {
        self.info.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_info(&self) -> std::sync::RwLockWriteGuard<'_, SessionInfo> {
        self.info.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.terminate();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status())
            .field("tag", &self.tag())
            .field("server_process_id", &self.server_process_id())
            .field("pending", &self.queue.pending())
            .finish_non_exhaustive()
    }
}
