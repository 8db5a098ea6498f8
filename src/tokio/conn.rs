//! Async front for [`Connection`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::delegate::ConnectionDelegate;
use crate::dispatch::TokioDispatcher;
use crate::error::{Error, Result};
use crate::opts::ConnectionUrl;
use crate::protocol::types::FormatCode;
use crate::result::QueryResult;
use crate::status::Status;
use crate::sync::Connection;
use crate::value::Value;

/// [`Connection`] whose operations are awaited instead of blocked on.
///
/// Each call takes its place in the connection's operation queue when it is
/// made, runs on the runtime's blocking pool, and resolves through a oneshot
/// channel. Dropping the returned future does not withdraw the operation.
#[derive(Debug, Clone)]
pub struct AsyncConnection {
    inner: Arc<Connection>,
}

impl AsyncConnection {
    /// A disconnected connection bound to the current runtime.
    ///
    /// Fails with [`Error::InvalidUsage`] outside a tokio runtime.
    pub fn new() -> Result<Self> {
        let dispatcher = TokioDispatcher::current()
            .ok_or_else(|| Error::InvalidUsage("no tokio runtime is running".to_string()))?;
        Ok(Self::with_dispatcher(dispatcher))
    }

    pub fn with_dispatcher(dispatcher: TokioDispatcher) -> Self {
        Self {
            inner: Arc::new(Connection::with_dispatcher(Arc::new(dispatcher))),
        }
    }

    /// The blocking connection behind this one. Blocking calls on it share
    /// the same queue.
    pub fn blocking(&self) -> &Arc<Connection> {
        &self.inner
    }

    pub async fn connect(&self, url: &str) -> Result<()> {
        let url = ConnectionUrl::parse(url);
        self.run(move |conn| conn.open(url)).await
    }

    /// See [`Connection::ping`].
    pub async fn ping(&self, url: &str) -> Result<()> {
        let url = ConnectionUrl::parse(url);
        self.run(move |_| Connection::probe(url)).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.run(Connection::reopen).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.run(Connection::close).await
    }

    pub async fn execute(
        &self,
        query: &str,
        format: FormatCode,
        values: Vec<Value>,
    ) -> Result<QueryResult> {
        let query = query.to_string();
        self.run(move |conn| conn.run_values(&query, format, &values, None))
            .await
    }

    pub async fn query(&self, query: &str) -> Result<QueryResult> {
        self.execute(query, FormatCode::Text, Vec::new()).await
    }

    pub async fn execute_with_deadline(
        &self,
        query: &str,
        format: FormatCode,
        values: Vec<Value>,
        deadline: Duration,
    ) -> Result<QueryResult> {
        let query = query.to_string();
        self.run(move |conn| conn.run_values(&query, format, &values, Some(deadline)))
            .await
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    pub fn set_delegate(&self, delegate: &Arc<dyn ConnectionDelegate>) {
        self.inner.set_delegate(delegate);
    }

    async fn run<T, Op>(&self, op: Op) -> Result<T>
    where
        T: Send + 'static,
        Op: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let accepted = self.inner.submit(op, move |outcome| {
            // The caller may have stopped waiting
            let _ = tx.send(outcome);
        });
        if !accepted {
            return Err(Error::InvalidUsage(
                "background worker unavailable".to_string(),
            ));
        }
        rx.await
            .map_err(|e| Error::Cancelled(format!("background operation dropped: {e}")))?
    }
}
