//! Tokio integration: an awaitable connection and a dispatcher on the
//! blocking pool.

mod conn;

pub use crate::dispatch::TokioDispatcher;
pub use conn::AsyncConnection;
