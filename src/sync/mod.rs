//! Blocking connection core.

mod cancel;
mod conn;
mod queue;
mod session;
mod stream;

pub use cancel::CancelHandle;
pub use conn::Connection;
