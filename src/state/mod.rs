//! Sans-I/O protocol state machines.
//!
//! A state machine never touches the socket. Each `step()` consumes the
//! message the driver left in the [`BufferSet`], may stage outgoing bytes in
//! its write buffer, and returns the [`Action`] the driver performs next.

pub mod action;
pub mod connection;
pub mod copy;
pub mod query;

pub use action::{Action, AsyncMessage};
pub use connection::ConnectionStateMachine;
pub use copy::{CopyInStateMachine, CopyOutStateMachine};
pub use query::QueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::types::TransactionStatus;

/// A protocol exchange driven by a blocking or async I/O loop.
pub trait StateMachine {
    /// Advance with the message currently in `buffer_set`.
    ///
    /// The first call is made before anything has been read.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Transaction status from the final ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;
}
