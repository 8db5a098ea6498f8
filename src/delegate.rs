//! Observer of a [`Connection`]'s lifecycle.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::Error;
use crate::status::Status;
use crate::sync::Connection;
use crate::value::Value;

/// Callbacks fired by a [`Connection`]. Every method has a no-op default.
///
/// Callbacks run synchronously on the thread that caused the event: the
/// caller's thread for blocking operations, the background worker for
/// `*_in_background` operations. No connection lock is held while a callback
/// runs, so accessors such as [`Connection::status`] and
/// [`Connection::tag`] are safe to call. Blocking operations on the same
/// connection (`execute`, `reset`, ...) are not: they would queue behind the
/// operation that fired the callback.
pub trait ConnectionDelegate: Send + Sync {
    /// Before the handshake of `connect`. `params` may be edited; the edited
    /// dictionary becomes the effective startup configuration.
    fn will_open(&self, conn: &Connection, params: &mut BTreeMap<String, String>) {
        let _ = (conn, params);
    }

    /// Before a statement is encoded and sent.
    fn will_execute(&self, conn: &Connection, query: &str, values: &[Value]) {
        let _ = (conn, query, values);
    }

    /// For every error an operation is about to return.
    fn error(&self, conn: &Connection, error: &Error) {
        let _ = (conn, error);
    }

    /// After the connection entered `status`.
    fn status_change(&self, conn: &Connection, status: Status) {
        let _ = (conn, status);
    }
}

/// Weak slot holding the current delegate.
///
/// The connection never keeps its delegate alive; each event upgrades the
/// reference and silently skips a delegate that was dropped.
#[derive(Default)]
pub(crate) struct DelegateSlot {
    inner: RwLock<Option<Weak<dyn ConnectionDelegate>>>,
}

impl DelegateSlot {
    pub fn set(&self, delegate: &Arc<dyn ConnectionDelegate>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::downgrade(delegate));
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Strong reference for the duration of one callback. The slot lock is
    /// released before this returns.
    pub fn get(&self) -> Option<Arc<dyn ConnectionDelegate>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for DelegateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateSlot")
            .field("present", &self.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;
    impl ConnectionDelegate for Nop {}

    #[test]
    fn test_slot_is_weak() {
        let slot = DelegateSlot::default();
        let delegate: Arc<dyn ConnectionDelegate> = Arc::new(Nop);
        slot.set(&delegate);
        assert!(slot.get().is_some());
        assert_eq!(Arc::strong_count(&delegate), 1);

        drop(delegate);
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_clear() {
        let slot = DelegateSlot::default();
        let delegate: Arc<dyn ConnectionDelegate> = Arc::new(Nop);
        slot.set(&delegate);
        slot.clear();
        assert!(slot.get().is_none());
    }
}
