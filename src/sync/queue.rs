//! FIFO admission of operations on one connection.
//!
//! Each operation takes a [`Ticket`] when it is submitted and later waits for
//! its [`Turn`]. Turns are granted strictly in ticket order, so a background
//! operation submitted before a blocking one also runs before it.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct QueueState {
    next_ticket: u64,
    serving: u64,
    /// Tickets dropped before their turn
    abandoned: BTreeSet<u64>,
}

impl QueueState {
    fn advance(&mut self) {
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    turn_changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ticket queue granting one turn at a time.
#[derive(Debug, Clone, Default)]
pub struct OpQueue {
    shared: Arc<Shared>,
}

impl OpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next position.
    pub fn enqueue(&self) -> Ticket {
        let mut state = self.shared.lock();
        let number = state.next_ticket;
        state.next_ticket += 1;
        Ticket {
            shared: Arc::clone(&self.shared),
            number,
            waited: false,
        }
    }

    /// Number of tickets issued and not yet finished.
    pub fn pending(&self) -> u64 {
        let state = self.shared.lock();
        state.next_ticket - state.serving - state.abandoned.len() as u64
    }
}

/// A reserved position. Dropping it without waiting gives the position up.
#[derive(Debug)]
pub struct Ticket {
    shared: Arc<Shared>,
    number: u64,
    waited: bool,
}

impl Ticket {
    /// Block until every earlier ticket has finished.
    pub fn wait(mut self) -> Turn {
        self.waited = true;
        {
            let mut state = self.shared.lock();
            while state.serving != self.number {
                state = self
                    .shared
                    .turn_changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        Turn {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.waited {
            return;
        }
        let mut state = self.shared.lock();
        if state.serving == self.number {
            state.advance();
            drop(state);
            self.shared.turn_changed.notify_all();
        } else {
            state.abandoned.insert(self.number);
        }
    }
}

/// Exclusive right to run. The next ticket is admitted when this is dropped,
/// including during unwinding.
#[derive(Debug)]
pub struct Turn {
    shared: Arc<Shared>,
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.shared.lock().advance();
        self.shared.turn_changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_turns_follow_ticket_order() {
        let queue = OpQueue::new();
        let (tx, rx) = mpsc::channel();

        let first = queue.enqueue().wait();
        let mut handles = Vec::new();
        for i in 0..4 {
            // Tickets are taken here, in order, before any thread runs
            let ticket = queue.enqueue();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let _turn = ticket.wait();
                tx.send(i).unwrap();
            }));
        }
        thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
        drop(first);

        for handle in handles {
            handle.join().unwrap();
        }
        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_abandoned_ticket_is_skipped() {
        let queue = OpQueue::new();
        let first = queue.enqueue().wait();
        let abandoned = queue.enqueue();
        let third = queue.enqueue();
        drop(abandoned);
        drop(first);

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let _turn = third.wait();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_dropping_current_ticket_advances() {
        let queue = OpQueue::new();
        drop(queue.enqueue());
        let _turn = queue.enqueue().wait();
    }

    #[test]
    fn test_turn_released_on_panic() {
        let queue = OpQueue::new();
        let ticket = queue.enqueue();
        let result = thread::spawn(move || {
            let _turn = ticket.wait();
            panic!("operation failed");
        })
        .join();
        assert!(result.is_err());
        let _turn = queue.enqueue().wait();
    }
}
