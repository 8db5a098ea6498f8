//! Background workers for the `*_in_background` operations.

use std::thread;

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs off the caller's thread.
pub trait Dispatcher: Send + Sync {
    /// Start `job` on a worker.
    ///
    /// Returns `false` if the job was not accepted. The job is then dropped
    /// without running.
    fn dispatch(&self, job: Job) -> bool;
}

/// One named OS thread per job.
#[derive(Debug, Clone)]
pub struct ThreadDispatcher {
    thread_name: String,
}

impl ThreadDispatcher {
    pub fn new() -> Self {
        Self::named("pgclientkit-worker")
    }

    /// Workers get `thread_name` as their thread name.
    pub fn named(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, job: Job) -> bool {
        match thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(job)
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "cannot start background worker");
                false
            }
        }
    }
}

/// Runs jobs on the blocking pool of a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioDispatcher {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher for the runtime this is called from, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: Job) -> bool {
        // The JoinHandle is not needed; completion is reported by the job
        drop(self.handle.spawn_blocking(job));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_thread_dispatcher_runs_job_on_named_thread() {
        let (tx, rx) = mpsc::channel();
        let accepted = ThreadDispatcher::named("worker-test").dispatch(Box::new(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        }));
        assert!(accepted);
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("worker-test"));
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_tokio_dispatcher() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let dispatcher = TokioDispatcher::new(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();
        assert!(dispatcher.dispatch(Box::new(move || tx.send(7).unwrap())));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_current_outside_runtime() {
        #[cfg(feature = "tokio")]
        assert!(TokioDispatcher::current().is_none());
    }
}
