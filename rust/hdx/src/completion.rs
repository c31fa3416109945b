//! Completion signalling for enqueued copies.
//!
//! A driver that accepts a copy for asynchronous execution keeps the
//! [`Completer`] and hands the [`PendingCopy`] back to the caller. The pending
//! side can be polled, waited on (with or without a deadline) and cloned. The
//! terminal result is *retired* exactly once: whichever observer takes it first
//! gets `Outcome::Done`, every later observer sees `Outcome::Retired`.
//!
//! ## Lifecycle
//!
//! 1. Pending: the copy is queued or running
//! 2. Done: the driver reported a result that nobody has taken yet
//! 3. Retired: the result has been taken
//!
//! Dropping a `Completer` without completing it resolves the copy as failed, so
//! a waiter can never block forever on a copy the driver abandoned.

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use hdx_common::{Result, error::Error};

/// Creates a pending completion pair for a copy executed by `backend`.
pub fn pending(backend: &'static str) -> (Completer, PendingCopy) {
    let cell = Arc::new(CompletionCell::new(backend));
    (Completer(Some(cell.clone())), PendingCopy(cell))
}

/// Creates a completion that is already resolved, for copies executed inline.
pub fn ready(backend: &'static str, result: Result<()>) -> PendingCopy {
    let (completer, pending) = pending(backend);
    completer.complete(result);
    pending
}

/// What a non-consuming or timed observation of a [`PendingCopy`] found.
#[derive(Debug)]
pub enum Outcome {
    Pending,
    /// The terminal result, taken by this observer.
    Done(Result<()>),
    /// The result was taken by another observer.
    Retired,
}

/// The driver side of a pending copy.
pub struct Completer(Option<Arc<CompletionCell>>);

impl Completer {
    /// Publishes the copy result and wakes all waiters.
    pub fn complete(mut self, result: Result<()>) {
        if let Some(cell) = self.0.take() {
            cell.set(result);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(cell) = self.0.take() {
            let backend = cell.backend;
            cell.set(Err(Error::backend(backend, "copy abandoned by the driver")));
        }
    }
}

/// The caller side of a pending copy.
#[derive(Clone)]
pub struct PendingCopy(Arc<CompletionCell>);

impl PendingCopy {
    /// Returns `true` while the driver has not reported a result.
    pub fn is_pending(&self) -> bool {
        self.0.state.lock().unwrap().is_pending()
    }

    /// Takes the result without blocking.
    pub fn poll(&self) -> Outcome {
        self.0.state.lock().unwrap().observe()
    }

    /// Blocks until the copy reaches a terminal state and takes its result.
    ///
    /// Returns `None` if another observer already retired the result.
    pub fn wait(&self) -> Option<Result<()>> {
        let guard = self.0.state.lock().unwrap();
        let mut guard = self
            .0
            .condvar
            .wait_while(guard, |state| state.is_pending())
            .unwrap();
        match guard.observe() {
            Outcome::Done(result) => Some(result),
            Outcome::Retired | Outcome::Pending => None,
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome {
        let guard = self.0.state.lock().unwrap();
        let (mut guard, _) = self
            .0
            .condvar
            .wait_timeout_while(guard, timeout, |state| state.is_pending())
            .unwrap();
        guard.observe()
    }

    /// Blocks until the copy completes and returns its result. A copy retired by
    /// another observer is reported as a backend error.
    pub fn join(self) -> Result<()> {
        let backend = self.0.backend;
        self.wait().unwrap_or_else(|| {
            Err(Error::backend(
                backend,
                "copy result was retired by another observer",
            ))
        })
    }
}

impl std::fmt::Debug for PendingCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCopy")
            .field("backend", &self.0.backend)
            .field("pending", &self.is_pending())
            .finish()
    }
}

struct CompletionCell {
    backend: &'static str,
    state: Mutex<State>,
    condvar: Condvar,
}

impl CompletionCell {
    fn new(backend: &'static str) -> CompletionCell {
        CompletionCell {
            backend,
            state: Mutex::new(State::Pending),
            condvar: Condvar::new(),
        }
    }

    fn set(&self, result: Result<()>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_pending() {
                *state = State::Done(result);
            }
        }
        self.condvar.notify_all();
    }
}

/// The state transitions are:
/// - `Pending` -> `Done` when the driver reports a result
/// - `Done` -> `Retired` when an observer takes the result
enum State {
    Pending,
    Done(Result<()>),
    Retired,
}

impl State {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    fn observe(&mut self) -> Outcome {
        match std::mem::replace(self, State::Retired) {
            State::Pending => {
                *self = State::Pending;
                Outcome::Pending
            }
            State::Done(result) => Outcome::Done(result),
            State::Retired => Outcome::Retired,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pending_copy_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<PendingCopy>();
        is_send_sync::<Completer>();
    }

    #[test]
    fn test_debug_reports_state() {
        let (completer, pending) = pending("test");
        assert_eq!(
            format!("{pending:?}"),
            r#"PendingCopy { backend: "test", pending: true }"#
        );
        completer.complete(Ok(()));
        assert!(format!("{pending:?}").contains("pending: false"));
    }

    #[test]
    fn test_result_is_retired_once() {
        let (completer, pending) = pending("test");
        let observer = pending.clone();
        assert!(pending.is_pending());
        assert!(matches!(pending.poll(), Outcome::Pending));

        completer.complete(Ok(()));
        assert!(!pending.is_pending());
        assert!(matches!(observer.poll(), Outcome::Done(Ok(()))));
        assert!(matches!(pending.poll(), Outcome::Retired));
        assert!(pending.wait().is_none());
    }

    #[test]
    fn test_wait_across_threads() {
        let (completer, pending) = pending("test");
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(Err(Error::backend("test", "dma fault")));
        });
        let result = pending.wait().expect("result");
        assert!(result.unwrap_err().is_backend_error());
    }

    #[test]
    fn test_wait_timeout() {
        let (completer, pending) = pending("test");
        assert!(matches!(
            pending.wait_timeout(Duration::from_millis(10)),
            Outcome::Pending
        ));
        completer.complete(Ok(()));
        assert!(matches!(
            pending.wait_timeout(Duration::from_millis(10)),
            Outcome::Done(Ok(()))
        ));
    }

    #[test]
    fn test_dropped_completer_fails_copy() {
        let (completer, pending) = pending("test");
        drop(completer);
        assert!(pending.join().unwrap_err().is_backend_error());

        assert!(ready("test", Ok(())).join().is_ok());
    }
}
