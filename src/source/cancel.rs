//! Blocking bridge between the host's worker threads and the async client.
//!
//! ```text
//!   create() thread          control thread
//!   ───────────────          ──────────────
//!   wait(fut) ──► Handle      unlock() ──► abort + Cancelled
//!        │                        │
//!        └── block_on(Abortable) ◄┘  returns WaitError::Cancelled
//! ```
//!
//! The cancelled state is sticky: once `unlock` ran, every further wait fails
//! immediately until `unlock_stop` clears it.

use std::{future::Future, sync::LazyLock, time::Duration};

use futures::future;
use parking_lot::Mutex;
use tokio::runtime;

use crate::common::SourceError;

static RUNTIME: LazyLock<Result<runtime::Runtime, String>> = LazyLock::new(|| {
    runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("httpsrc-runtime")
        .build()
        .map_err(|e| e.to_string())
});

pub(crate) fn runtime() -> Result<&'static runtime::Runtime, SourceError> {
    RUNTIME.as_ref().map_err(|e| SourceError::Session(e.clone()))
}

/// Abort handles of the waits currently blocked on behalf of one source.
///
/// Every wait registers its own handle and removes only that handle when it
/// returns, so `abort` reaches all of them.
#[derive(Debug, Default)]
pub(crate) struct Canceller {
    cancelled: bool,
    next_id: u64,
    handles: Vec<(u64, future::AbortHandle)>,
}

impl Canceller {
    pub(crate) fn abort(&mut self) {
        for (_, handle) in self.handles.drain(..) {
            handle.abort();
        }
        self.cancelled = true;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Clears the cancelled state. Waits still registered are kept.
    pub(crate) fn reset(&mut self) {
        self.cancelled = false;
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.handles.len()
    }

    fn register(&mut self) -> Option<(u64, future::AbortRegistration)> {
        if self.cancelled {
            return None;
        }
        let (handle, registration) = future::AbortHandle::new_pair();
        let id = self.next_id;
        self.next_id += 1;
        self.handles.push((id, handle));
        Some((id, registration))
    }

    fn release(&mut self, id: u64) {
        self.handles.retain(|(other, _)| *other != id);
    }
}

#[derive(Debug)]
pub(crate) enum WaitError {
    Cancelled,
    Timeout(Duration),
    Runtime(SourceError),
}

/// Runs `future` to completion on the shared runtime, giving up when the
/// canceller fires or `timeout` elapses.
///
/// `future` is first polled inside the runtime, so timers must be created
/// lazily (inside an `async` block) rather than by the caller.
pub(crate) fn wait<F, T>(
    canceller: &Mutex<Canceller>,
    timeout: Option<Duration>,
    future: F,
) -> Result<T, WaitError>
where
    F: Future<Output = T>,
{
    let rt = runtime().map_err(WaitError::Runtime)?;

    let Some((id, registration)) = canceller.lock().register() else {
        return Err(WaitError::Cancelled);
    };

    let abortable = future::Abortable::new(future, registration);
    let res = rt.block_on(async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, abortable).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(future::Aborted)) => Err(WaitError::Cancelled),
                Err(_) => Err(WaitError::Timeout(limit)),
            },
            None => abortable.await.map_err(|future::Aborted| WaitError::Cancelled),
        }
    });

    canceller.lock().release(id);
    res
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Instant};

    use super::*;

    #[test]
    fn completes_normally() {
        let canceller = Mutex::new(Canceller::default());
        let value = wait(&canceller, None, async { 42 }).unwrap();
        assert_eq!(value, 42);
        assert_eq!(canceller.lock().active(), 0);
    }

    #[test]
    fn times_out() {
        let canceller = Mutex::new(Canceller::default());
        let res = wait(
            &canceller,
            Some(Duration::from_millis(20)),
            async { tokio::time::sleep(Duration::from_secs(5)).await },
        );
        assert!(matches!(res, Err(WaitError::Timeout(_))));
    }

    #[test]
    fn abort_interrupts_a_blocked_wait() {
        let canceller = Arc::new(Mutex::new(Canceller::default()));
        let waiter = {
            let canceller = canceller.clone();
            thread::spawn(move || {
                wait(&canceller, None, async {
                    tokio::time::sleep(Duration::from_secs(30)).await
                })
            })
        };

        let started = Instant::now();
        while canceller.lock().active() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        canceller.lock().abort();

        let res = waiter.join().unwrap();
        assert!(matches!(res, Err(WaitError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(canceller.lock().is_cancelled());
    }

    #[test]
    fn cancelled_state_is_sticky() {
        let mut cancelled = Canceller::default();
        cancelled.abort();
        let canceller = Mutex::new(cancelled);
        assert!(matches!(
            wait(&canceller, None, async {}),
            Err(WaitError::Cancelled)
        ));
        assert!(canceller.lock().is_cancelled());
    }

    #[test]
    fn finished_wait_leaves_other_waits_abortable() {
        let canceller = Arc::new(Mutex::new(Canceller::default()));
        let blocked = {
            let canceller = canceller.clone();
            thread::spawn(move || {
                wait(&canceller, None, async {
                    tokio::time::sleep(Duration::from_secs(30)).await
                })
            })
        };
        while canceller.lock().active() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        // A second wait comes and goes while the first is still blocked.
        assert_eq!(wait(&canceller, None, async { 7 }).unwrap(), 7);
        assert_eq!(canceller.lock().active(), 1);

        let started = Instant::now();
        canceller.lock().abort();
        assert!(matches!(blocked.join().unwrap(), Err(WaitError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn reset_clears_cancellation() {
        let mut canceller = Canceller::default();
        canceller.abort();
        canceller.reset();
        let canceller = Mutex::new(canceller);
        assert_eq!(wait(&canceller, None, async { 1 }).unwrap(), 1);
    }
}
