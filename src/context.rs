//! Cancellation token shared across every long-lived thread the supervisor spawns.
//!
//! Every suspension point named in the design (backoff sleeps, probe
//! scheduling, event-channel reads, waits on a child-exit notification) takes
//! a [`Context`] and must unblock as soon as it is cancelled.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A cloneable, condvar-backed cancellation signal.
///
/// Cloning shares the same underlying flag: cancelling any clone cancels all
/// of them. There is no parent/child hierarchy: the supervisor owns exactly
/// one root `Context` and hands clones of it to every manager and monitor it
/// creates.
#[derive(Debug, Clone, Default)]
pub struct Context(Arc<(Mutex<bool>, Condvar)>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent: cancelling twice is a no-op past
    /// the first call.
    pub fn cancel(&self) -> Result<(), PoisonError<MutexGuard<'_, bool>>> {
        let (lock, cvar) = &*self.0;
        let mut cancelled = lock.lock()?;
        *cancelled = true;
        cvar.notify_all();
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.0;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks the calling thread until cancellation, forever if never
    /// cancelled. Used by threads with nothing else to wait on.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        drop(
            cvar.wait_while(guard, |cancelled| !*cancelled)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    /// Sleeps for `duration` unless cancelled first. Returns `true` if the
    /// sleep ran to completion, `false` if cancellation cut it short. This is
    /// the cancellable sleep backoff delays and probe intervals are built on.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.0;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, timeout) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard && timeout.timed_out()
    }
}
