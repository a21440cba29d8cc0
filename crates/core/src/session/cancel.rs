use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// One-shot cancellation signal shared between a control handler and a
/// send loop.
///
/// Unlike a bare `AtomicBool`, the send loop sleeps *on* the token, so
/// [`cancel`](Self::cancel) wakes it immediately instead of after the
/// current frame interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep until `deadline` or cancellation, whichever comes first.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}
