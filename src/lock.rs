//! The process-wide emulation lock.
//!
//! All emulator-state access originating outside the emulation thread is
//! serialized through this single recursive lock: the dispatcher's per-frame
//! fan-out and any direct script invocation from the control thread. The
//! lock is reentrant so a script callback that triggers another bridge call
//! on the same thread cannot deadlock against itself.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Cloneable handle to the recursive emulation lock. Clones share the same
/// underlying lock.
#[derive(Clone, Debug, Default)]
pub struct EmulationLock {
    inner: Arc<ReentrantMutex<()>>,
}

impl EmulationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held. Reentrant on the owning thread.
    pub fn acquire(&self) -> EmulationLockGuard<'_> {
        EmulationLockGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Non-blocking acquire.
    pub fn try_acquire(&self) -> Option<EmulationLockGuard<'_>> {
        self.inner
            .try_lock()
            .map(|guard| EmulationLockGuard { _guard: guard })
    }

    /// Acquire, giving up after `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<EmulationLockGuard<'_>> {
        self.inner
            .try_lock_for(timeout)
            .map(|guard| EmulationLockGuard { _guard: guard })
    }
}

/// RAII guard returned by [`EmulationLock`]; the lock is released on drop.
pub struct EmulationLockGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn acquire_is_reentrant_on_the_same_thread() {
        let lock = EmulationLock::new();
        let _outer = lock.acquire();
        let _inner = lock.acquire();
    }

    #[test]
    fn try_acquire_fails_while_another_thread_holds_the_lock() {
        let lock = EmulationLock::new();
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _guard = lock.acquire();
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };

        held_rx.recv().unwrap();
        assert!(lock.try_acquire().is_none());
        assert!(lock.try_acquire_for(Duration::from_millis(10)).is_none());

        release_tx.send(()).unwrap();
        worker.join().unwrap();
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn clones_share_one_lock() {
        let lock = EmulationLock::new();
        let alias = lock.clone();
        let _guard = lock.acquire();

        let probe = thread::spawn(move || alias.try_acquire().is_none());
        assert!(probe.join().unwrap());
    }
}
