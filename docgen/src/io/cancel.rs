//! Cooperative cancellation shared by every blocking operation of a request.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;

use crate::errors::Cancelled;

/// Cloneable cancellation signal.
///
/// Model retries sleep through [`CancelToken::sleep`] and subprocess waits poll
/// [`CancelToken::is_cancelled`], so a cancel aborts both promptly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock_flag(lock) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_flag(&self.inner.0)
    }

    /// Fail with [`Cancelled`] if the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early with [`Cancelled`] on cancellation.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let guard = lock_flag(lock);
        let (guard, _timeout) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard {
            return Err(Cancelled.into());
        }
        Ok(())
    }
}

fn lock_flag(lock: &Mutex<bool>) -> MutexGuard<'_, bool> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
