//! Generational cancellation slots.
//!
//! An [`OperationSlot`] is the cancellation authority for one I/O direction.
//! Operations capture the slot's current token under the slot's guard before
//! they are issued. Cancelling fires the current token and installs a fresh
//! one under the same guard, so a cancel either stops an operation that has
//! already captured its token or happens before the capture and leaves the
//! operation on the new generation. Operations on one slot run one at a time.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation authority for one I/O direction.
#[derive(Debug)]
pub struct OperationSlot {
    name: &'static str,
    token: Mutex<CancellationToken>,
    serial: tokio::sync::Mutex<()>,
}

impl OperationSlot {
    /// Creates a slot with a live token.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: Mutex::new(CancellationToken::new()),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the slot name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns a clone of the current generation's token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }

    /// Cancels the current generation and installs a fresh one.
    pub fn cancel(&self) {
        let mut token = lock(&self.token);
        if !token.is_cancelled() {
            tracing::debug!("cancelling {} slot", self.name);
            token.cancel();
        }
        *token = CancellationToken::new();
    }

    /// Installs a fresh generation without cancelling the current one.
    ///
    /// Used when no operation can be in flight, e.g. right after connecting.
    pub fn reset(&self) {
        *lock(&self.token) = CancellationToken::new();
    }

    /// Runs one operation under the slot.
    ///
    /// `issue` is called with the token captured while holding the guard and
    /// must create the I/O future. Returns [`Error::Cancelled`] without calling
    /// `issue` if the captured token is already cancelled, or as soon as it is
    /// cancelled while the operation is pending.
    pub async fn run<T, F, Fut>(&self, issue: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _serial = self.serial.lock().await;

        let (token, operation) = {
            let current = lock(&self.token);
            if current.is_cancelled() {
                return Err(Error::Cancelled);
            }
            (current.clone(), issue())
        };

        tokio::select! {
            biased;
            () = token.cancelled() => Err(Error::Cancelled),
            result = operation => result,
        }
    }

    /// Runs one operation whose captured token fires after `timeout`.
    ///
    /// On expiry the captured generation is cancelled, a fresh one is
    /// installed if that generation was still current, and
    /// [`Error::Timeout`] is returned.
    pub async fn run_with_timeout<T, F, Fut>(&self, timeout: Duration, issue: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _serial = self.serial.lock().await;

        let (token, operation) = {
            let current = lock(&self.token);
            if current.is_cancelled() {
                return Err(Error::Cancelled);
            }
            (current.clone(), issue())
        };

        tokio::select! {
            biased;
            () = token.cancelled() => Err(Error::Cancelled),
            result = operation => result,
            () = tokio::time::sleep(timeout) => {
                let mut current = lock(&self.token);
                token.cancel();
                if current.is_cancelled() {
                    *current = CancellationToken::new();
                }
                tracing::debug!("{} slot timed out after {:?}", self.name, timeout);
                Err(Error::timeout(timeout))
            }
        }
    }
}
