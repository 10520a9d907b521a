//! Per-device access serializer
//!
//! A single async mutex guards all device state. Waiting for it can be
//! abandoned through an [`Interrupt`], in which case the caller gets
//! `Error::Interrupted` and nothing has been touched. Release happens when
//! the returned guard is dropped, so every exit path unlocks.

use crate::error::{Error, Result};
use crate::metrics;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::warn;

/// Cancellation signal for tasks waiting on a device
///
/// Cloning yields a handle to the same signal. Once triggered it stays
/// triggered.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Deliver the signal to every current and future waiter
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been triggered
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutual exclusion around one device's state
#[derive(Debug)]
pub struct AccessSerializer<T> {
    inner: Mutex<T>,
}

impl<T> AccessSerializer<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Wait for exclusive access, giving up if `interrupt` fires first
    pub async fn acquire(&self, interrupt: &Interrupt) -> Result<MutexGuard<'_, T>> {
        tokio::select! {
            biased;
            guard = self.inner.lock() => Ok(guard),
            _ = interrupt.triggered() => {
                warn!("Interrupted while waiting for device lock");
                metrics::INTERRUPTED_WAITS.inc();
                Err(Error::Interrupted)
            }
        }
    }

    /// Acquire without a way to be interrupted
    pub async fn acquire_uninterruptible(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }

    /// Exclusive access through a unique reference, no waiting
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
