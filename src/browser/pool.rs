//! Bounded pool of browser leases.
//!
//! A lease must be held for the whole life of an interview session and
//! is released exactly once, on drop. Acquisition has a timeout so a
//! stuck session cannot starve the rest of the pipeline forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::InteractionError;

/// Caps how many browser sessions run at once.
#[derive(Clone)]
pub struct BrowserPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BrowserPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Acquire a lease, waiting at most `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<BrowserLease, InteractionError> {
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| InteractionError::LeaseTimeout { timeout })?
            .map_err(|_| InteractionError::LeaseTimeout { timeout })?;
        debug!(available = self.permits.available_permits(), "Browser lease acquired");
        Ok(BrowserLease { _permit: permit })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// RAII lease on a pool slot. Dropping it returns the slot; drop runs
/// exactly once, so double release is impossible by construction.
#[derive(Debug)]
pub struct BrowserLease {
    _permit: OwnedSemaphorePermit,
}
