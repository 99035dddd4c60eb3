use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{Error, Result};

/// Fixed set of permits bounding the number of requests in flight. Acquiring a permit is the only
/// place where dispatch waits, record intake never does.
#[derive(Clone, Debug)]
pub(crate) struct AdmissionPool {
    sem: Arc<Semaphore>,
    capacity: usize,
}

/// Capacity for one in-flight request. Returned to the pool when dropped, so it is released
/// exactly once whichever way the request ends.
#[derive(Debug)]
pub(crate) struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    /// Explicit release, for call sites that want the hand-back to be visible.
    pub(crate) fn release(self) {
        drop(self)
    }
}

impl AdmissionPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits until a permit is available.
    pub(crate) async fn acquire(&self) -> Result<Permit> {
        let permit = Arc::clone(&self.sem)
            .acquire_owned()
            .await
            .map_err(|_| Error::Pool("admission pool is closed".to_string()))?;
        Ok(Permit { _permit: permit })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Number of permits currently held.
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}
