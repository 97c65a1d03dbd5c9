use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug, Error)]
#[error("limiter {name} is closed")]
pub struct LimiterClosed {
    pub name: String,
}

/// Named cap on how many backend calls may be in flight at once.
///
/// Clones share the same slots, so one limiter can be handed to every
/// pipeline run of a process. Waiters are served in FIFO order.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    name: Arc<str>,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// A capacity of zero is raised to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Waits for a free slot. The slot is returned when the permit drops.
    pub async fn acquire(&self) -> Result<LimiterPermit, LimiterClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed {
                name: self.name.to_string(),
            })?;
        trace!(limiter = %self.name, in_flight = self.in_flight(), "slot acquired");
        Ok(LimiterPermit { _permit: permit })
    }
}

#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl LimiterPermit {
    pub fn release(self) {}
}
