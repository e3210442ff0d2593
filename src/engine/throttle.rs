// src/engine/throttle.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Caps how many executions may be in flight per worker at once.
///
/// A limit of `0` disables throttling.
#[derive(Debug, Default)]
pub struct Throttle {
    max_in_flight: usize,
    workers: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Throttle {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    fn semaphore(&self, worker: &str) -> Arc<Semaphore> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers
            .entry(worker.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_in_flight)))
            .clone()
    }

    /// Wait for a slot for `worker`. The slot is freed when the permit drops.
    pub async fn acquire(&self, worker: &str) -> Option<OwnedSemaphorePermit> {
        if self.max_in_flight == 0 || worker.is_empty() {
            return None;
        }
        let semaphore = self.semaphore(worker);
        if semaphore.available_permits() == 0 {
            debug!(worker = %worker, limit = self.max_in_flight, "worker at capacity; waiting");
        }
        // The semaphore is never closed.
        semaphore.acquire_owned().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_caller_waits_for_the_first_permit() {
        let throttle = Arc::new(Throttle::new(1));
        let first = throttle.acquire("w").await;
        assert!(first.is_some());

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.acquire("w").await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn zero_limit_never_blocks() {
        let throttle = Throttle::unlimited();
        assert!(throttle.acquire("w").await.is_none());
        assert!(throttle.acquire("w").await.is_none());
    }
}
