//! Coalesces concurrent requests for the same piece of work.
//!
//! The first caller starts the work; callers arriving while it is in flight
//! await the same shared future and receive a clone of its output.

use std::future::Future;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

pub struct SingleFlight<T: Clone> {
    inflight: Mutex<Option<Shared<BoxFuture<'static, T>>>>,
}

impl<T: Clone> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let busy = self
            .inflight
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        f.debug_struct("SingleFlight").field("in_flight", &busy).finish()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` unless a run is already in flight, in which case join it.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut slot = self.inflight.lock().unwrap_or_else(|err| err.into_inner());
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = make().boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let output = shared.clone().await;

        let mut slot = self.inflight.lock().unwrap_or_else(|err| err.into_inner());
        if slot
            .as_ref()
            .is_some_and(|current| Shared::ptr_eq(current, &shared))
        {
            *slot = None;
        }
        output
    }

    pub fn is_in_flight(&self) -> bool {
        self.inflight
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run(move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        runs.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|value| *value == 1));
        assert!(!flight.is_in_flight());
    }

    #[tokio::test]
    async fn sequential_calls_run_again() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run(|| async { 1 }).await, 1);
        assert_eq!(flight.run(|| async { 2 }).await, 2);
    }
}
