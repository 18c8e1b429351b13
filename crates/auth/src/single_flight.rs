// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Share one in-flight operation among concurrent callers.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

type Slot<T> = Arc<Mutex<Option<watch::Receiver<Option<T>>>>>;

/// At most one operation runs at a time; callers arriving while it runs
/// await the same published result.
///
/// The operation is spawned as its own task, so a caller giving up does not
/// cancel it for the others.
pub struct SingleFlight<T> {
    slot: Slot<T>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self { slot: Arc::new(Mutex::new(None)) }
    }
}

/// Empties the slot when the operation's task ends, however it ends.
struct Release<T>(Slot<T>);

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Join the running operation, or start one with `start`.
    ///
    /// Returns `None` if the operation's task ended without producing a
    /// value (panicked or was aborted).
    pub async fn run<F, Fut>(&self, start: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut rx = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(rx) => {
                    tracing::debug!("joining in-flight operation");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    let release = Release(Arc::clone(&self.slot));
                    let fut = start();
                    tokio::spawn(async move {
                        let value = fut.await;
                        drop(release);
                        let _ = tx.send(Some(value));
                    });
                    rx
                }
            }
        };

        // Bound to a local so the borrow of `rx` ends before `rx` drops.
        let value = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        value
    }
}

#[cfg(test)]
#[path = "single_flight_tests.rs"]
mod tests;
