//! Coalescing signal primitive.
//!
//! Many rapid `signal` calls collapse into few handler runs: while the handler
//! is busy, new signals overwrite a single pending slot, and the worker picks
//! up whatever value is there once the handler returns. The handler therefore
//! always runs with the most recent value and never queues a backlog.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

struct Shared<T> {
    slot: Mutex<Option<T>>,
    wake: Notify,
    stopped: AtomicBool,
}

pub struct Debouncer<T> {
    shared: Arc<Shared<T>>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(mut handler: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = tokio::spawn(async move {
            loop {
                let pending = {
                    let mut slot = match worker_shared.slot.lock() {
                        Ok(g) => g,
                        Err(e) => e.into_inner(),
                    };
                    slot.take()
                };
                match pending {
                    Some(value) => handler(value).await,
                    None => {
                        if worker_shared.stopped.load(Ordering::Acquire) {
                            break;
                        }
                        // Notify keeps one permit, so a signal landing between
                        // the take above and this await is not lost.
                        worker_shared.wake.notified().await;
                    }
                }
            }
        });
        Self { shared, worker }
    }

    /// Replaces any pending value and wakes the worker.
    pub fn signal(&self, value: T) {
        {
            let mut slot = match self.shared.slot.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            *slot = Some(value);
        }
        self.shared.wake.notify_one();
    }

    /// Lets an in-flight handler run finish, drops any still-pending value,
    /// then stops the worker.
    pub async fn shutdown(self) {
        self.shared.stopped.store(true, Ordering::Release);
        {
            let mut slot = match self.shared.slot.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            *slot = None;
        }
        self.shared.wake.notify_one();
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn burst_of_signals_coalesces() {
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let (runs2, last2) = (Arc::clone(&runs), Arc::clone(&last));
        let debouncer = Debouncer::new(move |v: usize| {
            let (runs, last) = (Arc::clone(&runs2), Arc::clone(&last2));
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(v, Ordering::SeqCst);
            }
        });

        for v in 1..=50 {
            debouncer.signal(v);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.shutdown().await;

        // First run sees some early value, the last run sees 50; a run per
        // signal would need 1.5 seconds of handler time.
        assert!(runs.load(Ordering::SeqCst) <= 3);
        assert_eq!(last.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn signal_during_run_triggers_another_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = Arc::clone(&runs);
        let debouncer = Debouncer::new(move |_: ()| {
            let runs = Arc::clone(&runs2);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
        });

        debouncer.signal(());
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Handler is mid-run; this must not be dropped.
        debouncer.signal(());
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
