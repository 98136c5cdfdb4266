//! Fast timer: a single shared ticking source that packagers and hooks
//! subscribe to instead of each spawning their own `tokio::time::interval`
//! (spec §9 design note).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

type Handler = Box<dyn Fn() + Send + Sync>;

struct Subscription {
    interval: Duration,
    elapsed: Duration,
    handler: Handler,
}

/// Drives every subscription off one `tokio::time::interval` tick rather
/// than one task per subscriber, matching the ambient-timer pattern used
/// for the host binary's own eviction loop.
pub struct FastTimer {
    subscriptions: parking_lot::Mutex<Vec<Subscription>>,
    shutdown: Arc<Notify>,
}

impl Default for FastTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FastTimer {
    pub fn new() -> Self {
        Self {
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a handler to be invoked roughly every `interval`. The
    /// handler runs synchronously on the timer's own task, so it must not
    /// block; packagers hand off real work via a channel or spawn.
    pub fn subscribe<F>(&self, interval: Duration, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscriptions.lock().push(Subscription {
            interval,
            elapsed: Duration::ZERO,
            handler: Box::new(handler),
        });
    }

    /// Spawn the driving task at `tick` granularity (must divide every
    /// subscribed interval evenly for predictable cadence; the default host
    /// binary uses 100ms).
    pub fn spawn(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut subs = self.subscriptions.lock();
                        for sub in subs.iter_mut() {
                            sub.elapsed += tick;
                            if sub.elapsed >= sub.interval {
                                sub.elapsed = Duration::ZERO;
                                (sub.handler)();
                            }
                        }
                    }
                    _ = self.shutdown.notified() => {
                        trace!("fast timer shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn subscription_fires_after_its_interval_elapses() {
        let timer = Arc::new(FastTimer::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        timer.subscribe(Duration::from_millis(50), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let handle = timer.clone().spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(120)).await;
        timer.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
