use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

/// Counts outstanding shutdown tasks and wakes waiters when the count
/// reaches zero.
///
/// The coordinator uses two of these: one for "every task has begun its
/// transport shutdown" and one for "every task has finished draining".
/// `Stop` always blocks on the first and only blocks on the second when the
/// process is exiting.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

struct WaitGroupInner {
    count: AtomicUsize,
    tx: watch::Sender<()>,
    rx: watch::Receiver<()>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(());
        Self {
            inner: Arc::new(WaitGroupInner { count: AtomicUsize::new(0), tx, rx }),
        }
    }

    /// Register `n` more tasks. Call before spawning them.
    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::SeqCst);
    }

    /// Mark one task as done
    pub fn done(&self) {
        let remaining = self.inner.count.fetch_sub(1, Ordering::SeqCst);
        if remaining == 1 {
            let _ = self.inner.tx.send(());
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Wait until the count reaches zero
    pub async fn wait(&self) {
        let mut rx = self.inner.rx.clone();
        loop {
            if self.inner.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Starting interval for counter-polling shutdown loops
pub const BACKOFF_START: Duration = Duration::from_millis(1);

/// Ceiling for the polling interval
pub const BACKOFF_CAP: Duration = Duration::from_millis(500);

/// Next polling interval: doubled, capped at 500 ms, with 10% jitter so
/// many servers draining at once do not poll in lockstep.
pub fn next_backoff(current: Duration) -> Duration {
    let doubled = current.saturating_mul(2).min(BACKOFF_CAP);
    let jitter_range = doubled.as_micros() as i64 / 10;
    if jitter_range == 0 {
        return doubled;
    }
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let micros = (doubled.as_micros() as i64 + jitter).max(1) as u64;
    Duration::from_micros(micros)
}
