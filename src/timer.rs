//! Owned one-shot and periodic tasks that are cancelled when dropped

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a spawned timer task; aborting on drop means every exit path
/// of the owner cancels the timer exactly once.
#[derive(Debug)]
pub struct TimerGuard {
    handle: Option<JoinHandle<()>>,
}

impl TimerGuard {
    /// Run `f` once after `delay`
    pub fn after<F, Fut>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            f().await;
        })
    }

    /// Wrap an arbitrary background future
    pub fn spawn<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(fut)),
        }
    }

    /// Let the task run to completion without cancelling it
    pub fn disarm(mut self) {
        self.handle.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// `base` plus a uniform random jitter in `[0, max_jitter)`
pub fn jittered(base: Duration, max_jitter: Duration) -> Duration {
    use rand::Rng;

    let jitter_ms = max_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}
