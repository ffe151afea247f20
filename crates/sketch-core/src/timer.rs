//! Cancellable one-shot timer for debouncing.
//!
//! `arm` spawns a tokio task that sleeps and then runs a callback with the
//! [`TimerToken`] it was armed with. The callback must call
//! [`DebounceTimer::fire`] with that token before acting: re-arming or
//! cancelling bumps the generation, so a stale wakeup is rejected even if it
//! raced past the abort.
//!
//! Uses tokio's clock, so tests can drive it with a paused runtime.

use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(u64);

#[derive(Debug, Default)]
pub struct DebounceTimer {
    generation: u64,
    pending: Option<AbortHandle>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending timer and schedule `on_fire` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, delay: Duration, on_fire: F) -> TimerToken
    where
        F: FnOnce(TimerToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let token = TimerToken(self.generation);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(token).await;
        });
        self.pending = Some(task.abort_handle());
        token
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.generation += 1;
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim a wakeup. Returns true exactly once for the current arming.
    ///
    /// The pending handle is released without aborting, so the firing task
    /// keeps running.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        if token.0 != self.generation || self.pending.is_none() {
            return false;
        }
        self.pending = None;
        self.generation += 1;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counting_timer() -> (Arc<Mutex<DebounceTimer>>, Arc<AtomicUsize>) {
        (
            Arc::new(Mutex::new(DebounceTimer::new())),
            Arc::new(AtomicUsize::new(0)),
        )
    }

    fn arm(timer: &Arc<Mutex<DebounceTimer>>, fired: &Arc<AtomicUsize>, delay_ms: u64) {
        let t = Arc::clone(timer);
        let f = Arc::clone(fired);
        timer
            .lock()
            .unwrap()
            .arm(Duration::from_millis(delay_ms), move |token| async move {
                if t.lock().unwrap().fire(token) {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            });
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (timer, fired) = counting_timer();
        arm(&timer, &fired, 100);
        assert!(timer.lock().unwrap().is_armed());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.lock().unwrap().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_the_delay() {
        let (timer, fired) = counting_timer();
        for _ in 0..5 {
            arm(&timer, &fired, 100);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (timer, fired) = counting_timer();
        arm(&timer, &fired, 100);
        assert!(timer.lock().unwrap().cancel());
        assert!(!timer.lock().unwrap().cancel());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_token_rejected() {
        let mut timer = DebounceTimer::new();
        let stale = TimerToken(timer.generation);
        timer.cancel();
        assert!(!timer.fire(stale));
    }
}
