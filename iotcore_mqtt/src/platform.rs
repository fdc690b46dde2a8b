// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Platform abstraction layer: clock, sleep, randomness, one-shot timers,
//! and the critical-error hook.
//!
//! Every call here is async/tokio-backed rather than the blocking PAL shape
//! the C source exposes; a tokio runtime already stands in for the
//! platform's own scheduler in this crate.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The monotonic clock, in milliseconds, as seen by the rest of the crate.
#[must_use]
pub fn clock_msec() -> i64 {
    // chrono::Utc::now() is wall-clock, not monotonic, but it is the clock
    // component H and I actually need: comparing against an absolute
    // `expires_at_ms` computed the same way.
    chrono::Utc::now().timestamp_millis()
}

/// Suspend the current task for `ms` milliseconds. Zero or negative is a no-op.
pub async fn sleep_msec(ms: i64) {
    if ms <= 0 {
        return;
    }
    #[allow(clippy::cast_sign_loss)]
    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
}

/// A non-negative, non-cryptographic random value in `[0, max)`.
#[must_use]
pub fn random(max: i32) -> i32 {
    if max <= 0 {
        return 0;
    }
    rand::random::<u32>() as i32 % max
}

/// A one-shot timer that fires a [`TimerEvent`] onto a channel after a delay.
///
/// Starting a timer that is already running cancels and restarts it,
/// matching the platform contract's "at most one fire per start" rule.
pub struct Timer {
    handle: Option<JoinHandle<()>>,
}

/// Event posted by a fired [`Timer`], read by the pipeline's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerEvent(pub TimerId);

/// Opaque identity of a [`Timer`], used to correlate a [`TimerEvent`] back to
/// the state that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl Timer {
    /// Create a timer that is not yet started.
    #[must_use]
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Start (or restart) the timer; it fires `id` on `tx` after `ms` milliseconds.
    pub fn start(&mut self, id: TimerId, ms: i64, tx: mpsc::UnboundedSender<TimerEvent>) {
        self.destroy();
        #[allow(clippy::cast_sign_loss)]
        let delay = Duration::from_millis(ms.max(0) as u64);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerEvent(id));
        }));
    }

    /// Cancel the timer if running; idempotent.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Invoked on any invariant violation that the HFSM cannot recover from
/// (an event bubbling unhandled past the root state). Logs at `error` level;
/// unlike the platform contract's `critical_error`, this does not abort the
/// process — the caller is expected to tear the session down and surface a
/// [`crate::error::SessionExitError`] instead of terminating the host.
pub fn critical_error(context: &str) {
    log::error!("critical error: {context}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        timer.start(TimerId(1), 100, tx);

        tokio::time::advance(Duration::from_millis(150)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.0, TimerId(1));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_timer_cancels_previous_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = Timer::new();
        timer.start(TimerId(1), 100, tx.clone());
        timer.start(TimerId(2), 100, tx);

        tokio::time::advance(Duration::from_millis(150)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.0, TimerId(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn random_respects_bound() {
        for _ in 0..100 {
            assert!(random(10) < 10);
        }
        assert_eq!(random(0), 0);
    }
}
