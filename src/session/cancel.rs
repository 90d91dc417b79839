//! Cancellation and timer signals shared with the polling loops
//!
//! Both are single atomics so the signal task and the timer tasks can touch
//! them while a session loop runs on a blocking thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Why a session was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The user interrupted the transfer
    User,
    /// The surrounding program tore the session down
    Teardown,
}

const NOT_CANCELLED: u8 = 0;
const REASON_USER: u8 = 1;
const REASON_TEARDOWN: u8 = 2;

#[derive(Debug, Default)]
struct TokenInner {
    reason: AtomicU8,
    notify: Notify,
}

/// Write-once cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Only the first call has any effect.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let code = match reason {
            CancelReason::User => REASON_USER,
            CancelReason::Teardown => REASON_TEARDOWN,
        };
        let first = self
            .inner
            .reason
            .compare_exchange(NOT_CANCELLED, code, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.load(Ordering::SeqCst) != NOT_CANCELLED
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.inner.reason.load(Ordering::SeqCst) {
            REASON_USER => Some(CancelReason::User),
            REASON_TEARDOWN => Some(CancelReason::Teardown),
            _ => None,
        }
    }

    /// Wait until the flag is set
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Lock-free "timer elapsed" flag
#[derive(Debug, Clone, Default)]
pub struct TimerTick {
    fired: Arc<AtomicBool>,
}

impl TimerTick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the interval as elapsed
    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    /// Consume a pending tick
    pub fn take(&self) -> bool {
        self.fired.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_is_write_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        assert!(token.cancel(CancelReason::User));
        assert!(!token.cancel(CancelReason::Teardown));
        assert_eq!(token.reason(), Some(CancelReason::User));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        other.cancel(CancelReason::Teardown);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::Teardown));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel(CancelReason::User);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_set() {
        let token = CancellationToken::new();
        token.cancel(CancelReason::User);
        token.cancelled().await;
    }

    #[test]
    fn test_tick_consumed_once() {
        let tick = TimerTick::new();
        assert!(!tick.take());
        tick.fire();
        tick.fire();
        assert!(tick.take());
        assert!(!tick.take());
    }
}
