//! The ready signal: a one-shot broadcast latch (§3 I5, §5, §8 P7, §9).

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Transitions exactly once from unset to set, at the end of the first
/// successful full load. Readers either wait on it (`ListUsers` and
/// friends) or peek it and fall back to a targeted load (`GetUser`).
#[derive(Default)]
pub struct ReadySignal {
    ready: AtomicBool,
    notify: Notify,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Fire the latch. A second call is a no-op — the compare-exchange
    /// guarantees the unset->set transition happens at most once even
    /// under concurrent callers (§8 P7).
    pub fn set(&self) {
        if self
            .ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_waiters();
        }
    }

    pub async fn wait(&self) {
        if self.is_ready() {
            return;
        }
        // Re-check after registering for notification to avoid missing a
        // `set()` that happens between the first check and `notified()`.
        let notified = self.notify.notified();
        if self.is_ready() {
            return;
        }
        notified.await;
    }
}
