//! Wake-ups for blocked connection drivers.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::connection::Itc;

/// Wakes the tokio task driving a connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct NotifyItc(Arc<Notify>);

impl NotifyItc {
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.0.notified()
    }
}

impl Itc for NotifyItc {
    fn wake(&self) {
        // a stored permit covers a wake before the task awaits
        self.0.notify_one();
    }
}

/// Wakes the thread driving a blocking connection.
#[derive(Debug, Default)]
pub(crate) struct CondvarItc {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl CondvarItc {
    /// Blocks until woken or `timeout` passed, consuming the wake-up.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.woken.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut woken, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |woken| !*woken)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *woken)
    }
}

impl Itc for CondvarItc {
    fn wake(&self) {
        *self.woken.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn condvar_wake_is_not_lost() {
        let itc = CondvarItc::default();
        itc.wake();
        assert!(itc.wait(Duration::from_secs(5)));
        assert!(!itc.wait(Duration::from_millis(10)));
    }

    #[test]
    fn condvar_wakes_other_thread() {
        let itc = Arc::new(CondvarItc::default());
        let waker = Arc::clone(&itc);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake();
        });
        assert!(itc.wait(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn notify_keeps_permit() {
        let itc = NotifyItc::default();
        itc.wake();
        tokio::time::timeout(Duration::from_secs(5), itc.notified()).await.unwrap();
    }
}
