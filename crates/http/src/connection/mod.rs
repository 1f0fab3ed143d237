//! The per-connection protocol engine.
//!
//! A [`Connection`] is a state machine over a non-blocking [`Transport`](crate::transport::Transport).
//! Its event loop calls one of three entry points and then asks what to wait for:
//!
//! - [`Connection::on_readable`]: one `recv` into the read buffer
//! - [`Connection::on_writable`]: drains the write buffer or the content source
//! - [`Connection::on_idle`]: every transition that needs no I/O, including the
//!   application calls
//! - [`Connection::event_interest`] and [`Connection::deadline`]: what to wait for next
//!
//! # Components
//!
//! - [`State`]: the exclusive state tag
//! - [`EventInterest`]: readiness asked from the event loop
//! - [`ResumeHandle`]: resumes a connection suspended by its application
//! - [`Itc`]: wakes the thread owning a connection

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::trace;

#[allow(clippy::module_inception, reason = "the engine is the module's namesake")]
mod connection;
mod receive;
mod reply;
mod state;

pub use connection::{Connection, StateObserver};
pub use state::{EventInterest, State};

/// Inter-thread channel waking the event loop that owns a connection.
pub trait Itc: Send + Sync {
    fn wake(&self);
}

impl<F> Itc for F
where
    F: Fn() + Send + Sync,
{
    fn wake(&self) {
        (self)();
    }
}

const RUNNING: u8 = 0;
const SUSPENDED: u8 = 1;
/// `resume` was called before the application returned its suspending action.
const RESUME_PENDING: u8 = 2;

/// Suspension flag shared between a connection and its [`ResumeHandle`]s.
pub(crate) struct SuspendState {
    state: AtomicU8,
    itc: Option<Arc<dyn Itc>>,
}

impl SuspendState {
    pub fn new(itc: Option<Arc<dyn Itc>>) -> Self {
        Self { state: AtomicU8::new(RUNNING), itc }
    }

    pub fn is_suspended(&self) -> bool {
        self.state.load(Ordering::Acquire) == SUSPENDED
    }

    /// Suspends, `false` when a resume already arrived for this request.
    pub fn suspend(&self) -> bool {
        match self.state.compare_exchange(RUNNING, SUSPENDED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(_) => {
                self.state.store(RUNNING, Ordering::Release);
                false
            }
        }
    }

    /// Forgets a resume that was not followed by a suspension.
    pub fn clear(&self) {
        self.state.store(RUNNING, Ordering::Release);
    }

    fn resume(&self) {
        let previous = self
            .state
            .compare_exchange(SUSPENDED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .unwrap_or_else(|current| current);
        match previous {
            SUSPENDED => {
                trace!("connection resumed");
                if let Some(itc) = &self.itc {
                    itc.wake();
                }
            }
            RUNNING => {
                let _ = self.state.compare_exchange(RUNNING, RESUME_PENDING, Ordering::AcqRel, Ordering::Acquire);
            }
            _ => {}
        }
    }
}

impl fmt::Debug for SuspendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendState")
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("itc", &self.itc.is_some())
            .finish()
    }
}

/// Resumes a connection whose application answered `Suspend`.
///
/// Obtained from [`RequestView::resume_handle`](crate::protocol::RequestView::resume_handle),
/// it can be sent to and used from any thread.
#[derive(Debug, Clone)]
pub struct ResumeHandle {
    state: Arc<SuspendState>,
}

impl ResumeHandle {
    pub(crate) fn new(state: Arc<SuspendState>) -> Self {
        Self { state }
    }

    /// Lets the connection continue and wakes its event loop.
    ///
    /// Calling it before the application returned `Suspend` makes that suspension a no-op.
    pub fn resume(&self) {
        self.state.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn resume_wakes_once() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let itc: Arc<dyn Itc> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let state = Arc::new(SuspendState::new(Some(itc)));
        let handle = ResumeHandle::new(Arc::clone(&state));

        assert!(state.suspend());
        assert!(state.is_suspended());
        handle.resume();
        handle.resume();
        assert!(!state.is_suspended());
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn early_resume_cancels_suspension() {
        let state = Arc::new(SuspendState::new(None));
        ResumeHandle::new(Arc::clone(&state)).resume();
        assert!(!state.suspend());
        assert!(!state.is_suspended());
        assert!(state.suspend());
    }
}
