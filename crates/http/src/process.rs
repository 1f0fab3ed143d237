//! Process-wide setup done once before the first daemon starts.

use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::debug;

static STARTED: OnceCell<Instant> = OnceCell::new();

/// Idempotent process initialization.
///
/// Ignores `SIGPIPE` so that a write to a peer that went away reports `EPIPE` to the
/// connection instead of killing the process.
pub fn init() {
    STARTED.get_or_init(|| {
        #[cfg(unix)]
        ignore_sigpipe();
        debug!("process initialized");
        Instant::now()
    });
}

/// When [`init`] first ran, `None` before that.
pub fn started_at() -> Option<Instant> {
    STARTED.get().copied()
}

#[cfg(unix)]
fn ignore_sigpipe() {
    // SAFETY: SIG_IGN installs no handler code, replacing the disposition is process-wide but harmless
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
