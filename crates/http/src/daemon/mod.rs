//! Daemon lifecycle: options, listen socket and the threads driving connections.
//!
//! A [`Daemon`] owns the state shared by all of its connections ([`DaemonContext`]) and,
//! unless it runs in [`ThreadingMode::ExternalLoop`], the threads that accept and drive
//! them. With an external loop the embedder creates each [`Connection`] through
//! [`Daemon::new_connection`] and calls its entry points itself.
//!
//! # Components
//!
//! - [`listener`]: binds the listen socket
//! - `worker`: tokio drivers for the internal-thread and thread-pool modes
//! - `threaded`: blocking driver for the thread-per-connection mode

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::NonceNcArray;
use crate::config::{DaemonOptions, ThreadingMode};
use crate::connection::{Connection, Itc};
use crate::handler::Handler;
use crate::pool::LargeBudget;
use crate::process;
use crate::protocol::DaemonError;
use crate::transport::Transport;
#[cfg(feature = "tls")]
use crate::transport::tls::TlsContext;

mod itc;
pub mod listener;
mod threaded;
mod worker;

/// State shared by every connection of a daemon.
pub struct DaemonContext {
    pub(crate) options: DaemonOptions,
    pub(crate) handler: Arc<dyn Handler>,
    /// `None` when digest nonce tracking is disabled.
    pub(crate) nonces: Option<Mutex<NonceNcArray>>,
    /// Per-daemon secret mixed into digest nonces.
    pub(crate) random: [u8; 32],
    pub(crate) large: LargeBudget,
}

impl DaemonContext {
    pub(crate) fn new(options: DaemonOptions, handler: Arc<dyn Handler>) -> Self {
        let nonces = (options.digest_nc_array_size > 0).then(|| Mutex::new(NonceNcArray::new(options.digest_nc_array_size)));
        let mut random = [0u8; 32];
        rand::thread_rng().fill(&mut random[..]);
        let large = LargeBudget::new(options.large_pool_size);
        Self { options, handler, nonces, random, large }
    }

    pub fn options(&self) -> &DaemonOptions {
        &self.options
    }
}

impl fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonContext")
            .field("options", &self.options)
            .field("nonces", &self.nonces.is_some())
            .field("large", &self.large)
            .finish_non_exhaustive()
    }
}

/// What the driver threads of a started daemon share.
pub(crate) struct Shared {
    pub context: Arc<DaemonContext>,
    #[cfg(feature = "tls")]
    pub tls: Option<TlsContext>,
    /// Cancelled by [`Daemon::shutdown`], every connection closes.
    pub shutdown: CancellationToken,
    /// Child of `shutdown`, cancelled by [`Daemon::quiesce`].
    pub accepting: CancellationToken,
}

/// An HTTP/1.1 daemon.
///
/// Dropping a started daemon shuts it down.
pub struct Daemon {
    context: Arc<DaemonContext>,
    #[cfg(feature = "tls")]
    tls: Option<TlsContext>,
    shutdown: CancellationToken,
    accepting: CancellationToken,
    local_addr: Option<SocketAddr>,
    threads: Vec<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(options: DaemonOptions, handler: Arc<dyn Handler>) -> Result<Self, DaemonError> {
        options.validate()?;
        process::init();
        let shutdown = CancellationToken::new();
        let accepting = shutdown.child_token();
        Ok(Self {
            context: Arc::new(DaemonContext::new(options, handler)),
            #[cfg(feature = "tls")]
            tls: None,
            shutdown,
            accepting,
            local_addr: None,
            threads: Vec::new(),
        })
    }

    /// Serves every accepted connection over TLS.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn options(&self) -> &DaemonOptions {
        &self.context.options
    }

    /// The bound address once [`start`](Self::start) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Creates a connection over an already accepted transport, for embedders running
    /// their own event loop.
    ///
    /// `itc` is woken when a [`ResumeHandle`](crate::connection::ResumeHandle) of the
    /// connection is used from another thread.
    pub fn new_connection<T: Transport + 'static>(&self, transport: T, itc: Option<Arc<dyn Itc>>) -> Connection<T> {
        Connection::new(transport, Arc::clone(&self.context), itc)
    }

    /// Binds `addr` and starts the driver threads of the configured threading mode.
    pub fn start(&mut self, addr: impl ToSocketAddrs) -> Result<SocketAddr, DaemonError> {
        if self.local_addr.is_some() {
            return Err(DaemonError::invalid_options("daemon already started"));
        }
        let mode = self.context.options.threading_mode;
        if mode == ThreadingMode::ExternalLoop {
            return Err(DaemonError::invalid_options("an external-loop daemon has no internal listener"));
        }

        let addr = addr
            .to_socket_addrs()
            .map_err(DaemonError::io)?
            .next()
            .ok_or_else(|| DaemonError::invalid_options("no address to listen on"))?;
        let listener = listener::bind(addr, &self.context.options)?;
        let local_addr = listener.local_addr().map_err(DaemonError::io)?;

        let shared = Arc::new(Shared {
            context: Arc::clone(&self.context),
            #[cfg(feature = "tls")]
            tls: self.tls.clone(),
            shutdown: self.shutdown.clone(),
            accepting: self.accepting.clone(),
        });
        self.threads = match mode {
            ThreadingMode::ThreadPerConnection => vec![worker::spawn_acceptor(listener, shared)?],
            _ => worker::spawn_workers(listener, &shared, self.context.options.worker_count())?,
        };
        self.local_addr = Some(local_addr);
        info!(%local_addr, ?mode, "daemon listening");
        Ok(local_addr)
    }

    /// Stops accepting new connections, established ones are still served.
    pub fn quiesce(&self) {
        debug!("quiescing daemon");
        self.accepting.cancel();
    }

    /// Closes every connection and joins the driver threads.
    pub fn shutdown(&mut self) {
        self.shutdown.cancel();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("daemon thread panicked");
            }
        }
        if let Some(addr) = self.local_addr.take() {
            info!(%addr, "daemon stopped");
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("context", &self.context)
            .field("local_addr", &self.local_addr)
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Action, make_handler};
    use crate::protocol::{RequestView, Response};
    use http::StatusCode;

    fn handler() -> Arc<dyn Handler> {
        Arc::new(make_handler(|_: &RequestView<'_>| Action::response(Response::from_buffer(StatusCode::OK, "ok"))))
    }

    #[test]
    fn nonce_array_follows_options() {
        let options = DaemonOptions::builder().digest_nc_array_size(0).build().unwrap();
        assert!(DaemonContext::new(options, handler()).nonces.is_none());

        let context = DaemonContext::new(DaemonOptions::default(), handler());
        assert!(context.nonces.is_some());
        assert_ne!(context.random, [0u8; 32]);
    }

    #[test]
    fn external_loop_has_no_listener() {
        let options = DaemonOptions::builder().threading_mode(ThreadingMode::ExternalLoop).build().unwrap();
        let mut daemon = Daemon::new(options, handler()).unwrap();
        assert!(matches!(daemon.start("127.0.0.1:0"), Err(DaemonError::InvalidOptions { .. })));
        assert!(daemon.local_addr().is_none());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = DaemonOptions { connection_memory_limit: 16, ..DaemonOptions::default() };
        assert!(Daemon::new(options, handler()).is_err());
    }
}
