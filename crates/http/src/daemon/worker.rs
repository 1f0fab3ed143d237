//! Tokio drivers for the internal-thread and thread-pool modes.
//!
//! Every worker is an OS thread running a current-thread runtime. Worker 0 also runs the
//! accept loop and hands sockets to the workers round-robin over their channels.
//! A connection is one task awaiting whatever its [`EventInterest`] asks for.

use std::future;
use std::net;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use super::Shared;
use super::itc::NotifyItc;
use super::threaded;
use crate::connection::{Connection, EventInterest, Itc};
use crate::protocol::{CloseReason, DaemonError};
use crate::transport::{PlainTransport, TokioSocket, Transport};

type StreamSender = mpsc::UnboundedSender<net::TcpStream>;
type StreamReceiver = mpsc::UnboundedReceiver<net::TcpStream>;

/// Where the accept loop puts a new socket.
enum Dispatch {
    /// Served on the accepting runtime.
    Local(TaskTracker),
    Workers { senders: Vec<StreamSender>, next: usize },
    /// One blocking thread per connection.
    Threads,
}

impl Dispatch {
    fn dispatch(&mut self, stream: TcpStream, shared: &Arc<Shared>) {
        match self {
            Dispatch::Local(tasks) => {
                tasks.spawn(serve(stream, Arc::clone(shared)));
            }
            Dispatch::Workers { senders, next } => {
                let stream = match stream.into_std() {
                    Ok(stream) => stream,
                    Err(e) => return warn!(cause = %e, "failed to detach socket"),
                };
                let worker = *next % senders.len();
                *next = next.wrapping_add(1);
                if senders[worker].send(stream).is_err() {
                    warn!(worker, "worker gone, dropping connection");
                }
            }
            Dispatch::Threads => match stream.into_std() {
                Ok(stream) => threaded::spawn_connection(stream, Arc::clone(shared)),
                Err(e) => warn!(cause = %e, "failed to detach socket"),
            },
        }
    }
}

/// Starts `count` workers, the first one owning `listener`.
pub(super) fn spawn_workers(
    listener: net::TcpListener,
    shared: &Arc<Shared>,
    count: usize,
) -> Result<Vec<JoinHandle<()>>, DaemonError> {
    let count = count.max(1);
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| mpsc::unbounded_channel()).unzip();
    let mut acceptor = Some((listener, (count > 1).then_some(senders)));

    receivers
        .into_iter()
        .enumerate()
        .map(|(id, streams)| {
            let shared = Arc::clone(shared);
            let acceptor = acceptor.take();
            thread::Builder::new()
                .name(format!("micro-httpd-worker-{id}"))
                .spawn(move || run_worker(id, &shared, streams, acceptor))
                .map_err(DaemonError::io)
        })
        .collect()
}

/// Starts the accept thread of the thread-per-connection mode.
pub(super) fn spawn_acceptor(listener: net::TcpListener, shared: Arc<Shared>) -> Result<JoinHandle<()>, DaemonError> {
    thread::Builder::new()
        .name("micro-httpd-acceptor".into())
        .spawn(move || {
            let Some(runtime) = build_runtime("acceptor") else {
                return;
            };
            runtime.block_on(accept_loop(listener, Dispatch::Threads, shared));
        })
        .map_err(DaemonError::io)
}

fn build_runtime(name: &str) -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            error!(thread = name, cause = %e, "failed to build runtime");
            None
        }
    }
}

fn run_worker(
    id: usize,
    shared: &Arc<Shared>,
    mut streams: StreamReceiver,
    acceptor: Option<(net::TcpListener, Option<Vec<StreamSender>>)>,
) {
    let Some(runtime) = build_runtime("worker") else {
        return;
    };
    runtime.block_on(async move {
        let tasks = TaskTracker::new();
        if let Some((listener, senders)) = acceptor {
            let dispatch = match senders {
                Some(senders) => Dispatch::Workers { senders, next: 0 },
                None => Dispatch::Local(tasks.clone()),
            };
            tasks.spawn(accept_loop(listener, dispatch, Arc::clone(shared)));
        }

        loop {
            let stream = tokio::select! {
                () = shared.shutdown.cancelled() => break,
                stream = streams.recv() => stream,
            };
            let Some(stream) = stream else {
                break;
            };
            match TcpStream::from_std(stream) {
                Ok(stream) => {
                    tasks.spawn(serve(stream, Arc::clone(shared)));
                }
                Err(e) => warn!(worker = id, cause = %e, "failed to register socket"),
            }
        }

        tasks.close();
        tasks.wait().await;
        debug!(worker = id, "worker stopped");
    });
}

async fn accept_loop(listener: net::TcpListener, mut dispatch: Dispatch, shared: Arc<Shared>) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => return error!(cause = %e, "failed to register listener"),
    };
    loop {
        let accepted = tokio::select! {
            () = shared.accepting.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                trace!(%peer, "accepted connection");
                dispatch.dispatch(stream, &shared);
            }
            Err(e) => warn!(cause = %e, "failed to accept"),
        }
    }
    debug!("stopped accepting connections");
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let stream = Arc::new(stream);
    let socket = TokioSocket::new(Arc::clone(&stream));
    let itc = NotifyItc::default();
    let wake: Arc<dyn Itc> = Arc::new(itc.clone());
    let context = Arc::clone(&shared.context);

    #[cfg(feature = "tls")]
    let socket = match &shared.tls {
        Some(tls) => {
            match tls.setup_conn(socket) {
                Ok(transport) => drive(Connection::new(transport, context, Some(wake)), &stream, &itc, &shared).await,
                Err(e) => warn!(cause = %e, "tls session setup failed"),
            }
            return;
        }
        None => socket,
    };

    drive(Connection::new(PlainTransport::new(socket), context, Some(wake)), &stream, &itc, &shared).await;
}

async fn drive<T: Transport + 'static>(mut connection: Connection<T>, stream: &TcpStream, itc: &NotifyItc, shared: &Shared) {
    loop {
        connection.on_idle();
        let interest = connection.event_interest();
        if interest == EventInterest::Cleanup {
            break;
        }
        let deadline = connection.deadline();
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            () = shared.shutdown.cancelled() => {
                connection.shutdown();
                break;
            }
            ready = stream.readable(), if interest == EventInterest::Read => match ready {
                Ok(()) => connection.on_readable(),
                Err(e) => {
                    warn!(cause = %e, "socket readiness failed");
                    connection.close(CloseReason::TransportError);
                }
            },
            ready = stream.writable(), if interest == EventInterest::Write => match ready {
                Ok(()) => connection.on_writable(),
                Err(e) => {
                    warn!(cause = %e, "socket readiness failed");
                    connection.close(CloseReason::TransportError);
                }
            },
            () = itc.notified() => {}
            () = timer => {}
        }
    }
    trace!(reason = ?connection.close_reason(), "connection finished");
}
