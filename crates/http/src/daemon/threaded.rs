//! Blocking driver of the thread-per-connection mode.
//!
//! The socket blocks with short timeouts so that shutdown is seen between two calls.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::Shared;
use super::itc::CondvarItc;
use crate::connection::{Connection, EventInterest, Itc};
use crate::transport::{PlainTransport, Transport};

/// Longest time a connection thread blocks before looking at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(super) fn spawn_connection(stream: TcpStream, shared: Arc<Shared>) {
    let spawned = thread::Builder::new()
        .name("micro-httpd-conn".into())
        .spawn(move || serve(stream, &shared));
    if let Err(e) = spawned {
        warn!(cause = %e, "failed to spawn connection thread");
    }
}

fn serve(stream: TcpStream, shared: &Shared) {
    let configured = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(POLL_INTERVAL)))
        .and_then(|()| stream.set_write_timeout(Some(POLL_INTERVAL)));
    if let Err(e) = configured {
        warn!(cause = %e, "failed to configure connection socket");
        return;
    }

    let itc = Arc::new(CondvarItc::default());
    let wake: Arc<dyn Itc> = Arc::clone(&itc) as Arc<dyn Itc>;
    let context = Arc::clone(&shared.context);

    #[cfg(feature = "tls")]
    let stream = match &shared.tls {
        Some(tls) => {
            match tls.setup_conn(stream) {
                Ok(transport) => drive(Connection::new(transport, context, Some(wake)), &itc, &shared.shutdown),
                Err(e) => warn!(cause = %e, "tls session setup failed"),
            }
            return;
        }
        None => stream,
    };

    drive(Connection::new(PlainTransport::new(stream), context, Some(wake)), &itc, &shared.shutdown);
}

fn drive<T: Transport + 'static>(mut connection: Connection<T>, itc: &CondvarItc, shutdown: &CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            connection.shutdown();
            break;
        }
        connection.on_idle();
        match connection.event_interest() {
            EventInterest::Cleanup => break,
            // a blocking call returns within POLL_INTERVAL
            EventInterest::Read => connection.on_readable(),
            EventInterest::Write => connection.on_writable(),
            EventInterest::Block => {
                let wait = connection
                    .deadline()
                    .map_or(POLL_INTERVAL, |at| at.saturating_duration_since(Instant::now()).min(POLL_INTERVAL));
                itc.wait(wait);
            }
        }
    }
    trace!(reason = ?connection.close_reason(), "connection thread finished");
}
