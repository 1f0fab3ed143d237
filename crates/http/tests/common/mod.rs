#![allow(dead_code, reason = "every test binary uses a different part of the harness")]

use std::sync::{Arc, Mutex};

use micro_httpd::config::{DaemonOptions, DaemonOptionsBuilder, ThreadingMode};
use micro_httpd::connection::{Connection, EventInterest, State};
use micro_httpd::daemon::Daemon;
use micro_httpd::handler::Handler;
use micro_httpd::protocol::CloseReason;
use micro_httpd::transport::{MemoryPeer, MemoryTransport, memory_pair};

/// Options of an external-loop daemon without `Date` headers, so replies are stable.
pub fn options() -> DaemonOptionsBuilder {
    DaemonOptions::builder().threading_mode(ThreadingMode::ExternalLoop).suppress_date(true)
}

/// One connection driven by hand over an in-memory pipe.
pub struct Harness {
    pub daemon: Daemon,
    pub connection: Connection<MemoryTransport>,
    pub peer: MemoryPeer,
    pub states: Arc<Mutex<Vec<State>>>,
    output: Vec<u8>,
    peer_closed: bool,
}

impl Harness {
    pub fn new(options: DaemonOptions, handler: impl Handler + 'static) -> Self {
        let daemon = Daemon::new(options, Arc::new(handler)).unwrap();
        let (transport, peer) = memory_pair();
        let mut connection = daemon.new_connection(transport, None);
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&states);
        connection.set_state_observer(move |state| seen.lock().unwrap().push(state));
        Self { daemon, connection, peer, states, output: Vec::new(), peer_closed: false }
    }

    pub fn send(&mut self, bytes: &[u8]) -> &mut Self {
        self.peer.send(bytes);
        self
    }

    /// The client will send nothing more.
    pub fn close_input(&mut self) -> &mut Self {
        self.peer.close();
        self.peer_closed = true;
        self
    }

    /// Drives the connection until it waits for something the client did not provide.
    pub fn run(&mut self) -> &mut Self {
        for _ in 0..10_000 {
            self.connection.on_idle();
            let interest = self.connection.event_interest();
            let before = (self.connection.state(), interest, self.peer.unread_input(), self.output.len());
            match interest {
                EventInterest::Read if self.peer.unread_input() > 0 || self.peer_closed => self.connection.on_readable(),
                EventInterest::Write => self.connection.on_writable(),
                _ => return self,
            }
            self.output.extend(self.peer.take_output());
            let after =
                (self.connection.state(), self.connection.event_interest(), self.peer.unread_input(), self.output.len());
            if before == after {
                return self;
            }
        }
        panic!("connection never settled in {:?}", self.connection.state());
    }

    /// Everything the connection sent since the last call.
    pub fn take_output(&mut self) -> String {
        self.output.extend(self.peer.take_output());
        String::from_utf8_lossy(&std::mem::take(&mut self.output)).into_owned()
    }

    pub fn state(&self) -> State {
        self.connection.state()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.connection.close_reason()
    }

    pub fn visited(&self, state: State) -> bool {
        self.states.lock().unwrap().contains(&state)
    }

    pub fn count(&self, state: State) -> usize {
        self.states.lock().unwrap().iter().filter(|s| **s == state).count()
    }
}

/// Splits a single response off the front of `raw`, returning `(head, body, rest)`.
///
/// Only `Content-Length` framed responses are split, anything else stays in `body`.
pub fn split_response(raw: &str) -> (&str, &str, &str) {
    let Some(head_end) = raw.find("\r\n\r\n") else {
        return (raw, "", "");
    };
    let head = &raw[..head_end];
    let after = &raw[head_end + 4..];
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .and_then(|n| n.trim().parse::<usize>().ok());
    match length {
        Some(n) if n <= after.len() => (head, &after[..n], &after[n..]),
        _ => (head, after, ""),
    }
}

pub fn status_of(head: &str) -> u16 {
    head.split(' ').nth(1).and_then(|code| code.parse().ok()).unwrap_or(0)
}
