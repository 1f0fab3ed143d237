//! An embeddable micro HTTP/1.x daemon
//!
//! This crate provides a small HTTP/1.0 and HTTP/1.1 server meant to live inside another
//! program. Each connection is a sans-IO state machine working in a fixed-size memory pool,
//! so the daemon can be driven by its own threads or by the embedder's event loop.
//!
//! # Features
//!
//! - HTTP/1.0 and HTTP/1.1 with keep-alive and pipelining
//! - Configurable strictness, from lenient to RFC-pedantic parsing
//! - Chunked request and response content, trailers
//! - `Expect: 100-continue`
//! - Full or incremental upload delivery to the application
//! - Responses from buffers, iovecs, files (with `sendfile`) or callbacks
//! - Suspend and resume of a connection by its application
//! - Connection upgrade hand-over
//! - Basic and Digest authentication helpers
//! - TLS through rustls (feature `tls`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use http::StatusCode;
//! use micro_httpd::config::DaemonOptions;
//! use micro_httpd::daemon::Daemon;
//! use micro_httpd::handler::{Action, make_handler};
//! use micro_httpd::protocol::{RequestView, Response};
//! use tracing::info;
//!
//! let handler = make_handler(|request: &RequestView<'_>| {
//!     info!(path = %request.path(), "request");
//!     Action::response(Response::from_buffer(StatusCode::OK, "Hello World!\r\n"))
//! });
//!
//! let mut daemon = Daemon::new(DaemonOptions::default(), Arc::new(handler)).unwrap();
//! let addr = daemon.start("127.0.0.1:8080").unwrap();
//! info!(%addr, "listening");
//! std::thread::park();
//! ```
//!
//! # Architecture
//!
//! - [`daemon`]: options, listen socket and the driver threads
//! - [`connection`]: the per-connection state machine
//! - [`protocol`]: request, response and error types
//! - [`handler`]: the application callbacks
//! - [`pool`]: the per-connection memory pool
//! - [`transport`]: plain, in-memory and TLS byte transports
//! - [`auth`]: Basic and Digest authentication
//! - [`config`]: [`DaemonOptions`](config::DaemonOptions) and strictness levels
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - Request heads, fields and uploads are bounded by the connection pool

pub mod auth;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod handler;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod transport;

mod codec;
mod date;
mod utils;

pub use date::http_date_header;
