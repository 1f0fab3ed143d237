//! Daemon configuration.
//!
//! [`DaemonOptions`] collects every knob that influences the protocol engine:
//! pool sizing, parser strictness, timeouts, the threading mode and a few
//! feature switches. Options can be built in code through [`DaemonOptionsBuilder`]
//! or deserialized from the host's own configuration format with `serde`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::DaemonError;

/// Smallest accepted per-connection pool.
pub const MIN_CONNECTION_MEMORY: usize = 1024;

const DEFAULT_CONNECTION_MEMORY: usize = 32 * 1024;
const DEFAULT_CONNECTION_INCREMENT: usize = 1024;
const DEFAULT_LISTEN_BACKLOG: u32 = 511;
const DEFAULT_NC_ARRAY_SIZE: usize = 4 * 1024;
const DEFAULT_NONCE_TIMEOUT: u64 = 300;
const DEFAULT_LARGE_POOL_SIZE: usize = 1024 * 1024;

const FILE_CHUNK_SIZE: usize = 128 * 1024;
const FILE_CHUNK_SIZE_THREAD_PER_CONNECTION: usize = 2 * 1024 * 1024;

/// How the daemon schedules connection work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// The host owns the event loop and drives every [`Connection`](crate::connection::Connection).
    ExternalLoop,
    /// One internal thread owns the listen socket and every connection.
    #[default]
    InternalThread,
    /// Accepted connections are bound to one of `thread_pool_size` workers for their lifetime.
    ThreadPool,
    /// Every accepted connection gets its own thread doing blocking I/O.
    ThreadPerConnection,
}

/// TCP Fast Open policy for the listen socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FastOpenMethod {
    #[default]
    Off,
    /// Enable when the platform supports it, silently continue otherwise.
    Auto,
    /// Fail the daemon start when fast open cannot be enabled.
    Require,
}

/// Signed tolerance dial for malformed input, `-3` (most lenient) to `3` (most strict).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i8", into = "i8")]
pub struct Strictness(i8);

impl Strictness {
    pub const MOST_LENIENT: Strictness = Strictness(-3);
    pub const DEFAULT: Strictness = Strictness(0);
    pub const MOST_STRICT: Strictness = Strictness(3);

    /// Creates a level, clamping it into `-3..=3`.
    pub const fn new(level: i8) -> Self {
        let level = if level < -3 {
            -3
        } else if level > 3 {
            3
        } else {
            level
        };
        Strictness(level)
    }

    pub const fn level(self) -> i8 {
        self.0
    }

    #[inline]
    const fn allows(self, max_level: i8) -> bool {
        self.0 <= max_level
    }

    pub(crate) const fn skip_several_empty_lines(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn skip_unlimited_empty_lines(self) -> bool {
        self.allows(-3)
    }

    pub(crate) const fn bare_lf_as_crlf(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn bare_cr_as_space(self) -> bool {
        self.allows(-1)
    }

    pub(crate) const fn bare_cr_literal(self) -> bool {
        self.allows(-3)
    }

    pub(crate) const fn tab_as_line_ws(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn vt_ff_as_ws(self) -> bool {
        self.allows(-1)
    }

    pub(crate) const fn ws_blocks(self) -> bool {
        self.allows(-1)
    }

    pub(crate) const fn ws_in_uri(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn surface_uri_ws(self) -> bool {
        self.allows(-2)
    }

    pub(crate) const fn folded_headers(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn first_header_ws(self) -> bool {
        self.allows(-1)
    }

    pub(crate) const fn ws_in_field_name(self) -> bool {
        self.allows(-2)
    }

    pub(crate) const fn empty_field_name(self) -> bool {
        self.allows(-2)
    }

    pub(crate) const fn ws_before_colon(self) -> bool {
        self.allows(-3)
    }

    pub(crate) const fn line_without_colon(self) -> bool {
        self.allows(-2)
    }

    pub(crate) const fn ctl_in_field_value(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn duplicate_host(self) -> bool {
        self.allows(-3)
    }

    pub(crate) const fn duplicate_content_length(self) -> bool {
        self.allows(0)
    }

    pub(crate) const fn reject_conflicting_framing(self) -> bool {
        self.0 >= 2
    }

    pub(crate) const fn require_length_for_upload(self) -> bool {
        self.0 >= 3
    }

    /// At this level and above a malformed `Cookie` header is dropped as a whole.
    pub(crate) const fn strict_cookies(self) -> bool {
        self.0 >= 1
    }

    /// RFC 6265 only: `"; "` separators, no whitespace in quoted values, no escapes.
    pub(crate) const fn rfc_cookies(self) -> bool {
        self.0 >= 2
    }
}

impl From<i8> for Strictness {
    fn from(level: i8) -> Self {
        Strictness::new(level)
    }
}

impl From<Strictness> for i8 {
    fn from(strictness: Strictness) -> Self {
        strictness.0
    }
}

/// Options of a [`Daemon`](crate::daemon::Daemon).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonOptions {
    /// Pool size of every connection in bytes.
    pub connection_memory_limit: usize,
    /// Minimum read-buffer grow step in bytes.
    pub connection_memory_increment: usize,
    pub strictness_level: Strictness,
    /// Idle timeout in seconds, `0` disables it.
    pub connection_default_timeout: u64,
    pub listen_backlog: u32,
    /// Slots of the digest replay window, `0` disables digest authentication.
    pub digest_nc_array_size: usize,
    /// Seconds a digest nonce stays valid.
    pub digest_nonce_timeout: u64,
    pub suppress_date: bool,
    pub fast_open_method: FastOpenMethod,
    pub allow_upgrade: bool,
    pub allow_suspend_resume: bool,
    pub threading_mode: ThreadingMode,
    /// Worker count in [`ThreadingMode::ThreadPool`], `0` picks the number of CPUs.
    pub thread_pool_size: usize,
    /// Daemon-wide budget for full uploads that do not fit the connection pool.
    pub large_pool_size: usize,
    /// `Content-Type` added to responses with a body that do not set one.
    pub default_content_type: Option<String>,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            connection_memory_limit: DEFAULT_CONNECTION_MEMORY,
            connection_memory_increment: DEFAULT_CONNECTION_INCREMENT,
            strictness_level: Strictness::DEFAULT,
            connection_default_timeout: 0,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            digest_nc_array_size: DEFAULT_NC_ARRAY_SIZE,
            digest_nonce_timeout: DEFAULT_NONCE_TIMEOUT,
            suppress_date: false,
            fast_open_method: FastOpenMethod::Off,
            allow_upgrade: false,
            allow_suspend_resume: false,
            threading_mode: ThreadingMode::InternalThread,
            thread_pool_size: 0,
            large_pool_size: DEFAULT_LARGE_POOL_SIZE,
            default_content_type: None,
        }
    }
}

impl DaemonOptions {
    pub fn builder() -> DaemonOptionsBuilder {
        DaemonOptionsBuilder::default()
    }

    /// Checks the pool sizing and the default content type.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.connection_memory_limit < MIN_CONNECTION_MEMORY {
            return Err(DaemonError::invalid_options(format!(
                "connection_memory_limit {} is below the minimum {MIN_CONNECTION_MEMORY}",
                self.connection_memory_limit
            )));
        }
        if self.connection_memory_increment > self.connection_memory_limit / 2 {
            return Err(DaemonError::invalid_options(format!(
                "connection_memory_increment {} exceeds half of connection_memory_limit {}",
                self.connection_memory_increment, self.connection_memory_limit
            )));
        }
        if let Some(content_type) = &self.default_content_type {
            content_type.parse::<mime::Mime>().map_err(|e| {
                DaemonError::invalid_options(format!("default_content_type {content_type:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.connection_default_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Bytes moved per `sendfile` call or per fallback read.
    pub fn file_chunk_size(&self) -> usize {
        match self.threading_mode {
            ThreadingMode::ThreadPerConnection => FILE_CHUNK_SIZE_THREAD_PER_CONNECTION,
            _ => FILE_CHUNK_SIZE,
        }
    }

    /// Number of worker threads the tokio drivers start.
    pub fn worker_count(&self) -> usize {
        match self.threading_mode {
            ThreadingMode::ThreadPool if self.thread_pool_size > 0 => self.thread_pool_size,
            ThreadingMode::ThreadPool => std::thread::available_parallelism().map_or(1, |n| n.get()),
            _ => 1,
        }
    }
}

/// Chained builder for [`DaemonOptions`].
#[derive(Debug, Clone, Default)]
pub struct DaemonOptionsBuilder {
    options: DaemonOptions,
}

impl DaemonOptionsBuilder {
    pub fn connection_memory_limit(mut self, bytes: usize) -> Self {
        self.options.connection_memory_limit = bytes;
        self
    }

    pub fn connection_memory_increment(mut self, bytes: usize) -> Self {
        self.options.connection_memory_increment = bytes;
        self
    }

    pub fn strictness_level(mut self, level: i8) -> Self {
        self.options.strictness_level = Strictness::new(level);
        self
    }

    pub fn connection_default_timeout(mut self, secs: u64) -> Self {
        self.options.connection_default_timeout = secs;
        self
    }

    pub fn listen_backlog(mut self, backlog: u32) -> Self {
        self.options.listen_backlog = backlog;
        self
    }

    pub fn digest_nc_array_size(mut self, slots: usize) -> Self {
        self.options.digest_nc_array_size = slots;
        self
    }

    pub fn digest_nonce_timeout(mut self, secs: u64) -> Self {
        self.options.digest_nonce_timeout = secs;
        self
    }

    pub fn suppress_date(mut self, suppress: bool) -> Self {
        self.options.suppress_date = suppress;
        self
    }

    pub fn fast_open_method(mut self, method: FastOpenMethod) -> Self {
        self.options.fast_open_method = method;
        self
    }

    pub fn allow_upgrade(mut self, allow: bool) -> Self {
        self.options.allow_upgrade = allow;
        self
    }

    pub fn allow_suspend_resume(mut self, allow: bool) -> Self {
        self.options.allow_suspend_resume = allow;
        self
    }

    pub fn threading_mode(mut self, mode: ThreadingMode) -> Self {
        self.options.threading_mode = mode;
        self
    }

    pub fn thread_pool_size(mut self, workers: usize) -> Self {
        self.options.thread_pool_size = workers;
        self
    }

    pub fn large_pool_size(mut self, bytes: usize) -> Self {
        self.options.large_pool_size = bytes;
        self
    }

    pub fn default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.options.default_content_type = Some(content_type.into());
        self
    }

    pub fn build(self) -> Result<DaemonOptions, DaemonError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = DaemonOptions::default();
        assert_eq!(options.connection_memory_limit, 32 * 1024);
        assert_eq!(options.connection_memory_increment, 1024);
        assert_eq!(options.listen_backlog, 511);
        assert_eq!(options.strictness_level, Strictness::DEFAULT);
        assert_eq!(options.threading_mode, ThreadingMode::InternalThread);
        assert!(options.idle_timeout().is_none());
        assert_eq!(options.file_chunk_size(), 128 * 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn strictness_is_clamped() {
        assert_eq!(Strictness::new(-10).level(), -3);
        assert_eq!(Strictness::new(9).level(), 3);
        assert!(Strictness::new(0).bare_lf_as_crlf());
        assert!(!Strictness::new(1).bare_lf_as_crlf());
        assert!(Strictness::new(-3).ws_before_colon());
        assert!(!Strictness::new(-2).ws_before_colon());
    }

    #[test]
    fn validate_rejects_tiny_pools() {
        let err = DaemonOptions::builder().connection_memory_limit(512).build();
        assert!(err.is_err());

        let err = DaemonOptions::builder()
            .connection_memory_limit(4096)
            .connection_memory_increment(4000)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn validate_rejects_bad_content_type() {
        assert!(DaemonOptions::builder().default_content_type("text/html; charset=utf-8").build().is_ok());
        assert!(DaemonOptions::builder().default_content_type("not a type").build().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let options = DaemonOptions::builder()
            .strictness_level(-2)
            .threading_mode(ThreadingMode::ThreadPerConnection)
            .default_content_type("text/plain")
            .build()
            .unwrap();

        let json = serde_json::to_string(&options).unwrap();
        let back: DaemonOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
        assert_eq!(back.file_chunk_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn serde_fills_defaults() {
        let options: DaemonOptions =
            serde_json::from_str(r#"{"strictness_level": 7, "threading_mode": "thread_pool"}"#).unwrap();
        assert_eq!(options.strictness_level.level(), 3);
        assert_eq!(options.threading_mode, ThreadingMode::ThreadPool);
        assert_eq!(options.connection_memory_limit, 32 * 1024);
    }
}
