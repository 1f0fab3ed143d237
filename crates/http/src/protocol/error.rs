use http::StatusCode;
use std::io;
use thiserror::Error;

/// A request the engine refuses to hand to the application.
///
/// Every variant maps to the status code of the error response synthesized for it,
/// the connection is closed once that response is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("malformed request: {reason}")]
    Malformed { reason: String },

    #[error("unsupported http version")]
    UnsupportedVersion,

    #[error("request header fields too large")]
    HeaderTooLarge,

    #[error("request uri too long")]
    UriTooLong,

    #[error("request method too long")]
    MethodNotImplemented,

    #[error("content too large: {reason}")]
    ContentTooLarge { reason: String },

    #[error("content length required")]
    ContentLengthRequired,

    #[error("http/1.1 request without host header")]
    MissingHost,

    #[error("both transfer-encoding and content-length are present")]
    ConflictingFraming,

    #[error("whitespace in request target, redirecting to {location}")]
    WhitespaceInTarget { location: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RequestError {
    pub fn malformed<S: ToString>(str: S) -> Self {
        Self::Malformed { reason: str.to_string() }
    }

    pub fn content_too_large<S: ToString>(str: S) -> Self {
        Self::ContentTooLarge { reason: str.to_string() }
    }

    pub fn internal<S: ToString>(str: S) -> Self {
        Self::Internal { reason: str.to_string() }
    }

    /// Status code of the error response.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Malformed { .. } | Self::MissingHost | Self::ConflictingFraming => StatusCode::BAD_REQUEST,
            Self::UnsupportedVersion => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            Self::HeaderTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::UriTooLong => StatusCode::URI_TOO_LONG,
            Self::MethodNotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::ContentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ContentLengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::WhitespaceInTarget { .. } => StatusCode::MOVED_PERMANENTLY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Nothing can be transferred right now, wait for readiness.
    #[error("operation would block")]
    Again,

    #[error("connection reset by peer")]
    ConnReset,

    #[error("bad file descriptor")]
    BadFd,

    /// The transport cannot perform this operation, use a fallback.
    #[error("operation not supported by transport")]
    Unsupported,

    #[error("tls error: {reason}")]
    Tls { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TransportError {
    pub fn tls<S: ToString>(str: S) -> Self {
        Self::Tls { reason: str.to_string() }
    }

    /// Classifies an I/O error of a socket call.
    pub fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => Self::Again,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::ConnReset,
            _ if e.raw_os_error() == Some(libc::EBADF) => Self::BadFd,
            _ => Self::Io { source: e },
        }
    }
}

/// Error building a [`Response`](crate::protocol::Response).
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("invalid header: {source}")]
    InvalidHeader {
        #[from]
        source: http::Error,
    },

    #[error("invalid response: {reason}")]
    Invalid { reason: String },
}

impl ResponseError {
    pub fn invalid<S: ToString>(str: S) -> Self {
        Self::Invalid { reason: str.to_string() }
    }
}

/// Startup failures of a [`Daemon`](crate::daemon::Daemon).
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("invalid options: {reason}")]
    InvalidOptions { reason: String },

    #[error("tls setup failed: {reason}")]
    Tls { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl DaemonError {
    pub fn invalid_options<S: ToString>(str: S) -> Self {
        Self::InvalidOptions { reason: str.to_string() }
    }

    pub fn tls<S: ToString>(str: S) -> Self {
        Self::Tls { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Why a connection reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The last response was sent and the connection was not reused.
    Completed,
    /// The client closed its side.
    ClientShutdown,
    /// Idle timeout expired.
    Timeout,
    TransportReset,
    TransportError,
    /// The application returned `Abort`.
    AppAbort,
    /// A content reader returned an error mid-body.
    AppGenError,
    /// Neither the pool nor the large-buffer budget could satisfy an allocation.
    OutOfMemory,
    DaemonShutdown,
    /// An error response was sent for a bad request.
    ProtocolError,
}

impl CloseReason {
    /// `true` for reasons that did not end with a complete exchange.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Completed | Self::ClientShutdown)
    }
}
