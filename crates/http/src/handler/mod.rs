//! The application side of a connection.
//!
//! Once the header section of a request is processed the connection calls
//! [`Handler::on_request`] with a [`RequestView`]. The returned [`Action`] decides what
//! happens next:
//!
//! - [`Action::Response`]: answer right away, any unread content is discarded
//! - [`Action::Upload`]: receive the content through [`Upload`] callbacks, each of them
//!   answering with an [`UploadAction`]
//! - [`Action::Suspend`]: park the connection until [`ResumeHandle::resume`]
//! - [`Action::Abort`]: close the connection without a response
//!
//! [`ResumeHandle::resume`]: crate::connection::ResumeHandle::resume

use std::fmt;

use crate::protocol::{CloseReason, RequestView, Response, SharedResponse};

/// Callback receiving request content.
pub type UploadCallback = Box<dyn FnMut(&RequestView<'_>, &[u8]) -> UploadAction + Send>;

/// Application request callback.
pub trait Handler: Send + Sync {
    /// Called once per request, after the header section.
    fn on_request(&self, request: &RequestView<'_>) -> Action;

    /// Called exactly once when a connection ends.
    fn on_connection_closed(&self, _reason: CloseReason) {}
}

/// What to do with a request whose header section was processed.
pub enum Action {
    Response(SharedResponse),
    Upload(Upload),
    Suspend,
    Abort,
}

impl Action {
    pub fn response(response: Response) -> Self {
        Action::Response(response.shared())
    }
}

impl From<Response> for Action {
    fn from(response: Response) -> Self {
        Action::response(response)
    }
}

impl From<SharedResponse> for Action {
    fn from(response: SharedResponse) -> Self {
        Action::Response(response)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Response(response) => f.debug_tuple("Response").field(&response.status()).finish(),
            Action::Upload(upload) => f.debug_tuple("Upload").field(upload).finish(),
            Action::Suspend => f.write_str("Suspend"),
            Action::Abort => f.write_str("Abort"),
        }
    }
}

/// Answer of an upload callback.
pub enum UploadAction {
    /// Keep receiving, invalid on the final call.
    Continue,
    Response(SharedResponse),
    /// Park the connection until resumed. The delivered bytes count as consumed, a
    /// suspended final call is repeated.
    Suspend,
    Abort,
}

impl UploadAction {
    pub fn response(response: Response) -> Self {
        UploadAction::Response(response.shared())
    }
}

impl fmt::Debug for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadAction::Continue => f.write_str("Continue"),
            UploadAction::Response(response) => f.debug_tuple("Response").field(&response.status()).finish(),
            UploadAction::Suspend => f.write_str("Suspend"),
            UploadAction::Abort => f.write_str("Abort"),
        }
    }
}

/// How the content of a request reaches the application.
///
/// A *full* callback is called once with the complete content, buffered in the
/// connection pool or in a buffer drawn from the daemon-wide large-buffer budget. An
/// *incremental* callback is called with every piece of content as it arrives and once
/// more with an empty slice at the end, which must not answer `Continue`.
///
/// With both set the full callback is used unless the content exceeds `max_full_size`,
/// then the upload is downgraded to the incremental callback. With only a full callback
/// such content is answered with `413 Content Too Large`.
pub struct Upload {
    pub(crate) full: Option<UploadCallback>,
    pub(crate) incremental: Option<UploadCallback>,
    pub(crate) max_full_size: usize,
}

impl Upload {
    pub fn full<F>(max_size: usize, callback: F) -> Self
    where
        F: FnMut(&RequestView<'_>, &[u8]) -> UploadAction + Send + 'static,
    {
        Self { full: Some(Box::new(callback)), incremental: None, max_full_size: max_size }
    }

    pub fn incremental<F>(callback: F) -> Self
    where
        F: FnMut(&RequestView<'_>, &[u8]) -> UploadAction + Send + 'static,
    {
        Self { full: None, incremental: Some(Box::new(callback)), max_full_size: 0 }
    }

    /// Adds an incremental callback used when the content is too large for the full one.
    pub fn or_incremental<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&RequestView<'_>, &[u8]) -> UploadAction + Send + 'static,
    {
        self.incremental = Some(Box::new(callback));
        self
    }
}

impl From<Upload> for Action {
    fn from(upload: Upload) -> Self {
        Action::Upload(upload)
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("full", &self.full.is_some())
            .field("incremental", &self.incremental.is_some())
            .field("max_full_size", &self.max_full_size)
            .finish()
    }
}

/// A [`Handler`] made of a closure.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&RequestView<'_>) -> Action + Send + Sync,
{
    fn on_request(&self, request: &RequestView<'_>) -> Action {
        (self.f)(request)
    }
}

pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&RequestView<'_>) -> Action + Send + Sync,
{
    HandlerFn { f }
}
