//! Core protocol types shared by the parser, the connection and the application.
//!
//! # Components
//!
//! - **Request** ([`request`]): the parsed request and the [`RequestView`] handed to handlers
//!   - [`Method`] and [`HttpVersion`] of the request line
//!   - [`FieldKind`] of the ordered `(kind, name, value)` entries
//!   - [`BodyFraming`]: how the content is delimited
//!
//! - **Response** ([`response`]): what the application answers with
//!   - [`Response`] / [`ResponseBuilder`] and the [`SharedResponse`] alias
//!   - [`Content`]: buffer, iovec, file or [`ContentReader`] callback
//!
//! - **Errors** ([`error`]):
//!   - [`RequestError`]: requests answered with an error status
//!   - [`TransportError`]: failures of the byte transport
//!   - [`ResponseError`], [`DaemonError`]: building responses and starting daemons
//!   - [`CloseReason`]: why a connection ended

mod error;
pub use error::CloseReason;
pub use error::DaemonError;
pub use error::RequestError;
pub use error::ResponseError;
pub use error::TransportError;

mod method;
pub use method::Method;

mod version;
pub use version::HttpVersion;

pub(crate) mod field;
pub use field::FieldKind;

pub(crate) mod request;
pub use request::BodyFraming;
pub use request::RequestView;

mod response;
pub use response::Content;
pub use response::ContentRead;
pub use response::ContentReader;
pub use response::Response;
pub use response::ResponseBuilder;
pub use response::SharedResponse;
pub use response::UpgradeHandler;
pub use response::Upgraded;
