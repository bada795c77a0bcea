//! Error types for the HTTP server.

use thiserror::Error;

use crate::parser::{Error as ParserError, Method};
use crate::server::response::StatusCode;

/// Errors that can occur during HTTP server operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing an HTTP request.
    #[error("Parse error: {0}")]
    ParseError(#[from] ParserError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Method not allowed for the requested resource.
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    /// A handler failed while producing a response.
    #[error("Internal server error: {0}")]
    HandlerFailure(String),

    /// An upload or download named a file that may not be used.
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    /// The operation is not permitted.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The target of a move or create already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The peer did not send anything within the read timeout.
    #[error("Read timed out")]
    Timeout,

    /// The connection broke after the response had started.
    #[error("Connection aborted: {0}")]
    ConnectionAborted(String),

    /// A route with the same method and pattern already exists.
    #[error("Route already registered: {0} {1}")]
    DuplicateRoute(Method, String),

    /// A route pattern could not be parsed.
    #[error("Invalid route pattern {0}: {1}")]
    InvalidPattern(String, String),

    /// The server configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// The status sent when this error is turned into a response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ParseError(e) => match e {
                ParserError::HeaderTooLarge(_) => StatusCode::RequestHeaderFieldsTooLarge,
                ParserError::BodyTooLarge(_) => StatusCode::PayloadTooLarge,
                ParserError::MissingHeader(h) if h.eq_ignore_ascii_case("Content-Length") => StatusCode::LengthRequired,
                ParserError::InvalidVersion(_) => StatusCode::HttpVersionNotSupported,
                ParserError::UnsupportedTransferEncoding(_) => StatusCode::NotImplemented,
                ParserError::Io(_) => StatusCode::InternalServerError,
                _ => StatusCode::BadRequest,
            },
            Error::NotFound(_) => StatusCode::NotFound,
            Error::MethodNotAllowed { .. } => StatusCode::MethodNotAllowed,
            Error::InvalidFilename(_) => StatusCode::BadRequest,
            Error::Forbidden(_) => StatusCode::Forbidden,
            Error::AlreadyExists(_) => StatusCode::Conflict,
            Error::Timeout => StatusCode::RequestTimeout,
            Error::IoError(_)
            | Error::HandlerFailure(_)
            | Error::ConnectionAborted(_)
            | Error::DuplicateRoute(..)
            | Error::InvalidPattern(..)
            | Error::Config(_)
            | Error::JsonError(_) => StatusCode::InternalServerError,
        }
    }
}
