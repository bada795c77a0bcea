//! Error types for the HTTP parser.

use thiserror::Error;

/// Errors that can occur while reading an HTTP request.
///
/// The first group (empty request through invalid header value) means the
/// request head itself is malformed. The remaining variants are raised while
/// the body is being read.
#[derive(Debug, Error)]
pub enum Error {
    /// The request is empty.
    #[error("Empty request")]
    EmptyRequest,

    /// The request line is malformed (wrong format or missing components).
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    /// The HTTP method in the request is not supported.
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// The request target is invalid or missing.
    #[error("Invalid HTTP path: {0}")]
    InvalidPath(String),

    /// The HTTP version in the request is not supported.
    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    /// A header line has no `name: value` shape.
    #[error("Invalid header format")]
    InvalidHeaderFormat,

    /// A required header is missing from the request.
    #[error("Required header is missing: {0}")]
    MissingHeader(String),

    /// A header carries a value that cannot be interpreted.
    #[error("Invalid value for header {name}: {value}")]
    InvalidHeaderValue { name: String, value: String },

    /// The request head exceeds the configured limit.
    #[error("Request header exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// The declared body exceeds the configured limit.
    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(u64),

    /// The peer stopped sending before the declared body length was reached.
    #[error("Incomplete body: expected {expected} bytes, received {received}")]
    IncompleteBody { expected: u64, received: u64 },

    /// The body uses a transfer coding this server does not decode.
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// A multipart body could not be split into parts.
    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    /// A percent-encoded value could not be decoded.
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// I/O error while reading the body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing JSON.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error describes a malformed request head.
    pub fn is_malformed_message(&self) -> bool {
        matches!(
            self,
            Error::EmptyRequest
                | Error::MalformedRequestLine(_)
                | Error::InvalidMethod(_)
                | Error::InvalidPath(_)
                | Error::InvalidVersion(_)
                | Error::InvalidHeaderFormat
                | Error::MissingHeader(_)
                | Error::InvalidHeaderValue { .. }
        )
    }
}
