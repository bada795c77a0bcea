//! HTTP response types and utilities.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::parser::Headers;
use crate::server::error::Error;
use crate::server::range::ByteRange;
use crate::server::stream::{ChunkProducer, ChunkSender};

/// HTTP status codes with their standard reason phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,
    PartialContent = 206,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    RequestTimeout = 408,
    Conflict = 409,
    LengthRequired = 411,
    PayloadTooLarge = 413,
    RangeNotSatisfiable = 416,
    RequestHeaderFieldsTooLarge = 431,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    HttpVersionNotSupported = 505,
}

impl StatusCode {
    /// The numeric code.
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::PartialContent => "Partial Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::Conflict => "Conflict",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::RangeNotSatisfiable => "Range Not Satisfiable",
            StatusCode::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Whether the response may carry a body.
    pub fn allows_body(&self) -> bool {
        !matches!(self, StatusCode::NoContent)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// A file to send, optionally restricted to a byte range.
#[derive(Debug, Clone)]
pub struct FileResponse {
    pub path: PathBuf,
    /// A range chosen by the handler. When absent, the request's `Range`
    /// header applies.
    pub range: Option<ByteRange>,
}

/// The body of a response.
pub enum ResponseBody {
    /// In-memory bytes.
    Data(Vec<u8>),
    /// File contents, read from disk while writing.
    File(FileResponse),
    /// An error message, sent as plain text.
    Error(String),
    /// Chunks pulled from a producer while writing.
    Stream(Box<dyn ChunkProducer>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            ResponseBody::File(file) => f.debug_tuple("File").field(file).finish(),
            ResponseBody::Error(message) => f.debug_tuple("Error").field(message).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Represents an HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    /// The HTTP status code
    pub status: StatusCode,
    /// The HTTP headers
    pub headers: Headers,
    /// The response body
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Create a new HTTP response with the given status code and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ResponseBody::Data(Vec::new()),
        }
    }

    /// Create an error response carrying `message`.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ResponseBody::Error(message.into()),
        }
    }

    /// Create a response serving the file at `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: ResponseBody::File(FileResponse {
                path: path.as_ref().to_path_buf(),
                range: None,
            }),
        }
    }

    /// Create a response serving part of the file at `path`.
    pub fn file_range(path: impl AsRef<Path>, range: ByteRange) -> Self {
        let mut response = Self::file(path);
        if let ResponseBody::File(file) = &mut response.body {
            file.range = Some(range);
        }
        response
    }

    /// Create a response whose body is pulled from `producer`.
    pub fn streamed(status: StatusCode, producer: impl ChunkProducer + 'static) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ResponseBody::Stream(Box::new(producer)),
        }
    }

    /// Create a streamed response fed through a bounded channel.
    ///
    /// At most `capacity` chunks are buffered between the sender and the
    /// client.
    pub fn channel(status: StatusCode, capacity: usize) -> (Self, ChunkSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::streamed(status, rx), ChunkSender::new(tx))
    }

    /// Set the response body with a string.
    pub fn with_body_string(mut self, body: impl Into<String>) -> Self {
        self.body = ResponseBody::Data(body.into().into_bytes());
        self
    }

    /// Set the response body with bytes.
    pub fn with_body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = ResponseBody::Data(body.into());
        self
    }

    /// Add or replace a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the content type.
    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_header("Content-Type", content_type)
    }

    /// Set the response body with a JSON value.
    ///
    /// This method serializes the provided value to JSON and sets it as the response body.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(value).map_err(Error::JsonError)?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body_bytes(json))
    }

    /// Whether the body is an error message.
    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }
}

impl From<&Error> for HttpResponse {
    fn from(error: &Error) -> Self {
        let response = HttpResponse::error(error.status_code(), error.to_string());
        match error {
            Error::MethodNotAllowed { allowed, .. } => {
                let allow = allowed.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", ");
                response.with_header("Allow", allow)
            }
            _ => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Method;

    #[test]
    fn test_status_code_reason_phrase() {
        assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
        assert_eq!(StatusCode::PartialContent.reason_phrase(), "Partial Content");
        assert_eq!(StatusCode::RangeNotSatisfiable.as_u16(), 416);
        assert_eq!(StatusCode::RequestHeaderFieldsTooLarge.to_string(), "431 Request Header Fields Too Large");
    }

    #[test]
    fn test_http_response_creation() {
        let response = HttpResponse::new(StatusCode::Ok);
        assert_eq!(response.status, StatusCode::Ok);
        assert!(response.headers.is_empty());
        assert!(matches!(response.body, ResponseBody::Data(ref b) if b.is_empty()));
    }

    #[test]
    fn test_http_response_with_body_string() {
        let response = HttpResponse::new(StatusCode::Ok)
            .with_content_type("text/plain")
            .with_body_string("Hello, world!");
        assert_eq!(response.headers.get("Content-Type"), Some("text/plain"));
        assert!(matches!(response.body, ResponseBody::Data(ref b) if b == b"Hello, world!"));
    }

    #[test]
    fn test_with_json() {
        #[derive(Serialize)]
        struct Book {
            title: &'static str,
        }
        let response = HttpResponse::new(StatusCode::Created).with_json(&Book { title: "Dune" }).unwrap();
        assert_eq!(response.headers.get("content-type"), Some("application/json"));
        assert!(matches!(response.body, ResponseBody::Data(ref b) if b == br#"{"title":"Dune"}"#));
    }

    #[test]
    fn test_file_range_response() {
        let response = HttpResponse::file_range("/tmp/book.txt", ByteRange::From(5));
        match response.body {
            ResponseBody::File(file) => {
                assert_eq!(file.path, PathBuf::from("/tmp/book.txt"));
                assert_eq!(file.range, Some(ByteRange::From(5)));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_error_conversion() {
        let error = Error::MethodNotAllowed {
            method: Method::POST,
            path: "/books".to_string(),
            allowed: vec![Method::GET, Method::HEAD],
        };
        let response = HttpResponse::from(&error);
        assert_eq!(response.status, StatusCode::MethodNotAllowed);
        assert_eq!(response.headers.get("Allow"), Some("GET, HEAD"));
        assert!(response.is_error());
    }
}
