//! HTTP parser module.
//!
//! This module turns raw bytes into requests: the head (start line and
//! headers) first, then the body in the shape the matched route asks for.

mod request;
mod method;
mod version;
mod error;
mod headers;
mod body;
mod multipart;
mod urlencoded;

// Re-export public items
pub use request::{HttpRequest, RequestHead};
pub use method::Method;
pub use version::HttpVersion;
pub use error::Error;
pub use headers::Headers;
pub use body::{BodyKind, BodyOptions, FileBody, RequestBody};
pub use multipart::{MultipartForm, Part, PartData};
pub use urlencoded::{percent_decode, UrlEncodedForm};

// Re-export the parsing functions
pub use request::{find_head_end, parse_head, parse_request};
pub use body::{content_length, read_body};
