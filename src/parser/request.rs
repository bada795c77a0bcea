//! HTTP request parsing and representation.

use std::collections::HashMap;
use std::str::FromStr;
use serde::de::DeserializeOwned;

use crate::parser::body::{check_transfer_encoding, content_length, RequestBody};
use crate::parser::error::Error;
use crate::parser::headers::Headers;
use crate::parser::method::Method;
use crate::parser::urlencoded::{parse_urlencoded, percent_decode};
use crate::parser::version::HttpVersion;

/// The start line and headers of a request, before its body is read.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The raw request target, including any query string
    pub target: String,
    /// The percent-decoded path without the query string
    pub path: String,
    /// The path as sent, still percent-encoded; routes match against this
    pub raw_path: String,
    /// The raw query string, if any
    pub query: Option<String>,
    /// The HTTP version
    pub version: HttpVersion,
    /// The HTTP headers
    pub headers: Headers,
}

impl RequestHead {
    /// Whether the connection should stay open after this request.
    pub fn keep_alive(&self) -> bool {
        keep_alive(self.version, &self.headers)
    }
}

/// Represents an HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The raw request target
    pub target: String,
    /// The decoded request path
    pub path: String,
    /// The request path as sent, without the query string
    pub raw_path: String,
    /// The HTTP version
    pub version: HttpVersion,
    /// The HTTP headers
    pub headers: Headers,
    /// Query parameters parsed from the target
    pub query_params: HashMap<String, String>,
    /// Parameters captured by the matched route pattern
    pub params: HashMap<String, String>,
    /// The request body
    pub body: RequestBody,
}

impl HttpRequest {
    /// Create a request from a parsed head and its body.
    pub fn from_head(head: RequestHead, body: RequestBody) -> Self {
        // Malformed pairs are dropped; the raw target stays available.
        let query_params = head
            .query
            .as_deref()
            .map(|q| parse_urlencoded(q).fields)
            .unwrap_or_default();

        Self {
            method: head.method,
            target: head.target,
            path: head.path,
            raw_path: head.raw_path,
            version: head.version,
            headers: head.headers,
            query_params,
            params: HashMap::new(),
            body,
        }
    }

    /// Get a header value.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Check if a header exists.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Whether the connection should stay open after this request.
    pub fn keep_alive(&self) -> bool {
        keep_alive(self.version, &self.headers)
    }

    /// The buffered body, if the request was read as data.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            RequestBody::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Parse the request body as JSON.
    ///
    /// # Returns
    ///
    /// The parsed JSON value, or an error if the body is not valid JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if !self.is_json() {
            return Err(Error::MissingHeader("Content-Type: application/json".to_string()));
        }

        let body = self.body_bytes().unwrap_or_default();
        let json = serde_json::from_slice(body)?;
        Ok(json)
    }

    /// Check if the request has a JSON body.
    pub fn is_json(&self) -> bool {
        if let Some(content_type) = self.get_header("Content-Type") {
            content_type.starts_with("application/json")
        } else {
            false
        }
    }

    /// Get a query parameter value.
    pub fn get_query_param(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// Check if a query parameter exists.
    pub fn has_query_param(&self, name: &str) -> bool {
        self.query_params.contains_key(name)
    }

    /// Get a route parameter captured by the matched pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn keep_alive(version: HttpVersion, headers: &Headers) -> bool {
    if headers.has_token("Connection", "close") {
        false
    } else if headers.has_token("Connection", "keep-alive") {
        true
    } else {
        version.persistent_by_default()
    }
}

/// Find the end of the header block (`\r\n\r\n`, tolerating bare `\n\n`).
///
/// # Returns
///
/// The index just past the blank line, if the block is complete
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().filter(|(_, b)| **b == b'\n').find_map(|(i, _)| {
        match (buf.get(i + 1), buf.get(i + 2)) {
            (Some(b'\n'), _) => Some(i + 2),
            (Some(b'\r'), Some(b'\n')) => Some(i + 3),
            _ => None,
        }
    })
}

/// Parse the start line and headers of a request.
///
/// # Arguments
///
/// * `input` - The header block, up to and including the blank line
///
/// # Returns
///
/// The parsed head, or an error if the request is malformed
pub fn parse_head(input: &[u8]) -> Result<RequestHead, Error> {
    let input_str = match std::str::from_utf8(input) {
        Ok(s) => s,
        Err(_) => return Err(Error::MalformedRequestLine("Invalid UTF-8".to_string())),
    };

    let mut lines = input_str.lines();

    let request_line = match lines.next() {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Err(Error::EmptyRequest),
    };

    // Split the request line into method, target, and version
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(Error::MalformedRequestLine(request_line.to_string()));
    }

    let method = Method::from_str(parts[0])?;
    let target = parts[1].to_string();
    let version = HttpVersion::from_str(parts[2])?;
    let (path, raw_path, query) = split_target(&target)?;

    let mut headers = Headers::new();
    for line in lines {
        // Empty line indicates the end of headers
        if line.is_empty() {
            break;
        }

        let (name, value) = line.split_once(':').ok_or(Error::InvalidHeaderFormat)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeaderFormat);
        }
        headers.append(name, value.trim());
    }

    if version == HttpVersion::Http11 && !headers.contains("Host") {
        return Err(Error::MissingHeader("Host".to_string()));
    }

    content_length(&headers)?;
    if method.requires_length()
        && !headers.contains("Content-Length")
        && check_transfer_encoding(&headers).is_ok()
    {
        return Err(Error::MissingHeader("Content-Length".to_string()));
    }

    Ok(RequestHead {
        method,
        target,
        path,
        raw_path,
        query,
        version,
        headers,
    })
}

/// Split a request target into its decoded path, its encoded path and a raw
/// query string.
fn split_target(target: &str) -> Result<(String, String, Option<String>), Error> {
    if target == "*" {
        return Ok(("*".to_string(), "*".to_string(), None));
    }

    // Absolute form: drop the scheme and authority.
    let origin = match target.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(i) => &rest[i..],
            None => "/",
        },
        None => target,
    };
    if !origin.starts_with('/') {
        return Err(Error::InvalidPath(target.to_string()));
    }

    let (raw_path, query) = match origin.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (origin, None),
    };
    let path = percent_decode(raw_path, false).map_err(|_| Error::InvalidPath(target.to_string()))?;
    Ok((path, raw_path.to_string(), query))
}

/// Parse a complete HTTP request from a byte slice.
///
/// The body is read as data: exactly `Content-Length` bytes following the
/// header block.
///
/// # Arguments
///
/// * `input` - A byte slice containing the HTTP request to parse
///
/// # Returns
///
/// The parsed HTTP request, or an error if the request is invalid
pub fn parse_request(input: &[u8]) -> Result<HttpRequest, Error> {
    if input.is_empty() {
        return Err(Error::EmptyRequest);
    }
    let head_end = find_head_end(input).unwrap_or(input.len());
    let head = parse_head(&input[..head_end])?;
    check_transfer_encoding(&head.headers)?;

    let expected = content_length(&head.headers)?.unwrap_or(0);
    let rest = &input[head_end..];
    if (rest.len() as u64) < expected {
        return Err(Error::IncompleteBody {
            expected,
            received: rest.len() as u64,
        });
    }
    let body = rest[..expected as usize].to_vec();

    Ok(HttpRequest::from_head(head, RequestBody::Data(body)))
}
