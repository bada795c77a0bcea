//! A minimal embedded HTTP/1.1 server.
//!
//! This library serves local files and accepts uploads on a loopback
//! address, with a focus on simplicity, bounded resource use, and clean
//! shutdown.
//!
//! # Features
//!
//! - Incremental request parsing with head and body size limits
//! - Bodies delivered as bytes, URL-encoded or multipart forms, or files on disk
//! - Exact, parameterized (`:name`) and wildcard (`*`) routes
//! - Keep-alive and pipelining, with a per-read idle timeout
//! - Responses from bytes, whole or ranged files, or chunked streams
//! - An upload endpoint with collision-free file names
//! - Graceful shutdown that drains in-flight connections
//!
//! # Examples
//!
//! ## Parsing a request
//!
//! ```
//! use localserve::parse_request;
//!
//! let request_bytes = b"GET /books/list?sort=name HTTP/1.1\r\nHost: localhost\r\n\r\n";
//!
//! match parse_request(request_bytes) {
//!     Ok(request) => {
//!         println!("Method: {}", request.method);
//!         println!("Path: {}", request.path);
//!         println!("Sort: {:?}", request.get_query_param("sort"));
//!     },
//!     Err(err) => {
//!         println!("Error parsing request: {}", err);
//!     }
//! }
//! ```
//!
//! ## Error handling
//!
//! ```
//! use localserve::{parse_request, ParserError};
//!
//! let invalid_request = b"BREW /pot HTTP/1.1\r\nHost: localhost\r\n\r\n";
//!
//! match parse_request(invalid_request) {
//!     Ok(_) => println!("Request parsed successfully"),
//!     Err(ParserError::InvalidMethod(method)) => println!("Invalid method: {}", method),
//!     Err(err) => println!("Other error: {}", err),
//! }
//! ```
//!
//! ## Serving
//!
//! ```no_run
//! use std::sync::Arc;
//! use localserve::{HttpResponse, HttpServer, Method, ServerConfig, StatusCode, Uploader};
//!
//! # async fn run() -> Result<(), localserve::ServerError> {
//! let config = ServerConfig::default();
//! let uploader = Arc::new(Uploader::from_config(&config));
//! let mut server = HttpServer::new(config);
//!
//! server.add_route("/health", vec![Method::GET], |_req| async {
//!     Ok(HttpResponse::new(StatusCode::Ok).with_body_string("ok"))
//! })?;
//! uploader.mount(server.router_mut(), "")?;
//!
//! server.start().await
//! # }
//! ```
//!
//! See the `demos` directory for complete servers.

pub mod parser;
pub mod server;
pub mod files;
pub mod uploader;
pub mod engine;

// Re-export commonly used items for convenience
pub use parser::{Error as ParserError, HttpRequest, HttpVersion, Method, RequestBody, parse_request};
pub use server::{
    Error as ServerError, HttpResponse, HttpServer, Router, ServerConfig, Shutdown, StatusCode,
};
pub use uploader::{UploadEvent, Uploader};
