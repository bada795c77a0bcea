//! HTTP server implementation for localserve.
//!
//! This module accepts connections, routes requests to async handlers and
//! writes their responses: in-memory data, files with byte ranges, or
//! streamed chunks.

mod response;
mod config;
mod error;
mod router;
mod writer;
mod range;
mod stream;
mod connection;
mod http_server;
mod shutdown;
mod timeout;

// Re-export public items
pub use response::{FileResponse, HttpResponse, ResponseBody, StatusCode};
pub use config::ServerConfig;
pub use error::Error;
pub use router::{HandlerFn, HandlerFuture, Pattern, Resolution, Route, Router};
pub use writer::{ResponseWriter, WriteOptions, WriteOutcome};
pub use range::ByteRange;
pub use stream::{ChunkFuture, ChunkProducer, ChunkSender, IterProducer};
pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use http_server::HttpServer;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use timeout::IdleTimeout;
