//! The request/response cycle of a single connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::parser::{
    content_length, find_head_end, parse_head, read_body, BodyOptions, Error as ParserError, HttpRequest,
    HttpVersion, Method, RequestHead,
};
use crate::server::config::ServerConfig;
use crate::server::error::Error;
use crate::server::response::HttpResponse;
use crate::server::router::{Resolution, Router};
use crate::server::shutdown::ShutdownSignal;
use crate::server::timeout::IdleTimeout;
use crate::server::writer::{ResponseWriter, WriteOptions, WriteOutcome};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Where a connection is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the first byte of a request.
    Idle,
    /// Reading a request head and body.
    Reading,
    /// Running the handler, or building an error response.
    Dispatching,
    /// Sending the response.
    Writing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Reading)
                | (Reading, Dispatching)
                | (Dispatching, Writing)
                | (Writing, Idle)
                | (Writing, Closed)
                | (Idle, Closed)
                | (Reading, Closed)
        )
    }
}

/// Limits applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub read_timeout: Duration,
    pub max_header_bytes: usize,
    pub read_buffer_size: usize,
    pub body: BodyOptions,
}

impl ConnectionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            max_header_bytes: config.max_header_bytes,
            read_buffer_size: config.read_buffer_size,
            body: config.body_options(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// How reading a request ended when it did not produce one.
enum ReadFailure {
    /// The peer went away or stayed silent; close without answering.
    Abort(Option<Error>),
    /// The request was unacceptable; answer it and close.
    Reject(Error),
}

/// A single client connection.
///
/// The connection owns its stream. Requests are handled one at a time, so
/// pipelined requests are answered in the order they arrived.
pub struct Connection<S> {
    stream: IdleTimeout<S>,
    buffer: Vec<u8>,
    state: ConnectionState,
    router: Arc<Router>,
    settings: Arc<ConnectionSettings>,
    shutdown: ShutdownSignal,
    peer: String,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        router: Arc<Router>,
        settings: Arc<ConnectionSettings>,
        shutdown: ShutdownSignal,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            stream: IdleTimeout::new(stream, settings.read_timeout),
            buffer: Vec::with_capacity(settings.read_buffer_size),
            state: ConnectionState::Idle,
            router,
            settings,
            shutdown,
            peer: peer.into(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve requests until the connection closes.
    ///
    /// Returns the number of responses written.
    pub async fn run(mut self) -> Result<u64, Error> {
        let mut served = 0;
        let result = self.serve(&mut served).await;
        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
        let _ = self.stream.shutdown().await;
        debug!("Connection from {} closed after {served} responses", self.peer);
        result.map(|_| served)
    }

    async fn serve(&mut self, served: &mut u64) -> Result<(), Error> {
        loop {
            if !self.wait_for_request().await? {
                self.transition(ConnectionState::Closed);
                return Ok(());
            }
            self.transition(ConnectionState::Reading);

            let head = match self.read_head().await {
                Ok(head) => head,
                Err(failure) => return self.fail(failure, served).await,
            };

            let outcome = self.handle(head).await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(failure) => return self.fail(failure, served).await,
            };
            *served += 1;
            if outcome.close {
                return Ok(());
            }
        }
    }

    /// Wait in Idle until request bytes are buffered. Returns false when the
    /// connection should close instead.
    async fn wait_for_request(&mut self) -> Result<bool, Error> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        if self.shutdown.is_triggered() {
            return Ok(false);
        }

        let read = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                debug!("Closing idle connection from {} for shutdown", self.peer);
                return Ok(false);
            }
            read = fill(&mut self.stream, &mut self.buffer, self.settings.read_buffer_size) => read,
        };
        match read {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                debug!("Idle connection from {} timed out", self.peer);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_head(&mut self) -> Result<RequestHead, ReadFailure> {
        let max = self.settings.max_header_bytes;
        let head_end = loop {
            if let Some(end) = find_head_end(&self.buffer) {
                if end > max {
                    return Err(ReadFailure::Reject(ParserError::HeaderTooLarge(max).into()));
                }
                break end;
            }
            if self.buffer.len() > max {
                return Err(ReadFailure::Reject(ParserError::HeaderTooLarge(max).into()));
            }
            match fill(&mut self.stream, &mut self.buffer, self.settings.read_buffer_size).await {
                Ok(0) => return Err(ReadFailure::Abort(None)),
                Ok(_) => {}
                Err(e) => return Err(abort_on_io(e)),
            }
        };

        let head = parse_head(&self.buffer[..head_end]).map_err(|e| ReadFailure::Reject(e.into()));
        self.buffer.drain(..head_end);
        head
    }

    /// Read the body, run the handler and write its response.
    async fn handle(&mut self, head: RequestHead) -> Result<WriteOutcome, ReadFailure> {
        let router = Arc::clone(&self.router);
        let method = head.method;
        let version = head.version;
        let declared = content_length(&head.headers).ok().flatten().unwrap_or(0);
        let has_body = declared > 0 || head.headers.contains("Transfer-Encoding");

        let (route, params) = match router.resolve(method, &head.raw_path) {
            Resolution::Matched { route, params } => (route, params),
            unmatched => {
                let error = match unmatched {
                    Resolution::MethodNotAllowed(allowed) => Error::MethodNotAllowed {
                        method,
                        path: head.path.clone(),
                        allowed,
                    },
                    _ => Error::NotFound(head.path.clone()),
                };
                debug!("{} {method} {}: {error}", self.peer, head.target);
                // An unread body would be taken for the next request.
                let keep_alive = head.keep_alive() && !has_body;
                self.transition(ConnectionState::Dispatching);
                let options = self.write_options(&head, keep_alive);
                return self.write(HttpResponse::from(&error), options).await.map_err(|e| ReadFailure::Abort(Some(e)));
            }
        };

        if declared > 0
            && declared <= self.settings.body.max_body_bytes
            && (self.buffer.len() as u64) < declared
            && head.headers.has_token("Expect", "100-continue")
        {
            self.stream.write_all(CONTINUE).await.map_err(abort_on_io)?;
            self.stream.flush().await.map_err(abort_on_io)?;
        }

        let buffered = (self.buffer.len() as u64).min(declared) as usize;
        let body = {
            let source = (&self.buffer[..buffered]).chain(&mut self.stream);
            read_body(source, &head.headers, route.body_kind, &self.settings.body).await
        };
        self.buffer.drain(..buffered);
        let body = match body {
            Ok(body) => body,
            Err(ParserError::Io(e)) => return Err(abort_on_io(e)),
            Err(e @ ParserError::IncompleteBody { .. }) => return Err(ReadFailure::Abort(Some(e.into()))),
            Err(e) => return Err(ReadFailure::Reject(e.into())),
        };

        self.transition(ConnectionState::Dispatching);
        let keep_alive = head.keep_alive();
        let mut options = self.write_options(&head, keep_alive);
        let target = head.target.clone();
        let mut request = HttpRequest::from_head(head, body);
        request.params = params;

        let response = router.invoke(route, request).await;
        // Shutdown may have started while the handler ran.
        options.keep_alive &= !self.shutdown.is_triggered();
        let outcome = self.write(response, options).await.map_err(|e| ReadFailure::Abort(Some(e)))?;
        debug!(
            "{} {method} {target} {version} -> {} ({} bytes)",
            self.peer,
            outcome.status.as_u16(),
            outcome.body_bytes
        );
        Ok(outcome)
    }

    async fn fail(&mut self, failure: ReadFailure, served: &mut u64) -> Result<(), Error> {
        match failure {
            ReadFailure::Abort(None) => {
                self.transition(ConnectionState::Closed);
                Ok(())
            }
            ReadFailure::Abort(Some(Error::Timeout)) => {
                debug!("Connection from {} timed out mid-request", self.peer);
                if self.state == ConnectionState::Reading {
                    self.transition(ConnectionState::Closed);
                }
                Ok(())
            }
            ReadFailure::Abort(Some(e)) => {
                if self.state == ConnectionState::Reading {
                    self.transition(ConnectionState::Closed);
                }
                Err(e)
            }
            ReadFailure::Reject(error) => {
                warn!("Rejecting request from {}: {error}", self.peer);
                self.transition(ConnectionState::Dispatching);
                let options = WriteOptions {
                    keep_alive: false,
                    head_only: false,
                    chunked: false,
                    range: None,
                };
                self.write(HttpResponse::from(&error), options).await?;
                *served += 1;
                Ok(())
            }
        }
    }

    fn write_options(&self, head: &RequestHead, keep_alive: bool) -> WriteOptions {
        WriteOptions {
            keep_alive: keep_alive && !self.shutdown.is_triggered(),
            head_only: head.method == Method::HEAD,
            chunked: head.version == HttpVersion::Http11,
            range: head.headers.get("Range").map(str::to_string),
        }
    }

    async fn write(&mut self, response: HttpResponse, options: WriteOptions) -> Result<WriteOutcome, Error> {
        self.transition(ConnectionState::Writing);
        let result = ResponseWriter::new(&mut self.stream, options).write(response).await;
        match result {
            Ok(outcome) if !outcome.close => self.transition(ConnectionState::Idle),
            _ => self.transition(ConnectionState::Closed),
        }
        result
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal connection transition {:?} -> {next:?}",
            self.state
        );
        trace!("{}: {:?} -> {next:?}", self.peer, self.state);
        self.state = next;
    }
}

/// Read whatever the peer has sent next into `buffer`.
async fn fill<S: AsyncRead + Unpin>(stream: &mut S, buffer: &mut Vec<u8>, chunk: usize) -> io::Result<usize> {
    buffer.reserve(chunk);
    stream.read_buf(buffer).await
}

fn abort_on_io(error: io::Error) -> ReadFailure {
    if error.kind() == io::ErrorKind::TimedOut {
        ReadFailure::Abort(Some(Error::Timeout))
    } else {
        ReadFailure::Abort(Some(error.into()))
    }
}
