//! Response serialization.

use std::io;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::files::content_type_for;
use crate::parser::Headers;
use crate::server::error::Error;
use crate::server::range::ByteRange;
use crate::server::response::{FileResponse, HttpResponse, ResponseBody, StatusCode};
use crate::server::stream::ChunkProducer;

const HTTP_VERSION: &str = "HTTP/1.1";
const SERVER_NAME: &str = "localserve";

/// Request-dependent choices the writer has to make.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Announce and honour a persistent connection.
    pub keep_alive: bool,
    /// Send headers only (HEAD request).
    pub head_only: bool,
    /// The client understands chunked transfer encoding (HTTP/1.1).
    pub chunked: bool,
    /// The request's `Range` header.
    pub range: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            head_only: false,
            chunked: true,
            range: None,
        }
    }
}

/// What happened while writing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// The status line actually sent.
    pub status: StatusCode,
    /// Body bytes sent, excluding chunk framing.
    pub body_bytes: u64,
    /// The connection must be closed after this response.
    pub close: bool,
}

/// Writes responses to a stream.
pub struct ResponseWriter<'a, W: ?Sized> {
    stream: &'a mut W,
    options: WriteOptions,
}

impl<'a, W> ResponseWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(stream: &'a mut W, options: WriteOptions) -> Self {
        Self { stream, options }
    }

    /// Serialize and send `response`.
    ///
    /// Errors returned after the head was sent leave the stream in an
    /// undefined state; the caller must close it.
    pub async fn write(&mut self, response: HttpResponse) -> Result<WriteOutcome, Error> {
        let HttpResponse { status, headers, body } = response;
        match body {
            ResponseBody::Data(data) => self.write_fixed(status, headers, data).await,
            ResponseBody::Error(message) => {
                let mut headers = headers;
                headers.insert("Content-Type", "text/plain; charset=utf-8");
                self.write_fixed(status, headers, message.into_bytes()).await
            }
            ResponseBody::File(file) => self.write_file(status, headers, file).await,
            ResponseBody::Stream(producer) => self.write_stream(status, headers, producer).await,
        }
    }

    async fn write_fixed(&mut self, status: StatusCode, mut headers: Headers, body: Vec<u8>) -> Result<WriteOutcome, Error> {
        let body = if status.allows_body() { body } else { Vec::new() };
        headers.insert("Content-Length", body.len().to_string());

        let mut bytes = self.serialize_head(status, &mut headers, self.options.keep_alive);
        if !self.options.head_only {
            bytes.extend_from_slice(&body);
        }
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;

        Ok(WriteOutcome {
            status,
            body_bytes: if self.options.head_only { 0 } else { body.len() as u64 },
            close: !self.options.keep_alive,
        })
    }

    async fn write_file(&mut self, status: StatusCode, mut headers: Headers, file: FileResponse) -> Result<WriteOutcome, Error> {
        let opened = match tokio::fs::File::open(&file.path).await {
            Ok(f) => f.metadata().await.map(|m| (f, m)),
            Err(e) => Err(e),
        };
        let (mut handle, metadata) = match opened {
            Ok((f, m)) if m.is_file() => (f, m),
            Ok(_) => return self.write_error(StatusCode::NotFound, format!("Not found: {}", file.path.display())).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return self.write_error(StatusCode::NotFound, format!("Not found: {}", file.path.display())).await;
            }
            Err(e) => {
                warn!("Failed to open {}: {e}", file.path.display());
                return self.write_error(StatusCode::InternalServerError, "Failed to open file").await;
            }
        };
        let len = metadata.len();

        headers.insert("Accept-Ranges", "bytes");
        let range = file
            .range
            .or_else(|| self.options.range.as_deref().and_then(ByteRange::parse));
        let (status, first, count) = match range {
            None => (status, 0, len),
            Some(range) => match range.resolve(len) {
                Some((first, last)) => {
                    headers.insert("Content-Range", format!("bytes {first}-{last}/{len}"));
                    (StatusCode::PartialContent, first, last - first + 1)
                }
                None => {
                    headers.insert("Content-Range", format!("bytes */{len}"));
                    headers.insert("Content-Type", "text/plain; charset=utf-8");
                    let message = StatusCode::RangeNotSatisfiable.reason_phrase().as_bytes().to_vec();
                    return self.write_fixed(StatusCode::RangeNotSatisfiable, headers, message).await;
                }
            },
        };

        headers.insert_if_absent("Content-Type", content_type_for(&file.path));
        headers.insert("Content-Length", count.to_string());
        let head = self.serialize_head(status, &mut headers, self.options.keep_alive);
        self.stream.write_all(&head).await?;

        if !self.options.head_only && count > 0 {
            handle.seek(io::SeekFrom::Start(first)).await?;
            let mut limited = handle.take(count);
            let sent = tokio::io::copy(&mut limited, &mut *self.stream).await?;
            if sent < count {
                return Err(Error::ConnectionAborted(format!(
                    "{} shrank while sending ({sent} of {count} bytes)",
                    file.path.display()
                )));
            }
        }
        self.stream.flush().await?;

        debug!("Sent {} ({count} of {len} bytes)", file.path.display());
        Ok(WriteOutcome {
            status,
            body_bytes: if self.options.head_only { 0 } else { count },
            close: !self.options.keep_alive,
        })
    }

    async fn write_stream(
        &mut self,
        status: StatusCode,
        mut headers: Headers,
        mut producer: Box<dyn ChunkProducer>,
    ) -> Result<WriteOutcome, Error> {
        // Without chunked framing the end of the body is the end of the connection.
        let chunked = self.options.chunked;
        let keep_alive = self.options.keep_alive && chunked;
        headers.remove("Content-Length");
        if chunked {
            headers.insert("Transfer-Encoding", "chunked");
        }
        let head = self.serialize_head(status, &mut headers, keep_alive);
        self.stream.write_all(&head).await?;
        self.stream.flush().await?;

        if self.options.head_only {
            return Ok(WriteOutcome {
                status,
                body_bytes: 0,
                close: !keep_alive,
            });
        }

        let mut sent = 0u64;
        loop {
            let chunk = producer
                .next_chunk()
                .await
                .map_err(|e| Error::ConnectionAborted(format!("stream producer failed: {e}")))?;
            let Some(chunk) = chunk else { break };
            if chunk.is_empty() {
                continue;
            }
            if chunked {
                self.stream.write_all(format!("{:X}\r\n", chunk.len()).as_bytes()).await?;
                self.stream.write_all(&chunk).await?;
                self.stream.write_all(b"\r\n").await?;
            } else {
                self.stream.write_all(&chunk).await?;
            }
            self.stream.flush().await?;
            sent += chunk.len() as u64;
        }
        if chunked {
            self.stream.write_all(b"0\r\n\r\n").await?;
        }
        self.stream.flush().await?;

        Ok(WriteOutcome {
            status,
            body_bytes: sent,
            close: !keep_alive,
        })
    }

    async fn write_error(&mut self, status: StatusCode, message: impl Into<String>) -> Result<WriteOutcome, Error> {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain; charset=utf-8");
        self.write_fixed(status, headers, message.into().into_bytes()).await
    }

    fn serialize_head(&self, status: StatusCode, headers: &mut Headers, keep_alive: bool) -> Vec<u8> {
        headers.insert_if_absent("Server", SERVER_NAME);
        headers.insert("Connection", if keep_alive { "keep-alive" } else { "close" });

        let mut bytes = Vec::new();

        // Add the status line
        let status_line = format!("{HTTP_VERSION} {} {}\r\n", status.as_u16(), status.reason_phrase());
        bytes.extend_from_slice(status_line.as_bytes());

        // Add the headers
        for (name, value) in headers.iter() {
            let header_line = format!("{name}: {value}\r\n");
            bytes.extend_from_slice(header_line.as_bytes());
        }

        // Add the empty line that separates headers from body
        bytes.extend_from_slice(b"\r\n");

        bytes
    }
}
