//! Producers for streamed response bodies.
//!
//! A streamed body is pulled one chunk at a time by the response writer, so
//! the producer never runs ahead of the client and stops as soon as the
//! connection is gone.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::server::error::Error;

/// Future returned by [`ChunkProducer::next_chunk`].
pub type ChunkFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Option<Vec<u8>>>> + Send + 'a>>;

/// A source of body chunks.
///
/// `Ok(None)` ends the body. An `Err` after the response head was sent
/// aborts the connection.
pub trait ChunkProducer: Send {
    fn next_chunk(&mut self) -> ChunkFuture<'_>;
}

impl ChunkProducer for mpsc::Receiver<io::Result<Vec<u8>>> {
    fn next_chunk(&mut self) -> ChunkFuture<'_> {
        Box::pin(async move { self.recv().await.transpose() })
    }
}

/// Serves chunks from an iterator.
pub struct IterProducer<I> {
    chunks: I,
}

impl<I> IterProducer<I>
where
    I: Iterator<Item = Vec<u8>> + Send,
{
    pub fn new(chunks: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            chunks: chunks.into_iter(),
        }
    }
}

impl<I> ChunkProducer for IterProducer<I>
where
    I: Iterator<Item = Vec<u8>> + Send,
{
    fn next_chunk(&mut self) -> ChunkFuture<'_> {
        let next = self.chunks.next();
        Box::pin(async move { Ok(next) })
    }
}

/// The sending half of a channel-backed streamed response.
///
/// `send` waits while the channel is full, which throttles the producer to
/// the pace of the client.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
}

impl ChunkSender {
    pub(crate) fn new(tx: mpsc::Sender<io::Result<Vec<u8>>>) -> Self {
        Self { tx }
    }

    /// Queue a chunk. Fails once the client has gone away.
    pub async fn send(&self, chunk: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| Error::ConnectionAborted("stream receiver dropped".to_string()))
    }

    /// Abort the stream with an error.
    pub async fn fail(self, error: io::Error) {
        let _ = self.tx.send(Err(error)).await;
    }

    /// Whether the response writer has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
