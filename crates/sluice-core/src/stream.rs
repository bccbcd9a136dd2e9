//! Streaming pipe between a connection and a provider operation.
//!
//! Upload direction: the request handler feeds chunks into a [`PipeWriter`]
//! while the provider concurrently drains the matching [`PipeReader`]. The
//! channel between them is bounded, so at most `capacity` chunks received
//! since the consumer's last read are ever held in memory. End-of-stream is an
//! explicit frame; a writer that disappears without sending it, or an idle
//! reader that hits its timeout, surfaces [`StorageError::Aborted`].
//!
//! Download direction: [`pump`] pulls fixed-size chunks from a backend stream
//! and only reads the next one after the previous write and flush completed.

use crate::{Result, StorageError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Byte stream type for upload/download operations
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug)]
enum Frame {
    Data(Bytes),
    Eof,
    Abort(String),
}

/// Create a connected writer/reader pair.
///
/// `capacity` is the number of chunks that may sit in the pipe before
/// `feed_data` waits for the reader. `idle_timeout` bounds how long the reader
/// waits for the next frame.
pub fn pipe(capacity: usize, idle_timeout: Option<Duration>) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PipeWriter {
            tx: Some(tx),
            fed: 0,
        },
        PipeReader {
            rx,
            idle_timeout,
            finished: false,
        },
    )
}

/// Producer half of the pipe
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Frame>>,
    fed: u64,
}

impl PipeWriter {
    /// Push one chunk.
    ///
    /// Fails once the reader is gone (the consumer finished or failed early)
    /// or after end-of-stream/abort has been signalled.
    pub async fn feed_data(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| StorageError::Aborted("pipe already closed".to_string()))?;
        let len = chunk.len() as u64;
        tx.send(Frame::Data(chunk))
            .await
            .map_err(|_| StorageError::Aborted("consumer stopped reading".to_string()))?;
        self.fed += len;
        Ok(())
    }

    /// Signal end-of-stream. Idempotent.
    pub async fn feed_eof(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!(bytes = self.fed, "upload pipe end-of-stream");
            // A reader that already went away has nothing left to drain.
            let _ = tx.send(Frame::Eof).await;
        }
    }

    /// Signal that no more data will arrive because the producer failed
    pub async fn abort(&mut self, reason: impl Into<String>) {
        if let Some(tx) = self.tx.take() {
            let reason = reason.into();
            debug!(bytes = self.fed, %reason, "upload pipe aborted");
            let _ = tx.send(Frame::Abort(reason)).await;
        }
    }

    /// Total bytes accepted so far
    pub fn bytes_fed(&self) -> u64 {
        self.fed
    }
}

/// Consumer half of the pipe
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Frame>,
    idle_timeout: Option<Duration>,
    finished: bool,
}

impl PipeReader {
    /// Next chunk in arrival order, `None` after end-of-stream.
    ///
    /// Suspends until a chunk, end-of-stream or abort arrives. Chunks queued
    /// before end-of-stream are always returned first.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        let frame = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx.recv()).await {
                Ok(frame) => frame,
                Err(_) => {
                    self.finished = true;
                    return Err(StorageError::Aborted(format!(
                        "no data received for {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => self.rx.recv().await,
        };

        match frame {
            Some(Frame::Data(chunk)) => Ok(Some(chunk)),
            Some(Frame::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Some(Frame::Abort(reason)) => {
                self.finished = true;
                Err(StorageError::Aborted(reason))
            }
            None => {
                self.finished = true;
                Err(StorageError::Aborted(
                    "producer went away before end-of-stream".to_string(),
                ))
            }
        }
    }

    /// Adapt into a [`ByteStream`] that ends after end-of-stream or the first error
    pub fn into_stream(self) -> ByteStream {
        Box::pin(futures::stream::unfold(self, |mut reader| async move {
            match reader.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), reader)),
                Ok(None) => None,
                Err(e) => Some((Err(e), reader)),
            }
        }))
    }
}

/// Outbound side of a download
#[async_trait]
pub trait ChunkSink: Send {
    /// Write one chunk to the connection
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Wait until the written chunk has been handed off to the connection
    async fn flush(&mut self) -> Result<()>;
}

/// Move a backend stream to a sink in `chunk_size` pieces.
///
/// The next backend read starts only after the previous chunk was written
/// and flushed. A sink failure stops the pump and drops `source`, which
/// closes the backend connection. Returns the number of bytes delivered.
pub async fn pump<S>(mut source: ByteStream, sink: &mut S, chunk_size: usize) -> Result<u64>
where
    S: ChunkSink + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut buffer = BytesMut::with_capacity(chunk_size);
    let mut exhausted = false;
    let mut total = 0u64;

    loop {
        while !exhausted && buffer.len() < chunk_size {
            match source.next().await {
                Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None => exhausted = true,
            }
        }

        if buffer.is_empty() {
            break;
        }

        let chunk = buffer.split_to(buffer.len().min(chunk_size)).freeze();
        total += chunk.len() as u64;
        sink.write(chunk).await?;
        sink.flush().await?;
    }

    Ok(total)
}
