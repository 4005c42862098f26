//! Write-serializing stream decorator.
//!
//! TLS records must not interleave at the byte level, so all writes to a
//! secured stream go through a bounded queue drained by exactly one task. Any
//! number of [`QueuedWriter`] handles may submit concurrently; each submission
//! is written in full before the next one starts, and each submitter awaits
//! its own completion. Reads bypass the queue.
//!
//! Through [`AsyncWrite`] a write is accepted as soon as it holds a queue slot,
//! and nothing is committed while it waits for one. `poll_flush` waits for
//! every write accepted before it, so write errors surface there.
//!
//! ```text
//! writer A ─┐
//! writer B ─┼─▶ mpsc (bounded) ─▶ drain task ─▶ write half of S
//! writer C ─┘        ▲                              │
//!                    └──── oneshot completion ◀─────┘
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default number of queued write requests before submitters wait.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

type Completion = oneshot::Sender<io::Result<()>>;
type PendingOp = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;
type Reserving = Pin<Box<dyn Future<Output = io::Result<OwnedPermit<WriteRequest>>> + Send>>;

enum WriteRequest {
    Write {
        data: Bytes,
        done: Option<Completion>,
    },
    Flush { done: Completion },
    Shutdown { done: Completion },
}

fn queue_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "write queue is closed")
}

/// Cloneable handle for submitting writes to a [`QueuedStream`].
#[derive(Debug, Clone)]
pub struct QueuedWriter {
    tx: mpsc::Sender<WriteRequest>,
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteRequest::Write { data, .. } => write!(f, "Write({} bytes)", data.len()),
            WriteRequest::Flush { .. } => f.write_str("Flush"),
            WriteRequest::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl QueuedWriter {
    /// Write `data` in full, uninterrupted by other writers.
    ///
    /// Once queued, dropping the returned future does not withdraw `data`.
    pub async fn write_all(&self, data: impl Into<Bytes>) -> io::Result<()> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        self.submit(|done| WriteRequest::Write {
            data,
            done: Some(done),
        })
        .await
    }

    /// Flush everything written before this call.
    pub async fn flush(&self) -> io::Result<()> {
        self.submit(|done| WriteRequest::Flush { done }).await
    }

    /// Shut down the write direction. Later writes fail.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.submit(|done| WriteRequest::Shutdown { done }).await
    }

    /// Whether the drain task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit(&self, request: impl FnOnce(Completion) -> WriteRequest) -> io::Result<()> {
        let (done, completed) = oneshot::channel();
        self.tx
            .send(request(done))
            .await
            .map_err(|_| queue_closed())?;
        completed.await.map_err(|_| queue_closed())?
    }
}

/// A stream whose writes are serialized through a single drain task.
pub struct QueuedStream<S> {
    reader: ReadHalf<S>,
    writer: QueuedWriter,
    drain: JoinHandle<()>,
    reserving: Option<Reserving>,
    /// Writes accepted through `poll_write` so far.
    accepted: u64,
    /// In-flight flush, tagged with the `accepted` count it covers.
    flush_op: Option<(u64, PendingOp)>,
    shutdown_op: Option<PendingOp>,
}

impl<S> QueuedStream<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `stream`, spawning its drain task on the current runtime.
    ///
    /// A `depth` of zero is treated as one.
    pub fn new(stream: S, depth: usize) -> Self {
        let (reader, sink) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(depth.max(1));
        let drain = tokio::spawn(drain(sink, rx));
        Self {
            reader,
            writer: QueuedWriter { tx },
            drain,
            reserving: None,
            accepted: 0,
            flush_op: None,
            shutdown_op: None,
        }
    }
}

impl<S> QueuedStream<S> {
    /// A new handle for concurrent writers.
    pub fn writer(&self) -> QueuedWriter {
        self.writer.clone()
    }
}

impl<S> std::fmt::Debug for QueuedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedStream")
            .field("closed", &self.writer.is_closed())
            .finish_non_exhaustive()
    }
}

impl<S> Drop for QueuedStream<S> {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

async fn drain<S>(mut sink: WriteHalf<S>, mut rx: mpsc::Receiver<WriteRequest>)
where
    S: AsyncWrite,
{
    while let Some(request) = rx.recv().await {
        let (result, done, last) = match request {
            WriteRequest::Write { data, done } => (sink.write_all(&data).await, done, false),
            WriteRequest::Flush { done } => (sink.flush().await, Some(done), false),
            WriteRequest::Shutdown { done } => (sink.shutdown().await, Some(done), true),
        };
        let failed = result.is_err();
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Queued write failed, closing write queue");
        }
        if let Some(done) = done {
            let _ = done.send(result);
        }
        if failed || last {
            break;
        }
    }
}

fn poll_op(
    slot: &mut Option<PendingOp>,
    cx: &mut Context<'_>,
    start: impl FnOnce() -> PendingOp,
) -> Poll<io::Result<()>> {
    let op = slot.get_or_insert_with(start);
    let result = ready!(op.as_mut().poll(cx));
    *slot = None;
    Poll::Ready(result)
}

impl<S: AsyncRead> AsyncRead for QueuedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for QueuedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        let tx = &this.writer.tx;
        // Only a slot is awaited here; `buf` is copied once the slot is ours.
        let reserving = this.reserving.get_or_insert_with(|| {
            let tx = tx.clone();
            let reserve: Reserving =
                Box::pin(async move { tx.reserve_owned().await.map_err(|_| queue_closed()) });
            reserve
        });
        let permit = ready!(reserving.as_mut().poll(cx));
        this.reserving = None;
        permit?.send(WriteRequest::Write {
            data: Bytes::copy_from_slice(buf),
            done: None,
        });
        this.accepted += 1;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let accepted = this.accepted;
        // A flush started before later writes does not cover them.
        if matches!(&this.flush_op, Some((covers, _)) if *covers != accepted) {
            this.flush_op = None;
        }
        let writer = &this.writer;
        let (_, op) = this.flush_op.get_or_insert_with(|| {
            let writer = writer.clone();
            let op: PendingOp = Box::pin(async move { writer.flush().await });
            (accepted, op)
        });
        let result = ready!(op.as_mut().poll(cx));
        this.flush_op = None;
        Poll::Ready(result)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let writer = &this.writer;
        poll_op(&mut this.shutdown_op, cx, || {
            let writer = writer.clone();
            Box::pin(async move { writer.shutdown().await })
        })
    }
}
