//! Per-connection state shared between the event loop and workers.
//!
//! Each connection owns exactly one `ConnectionContext` for its lifetime,
//! wrapped in an `Arc<Mutex<_>>` scoped to that connection. The loop
//! thread locks it to read into the buffer and to drain the write queue;
//! worker threads lock it only to enqueue a finished response. There is
//! no lock shared across connections.

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A context handle shared between the loop and the worker pool.
pub type SharedContext = Arc<Mutex<ConnectionContext>>;

/// Why an enqueue attempt was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The write queue is at capacity. The connection must be closed
    /// rather than buffering further.
    #[error("write queue at capacity")]
    QueueFull,
    /// The connection was already closed; the response is dropped.
    #[error("connection closed")]
    Closed,
}

/// Per-connection read buffer and bounded outbound write queue.
///
/// The write queue is FIFO and holds at most `capacity` buffers; the head
/// buffer is advanced in place across partial writes so already-accepted
/// bytes are never resent.
pub struct ConnectionContext {
    read_buf: Box<[u8]>,
    write_queue: VecDeque<Bytes>,
    capacity: usize,
    closed: bool,
}

impl ConnectionContext {
    pub fn new(read_buf_size: usize, queue_capacity: usize) -> Self {
        Self {
            read_buf: vec![0u8; read_buf_size].into_boxed_slice(),
            write_queue: VecDeque::with_capacity(queue_capacity),
            capacity: queue_capacity,
            closed: false,
        }
    }

    /// The reusable read buffer. Contents are only meaningful up to the
    /// byte count returned by the most recent read.
    pub fn read_buf(&mut self) -> &mut [u8] {
        &mut self.read_buf
    }

    /// Append a response buffer to the write queue.
    ///
    /// Fails deterministically once the queue holds `capacity` buffers;
    /// the caller must treat that as fatal for this connection. Enqueue
    /// on a closed context is a refused no-op, never a panic.
    pub fn enqueue(&mut self, data: Bytes) -> Result<(), EnqueueError> {
        if self.closed {
            return Err(EnqueueError::Closed);
        }
        if self.write_queue.len() >= self.capacity {
            return Err(EnqueueError::QueueFull);
        }
        self.write_queue.push_back(data);
        Ok(())
    }

    /// The buffer at the head of the queue, if any.
    pub fn front(&self) -> Option<&Bytes> {
        self.write_queue.front()
    }

    /// Record a partial write of `n` bytes against the head buffer.
    pub fn advance_front(&mut self, n: usize) {
        if let Some(front) = self.write_queue.front_mut() {
            front.advance(n.min(front.len()));
        }
    }

    /// Drop the fully-written head buffer.
    pub fn pop_front(&mut self) {
        self.write_queue.pop_front();
    }

    /// Number of buffers waiting to be written.
    pub fn pending(&self) -> usize {
        self.write_queue.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Mark the connection closed and discard any queued output.
    ///
    /// A worker finishing after this point sees `EnqueueError::Closed`
    /// and must not resurrect the connection.
    pub fn close(&mut self) {
        self.closed = true;
        self.write_queue.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
