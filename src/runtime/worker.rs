//! Worker pool executing protocol logic off the event-loop thread.
//!
//! Workers never touch mio registrations directly: interest changes made
//! from a non-loop thread would not be observed until the poll call
//! returns. Instead a worker enqueues its response on the connection's
//! context, posts a `LoopSignal` on a channel, and wakes the poll via
//! `mio::Waker`; the loop applies the registration change itself.

use crate::cache::ShardedCache;
use crate::protocol::{self, Limits};
use crate::runtime::context::{EnqueueError, SharedContext};
use bytes::{BufMut, BytesMut};
use mio::{Token, Waker};
use std::io;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Message from a worker to the event loop, delivered with a wake.
///
/// `conn_id` is the process-unique identity of the connection the signal
/// was produced for. Slab tokens are reused after close; the loop drops
/// any signal whose id no longer matches the token's current occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// A response was enqueued; register write interest for this token.
    WriteReady { token: Token, conn_id: u64 },
    /// The connection's write queue overflowed; close and deregister it.
    Close { token: Token, conn_id: u64 },
}

/// One decoded request line, dispatched by the loop to the pool.
pub struct Task {
    pub token: Token,
    pub conn_id: u64,
    pub line: String,
    pub ctx: SharedContext,
}

/// Fixed-size pool of protocol worker threads.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` named worker threads sharing one task channel.
    pub fn new(
        size: usize,
        cache: Arc<ShardedCache>,
        limits: Limits,
        signals: Sender<LoopSignal>,
        waker: Arc<Waker>,
    ) -> io::Result<Self> {
        let (sender, receiver) = std::sync::mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let cache = Arc::clone(&cache);
            let receiver = Arc::clone(&receiver);
            let signals = signals.clone();
            let waker = Arc::clone(&waker);

            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    worker_loop(worker_id, &receiver, &cache, &limits, &signals, &waker);
                })?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    /// Hand a task to the pool. Tasks are picked up by any idle worker.
    pub fn submit(&self, task: Task) {
        if let Some(sender) = &self.sender {
            if sender.send(task).is_err() {
                error!("Worker pool channel closed, dropping task");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain and exit
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: &Mutex<Receiver<Task>>,
    cache: &ShardedCache,
    limits: &Limits,
    signals: &Sender<LoopSignal>,
    waker: &Waker,
) {
    debug!(worker = worker_id, "Worker started");
    loop {
        // Take the next task without holding the channel lock while
        // processing it.
        let task = match receiver.lock().unwrap().recv() {
            Ok(task) => task,
            Err(_) => break,
        };
        handle_task(task, cache, limits, signals, waker);
    }
    debug!(worker = worker_id, "Worker stopped");
}

/// Run the protocol for one request and hand the response back to the
/// loop via the connection's write queue.
fn handle_task(
    task: Task,
    cache: &ShardedCache,
    limits: &Limits,
    signals: &Sender<LoopSignal>,
    waker: &Waker,
) {
    let response = protocol::process(&task.line, cache, limits);

    let mut buf = BytesMut::with_capacity(response.len() + 1);
    buf.put_slice(response.as_bytes());
    buf.put_u8(b'\n');

    let result = {
        let mut ctx = task.ctx.lock().unwrap();
        ctx.enqueue(buf.freeze())
    };

    match result {
        Ok(()) => {
            send_signal(
                signals,
                waker,
                LoopSignal::WriteReady {
                    token: task.token,
                    conn_id: task.conn_id,
                },
            );
        }
        Err(EnqueueError::QueueFull) => {
            // A stalled consumer is disconnected, never buffered further
            warn!(
                conn_id = task.conn_id,
                "Write queue at capacity, closing connection"
            );
            send_signal(
                signals,
                waker,
                LoopSignal::Close {
                    token: task.token,
                    conn_id: task.conn_id,
                },
            );
        }
        Err(EnqueueError::Closed) => {
            // The loop closed this connection while we were processing
            debug!(conn_id = task.conn_id, "Response for closed connection dropped");
        }
    }
}

fn send_signal(signals: &Sender<LoopSignal>, waker: &Waker, signal: LoopSignal) {
    if signals.send(signal).is_err() {
        debug!("Event loop gone, dropping signal");
        return;
    }
    if let Err(e) = waker.wake() {
        error!(error = %e, "Failed to wake event loop");
    }
}
