//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue
//! on macOS.
//!
//! One thread owns the `Poll` and is the only thread that reads, writes
//! or changes registrations. Protocol work runs on the worker pool;
//! workers hand results back through the per-connection write queue plus
//! a signal channel and a `Waker`, and the loop applies the interest
//! change itself.

use crate::cache::ShardedCache;
use crate::config::Config;
use crate::protocol::Limits;
use crate::runtime::context::{ConnectionContext, SharedContext};
use crate::runtime::worker::{LoopSignal, Task, WorkerPool};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);
const EVENTS_CAPACITY: usize = 1024;

/// Loop-side connection record.
///
/// The stream and registration belong exclusively to the loop thread;
/// only the context is shared with workers. `id` is process-unique and
/// guards against slab token reuse when a stale worker signal arrives.
struct Connection {
    stream: TcpStream,
    id: u64,
    ctx: SharedContext,
    write_interest: bool,
}

/// The readiness-driven server core.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Slab<Connection>,
    cache: Arc<ShardedCache>,
    pool: WorkerPool,
    signals: Receiver<LoopSignal>,
    next_conn_id: u64,
    read_buffer_size: usize,
    write_queue_capacity: usize,
    poll_timeout: Duration,
}

impl Server {
    /// Bind the listening socket and spin up the worker pool.
    ///
    /// Failure to bind is the only process-fatal condition.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = create_listener(addr)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (signal_tx, signal_rx) = mpsc::channel();

        let cache = Arc::new(ShardedCache::new(config.shards));
        let limits = Limits {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        };
        let pool = WorkerPool::new(
            config.workers,
            Arc::clone(&cache),
            limits,
            signal_tx,
            waker,
        )?;

        info!(
            addr = %local_addr,
            shards = config.shards,
            workers = config.workers,
            "Server listening"
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            connections: Slab::new(),
            cache,
            pool,
            signals: signal_rx,
            next_conn_id: 0,
            read_buffer_size: config.read_buffer_size,
            write_queue_capacity: config.write_queue_capacity,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared cache handle, for inspection.
    pub fn cache(&self) -> Arc<ShardedCache> {
        Arc::clone(&self.cache)
    }

    /// Run the event loop. Blocks the calling thread indefinitely.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            // A bounded wait: wakeups with zero events are a no-op, and
            // the timeout keeps the loop from blocking forever on an
            // idle socket set.
            self.poll.poll(&mut events, Some(self.poll_timeout))?;

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => {
                        // Worker signals are drained below
                    }
                    token => {
                        let readable = event.is_readable();
                        let writable = event.is_writable();
                        if let Err(e) = self.handle_connection_event(token.0, readable, writable)
                        {
                            debug!(conn = token.0, error = %e, "Connection error");
                            self.close_connection(token.0);
                        }
                    }
                }
            }

            self.drain_signals();
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let id = self.next_conn_id;
                    self.next_conn_id += 1;

                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key());
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        error!(peer = %peer_addr, error = %e, "Failed to register connection");
                        continue;
                    }

                    let ctx = Arc::new(Mutex::new(ConnectionContext::new(
                        self.read_buffer_size,
                        self.write_queue_capacity,
                    )));
                    entry.insert(Connection {
                        stream,
                        id,
                        ctx,
                        write_interest: false,
                    });

                    debug!(conn = token.0, conn_id = id, peer = %peer_addr, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_connection_event(
        &mut self,
        idx: usize,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        if !self.connections.contains(idx) {
            // Stale event for an already-closed connection
            return Ok(());
        }

        if readable {
            self.handle_readable(idx)?;
        }

        // The read path may have closed the connection
        if writable && self.connections.contains(idx) {
            self.handle_writable(idx)?;
        }

        Ok(())
    }

    /// One non-blocking read, then dispatch the decoded line to the pool.
    /// The loop thread never parses or executes the command itself.
    fn handle_readable(&mut self, idx: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(idx)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
        let ctx_handle = Arc::clone(&conn.ctx);

        let line = {
            let mut ctx = ctx_handle.lock().unwrap();
            let buf = ctx.read_buf();
            match conn.stream.read(buf) {
                Ok(0) => {
                    // Orderly close from the peer
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer EOF"));
                }
                Ok(n) => String::from_utf8_lossy(&buf[..n]).trim().to_string(),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        };

        self.pool.submit(Task {
            token: Token(idx),
            conn_id: conn.id,
            line,
            ctx: ctx_handle,
        });
        Ok(())
    }

    /// Drain the write queue from the front, honouring partial writes.
    fn handle_writable(&mut self, idx: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(idx)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
        let ctx_handle = Arc::clone(&conn.ctx);
        let mut ctx = ctx_handle.lock().unwrap();

        loop {
            let front_len = match ctx.front() {
                Some(front) => front.len(),
                None => break,
            };

            let n = match conn.stream.write(ctx.front().unwrap()) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"))
                }
                Ok(n) => n,
                // Still write-interested; the next writable event resumes
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };

            if n < front_len {
                // Partial write: the remainder becomes the new head and
                // is never resent from the start.
                ctx.advance_front(n);
                return Ok(());
            }
            ctx.pop_front();
        }

        // Queue drained: an always-writable socket with nothing to send
        // must not keep waking the loop.
        self.poll
            .registry()
            .reregister(&mut conn.stream, Token(idx), Interest::READABLE)?;
        conn.write_interest = false;
        Ok(())
    }

    /// Apply worker signals. Signals carry the connection id assigned at
    /// accept time; a mismatch means the slab slot was reused and the
    /// signal is dropped.
    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            match signal {
                LoopSignal::WriteReady { token, conn_id } => {
                    self.apply_write_ready(token, conn_id)
                }
                LoopSignal::Close { token, conn_id } => self.apply_close(token, conn_id),
            }
        }
    }

    fn apply_write_ready(&mut self, token: Token, conn_id: u64) {
        let idx = token.0;
        let err = match self.connections.get_mut(idx) {
            Some(conn) if conn.id == conn_id => {
                if conn.write_interest {
                    return;
                }
                match self.poll.registry().reregister(
                    &mut conn.stream,
                    token,
                    Interest::READABLE | Interest::WRITABLE,
                ) {
                    Ok(()) => {
                        conn.write_interest = true;
                        return;
                    }
                    Err(e) => e,
                }
            }
            _ => {
                debug!(conn = idx, conn_id, "Dropping stale write-ready signal");
                return;
            }
        };
        warn!(conn = idx, error = %err, "Reregister failed");
        self.close_connection(idx);
    }

    fn apply_close(&mut self, token: Token, conn_id: u64) {
        let idx = token.0;
        if self
            .connections
            .get(idx)
            .map_or(false, |conn| conn.id == conn_id)
        {
            warn!(conn = idx, conn_id, "Closing connection on worker request");
            self.close_connection(idx);
        }
    }

    /// Remove one connection: deregister, drop the stream, and mark the
    /// shared context closed so late worker results are refused.
    fn close_connection(&mut self, idx: usize) {
        if let Some(mut conn) = self.connections.try_remove(idx) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            conn.ctx.lock().unwrap().close();
            debug!(conn = idx, conn_id = conn.id, "Connection closed");
        }
    }
}

/// Create the non-blocking listening socket.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
