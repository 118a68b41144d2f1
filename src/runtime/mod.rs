//! Readiness-driven server runtime.
//!
//! Split into three parts:
//! - `event_loop`: the single thread owning the mio `Poll` and all
//!   registrations.
//! - `worker`: the fixed pool running protocol logic off the loop.
//! - `context`: per-connection state shared between the two.

mod context;
mod event_loop;
mod worker;

pub use context::{ConnectionContext, EnqueueError, SharedContext};
pub use event_loop::Server;
pub use worker::{LoopSignal, Task, WorkerPool};

use crate::config::Config;
use std::io;

/// Bind and run the server, blocking the calling thread.
pub fn run(config: &Config) -> io::Result<()> {
    Server::bind(config)?.run()
}
