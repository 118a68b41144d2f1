//! linecache: an in-memory sharded key-value server.
//!
//! A single readiness-driven event loop (mio) multiplexes all client
//! connections; decoded request lines are handed to a fixed worker pool
//! that runs the protocol against a sharded cache and queues responses
//! on bounded per-connection write queues.

pub mod cache;
pub mod config;
pub mod protocol;
pub mod runtime;

pub use cache::ShardedCache;
pub use config::Config;
pub use runtime::Server;
