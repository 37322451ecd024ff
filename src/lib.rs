//! A single-process, edge-triggered static file server: a readiness reactor
//! over raw `mio`, a scatter-read buffer per connection, an indexed min-heap
//! for idle timeouts, a small mutex-and-condvar worker pool for the
//! filesystem work, and a from-scratch HTTP/1.1 request/response path.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod pool;
pub mod reactor;
pub mod timer;

pub use config::Config;
pub use error::ServerError;
pub use reactor::Reactor;
