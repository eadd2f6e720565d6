//! An HTTP/1 server that drives hyper from a hand-written, single-threaded
//! epoll loop.
//!
//! Readiness reported by the kernel is bridged to the wakers hyper parks
//! when a socket would block; a small completion-queue executor drives
//! the connection tasks and hands finished ones back so their sockets can
//! be torn down.

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod reactor;
pub mod resume;
pub mod runtime;
pub mod server;
pub mod service;
pub mod signal;
pub mod syscall;

pub use config::Config;
pub use error::{ErrorCode, ServerError, TaskError};
pub use server::Server;
