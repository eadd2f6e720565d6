use std::io;

use nix::errno::Errno;
use thiserror::Error;
// https://github.com/dtolnay/thiserror

/// Failures while setting the server up. Any of these ends the process.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not resolve a usable address for {0}")]
    Resolve(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("system call failed: {0}")]
    Sys(#[from] Errno),
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Why a connection task finished with an error terminal.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0}")]
    Http(#[from] hyper::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Numeric diagnostic codes reported for error terminals.
///
/// The numbering follows hyper's C API so log lines line up with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Error = 1,
    InvalidArg = 2,
    UnexpectedEof = 3,
    AbortedByCallback = 4,
    InvalidPeerMessage = 6,
    Timeout = 8,
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TaskError::Http(err) if err.is_parse() => ErrorCode::InvalidPeerMessage,
            TaskError::Http(err) if err.is_incomplete_message() => ErrorCode::UnexpectedEof,
            TaskError::Http(err) if err.is_canceled() => ErrorCode::AbortedByCallback,
            TaskError::Http(err) if err.is_timeout() => ErrorCode::Timeout,
            TaskError::Http(err) if err.is_user() => ErrorCode::InvalidArg,
            TaskError::Http(_) => ErrorCode::Error,
            TaskError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                ErrorCode::UnexpectedEof
            }
            TaskError::Io(_) => ErrorCode::Error,
        }
    }
}
