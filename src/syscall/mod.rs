//! Non-blocking socket calls used by the event loop.
//!
//! Every call reports one of three outcomes, mirroring what an I/O
//! callback hands back to the HTTP engine: a byte count (or value), a
//! would-block signal, or a hard error.

use std::io;

mod accept;
mod recv;
mod send;

pub use accept::accept;
pub use recv::recv;
pub use send::send;

/// Outcome of one non-blocking system call.
#[derive(Debug)]
pub enum Syscall<T> {
    Done(T),
    WouldBlock,
    Failed(io::Error),
}

impl<T> Syscall<T> {
    pub(crate) fn from_result(result: io::Result<T>) -> Syscall<T> {
        match result {
            Ok(value) => Syscall::Done(value),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Syscall::WouldBlock,
            Err(err) => Syscall::Failed(err),
        }
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, Syscall::WouldBlock)
    }
}

/// Runs a raw libc call that returns `-1` on failure, retrying on `EINTR`.
pub(crate) fn cvt_retry<F>(mut call: F) -> Syscall<usize>
where
    F: FnMut() -> isize,
{
    loop {
        let ret = call();
        if ret >= 0 {
            return Syscall::Done(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Syscall::from_result(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_its_own_outcome() {
        let outcome: Syscall<usize> =
            Syscall::from_result(Err(io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(outcome.is_would_block());

        let outcome: Syscall<usize> =
            Syscall::from_result(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(matches!(outcome, Syscall::Failed(ref e) if e.kind() == io::ErrorKind::ConnectionReset));

        assert!(matches!(Syscall::from_result(Ok(0)), Syscall::Done(0)));
    }
}
