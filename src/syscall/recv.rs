use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::syscall::{cvt_retry, Syscall};

/// Reads up to `buf.len()` bytes without blocking. `Done(0)` is an orderly
/// close from the peer.
pub fn recv<S: AsRawFd>(socket: &S, buf: &mut [MaybeUninit<u8>]) -> Syscall<usize> {
    let fd: RawFd = socket.as_raw_fd();
    // SAFETY: the kernel writes at most `buf.len()` bytes into `buf`, and
    // callers only treat the returned prefix as initialized.
    cvt_retry(|| unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) })
}
