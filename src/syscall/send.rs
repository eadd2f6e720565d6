use std::os::unix::io::{AsRawFd, RawFd};

use crate::syscall::{cvt_retry, Syscall};

/// Writes as much of `buf` as the socket accepts without blocking.
///
/// `MSG_NOSIGNAL` turns a write to a reset peer into `EPIPE` instead of
/// raising `SIGPIPE`.
pub fn send<S: AsRawFd>(socket: &S, buf: &[u8]) -> Syscall<usize> {
    let fd: RawFd = socket.as_raw_fd();
    cvt_retry(|| unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn full_buffer_would_block() {
        let (left, _right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        let chunk = [7u8; 64 * 1024];

        let mut blocked = false;
        for _ in 0..1024 {
            match send(&left, &chunk) {
                Syscall::Done(n) => assert!(n > 0),
                Syscall::WouldBlock => {
                    blocked = true;
                    break;
                }
                Syscall::Failed(err) => panic!("send failed: {}", err),
            }
        }
        assert!(blocked);
    }

    #[test]
    fn closed_peer_fails() {
        let (left, right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        drop(right);
        assert!(matches!(send(&left, b"x"), Syscall::Failed(_)));
    }
}
