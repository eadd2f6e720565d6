use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::syscall::Syscall;

/// Accepts one pending connection and puts it in non-blocking mode.
///
/// The standard library already opens accepted sockets close-on-exec.
pub fn accept(listener: &TcpListener) -> Syscall<(TcpStream, SocketAddr)> {
    match Syscall::from_result(listener.accept()) {
        Syscall::Done((stream, peer)) => match stream.set_nonblocking(true) {
            Ok(()) => Syscall::Done((stream, peer)),
            Err(err) => Syscall::Failed(err),
        },
        Syscall::WouldBlock => Syscall::WouldBlock,
        Syscall::Failed(err) => Syscall::Failed(err),
    }
}
