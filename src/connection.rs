use std::cell::RefCell;
use std::io;
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{ready, Context, Poll};

use hyper::rt::{Read, ReadBufCursor, Write};
use nix::errno::Errno;
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::reactor::{Interest, Reactor, Readiness, Token};
use crate::resume::ResumeSlot;
use crate::syscall::{self, Syscall};

// Connections are edge-triggered. Handles are only parked after a call
// would block, so the next arrival always produces an edge, and bytes left
// unread while the engine is busy writing do not keep the notifier awake.
const WATCH_READ: Interest = Interest::READ.edge_triggered();
const WATCH_READ_WRITE: Interest = Interest::READ_WRITE.edge_triggered();

/// One accepted TCP connection and the handles of any I/O parked on it.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    read: ResumeSlot,
    write: ResumeSlot,
    /// Whether the notifier is currently watching for writable edges.
    write_armed: bool,
}

impl Connection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Tears the record down: deregister, release parked handles, close.
    fn close(self, reactor: &Reactor) {
        let Connection {
            stream,
            peer,
            mut read,
            mut write,
            ..
        } = self;
        if let Err(err) = reactor.deregister(&stream) {
            warn!("failed to deregister connection from {}: {}", peer, err);
        }
        read.clear();
        write.clear();
        drop(stream);
    }
}

/// Arena of live connections, keyed by slot.
///
/// The notifier only ever sees slot numbers, so an event that arrives for
/// a slot which has already been torn down is looked up and dropped
/// instead of touching freed state. Clones share the same arena; it is
/// meant to be used from the event loop thread only.
#[derive(Clone)]
pub struct ConnectionTable {
    slots: Rc<RefCell<Slab<Connection>>>,
    reactor: Rc<Reactor>,
    arm_write_interest: bool,
}

impl ConnectionTable {
    pub fn new(reactor: Rc<Reactor>, arm_write_interest: bool) -> ConnectionTable {
        ConnectionTable {
            slots: Rc::new(RefCell::new(Slab::new())),
            reactor,
            arm_write_interest,
        }
    }

    /// Creates a record for `stream` and registers it for read readiness.
    /// On failure the stream is closed.
    pub fn insert(&self, stream: TcpStream, peer: SocketAddr) -> Result<usize, Errno> {
        let mut slots = self.slots.borrow_mut();
        let entry = slots.vacant_entry();
        let key = entry.key();
        self.reactor
            .register(&stream, Token::Connection(key), WATCH_READ)?;
        entry.insert(Connection {
            stream,
            peer,
            read: ResumeSlot::new(),
            write: ResumeSlot::new(),
            write_armed: false,
        });
        Ok(key)
    }

    /// Destroys the record in `key`. Returns false if it was already gone.
    pub fn remove(&self, key: usize) -> bool {
        let conn = {
            let mut slots = self.slots.borrow_mut();
            if !slots.contains(key) {
                return false;
            }
            slots.remove(key)
        };
        conn.close(&self.reactor);
        true
    }

    /// Resumes I/O parked on `key` for the directions `readiness` reports.
    /// Returns how many handles were woken.
    pub fn fire(&self, key: usize, readiness: &Readiness) -> usize {
        let mut slots = self.slots.borrow_mut();
        let conn = match slots.get_mut(key) {
            Some(conn) => conn,
            None => {
                trace!("readiness for released slot {}", key);
                return 0;
            }
        };

        // An error or hangup edge is not repeated, so it resumes both sides.
        let mut woken = 0;
        if (readiness.readable || readiness.closed) && conn.read.wake() {
            woken += 1;
        }
        if readiness.writable || readiness.closed {
            if conn.write.wake() {
                woken += 1;
            }
            if conn.write_armed {
                match self
                    .reactor
                    .reregister(&conn.stream, Token::Connection(key), WATCH_READ)
                {
                    Ok(()) => conn.write_armed = false,
                    Err(err) => warn!("failed to disarm write interest on {}: {}", conn.peer, err),
                }
            }
        }
        if readiness.closed && woken == 0 {
            // Left for the engine to find on its next read or write.
            debug!("error or hangup on {} with no parked I/O", conn.peer);
        }
        woken
    }

    pub fn transport(&self, key: usize) -> Transport {
        Transport {
            key,
            table: self.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    pub fn peer(&self, key: usize) -> Option<SocketAddr> {
        self.slots.borrow().get(key).map(Connection::peer)
    }

    pub fn is_read_parked(&self, key: usize) -> bool {
        self.slots
            .borrow()
            .get(key)
            .map_or(false, |conn| conn.read.is_parked())
    }

    pub fn is_write_parked(&self, key: usize) -> bool {
        self.slots
            .borrow()
            .get(key)
            .map_or(false, |conn| conn.write.is_parked())
    }

    pub fn is_write_armed(&self, key: usize) -> bool {
        self.slots
            .borrow()
            .get(key)
            .map_or(false, |conn| conn.write_armed)
    }

    /// Reads into `buf`. On would-block the task's waker is parked in the
    /// read slot, replacing any older one.
    pub fn poll_recv(
        &self,
        key: usize,
        cx: &mut Context<'_>,
        buf: &mut [MaybeUninit<u8>],
    ) -> Poll<io::Result<usize>> {
        let mut slots = self.slots.borrow_mut();
        let conn = match slots.get_mut(key) {
            Some(conn) => conn,
            None => return Poll::Ready(Err(released(key))),
        };
        match syscall::recv(&conn.stream, buf) {
            Syscall::Done(n) => Poll::Ready(Ok(n)),
            Syscall::WouldBlock => {
                if conn.read.store(cx.waker().clone()) {
                    trace!("replaced parked read on slot {}", key);
                }
                Poll::Pending
            }
            Syscall::Failed(err) => Poll::Ready(Err(err)),
        }
    }

    /// Writes from `buf`. On would-block the task's waker is parked in the
    /// write slot and, if configured, writable edges are watched until it
    /// fires.
    pub fn poll_send(&self, key: usize, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut slots = self.slots.borrow_mut();
        let conn = match slots.get_mut(key) {
            Some(conn) => conn,
            None => return Poll::Ready(Err(released(key))),
        };
        match syscall::send(&conn.stream, buf) {
            Syscall::Done(n) => Poll::Ready(Ok(n)),
            Syscall::WouldBlock => {
                if conn.write.store(cx.waker().clone()) {
                    trace!("replaced parked write on slot {}", key);
                }
                if self.arm_write_interest && !conn.write_armed {
                    match self.reactor.reregister(
                        &conn.stream,
                        Token::Connection(key),
                        WATCH_READ_WRITE,
                    ) {
                        Ok(()) => conn.write_armed = true,
                        Err(err) => warn!("failed to arm write interest on {}: {}", conn.peer, err),
                    }
                }
                Poll::Pending
            }
            Syscall::Failed(err) => Poll::Ready(Err(err)),
        }
    }

    fn shutdown(&self, key: usize) -> io::Result<()> {
        let slots = self.slots.borrow();
        let conn = slots.get(key).ok_or_else(|| released(key))?;
        match conn.stream.shutdown(Shutdown::Write) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

fn released(key: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("connection slot {} already released", key),
    )
}

/// The I/O binding handed to the HTTP engine for one connection.
pub struct Transport {
    key: usize,
    table: ConnectionTable,
}

impl Transport {
    pub fn key(&self) -> usize {
        self.key
    }
}

impl Read for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        // SAFETY: `poll_recv` only writes into the cursor's spare capacity
        // and we advance by exactly the count the kernel filled in.
        let n = ready!(self.table.poll_recv(self.key, cx, unsafe { buf.as_mut() }))?;
        unsafe {
            buf.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl Write for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.table.poll_send(self.key, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.table.shutdown(self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Events;
    use crate::resume::tests::counting;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::sync::Arc;

    fn table(arm_write_interest: bool) -> (Rc<Reactor>, ConnectionTable) {
        let reactor = Rc::new(Reactor::new().unwrap());
        let table = ConnectionTable::new(reactor.clone(), arm_write_interest);
        (reactor, table)
    }

    /// Returns (client, accepted non-blocking server side, client address).
    fn connected() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, server, peer)
    }

    fn uninit(len: usize) -> Vec<MaybeUninit<u8>> {
        vec![MaybeUninit::uninit(); len]
    }

    #[test]
    fn registers_once_and_deregisters_once() {
        let (reactor, table) = table(true);
        let (_client, server, peer) = connected();

        let key = table.insert(server, peer).unwrap();
        assert_eq!(reactor.registrations(), 1);
        assert_eq!(table.peer(key), Some(peer));

        assert!(table.remove(key));
        assert!(!table.remove(key));
        assert_eq!(reactor.deregistrations(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn readable_event_wakes_only_the_newest_read_handle() {
        let (reactor, table) = table(true);
        let (mut client, server, peer) = connected();
        let key = table.insert(server, peer).unwrap();
        let mut buf = uninit(64);

        let (first, first_waker) = counting();
        let mut cx = Context::from_waker(&first_waker);
        assert!(table.poll_recv(key, &mut cx, &mut buf).is_pending());
        drop(first_waker);
        assert_eq!(Arc::strong_count(&first), 2);

        let (second, second_waker) = counting();
        let mut cx = Context::from_waker(&second_waker);
        assert!(table.poll_recv(key, &mut cx, &mut buf).is_pending());
        // the first handle was released when the second replaced it
        assert_eq!(Arc::strong_count(&first), 1);
        assert!(table.is_read_parked(key));

        client.write_all(b"GET").unwrap();
        let mut events = Events::with_capacity(8);
        reactor.wait(&mut events).unwrap();
        let ready = events.iter().next().unwrap();
        assert_eq!(ready.token, Token::Connection(key));

        assert_eq!(table.fire(key, &ready), 1);
        assert_eq!(second.wakes(), 1);
        assert_eq!(first.wakes(), 0);
        assert!(!table.is_read_parked(key));

        match table.poll_recv(key, &mut cx, &mut buf) {
            Poll::Ready(Ok(3)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn orderly_close_reads_zero() {
        let (_reactor, table) = table(true);
        let (client, server, peer) = connected();
        let key = table.insert(server, peer).unwrap();
        drop(client);

        let (_counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);
        let mut buf = uninit(16);
        loop {
            match table.poll_recv(key, &mut cx, &mut buf) {
                Poll::Ready(Ok(0)) => break,
                Poll::Pending => std::thread::yield_now(),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn removal_releases_parked_handles_without_waking() {
        let (_reactor, table) = table(true);
        let (_client, server, peer) = connected();
        let key = table.insert(server, peer).unwrap();

        let (counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);
        assert!(table.poll_recv(key, &mut cx, &mut uninit(8)).is_pending());
        assert_eq!(Arc::strong_count(&counter), 3);

        assert!(table.remove(key));
        assert_eq!(Arc::strong_count(&counter), 2);
        assert_eq!(counter.wakes(), 0);

        let stale = Readiness {
            token: Token::Connection(key),
            readable: true,
            writable: true,
            closed: true,
        };
        assert_eq!(table.fire(key, &stale), 0);

        assert!(matches!(
            table.poll_recv(key, &mut cx, &mut uninit(8)),
            Poll::Ready(Err(ref e)) if e.kind() == io::ErrorKind::NotConnected
        ));
    }

    #[test]
    fn hangup_resumes_parked_read() {
        let (_reactor, table) = table(true);
        let (_client, server, peer) = connected();
        let key = table.insert(server, peer).unwrap();

        let (counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);
        assert!(table.poll_recv(key, &mut cx, &mut uninit(8)).is_pending());

        let hangup = Readiness {
            token: Token::Connection(key),
            readable: false,
            writable: false,
            closed: true,
        };
        assert_eq!(table.fire(key, &hangup), 1);
        assert_eq!(counter.wakes(), 1);
        assert!(!table.is_read_parked(key));
    }

    #[test]
    fn blocked_write_arms_and_disarms_write_interest() {
        let (reactor, table) = table(true);
        let (mut client, server, peer) = connected();
        let key = table.insert(server, peer).unwrap();

        let (counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);
        let chunk = vec![b'x'; 64 * 1024];
        let mut written = 0;
        loop {
            match table.poll_send(key, &mut cx, &chunk) {
                Poll::Ready(Ok(n)) => written += n,
                Poll::Pending => break,
                Poll::Ready(Err(err)) => panic!("send failed: {}", err),
            }
        }
        assert!(table.is_write_parked(key));
        assert!(table.is_write_armed(key));

        let mut drained = 0;
        let mut buf = vec![0u8; 64 * 1024];
        while drained < written {
            drained += client.read(&mut buf).unwrap();
        }

        let mut events = Events::with_capacity(8);
        reactor.wait(&mut events).unwrap();
        let ready = events.iter().next().unwrap();
        assert!(ready.writable);
        assert_eq!(table.fire(key, &ready), 1);
        assert_eq!(counter.wakes(), 1);
        assert!(!table.is_write_parked(key));
        assert!(!table.is_write_armed(key));
    }

    #[test]
    fn reference_mode_never_arms_write_interest() {
        let (_reactor, table) = table(false);
        let (_client, server, peer) = connected();
        let key = table.insert(server, peer).unwrap();

        let (_counter, waker) = counting();
        let mut cx = Context::from_waker(&waker);
        let chunk = vec![b'x'; 64 * 1024];
        while table.poll_send(key, &mut cx, &chunk).is_ready() {}

        assert!(table.is_write_parked(key));
        assert!(!table.is_write_armed(key));
    }
}
