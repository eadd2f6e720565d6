use std::cell::Cell;
use std::os::unix::io::AsFd;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, trace};

const LISTENER: u64 = 0;
const SIGNAL: u64 = 1;
const CONNECTION_BASE: u64 = 2;

/// Identifies what a readiness event belongs to.
///
/// Connections are keyed by their slot in the connection table, never by
/// address, so an event for a slot that has since been freed is detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Listener,
    Signal,
    Connection(usize),
}

impl Token {
    fn into_data(self) -> u64 {
        match self {
            Token::Listener => LISTENER,
            Token::Signal => SIGNAL,
            Token::Connection(slot) => CONNECTION_BASE + slot as u64,
        }
    }

    fn from_data(data: u64) -> Token {
        match data {
            LISTENER => Token::Listener,
            SIGNAL => Token::Signal,
            n => Token::Connection((n - CONNECTION_BASE) as usize),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
    /// Report transitions only, not every wait while the condition holds.
    pub edge: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
        edge: false,
    };
    pub const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
        edge: false,
    };

    pub const fn edge_triggered(self) -> Interest {
        Interest { edge: true, ..self }
    }

    fn flags(self) -> EpollFlags {
        let mut flags = EpollFlags::empty();
        if self.edge {
            flags |= EpollFlags::EPOLLET;
        }
        if self.read {
            flags |= EpollFlags::EPOLLIN;
        }
        if self.write {
            flags |= EpollFlags::EPOLLOUT;
        }
        flags
    }
}

/// One readiness report from the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Error or hangup reported on the descriptor.
    pub closed: bool,
}

impl From<&EpollEvent> for Readiness {
    fn from(event: &EpollEvent) -> Readiness {
        let flags = event.events();
        Readiness {
            token: Token::from_data(event.data()),
            readable: flags.contains(EpollFlags::EPOLLIN),
            writable: flags.contains(EpollFlags::EPOLLOUT),
            closed: flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP),
        }
    }
}

/// Reusable buffer that one `Reactor::wait` call fills.
pub struct Events {
    buf: Vec<EpollEvent>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            buf: vec![EpollEvent::empty(); capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<Readiness> {
        self.buf[..self.len].get(index).map(Readiness::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = Readiness> + '_ {
        self.buf[..self.len].iter().map(Readiness::from)
    }
}

/// Readiness notifier backed by `epoll`. Registrations are level-triggered
/// unless the interest asks for edges.
///
/// All methods take `&self` so the loop and the connection table can share
/// one instance on the loop thread.
pub struct Reactor {
    epoll: Epoll,
    registrations: Cell<u64>,
    deregistrations: Cell<u64>,
}

impl Reactor {
    pub fn new() -> Result<Reactor, Errno> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Reactor {
            epoll,
            registrations: Cell::new(0),
            deregistrations: Cell::new(0),
        })
    }

    pub fn register<F: AsFd>(&self, fd: F, token: Token, interest: Interest) -> Result<(), Errno> {
        let event = EpollEvent::new(interest.flags(), token.into_data());
        self.epoll.add(fd, event)?;
        self.registrations.set(self.registrations.get() + 1);
        trace!("registered {:?} for {:?}", token, interest);
        Ok(())
    }

    pub fn reregister<F: AsFd>(
        &self,
        fd: F,
        token: Token,
        interest: Interest,
    ) -> Result<(), Errno> {
        let mut event = EpollEvent::new(interest.flags(), token.into_data());
        self.epoll.modify(fd, &mut event)?;
        trace!("re-registered {:?} for {:?}", token, interest);
        Ok(())
    }

    pub fn deregister<F: AsFd>(&self, fd: F) -> Result<(), Errno> {
        self.epoll.delete(fd)?;
        self.deregistrations.set(self.deregistrations.get() + 1);
        Ok(())
    }

    /// Blocks until at least one registered descriptor is ready.
    pub fn wait(&self, events: &mut Events) -> Result<usize, Errno> {
        match self.epoll.wait(&mut events.buf, EpollTimeout::NONE) {
            Ok(n) => {
                events.len = n;
                Ok(n)
            }
            Err(Errno::EINTR) => {
                debug!("notifier wait interrupted");
                events.len = 0;
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(test)]
    pub(crate) fn poll_now(&self, events: &mut Events) -> Result<usize, Errno> {
        let n = self.epoll.wait(&mut events.buf, EpollTimeout::ZERO)?;
        events.len = n;
        Ok(n)
    }

    pub fn registrations(&self) -> u64 {
        self.registrations.get()
    }

    pub fn deregistrations(&self) -> u64 {
        self.deregistrations.get()
    }
}
