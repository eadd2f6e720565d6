use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::rc::Rc;

use nix::sys::signal::Signal;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::ConnectionTable;
use crate::error::ServerError;
use crate::reactor::{Events, Interest, Reactor, Token};
use crate::runtime::Engine;
use crate::signal::{SignalAction, SignalIntake, SHUTDOWN_SIGNALS};
use crate::syscall::{self, Syscall};

/// The event loop: one listener, one signal source, every accepted
/// connection, and the engine serving them, all on the calling thread.
pub struct Server {
    engine: Engine,
    connections: ConnectionTable,
    listener: TcpListener,
    signals: SignalIntake,
    reactor: Rc<Reactor>,
    events: Events,
}

impl Server {
    /// Binds the listener, blocks the shutdown signals on this thread, sets
    /// up the notifier, and only then brings up the engine.
    pub fn bind(config: Config) -> Result<Server, ServerError> {
        let listener = listen_on(&config.host, config.port)?;
        info!("listening on: {}", listener.local_addr()?);

        let signals = SignalIntake::new(&SHUTDOWN_SIGNALS)?;

        let reactor = Rc::new(Reactor::new()?);
        reactor.register(&listener, Token::Listener, Interest::READ)?;
        reactor.register(&signals, Token::Signal, Interest::READ)?;

        let connections = ConnectionTable::new(reactor.clone(), config.arm_write_interest);

        Ok(Server {
            engine: Engine::new(),
            connections,
            listener,
            signals,
            reactor,
            events: Events::with_capacity(config.max_events),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until a shutdown signal arrives and returns it. In-flight
    /// connections are not drained.
    pub fn run(&mut self) -> Result<Signal, ServerError> {
        loop {
            self.engine.pump(&self.connections);

            debug!("Processed all tasks - polling for events");
            let n = self.reactor.wait(&mut self.events)?;
            debug!("Poll reported {} events", n);

            for index in 0..self.events.len() {
                let readiness = match self.events.get(index) {
                    Some(readiness) => readiness,
                    None => break,
                };
                match readiness.token {
                    Token::Listener => self.accept_all(),
                    Token::Signal => {
                        if let Some(signal) = self.handle_signal()? {
                            return Ok(signal);
                        }
                    }
                    Token::Connection(key) => {
                        self.connections.fire(key, &readiness);
                    }
                }
            }
        }
    }

    /// Drains the listen socket, handing each new connection to the engine.
    fn accept_all(&mut self) {
        loop {
            match syscall::accept(&self.listener) {
                Syscall::Done((stream, peer)) => {
                    info!("New incoming connection from ({})", peer);
                    match self.connections.insert(stream, peer) {
                        Ok(key) => self.engine.serve(self.connections.transport(key), peer),
                        Err(err) => error!("failed to register connection from {}: {}", peer, err),
                    }
                }
                Syscall::WouldBlock => break,
                Syscall::Failed(err) => {
                    // The listener is level-triggered, so anything still
                    // queued is reported again on the next wait.
                    error!("accept: {}", err);
                    break;
                }
            }
        }
    }

    fn handle_signal(&mut self) -> Result<Option<Signal>, ServerError> {
        match self.signals.read()? {
            Some(SignalAction::Shutdown(signal)) => {
                info!("Caught {}... exiting", signal.as_str());
                Ok(Some(signal))
            }
            Some(SignalAction::Ignore(signo)) => {
                warn!("Caught unexpected signal {}... ignoring", signo);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Binds the first resolved address that accepts a bind and switches the
/// socket to non-blocking mode.
fn listen_on(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| ServerError::Resolve(format!("{}:{} ({})", host, port, err)))?;

    for addr in addrs {
        match TcpListener::bind(addr) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                return Ok(listener);
            }
            Err(err) => warn!("bind {}: {}", addr, err),
        }
    }
    Err(ServerError::Resolve(format!("{}:{}", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listens_on_ephemeral_port() {
        let listener = listen_on("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(
            listener.accept().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn unresolvable_host_is_a_setup_error() {
        match listen_on("host.invalid", 80) {
            Err(ServerError::Resolve(_)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
