use std::os::unix::io::{AsFd, BorrowedFd};

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use crate::error::ServerError;

/// Signals that stop the server.
pub const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown(Signal),
    Ignore(i32),
}

impl SignalAction {
    pub fn classify(signo: i32) -> SignalAction {
        match Signal::try_from(signo) {
            Ok(signal) if SHUTDOWN_SIGNALS.contains(&signal) => SignalAction::Shutdown(signal),
            _ => SignalAction::Ignore(signo),
        }
    }
}

/// Surfaces termination signals as reads on a descriptor the notifier can
/// watch, instead of as asynchronous handlers.
pub struct SignalIntake {
    fd: SignalFd,
}

impl SignalIntake {
    /// Blocks default delivery of `signals` on the calling thread, then opens
    /// a non-blocking, close-on-exec signal fd for them. Threads spawned
    /// afterwards inherit the mask.
    pub fn new(signals: &[Signal]) -> Result<SignalIntake, ServerError> {
        let mut mask = SigSet::empty();
        for signal in signals {
            mask.add(*signal);
        }
        mask.thread_block()?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)?;
        Ok(SignalIntake { fd })
    }

    /// Reads one signal-info record. `Ok(None)` means nothing was pending.
    pub fn read(&mut self) -> Result<Option<SignalAction>, ServerError> {
        match self.fd.read_signal()? {
            Some(info) => Ok(Some(SignalAction::classify(info.ssi_signo as i32))),
            None => Ok(None),
        }
    }
}

impl AsFd for SignalIntake {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
