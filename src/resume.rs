use std::marker::PhantomData;
use std::rc::Rc;
use std::task::Waker;

/// Holds at most one parked resumption handle for one I/O direction.
///
/// Slots are filled from inside the I/O adapter and emptied by the
/// readiness fan-out. Both run on the event loop thread, so the slot is
/// deliberately `!Send` and `!Sync`; a multi-threaded executor would need
/// an atomic exchange here instead.
#[derive(Default)]
pub struct ResumeSlot {
    waker: Option<Waker>,
    _local: PhantomData<Rc<()>>,
}

impl ResumeSlot {
    pub fn new() -> ResumeSlot {
        ResumeSlot::default()
    }

    /// Parks `waker`, dropping whatever handle was parked before.
    /// Returns true if an older handle was replaced.
    pub fn store(&mut self, waker: Waker) -> bool {
        self.waker.replace(waker).is_some()
    }

    /// Wakes the parked handle, if any, and leaves the slot empty.
    pub fn wake(&mut self) -> bool {
        match self.waker.take() {
            Some(waker) => {
                waker.wake();
                true
            }
            None => false,
        }
    }

    /// Drops the parked handle without waking it.
    pub fn clear(&mut self) -> bool {
        self.waker.take().is_some()
    }

    pub fn is_parked(&self) -> bool {
        self.waker.is_some()
    }
}
