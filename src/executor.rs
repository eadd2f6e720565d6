use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{waker_ref, ArcWake};
use slab::Slab;
use tracing::trace;

use crate::error::TaskError;

/// A unit of cooperative work plus an optional user-data slot that the host
/// uses to find the resources the task was serving.
pub struct Task<U> {
    future: LocalBoxFuture<'static, Result<(), TaskError>>,
    userdata: Option<U>,
}

impl<U> Task<U> {
    pub fn new(future: impl Future<Output = Result<(), TaskError>> + 'static) -> Task<U> {
        Task {
            future: future.boxed_local(),
            userdata: None,
        }
    }

    pub fn set_userdata(&mut self, userdata: U) {
        self.userdata = Some(userdata);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Ran to completion without a value.
    Empty,
    Error,
}

/// A task the executor has finished driving. Dropping it releases the task.
pub struct Completed<U> {
    userdata: Option<U>,
    outcome: Result<(), TaskError>,
}

impl<U> Completed<U> {
    pub fn task_type(&self) -> TaskType {
        match self.outcome {
            Ok(()) => TaskType::Empty,
            Err(_) => TaskType::Error,
        }
    }

    pub fn userdata(&self) -> Option<&U> {
        self.userdata.as_ref()
    }

    pub fn into_parts(self) -> (Option<U>, Result<(), TaskError>) {
        (self.userdata, self.outcome)
    }
}

/// Wakes a task by putting its slot back on the ready queue.
struct TaskWaker {
    slot: usize,
    /// Set while the slot sits in the ready queue, so repeated wakes before
    /// the next poll enqueue it once.
    queued: AtomicBool,
    ready: Sender<usize>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if !arc_self.queued.swap(true, Ordering::AcqRel) {
            // The receiver lives as long as the executor; after that there is
            // nobody left to poll the task.
            let _ = arc_self.ready.send(arc_self.slot);
        }
    }
}

struct Entry<U> {
    task: Task<U>,
    waker: Arc<TaskWaker>,
}

/// Single-threaded executor with a completion queue.
///
/// `poll` runs ready tasks until one finishes and hands it back, or returns
/// `None` once nothing is runnable. It never blocks.
pub struct Executor<U> {
    tasks: Slab<Entry<U>>,
    ready_queue: Receiver<usize>,
    ready_sender: Sender<usize>,
}

impl<U> Default for Executor<U> {
    fn default() -> Self {
        Executor::new()
    }
}

impl<U> Executor<U> {
    pub fn new() -> Executor<U> {
        let (ready_sender, ready_queue) = channel();
        Executor {
            tasks: Slab::new(),
            ready_queue,
            ready_sender,
        }
    }

    /// Enrolls a task; it gets its first poll on the next `poll` call.
    pub fn push(&mut self, task: Task<U>) {
        let entry = self.tasks.vacant_entry();
        let slot = entry.key();
        let waker = Arc::new(TaskWaker {
            slot,
            queued: AtomicBool::new(true),
            ready: self.ready_sender.clone(),
        });
        entry.insert(Entry { task, waker });
        let _ = self.ready_sender.send(slot);
        trace!("pushed task {}", slot);
    }

    pub fn poll(&mut self) -> Option<Completed<U>> {
        while let Ok(slot) = self.ready_queue.try_recv() {
            let entry = match self.tasks.get_mut(slot) {
                Some(entry) => entry,
                None => {
                    trace!("wake for finished task {}", slot);
                    continue;
                }
            };
            entry.waker.queued.store(false, Ordering::Release);

            let poll = {
                let waker = waker_ref(&entry.waker);
                let context = &mut Context::from_waker(&waker);
                entry.task.future.as_mut().poll(context)
            };

            if let Poll::Ready(outcome) = poll {
                let entry = self.tasks.remove(slot);
                trace!("task {} completed", slot);
                return Some(Completed {
                    userdata: entry.task.userdata,
                    outcome,
                });
            }
        }
        None
    }

    /// Number of tasks that have not completed yet.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
