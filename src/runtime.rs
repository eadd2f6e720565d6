use std::net::SocketAddr;

use futures::TryFutureExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use tracing::{debug, error, info, info_span};
use tracing_futures::Instrument;

use crate::connection::{ConnectionTable, Transport};
use crate::error::TaskError;
use crate::executor::{Executor, Task, TaskType};
use crate::service::respond;

/// What one executor pump reclaimed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    /// Tasks that finished, errors included.
    pub completed: usize,
    pub errors: usize,
}

/// The HTTP engine for the lifetime of the server: the executor plus the
/// server-connection options tasks are built from.
///
/// Dropping the engine releases the options and then the executor, which
/// abandons any in-flight connection tasks.
pub struct Engine {
    options: http1::Builder,
    executor: Executor<usize>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            options: http1::Builder::new(),
            executor: Executor::new(),
        }
    }

    /// Serves one HTTP connection over `transport` as a new task whose
    /// user-data is the connection's slot.
    pub fn serve(&mut self, transport: Transport, peer: SocketAddr) {
        let key = transport.key();
        let span = info_span!("conn", slot = key, peer = %peer);
        let connection = self
            .options
            .serve_connection(transport, service_fn(respond))
            .map_err(TaskError::from)
            .instrument(span);

        let mut task = Task::new(connection);
        task.set_userdata(key);
        self.executor.push(task);
    }

    /// Enrolls a task that belongs to no connection.
    #[cfg(test)]
    pub(crate) fn spawn(
        &mut self,
        future: impl std::future::Future<Output = Result<(), TaskError>> + 'static,
    ) {
        self.executor.push(Task::new(future));
    }

    /// Drives the executor until no task is runnable, destroying the record
    /// of every connection whose task finished. Never blocks.
    pub fn pump(&mut self, connections: &ConnectionTable) -> PumpReport {
        let mut report = PumpReport::default();
        while let Some(done) = self.executor.poll() {
            report.completed += 1;
            match done.task_type() {
                TaskType::Error => {
                    report.errors += 1;
                    let (slot, outcome) = done.into_parts();
                    if let Err(err) = outcome {
                        error!("connection task error!");
                        error!("error code: {}", err.code() as i32);
                        error!("details: {}", err);
                    }
                    if let Some(slot) = slot {
                        connections.remove(slot);
                    }
                }
                TaskType::Empty => match done.userdata() {
                    Some(&slot) => {
                        info!("server connection complete");
                        connections.remove(slot);
                    }
                    None => info!("internal task complete"),
                },
            }
        }
        report
    }

    /// Tasks that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.executor.len()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        debug!(
            "releasing server options and executor ({} tasks in flight)",
            self.executor.len()
        );
    }
}
