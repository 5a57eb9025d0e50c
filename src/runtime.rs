//! The Deferred Completion Runner: a single serialized worker that executes
//! request handlers and completion deliveries outside of the receive
//! dispatch path and outside the timeout task, so neither of those ever
//! runs user code directly.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::engine;
use crate::error::ResultCode;
use crate::operation::Operation;

pub(crate) enum Job {
    /// An incoming request: run the Protocol's handler, then complete.
    Inbound(Arc<Operation>),
    /// A resolved operation (response matched, overflowed, or timed out):
    /// just complete.
    Complete(Arc<Operation>),
}

/// One logical worker per `Runner`. The core does not assume anything about
/// parallelism across connections — nothing stops a caller from sharing one
/// `Runner` across several `Connection`s, but the reference wiring in
/// `transport.rs`/`lib.rs` gives each `Connection` its own.
pub struct Runner {
    tx: mpsc::UnboundedSender<Job>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    pub(crate) fn spawn(connection: Weak<Connection>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Inbound(op) => {
                        let Some(connection) = connection.upgrade() else {
                            continue;
                        };
                        let protocol = connection.protocol();
                        let handled = protocol.request_recv(op.opcode, &op).await;
                        if !handled {
                            tracing::warn!(
                                operation_id = op.id(),
                                opcode = op.opcode,
                                "no protocol handler registered for inbound request"
                            );
                            op.set_result(ResultCode::ProtocolBad);
                        }
                        engine::complete(&op);
                    }
                    Job::Complete(op) => {
                        engine::complete(&op);
                    }
                }
            }
        });
        Runner {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn enqueue(&self, job: Job) {
        // The receiver only disappears once the Runner itself is dropped or
        // shut down, at which point there is nowhere left for the job to go
        // anyway; dropping it silently is correct, not an error to surface.
        let _ = self.tx.send(job);
    }

    /// Stop the worker task. Queued jobs that have not yet run are dropped.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
