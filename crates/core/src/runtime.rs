/// Worker-pool dispatch and logic-thread completion queue
///
/// CPU-bound crypto jobs run off the logic thread; each posts exactly one
/// [`EndpointEvent`] back. Events capture remotes by [`Address`], never by
/// reference, so a completion for a context that drained in the meantime is
/// simply discarded.
use crate::handshake::IntroResult;
use crate::protocol::ProtocolMessage;
use crate::crypto::SharedKey;
use crate::service::Address;
use tokio::sync::mpsc;

/// Completion posted back to the endpoint logic
#[derive(Debug)]
pub enum EndpointEvent {
    /// First-frame handshake finished on the worker
    IntroReady {
        remote: Address,
        result: IntroResult,
    },

    /// First-frame handshake failed; not retried automatically
    IntroFailed {
        remote: Address,
        reason: String,
    },

    /// An inbound frame decrypted and verified
    InboundReady {
        message: ProtocolMessage,
        sequence: u64,
        /// Present when the frame opened a new conversation
        fresh_key: Option<SharedKey>,
    },

    /// An inbound frame was dropped on the worker
    InboundFailed {
        reason: String,
    },
}

pub type EventSink = mpsc::UnboundedSender<EndpointEvent>;
pub type EventQueue = mpsc::UnboundedReceiver<EndpointEvent>;

pub fn event_channel() -> (EventSink, EventQueue) {
    mpsc::unbounded_channel()
}

/// Front-end to the process-wide crypto worker pool
#[derive(Clone, Debug)]
pub struct CryptoWorker {
    mode: WorkerMode,
}

#[derive(Clone, Copy, Debug)]
enum WorkerMode {
    /// Dispatch onto the blocking-thread pool
    Pool,
    /// Run on the calling thread; deterministic, used by tests
    Inline,
}

impl CryptoWorker {
    pub fn new() -> Self {
        Self {
            mode: WorkerMode::Pool,
        }
    }

    pub fn inline() -> Self {
        Self {
            mode: WorkerMode::Inline,
        }
    }

    /// Run `job` off-thread and post its completion to `reply`
    ///
    /// The job owns its inputs; send failure means the endpoint is gone
    /// and the completion is dropped.
    pub fn submit<F>(&self, reply: &EventSink, job: F)
    where
        F: FnOnce() -> EndpointEvent + Send + 'static,
    {
        match self.mode {
            WorkerMode::Pool => {
                let reply = reply.clone();
                tokio::task::spawn_blocking(move || {
                    let _ = reply.send(job());
                });
            }
            WorkerMode::Inline => {
                let _ = reply.send(job());
            }
        }
    }
}

impl Default for CryptoWorker {
    fn default() -> Self {
        Self::new()
    }
}
