//! Simulated signal delivery

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use dbgcall::{ThreadId, ThreadSignaler};

/// Message to the simulated target thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// Trap signal arrived
    Trap,
    /// Leave the event loop
    Stop,
}

/// Delivers trap signals to one [`SimTarget`](crate::SimTarget)
///
/// Clones share the sent-signal counter.
#[derive(Debug, Clone)]
pub struct SimSignaler {
    tid: ThreadId,
    tx: Sender<Event>,
    sent: Arc<AtomicU32>,
    failure: Option<io::ErrorKind>,
}

impl SimSignaler {
    pub(crate) fn new(tid: ThreadId, tx: Sender<Event>) -> Self {
        Self {
            tid,
            tx,
            sent: Arc::new(AtomicU32::new(0)),
            failure: None,
        }
    }

    /// Fail every delivery with `kind`
    pub fn failing(mut self, kind: io::ErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Signals attempted so far, failed deliveries included
    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl ThreadSignaler for SimSignaler {
    fn signal(&self, tid: ThreadId) -> io::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failure {
            return Err(io::Error::new(kind, "simulated delivery failure"));
        }
        if tid != self.tid {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such thread"));
        }
        self.tx
            .send(Event::Trap)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "target thread exited"))
    }
}
