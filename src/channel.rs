//! Hand-off queue between the sampler and the persister.
//!
//! Unbounded, FIFO and lossless. `push` never blocks the producer; `pop`
//! parks the consumer thread until a record arrives or every sender is gone.
//! Since there is no backpressure, a consumer that stalls for long enough
//! grows the queue without limit. `depth` makes that growth observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ChannelClosed;
use crate::types::Record;

/// Create a connected sender/receiver pair
pub fn sample_channel() -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        RecordSender { tx, depth: Arc::clone(&depth) },
        RecordReceiver { rx, depth },
    )
}

/// Producer end. Dropping every sender marks end-of-stream.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::UnboundedSender<Record>,
    depth: Arc<AtomicUsize>,
}

impl RecordSender {
    /// Queue a record without blocking; returns the queue depth after the
    /// push.
    pub fn push(&self, record: Record) -> Result<usize, ChannelClosed> {
        // Count before sending so a fast consumer never observes underflow.
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        match self.tx.send(record) {
            Ok(()) => Ok(depth),
            Err(mpsc::error::SendError(record)) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Err(ChannelClosed(record))
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

/// Consumer end
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::UnboundedReceiver<Record>,
    depth: Arc<AtomicUsize>,
}

impl RecordReceiver {
    /// Block the current thread until the next record.
    ///
    /// Returns `None` once all senders are dropped and the queue is empty.
    /// Must not be called from inside an async context.
    pub fn pop(&mut self) -> Option<Record> {
        let record = self.rx.blocking_recv();
        self.settle(record)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn settle(&self, record: Option<Record>) -> Option<Record> {
        if record.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        record
    }
}
