//! Advisory event channel consumed by an embedding UI.
//!
//! A single FIFO of UTF-8 lines. The crawl never blocks on a consumer:
//! sends are try-sends and lines are dropped when nobody keeps up.

use tokio::sync::mpsc;

pub const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<String>,
}

impl EventSink {
    /// Create the sink plus the receiving end for the embedding application.
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Emit a line. Never blocks; drops the line if the channel is full or
    /// the consumer is gone.
    pub fn emit(&self, line: impl Into<String>) {
        let _ = self.tx.try_send(line.into());
    }
}
