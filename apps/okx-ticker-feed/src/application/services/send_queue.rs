//! Outbound Send Queue
//!
//! Callers enqueue frames from any context; only the service loop drains.
//! Enqueueing never performs I/O: it appends under the lock and wakes the
//! service loop, which asks the transport for a writable notification.
//! The queue is drained only when that notification arrives.
//!
//! The queue has no capacity bound. If the transport stalls, entries
//! accumulate until the connection is torn down.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::ports::{FrameKind, Transport, TransportError};

/// FIFO buffer of outbound text frames.
#[derive(Debug, Default)]
pub struct SendQueue {
    entries: Mutex<VecDeque<String>>,
    wake: Notify,
}

impl SendQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to the tail and wake the service loop.
    pub fn enqueue(&self, frame: String) {
        self.entries.lock().push_back(frame);
        self.wake.notify_one();
    }

    /// Wait until a frame has been enqueued since the last wake-up.
    pub async fn wait_for_frames(&self) {
        self.wake.notified().await;
    }

    /// Hand queued frames to `transport` one at a time, in order.
    ///
    /// Stops at the first failed write; the failed frame stays at the head
    /// for the next writable cycle. Returns the number of frames written.
    ///
    /// # Errors
    ///
    /// Returns the transport error that stopped the drain.
    pub async fn drain(&self, transport: &mut dyn Transport) -> Result<usize, TransportError> {
        let mut written = 0;

        loop {
            let Some(frame) = self.entries.lock().pop_front() else {
                return Ok(written);
            };

            if let Err(e) = transport.write(frame.as_bytes(), FrameKind::Text).await {
                self.entries.lock().push_front(frame);
                return Err(e);
            }

            tracing::debug!(frame = %frame, "Sent frame");
            written += 1;
        }
    }

    /// Abandon every queued frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Number of queued frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the queued frames, head first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}
