//! Outbound serial queue drained by the single writer thread.
//!
//! Two lanes share one lock: acknowledgments jump ahead of queued data so an
//! ack for a received packet is on the wire before any further data item is
//! dequeued. Within a lane order is FIFO.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Lanes {
    priority: VecDeque<Bytes>,
    normal: VecDeque<Bytes>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    lanes: Mutex<Lanes>,
    ready: Condvar,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a frame. Returns false once the queue is closed.
    pub fn push(&self, frame: Bytes) -> bool {
        self.push_lane(frame, false)
    }

    /// Enqueue ahead of every pending `push` item.
    pub fn push_priority(&self, frame: Bytes) -> bool {
        self.push_lane(frame, true)
    }

    fn push_lane(&self, frame: Bytes, priority: bool) -> bool {
        let mut lanes = self.lanes.lock();
        if lanes.closed {
            return false;
        }
        if priority {
            lanes.priority.push_back(frame);
        } else {
            lanes.normal.push_back(frame);
        }
        drop(lanes);
        self.ready.notify_one();
        true
    }

    /// Block until a frame is available. After `close`, remaining frames are
    /// still handed out; `None` means closed and drained.
    pub fn pop_blocking(&self) -> Option<Bytes> {
        let mut lanes = self.lanes.lock();
        loop {
            if let Some(f) = lanes.priority.pop_front() {
                return Some(f);
            }
            if let Some(f) = lanes.normal.pop_front() {
                return Some(f);
            }
            if lanes.closed {
                return None;
            }
            self.ready.wait(&mut lanes);
        }
    }

    /// Reject further pushes and wake the writer.
    pub fn close(&self) {
        self.lanes.lock().closed = true;
        self.ready.notify_all();
    }

    /// Reopen after `close` with empty lanes.
    pub fn reopen(&self) {
        let mut lanes = self.lanes.lock();
        lanes.priority.clear();
        lanes.normal.clear();
        lanes.closed = false;
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.priority.len() + lanes.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
