//! Outbound queue
//!
//! Bounded FIFO for application frames sent while no transport is open.
//! When full, new frames are rejected and the queued ones are kept.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// A frame waiting for the next open transport
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub payload: Frame,
    pub enqueued_at: u64,
}

/// Bounded FIFO of outbound frames
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a frame, or reject it if the queue is full
    pub fn enqueue(&mut self, payload: Frame, now: u64) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::QueueOverflow {
                capacity: self.capacity,
            });
        }
        self.items.push_back(QueuedMessage {
            payload,
            enqueued_at: now,
        });
        Ok(())
    }

    /// Hand every queued frame to `send` in enqueue order.
    ///
    /// Stops at the first frame `send` refuses; that frame and everything
    /// behind it stay queued. Returns how many frames were sent.
    pub fn flush<F>(&mut self, mut send: F) -> usize
    where
        F: FnMut(&QueuedMessage) -> Result<()>,
    {
        let mut sent = 0;
        while let Some(message) = self.items.front() {
            if send(message).is_err() {
                break;
            }
            self.items.pop_front();
            sent += 1;
        }
        sent
    }

    /// Put frames that never reached the wire back at the head, keeping
    /// their order. Frames that do not fit are dropped from the newest end;
    /// returns how many were dropped.
    pub fn requeue(&mut self, payloads: Vec<Frame>, now: u64) -> usize {
        let room = self.capacity.saturating_sub(self.items.len());
        let dropped = payloads.len().saturating_sub(room);
        for payload in payloads.into_iter().take(room).rev() {
            self.items.push_front(QueuedMessage {
                payload,
                enqueued_at: now,
            });
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }
}
