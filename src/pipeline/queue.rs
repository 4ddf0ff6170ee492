// SPDX-License-Identifier: GPL-3.0-only

//! Bounded per-side frame queue
//!
//! Each side has its own deque behind its own lock, so the front and back
//! producers never contend. New frames go in at the head and the consumer
//! takes from the tail (FIFO). When a side is full the oldest frame is
//! evicted and handed back to the producer.

use crate::backends::camera::{PixelFrame, Side, SideMap};
use crate::constants::limits;
use crate::errors::ConfigError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Default)]
struct SideCounters {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of one side's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames accepted into the queue
    pub pushed: u64,
    /// Frames taken by the consumer
    pub popped: u64,
    /// Accepted frames evicted by overflow or cleared
    pub dropped: u64,
    /// Frames refused outright (size mismatch, reconfiguring)
    pub rejected: u64,
    /// Current depth
    pub len: usize,
}

/// Bounded FIFO of owned frames, one deque per side
pub struct FrameQueue {
    sides: SideMap<Mutex<VecDeque<PixelFrame>>>,
    counters: SideMap<SideCounters>,
    capacity: usize,
    frame_size: Mutex<Option<(u32, u32)>>,
    reconfiguring: AtomicBool,
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.capacity)
            .field("front", &self.len(Side::Front))
            .field("back", &self.len(Side::Back))
            .finish()
    }
}

impl FrameQueue {
    /// Create a queue holding up to `capacity` frames per side
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 || capacity > limits::MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        Ok(Self {
            sides: SideMap::from_fn(|_| Mutex::new(VecDeque::with_capacity(capacity + 1))),
            counters: SideMap::default(),
            capacity,
            frame_size: Mutex::new(None),
            reconfiguring: AtomicBool::new(false),
        })
    }

    /// Queue that only accepts frames of the given size
    pub fn with_frame_size(capacity: usize, width: u32, height: u32) -> Result<Self, ConfigError> {
        let queue = Self::new(capacity)?;
        *queue.frame_size.lock() = Some((width, height));
        Ok(queue)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size frames must have, if one is configured
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        *self.frame_size.lock()
    }

    /// Insert `frame` at the head of its side
    ///
    /// Returns the frame the caller now owns and must drop: the evicted
    /// oldest frame on overflow, or `frame` itself when it was refused.
    pub fn push(&self, side: Side, frame: PixelFrame) -> Option<PixelFrame> {
        let counters = &self.counters[side];
        let mut deque = self.sides[side].lock();
        if self.reconfiguring.load(Ordering::Acquire) {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Some(frame);
        }
        if let Some((width, height)) = self.frame_size()
            && (frame.width, frame.height) != (width, height)
        {
            debug!(
                side = %side,
                expected = %format!("{}x{}", width, height),
                got = %format!("{}x{}", frame.width, frame.height),
                "Frame size mismatch, rejecting"
            );
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Some(frame);
        }

        deque.push_front(frame);
        counters.pushed.fetch_add(1, Ordering::Relaxed);
        if deque.len() > self.capacity {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            return deque.pop_back();
        }
        None
    }

    /// Take the oldest frame of a side; `None` when empty or reconfiguring
    pub fn pop(&self, side: Side) -> Option<PixelFrame> {
        if self.reconfiguring.load(Ordering::Acquire) {
            return None;
        }
        let frame = self.sides[side].lock().pop_back();
        if frame.is_some() {
            self.counters[side].popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn len(&self, side: Side) -> usize {
        self.sides[side].lock().len()
    }

    pub fn is_empty(&self, side: Side) -> bool {
        self.len(side) == 0
    }

    /// Drop every queued frame of one side
    pub fn clear(&self, side: Side) -> usize {
        let drained: Vec<PixelFrame> = self.sides[side].lock().drain(..).collect();
        let count = drained.len();
        self.counters[side]
            .dropped
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Clear both sides and adopt a new frame size
    ///
    /// Pops issued while this runs return `None`; pushes wait for the side
    /// lock and are then checked against the new size.
    pub fn reconfigure(&self, width: u32, height: u32) {
        self.reconfiguring.store(true, Ordering::Release);
        let cleared = {
            let mut front = self.sides.front.lock();
            let mut back = self.sides.back.lock();
            *self.frame_size.lock() = Some((width, height));
            let front_count = front.drain(..).count();
            let back_count = back.drain(..).count();
            self.counters.front.dropped.fetch_add(front_count as u64, Ordering::Relaxed);
            self.counters.back.dropped.fetch_add(back_count as u64, Ordering::Relaxed);
            front_count + back_count
        };
        self.reconfiguring.store(false, Ordering::Release);
        info!(width, height, cleared, "Frame queue reconfigured");
    }

    pub fn stats(&self, side: Side) -> QueueStats {
        let counters = &self.counters[side];
        QueueStats {
            pushed: counters.pushed.load(Ordering::Relaxed),
            popped: counters.popped.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            len: self.len(side),
        }
    }
}
