// SPDX-License-Identifier: GPL-3.0-only

//! Where a capture source sends its frames
//!
//! Frames either go through the shared [`FrameQueue`] or straight to the
//! render loop over a small per-side channel. Both routes share a
//! [`RenderBarrier`] with the render thread: invalidating a route raises the
//! side's session watermark and then waits for any conversion of that side
//! already under way. Frames below the watermark are discarded wherever the
//! render thread finds them, so a frame taken just before a stop or
//! reconfiguration is never presented after it returns.

use super::queue::FrameQueue;
use crate::backends::camera::{PixelFrame, Side, SideMap};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::trace;

#[derive(Debug, Default)]
struct BarrierSide {
    /// Oldest session whose frames may still be presented
    watermark: AtomicU64,
    /// Held by the render thread while a frame of this side is converted and presented
    render: Mutex<()>,
}

/// Per-side session watermark shared by routes and the render thread
#[derive(Debug, Default)]
pub struct RenderBarrier {
    sides: SideMap<BarrierSide>,
}

impl RenderBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn watermark(&self, side: Side) -> u64 {
        self.sides[side].watermark.load(Ordering::Acquire)
    }

    /// Whether `frame` belongs to a session invalidated since it was captured
    pub fn is_stale(&self, frame: &PixelFrame) -> bool {
        frame.session < self.watermark(frame.side)
    }

    /// Raise the watermark to `session`, then wait out any conversion in progress
    ///
    /// Must not be called while holding the render sink lock.
    pub fn raise(&self, side: Side, session: u64) {
        self.sides[side].watermark.fetch_max(session, Ordering::AcqRel);
        drop(self.sides[side].render.lock());
    }

    /// Enter the render step for `side`; the watermark cannot be passed while held
    pub fn enter(&self, side: Side) -> MutexGuard<'_, ()> {
        self.sides[side].render.lock()
    }
}

/// Producer half of a direct source-to-sink channel
#[derive(Debug, Clone)]
pub struct DirectSender {
    side: Side,
    tx: mpsc::Sender<PixelFrame>,
    barrier: Arc<RenderBarrier>,
}

/// Consumer half of a direct source-to-sink channel
#[derive(Debug)]
pub struct DirectReceiver {
    side: Side,
    rx: mpsc::Receiver<PixelFrame>,
    barrier: Arc<RenderBarrier>,
}

/// Create a direct channel for one side holding at most `capacity` frames
pub fn direct_channel(
    side: Side,
    capacity: usize,
    barrier: Arc<RenderBarrier>,
) -> (DirectSender, DirectReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        DirectSender {
            side,
            tx,
            barrier: Arc::clone(&barrier),
        },
        DirectReceiver { side, rx, barrier },
    )
}

impl DirectReceiver {
    pub fn side(&self) -> Side {
        self.side
    }

    /// Next frame of a current session, without blocking
    pub fn try_recv(&mut self) -> Option<PixelFrame> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) if self.barrier.is_stale(&frame) => {
                    trace!(
                        side = %self.side,
                        session = frame.session,
                        "Discarding stale direct frame"
                    );
                }
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

#[derive(Debug, Clone)]
enum RouteTarget {
    Queue(Arc<FrameQueue>),
    Direct(DirectSender),
}

/// Routing target of a capture source
#[derive(Debug, Clone)]
pub struct FrameRoute {
    target: RouteTarget,
    barrier: Arc<RenderBarrier>,
}

impl FrameRoute {
    /// Route through the shared bounded queue drained by the render loop
    pub fn queue(queue: Arc<FrameQueue>, barrier: Arc<RenderBarrier>) -> Self {
        Self {
            target: RouteTarget::Queue(queue),
            barrier,
        }
    }

    /// Route over a direct channel to the render loop
    pub fn direct(sender: DirectSender) -> Self {
        let barrier = Arc::clone(&sender.barrier);
        Self {
            target: RouteTarget::Direct(sender),
            barrier,
        }
    }

    pub fn barrier(&self) -> &Arc<RenderBarrier> {
        &self.barrier
    }

    /// Hand a frame on; returns the frame the caller must drop, if any
    pub fn deliver(&self, side: Side, frame: PixelFrame) -> Option<PixelFrame> {
        match &self.target {
            RouteTarget::Queue(queue) => queue.push(side, frame),
            RouteTarget::Direct(sender) => match sender.tx.try_send(frame) {
                Ok(()) => None,
                Err(TrySendError::Full(frame)) | Err(TrySendError::Closed(frame)) => Some(frame),
            },
        }
    }

    /// Discard everything routed before `session` started
    ///
    /// Returns once no frame of an older session can reach the sink.
    pub fn invalidate(&self, side: Side, session: u64) {
        match &self.target {
            RouteTarget::Queue(queue) => {
                queue.clear(side);
            }
            RouteTarget::Direct(sender) => {
                debug_assert_eq!(sender.side, side);
            }
        }
        self.barrier.raise(side, session);
    }
}
