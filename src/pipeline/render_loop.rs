// SPDX-License-Identifier: GPL-3.0-only

//! The conversion step
//!
//! [`FrameProcessor`] drains frames from the queue or the direct channels,
//! converts them on the render thread and presents the result through the
//! sink. [`RenderLoop`] runs a processor on its own thread, polling while
//! there is nothing to do.

use super::delegate::ObserverRegistry;
use super::queue::FrameQueue;
use super::route::{DirectReceiver, RenderBarrier};
use crate::backends::camera::{FrameLoopController, LoopAction, PixelFrame, Side, SideMap};
use crate::constants::timing;
use crate::render::{PresentOutcome, RenderSink, TextureConverter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Where the render thread takes frames from
pub enum FrameInput {
    Queue(Arc<FrameQueue>),
    Direct(SideMap<Option<DirectReceiver>>),
}

impl FrameInput {
    fn next(&mut self, side: Side) -> Option<PixelFrame> {
        match self {
            FrameInput::Queue(queue) => queue.pop(side),
            FrameInput::Direct(receivers) => receivers[side]
                .as_mut()
                .and_then(DirectReceiver::try_recv),
        }
    }
}

#[derive(Default)]
struct SideCounters {
    converted: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    stale: AtomicU64,
}

/// Render-side counters, shared with the control thread
#[derive(Default)]
pub struct RenderStats {
    sides: SideMap<SideCounters>,
}

/// Snapshot of one side's render counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSideStats {
    pub converted: u64,
    /// Conversions that failed (frame dropped)
    pub failed: u64,
    /// Frames dropped because the side was frozen
    pub skipped: u64,
    /// Frames taken before a stop or reconfiguration and dropped unconverted
    pub stale: u64,
}

impl RenderStats {
    pub fn side(&self, side: Side) -> RenderSideStats {
        let c = &self.sides[side];
        RenderSideStats {
            converted: c.converted.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RenderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStats")
            .field("front", &self.side(Side::Front))
            .field("back", &self.side(Side::Back))
            .finish()
    }
}

/// Pulls frames, converts and presents them
pub struct FrameProcessor {
    input: FrameInput,
    barrier: Arc<RenderBarrier>,
    converter: TextureConverter,
    sink: Arc<Mutex<RenderSink>>,
    observers: ObserverRegistry,
    stats: Arc<RenderStats>,
}

impl FrameProcessor {
    pub fn new(
        input: FrameInput,
        barrier: Arc<RenderBarrier>,
        converter: TextureConverter,
        sink: Arc<Mutex<RenderSink>>,
        observers: ObserverRegistry,
    ) -> Self {
        Self {
            input,
            barrier,
            converter,
            sink,
            observers,
            stats: Arc::new(RenderStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub fn converter(&self) -> &TextureConverter {
        &self.converter
    }

    /// Handle every frame currently available, alternating sides
    ///
    /// Returns the number of frames taken.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            for side in Side::ALL {
                if let Some(frame) = self.input.next(side) {
                    self.process_frame(frame);
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return handled;
            }
        }
    }

    fn process_frame(&mut self, frame: PixelFrame) {
        let side = frame.side;
        let counters = &self.stats.sides[side];
        let render = self.barrier.enter(side);
        let mut sink = self.sink.lock();

        // The watermark may have been raised while this frame waited for the sink
        if self.barrier.is_stale(&frame) {
            counters.stale.fetch_add(1, Ordering::Relaxed);
            trace!(
                side = %side,
                session = frame.session,
                "Discarding frame of an invalidated session"
            );
            return;
        }

        if sink.is_frozen(side) {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(side = %side, sequence = frame.sequence, "Side frozen, skipping frame");
            return;
        }

        let result = self.converter.convert(&frame, sink.target_mut(side));
        let latency = frame.captured_at.elapsed();
        // Pixel memory is released as soon as the planes are uploaded
        drop(frame);

        let texture = match result {
            Ok(texture) => texture,
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let outcome = sink.present(texture, side);
        drop(sink);
        drop(render);

        let converted = counters.converted.fetch_add(1, Ordering::Relaxed) + 1;
        if outcome != PresentOutcome::Frozen {
            self.observers.notify_texture(&texture, side);
        }
        if converted % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                side = %side,
                converted,
                ?outcome,
                latency_ms = latency.as_secs_f64() * 1000.0,
                "Render loop presenting"
            );
        }
    }
}

/// Render thread running a [`FrameProcessor`]
pub struct RenderLoop {
    controller: FrameLoopController,
    stats: Arc<RenderStats>,
}

impl RenderLoop {
    pub fn spawn(mut processor: FrameProcessor) -> Self {
        let stats = processor.stats();
        let controller = FrameLoopController::start("render-loop", move || {
            if processor.process_pending() == 0 {
                LoopAction::Idle(timing::RENDER_POLL_INTERVAL)
            } else {
                LoopAction::Continue
            }
        });
        Self { controller, stats }
    }

    pub fn stats(&self) -> &Arc<RenderStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Stop the thread and wait for the frame in progress to finish
    pub fn stop(&mut self) {
        self.controller.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{Orientation, PixelFormat, RawFrame};
    use crate::gpu::GpuContext;
    use crate::gpu::software::SoftwareBackend;
    use crate::pipeline::delegate::{CountingObserver, ObserverCapabilities};
    use crate::render::{CompositionPolicy, TextureOptions};
    use crate::shaders::Colorimetry;

    fn frame(side: Side, sequence: u64, data_len: usize) -> PixelFrame {
        let raw = RawFrame::packed(PixelFormat::NV12, 4, 2, vec![128; data_len], sequence);
        PixelFrame::from_raw(raw, side, Orientation::Rotate0, sequence, 1)
    }

    struct Fixture {
        processor: FrameProcessor,
        sink: Arc<Mutex<RenderSink>>,
        observers: ObserverRegistry,
        barrier: Arc<RenderBarrier>,
    }

    fn processor(queue: Arc<FrameQueue>) -> Fixture {
        let context = GpuContext::new("test", Box::new(SoftwareBackend::new()));
        let sink = RenderSink::new(
            Arc::clone(&context),
            CompositionPolicy::SideBySide,
            TextureOptions::default(),
        );
        let converter = TextureConverter::new(context, Colorimetry::default(), sink.subscribe());
        let sink = Arc::new(Mutex::new(sink));
        let observers = ObserverRegistry::new();
        let barrier = RenderBarrier::new();
        let processor = FrameProcessor::new(
            FrameInput::Queue(queue),
            Arc::clone(&barrier),
            converter,
            Arc::clone(&sink),
            observers.clone(),
        );
        Fixture {
            processor,
            sink,
            observers,
            barrier,
        }
    }

    #[test]
    fn test_drains_both_sides() {
        let queue = Arc::new(FrameQueue::new(3).unwrap());
        let Fixture {
            mut processor,
            sink,
            observers,
            ..
        } = processor(Arc::clone(&queue));
        let observer = Arc::new(CountingObserver::new(ObserverCapabilities::TEXTURES));
        observers.add(observer.clone());

        queue.push(Side::Front, frame(Side::Front, 1, 12));
        queue.push(Side::Front, frame(Side::Front, 2, 12));
        queue.push(Side::Back, frame(Side::Back, 1, 12));

        assert_eq!(processor.process_pending(), 3);
        assert_eq!(processor.process_pending(), 0);
        let sink = sink.lock();
        assert_eq!(sink.last_presented(Side::Front).map(|t| t.sequence), Some(2));
        assert_eq!(sink.presented_count(Side::Back), 1);
        assert_eq!(observer.textures(Side::Front), 2);
    }

    #[test]
    fn test_failed_conversion_does_not_stop_processing() {
        let queue = Arc::new(FrameQueue::new(3).unwrap());
        let Fixture {
            mut processor,
            sink,
            ..
        } = processor(Arc::clone(&queue));

        queue.push(Side::Front, frame(Side::Front, 1, 3));
        queue.push(Side::Front, frame(Side::Front, 2, 12));

        assert_eq!(processor.process_pending(), 2);
        let stats = processor.stats().side(Side::Front);
        assert_eq!((stats.failed, stats.converted), (1, 1));
        assert_eq!(sink.lock().last_presented(Side::Front).map(|t| t.sequence), Some(2));
    }

    #[test]
    fn test_frozen_side_skipped() {
        let queue = Arc::new(FrameQueue::new(3).unwrap());
        let Fixture {
            mut processor,
            sink,
            ..
        } = processor(Arc::clone(&queue));
        sink.lock().freeze(Side::Back);

        queue.push(Side::Back, frame(Side::Back, 1, 12));
        processor.process_pending();
        assert_eq!(processor.stats().side(Side::Back).skipped, 1);
        assert!(sink.lock().last_presented(Side::Back).is_none());
    }

    #[test]
    fn test_invalidated_session_not_converted() {
        let queue = Arc::new(FrameQueue::new(3).unwrap());
        let Fixture {
            mut processor,
            sink,
            barrier,
            ..
        } = processor(Arc::clone(&queue));

        queue.push(Side::Front, frame(Side::Front, 1, 12));
        let taken = queue.pop(Side::Front).unwrap();
        barrier.raise(Side::Front, 2);
        processor.process_frame(taken);

        let stats = processor.stats().side(Side::Front);
        assert_eq!((stats.stale, stats.converted), (1, 0));
        assert!(sink.lock().last_presented(Side::Front).is_none());
        assert_eq!(processor.converter().conversions(), 0);
    }
}
