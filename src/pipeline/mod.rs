// SPDX-License-Identifier: GPL-3.0-only

//! Capture-to-preview pipeline
//!
//! # Architecture
//!
//! ```text
//!  capture thread (front)     capture thread (back)
//!  ┌───────────────────┐      ┌───────────────────┐
//!  │ CaptureSource     │      │ CaptureSource     │  ← tag side, notify observers
//!  └─────────┬─────────┘      └─────────┬─────────┘
//!            └────────────┬─────────────┘
//!                         ▼
//!               ┌──────────────────┐
//!               │ FrameQueue       │  ← per-side FIFO, drop oldest
//!               └────────┬─────────┘
//!                        ▼ render thread
//!               ┌──────────────────┐
//!               │ TextureConverter │  ← claims the GPU context
//!               └────────┬─────────┘
//!                        ▼
//!               ┌──────────────────┐
//!               │ RenderSink       │  ← composition, preview surface
//!               └──────────────────┘
//! ```
//!
//! [`CameraPipeline`] wires these together from a [`PipelineConfig`] and
//! owns the render thread.

pub mod coordinator;
pub mod delegate;
pub mod queue;
pub mod render_loop;
pub mod route;
pub mod source;

pub use coordinator::DualCaptureCoordinator;
pub use delegate::{CountingObserver, ObserverCapabilities, ObserverRegistry, SampleObserver};
pub use queue::{FrameQueue, QueueStats};
pub use render_loop::{FrameInput, FrameProcessor, RenderLoop, RenderSideStats, RenderStats};
pub use route::{DirectReceiver, DirectSender, FrameRoute, RenderBarrier, direct_channel};
pub use source::{CaptureSource, SourceLinks, SourceState, SourceStats, SourceStatus};

use crate::backends::camera::{CaptureDevice, Side, SideMap, create_device};
use crate::config::{PipelineConfig, Routing};
use crate::constants::limits;
use crate::errors::{AppResult, CaptureResult};
use crate::gpu::{GpuContext, create_context};
use crate::render::{PreviewSurface, RenderSink, TextureConverter};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Fully wired dual-camera pipeline
pub struct CameraPipeline {
    config: PipelineConfig,
    context: Arc<GpuContext>,
    coordinator: DualCaptureCoordinator,
    sink: Arc<Mutex<RenderSink>>,
    queue: Option<Arc<FrameQueue>>,
    barrier: Arc<RenderBarrier>,
    render_loop: RenderLoop,
}

impl std::fmt::Debug for CameraPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraPipeline")
            .field("context", &self.context)
            .field("coordinator", &self.coordinator)
            .field("queue", &self.queue)
            .finish()
    }
}

impl CameraPipeline {
    /// Build the pipeline with the configured GPU and capture backends
    pub fn new(config: PipelineConfig) -> AppResult<Self> {
        let context = create_context(config.gpu, "camera-pipeline")?;
        let backend = config.capture_backend;
        let paths = config.device_paths.clone();
        Self::with_devices(config, context, |_| create_device(backend, &paths))
    }

    /// Build the pipeline with caller-provided devices
    pub fn with_devices(
        config: PipelineConfig,
        context: Arc<GpuContext>,
        mut make_device: impl FnMut(Side) -> Box<dyn CaptureDevice>,
    ) -> AppResult<Self> {
        config.validate()?;

        let observers = ObserverRegistry::new();
        let sink = RenderSink::new(
            Arc::clone(&context),
            config.composition,
            config.texture_options,
        );
        let converter =
            TextureConverter::new(Arc::clone(&context), config.colorimetry, sink.subscribe());
        let coordinator = DualCaptureCoordinator::new(observers.clone());
        let barrier = RenderBarrier::new();

        let (input, routes, queue) = match config.routing {
            Routing::Queue => {
                let queue = Arc::new(FrameQueue::new(config.queue_capacity)?);
                let routes = SideMap::from_fn(|_| {
                    FrameRoute::queue(Arc::clone(&queue), Arc::clone(&barrier))
                });
                (FrameInput::Queue(Arc::clone(&queue)), routes, Some(queue))
            }
            Routing::Direct => {
                let mut receivers = SideMap::default();
                let routes = SideMap::from_fn(|side| {
                    let (tx, rx) = direct_channel(
                        side,
                        limits::DIRECT_CHANNEL_CAPACITY,
                        Arc::clone(&barrier),
                    );
                    receivers[side] = Some(rx);
                    FrameRoute::direct(tx)
                });
                (FrameInput::Direct(receivers), routes, None)
            }
        };

        for side in config.active_sides() {
            coordinator.attach(
                side,
                *config.capture(side),
                make_device(side),
                routes[side].clone(),
                sink.subscribe(),
            )?;
        }

        let sink = Arc::new(Mutex::new(sink));
        let processor = FrameProcessor::new(
            input,
            Arc::clone(&barrier),
            converter,
            Arc::clone(&sink),
            observers,
        );
        let render_loop = RenderLoop::spawn(processor);

        info!(
            gpu = %context.label(),
            routing = ?config.routing,
            sides = ?config.active_sides(),
            "Camera pipeline ready"
        );

        Ok(Self {
            config,
            context,
            coordinator,
            sink,
            queue,
            barrier,
            render_loop,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    pub fn coordinator(&self) -> &DualCaptureCoordinator {
        &self.coordinator
    }

    /// Shared render lock; never call coordinator methods while holding it
    pub fn sink(&self) -> &Arc<Mutex<RenderSink>> {
        &self.sink
    }

    pub fn render_barrier(&self) -> &Arc<RenderBarrier> {
        &self.barrier
    }

    pub fn observers(&self) -> &ObserverRegistry {
        self.coordinator.observers()
    }

    pub fn add_observer(&self, observer: Arc<dyn SampleObserver>) {
        self.coordinator.observers().add(observer);
    }

    pub fn attach_surface(&self, surface: Box<dyn PreviewSurface>) {
        self.sink.lock().attach_surface(surface);
    }

    pub fn set_texture_export(&self, enabled: bool) {
        self.sink.lock().set_texture_export(enabled);
    }

    /// Start every attached side
    pub fn start(&self) -> SideMap<CaptureResult<()>> {
        SideMap::from_fn(|side| {
            if self.coordinator.is_attached(side) {
                self.coordinator.start(side)
            } else {
                Ok(())
            }
        })
    }

    pub fn stop(&self) -> SideMap<CaptureResult<()>> {
        SideMap::from_fn(|side| {
            if self.coordinator.is_attached(side) {
                self.coordinator.stop(side)
            } else {
                Ok(())
            }
        })
    }

    /// Drain source status reports and apply them to the preview
    ///
    /// A failed side freezes on its last good frame; a side that starts
    /// again is thawed.
    pub fn poll_status(&self) -> Vec<SourceStatus> {
        let statuses = self.coordinator.statuses();
        if statuses.is_empty() {
            return statuses;
        }
        let mut sink = self.sink.lock();
        for status in &statuses {
            match status {
                SourceStatus::Failed { side, error } => {
                    warn!(side = %side, error = %error, "Source failed, holding last frame");
                    sink.freeze(*side);
                }
                SourceStatus::Started { side } => sink.thaw(*side),
                _ => {}
            }
        }
        statuses
    }

    pub fn queue_stats(&self, side: Side) -> Option<QueueStats> {
        self.queue.as_ref().map(|queue| queue.stats(side))
    }

    pub fn render_stats(&self, side: Side) -> RenderSideStats {
        self.render_loop.stats().side(side)
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        let _ = self.stop();
        self.render_loop.stop();
        info!("Camera pipeline shut down");
    }
}
