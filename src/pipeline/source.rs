// SPDX-License-Identifier: GPL-3.0-only

//! One camera's capture session
//!
//! A [`CaptureSource`] owns a [`CaptureDevice`] and the gate that decides
//! whether a device callback may hand its frame on. The callback holds the
//! gate's read lock across the check and the dispatch; `stop` and the
//! reconfiguration calls take the write lock. Once either returns, no
//! callback is mid-dispatch and every later callback sees the new state.
//!
//! Every stop or reconfiguration bumps the generation stamped on frames and
//! invalidates the route for that generation. Invalidation waits for a
//! conversion of this side already under way, so once the call returns no
//! frame of the old session is converted or presented.

use super::delegate::ObserverRegistry;
use super::route::FrameRoute;
use crate::backends::camera::{
    BackendError, CameraPosition, CaptureConfig, CaptureDevice, DeviceEvent, EventCallback,
    Orientation, PixelFrame, RawFrame, Side,
};
use crate::constants::timing;
use crate::errors::{CaptureError, CaptureResult};
use crate::render::SinkCapabilities;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Session open, not streaming
    Idle,
    Running,
    Stopped,
    /// Session being torn down and reopened
    Reconfiguring,
    /// Device failed; waits for an explicit retry
    Failed,
}

/// Status reports sent from sources to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Started { side: Side },
    Stopped { side: Side },
    Reconfigured { side: Side, config: CaptureConfig },
    /// Terminal device failure, sent once per failure
    Failed { side: Side, error: BackendError },
}

impl SourceStatus {
    pub fn side(&self) -> Side {
        match self {
            SourceStatus::Started { side }
            | SourceStatus::Stopped { side }
            | SourceStatus::Reconfigured { side, .. }
            | SourceStatus::Failed { side, .. } => *side,
        }
    }
}

/// Counters of one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Frames accepted from the device and tagged
    pub delivered: u64,
    /// Callbacks discarded (stopped, stale session, incomplete buffer)
    pub discarded: u64,
    /// Frames handed to the route
    pub routed: u64,
    /// Frames the route gave back (evicted oldest or channel full)
    pub dropped: u64,
}

/// Everything a source needs from the rest of the pipeline
#[derive(Debug, Clone)]
pub struct SourceLinks {
    pub route: FrameRoute,
    pub observers: ObserverRegistry,
    pub capabilities: watch::Receiver<SinkCapabilities>,
    pub status: mpsc::UnboundedSender<SourceStatus>,
}

#[derive(Debug)]
struct Gate {
    state: SourceState,
    /// Session whose callback may deliver
    session: u64,
    /// Stamped on frames; bumped on every stop and reconfiguration
    generation: u64,
    orientation: Orientation,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    discarded: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
}

/// State shared between the source and its device callbacks
struct SourceShared {
    side: Side,
    gate: RwLock<Gate>,
    links: SourceLinks,
    sequence: AtomicU64,
    counters: Counters,
}

impl SourceShared {
    fn on_event(&self, event: DeviceEvent, session: u64) {
        match event {
            DeviceEvent::Frame(raw) => self.on_frame(raw, session),
            DeviceEvent::Error(error) => {
                self.fail(session, error);
            }
        }
    }

    fn on_frame(&self, raw: RawFrame, session: u64) {
        let gate = self.gate.read();
        if gate.state != SourceState::Running || gate.session != session {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(
                side = %self.side,
                session,
                state = ?gate.state,
                "Discarding frame outside running session"
            );
            return;
        }
        if !raw.is_complete() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            warn!(side = %self.side, len = raw.data.len(), "Discarding incomplete frame");
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame =
            PixelFrame::from_raw(raw, self.side, gate.orientation, sequence, gate.generation);
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);

        self.links.observers.notify_sample(&frame, self.side);

        if !self.links.capabilities.borrow().wants_frames() {
            return;
        }

        self.counters.routed.fetch_add(1, Ordering::Relaxed);
        if let Some(dropped) = self.links.route.deliver(self.side, frame) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(side = %self.side, sequence = dropped.sequence, "Frame dropped by route");
        }

        if sequence % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(side = %self.side, sequence, "Capture frames flowing");
        }
    }

    /// Enter the failed state, reporting the error once; returns whether it was reported
    fn fail(&self, session: u64, error: BackendError) -> bool {
        {
            let mut gate = self.gate.write();
            if gate.session != session || gate.state == SourceState::Failed {
                return false;
            }
            gate.state = SourceState::Failed;
            gate.generation += 1;
            self.links.route.invalidate(self.side, gate.generation);
        }
        error!(side = %self.side, error = %error, "Capture source failed");
        if self
            .links
            .status
            .send(SourceStatus::Failed {
                side: self.side,
                error,
            })
            .is_err()
        {
            debug!(side = %self.side, "Status receiver gone");
        }
        true
    }

    fn report(&self, status: SourceStatus) {
        if self.links.status.send(status).is_err() {
            debug!(side = %self.side, "Status receiver gone");
        }
    }
}

/// One camera side: device, session state and frame routing
pub struct CaptureSource {
    shared: Arc<SourceShared>,
    device: Box<dyn CaptureDevice>,
    config: CaptureConfig,
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("side", &self.shared.side)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CaptureSource {
    /// Create a source and open its capture session
    ///
    /// An invalid config is rejected. A device that fails to open leaves the
    /// source in [`SourceState::Failed`] with the failure reported on the
    /// status channel; the source can still be retried.
    pub fn new(
        side: Side,
        config: CaptureConfig,
        device: Box<dyn CaptureDevice>,
        links: SourceLinks,
    ) -> CaptureResult<Self> {
        config.validate()?;

        let shared = Arc::new(SourceShared {
            side,
            gate: RwLock::new(Gate {
                state: SourceState::Idle,
                session: 0,
                generation: 0,
                orientation: config.orientation,
            }),
            links,
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
        });

        let mut source = Self {
            shared,
            device,
            config,
        };
        info!(
            side = %side,
            backend = %source.device.backend_type(),
            config = %config,
            "Creating capture source"
        );
        if let Err(e) = source.open() {
            debug!(side = %side, error = %e, "Capture source created in failed state");
        }
        Ok(source)
    }

    pub fn side(&self) -> Side {
        self.shared.side
    }

    pub fn state(&self) -> SourceState {
        self.shared.gate.read().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SourceState::Running
    }

    pub fn config(&self) -> CaptureConfig {
        self.config
    }

    pub fn stats(&self) -> SourceStats {
        let c = &self.shared.counters;
        SourceStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            routed: c.routed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Begin delivering frames; no-op when already running
    pub fn start(&mut self) -> CaptureResult<()> {
        let session = {
            let mut gate = self.shared.gate.write();
            match gate.state {
                SourceState::Running => return Ok(()),
                SourceState::Failed => return Err(CaptureError::SourceFailed(self.shared.side)),
                _ => {}
            }
            gate.state = SourceState::Running;
            gate.session
        };

        if let Err(e) = self.device.start() {
            self.shared.fail(session, e.clone());
            return Err(CaptureError::Device(e));
        }
        info!(side = %self.shared.side, "Capture started");
        self.shared.report(SourceStatus::Started {
            side: self.shared.side,
        });
        Ok(())
    }

    /// Stop delivering frames
    ///
    /// Callbacks already in flight are discarded and frames queued for this
    /// side are dropped.
    pub fn stop(&mut self) -> CaptureResult<()> {
        {
            let mut gate = self.shared.gate.write();
            if gate.state != SourceState::Running {
                return Ok(());
            }
            gate.state = SourceState::Stopped;
            gate.generation += 1;
            self.shared.links.route.invalidate(self.shared.side, gate.generation);
        }

        if let Err(e) = self.device.stop() {
            warn!(side = %self.shared.side, error = %e, "Device stop failed");
        }
        info!(side = %self.shared.side, "Capture stopped");
        self.shared.report(SourceStatus::Stopped {
            side: self.shared.side,
        });
        Ok(())
    }

    /// Switch to another physical camera
    pub fn change_position(&mut self, position: CameraPosition) -> CaptureResult<()> {
        self.reconfigure(self.config.with_position(position))
    }

    /// Change the capture resolution
    pub fn change_resolution(&mut self, width: u32, height: u32) -> CaptureResult<()> {
        self.reconfigure(self.config.with_resolution(width, height))
    }

    /// Apply a new orientation to frames captured from now on
    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.shared.gate.write().orientation = orientation;
        self.config.orientation = orientation;
    }

    /// Reopen a failed source and resume streaming
    pub fn retry(&mut self) -> CaptureResult<()> {
        if self.state() != SourceState::Failed {
            return Ok(());
        }
        info!(side = %self.shared.side, "Retrying capture source");
        self.device.close();
        self.shared.gate.write().state = SourceState::Idle;
        self.open()?;
        self.start()
    }

    /// Tear down the session, apply `config` and reopen
    ///
    /// Runs as a barrier: nothing captured before the call is delivered
    /// after it. Streaming resumes if the source was running.
    fn reconfigure(&mut self, config: CaptureConfig) -> CaptureResult<()> {
        config.validate()?;

        let previous = {
            let mut gate = self.shared.gate.write();
            let previous = gate.state;
            gate.state = SourceState::Reconfiguring;
            gate.generation += 1;
            self.shared.links.route.invalidate(self.shared.side, gate.generation);
            previous
        };

        if let Err(e) = self.device.stop()
            && e != BackendError::NoSession
        {
            debug!(side = %self.shared.side, error = %e, "Device stop before reconfigure failed");
        }
        self.device.close();

        info!(
            side = %self.shared.side,
            from = %self.config,
            to = %config,
            "Reconfiguring capture source"
        );
        self.config = config;
        self.shared.gate.write().state = SourceState::Idle;
        self.open()?;
        self.shared.report(SourceStatus::Reconfigured {
            side: self.shared.side,
            config,
        });

        if previous == SourceState::Running {
            self.start()?;
        }
        Ok(())
    }

    /// Open a new session whose callback is bound to a fresh session id
    fn open(&mut self) -> CaptureResult<()> {
        let session = {
            let mut gate = self.shared.gate.write();
            gate.generation += 1;
            gate.session = gate.generation;
            gate.orientation = self.config.orientation;
            gate.session
        };

        let shared = Arc::clone(&self.shared);
        let callback: EventCallback = Box::new(move |event| shared.on_event(event, session));
        match self.device.open_session(&self.config, callback) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.fail(session, e.clone());
                Err(CaptureError::Device(e))
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        {
            let mut gate = self.shared.gate.write();
            gate.state = SourceState::Stopped;
            gate.generation += 1;
            self.shared.links.route.invalidate(self.shared.side, gate.generation);
        }
        self.device.close();
        debug!(side = %self.shared.side, "Capture source dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::synthetic::{ManualDevice, ManualTrigger};
    use crate::pipeline::delegate::{CountingObserver, ObserverCapabilities};
    use crate::pipeline::queue::FrameQueue;
    use crate::pipeline::route::RenderBarrier;
    use crate::render::SinkCapabilities;

    const BLACK: [u8; 3] = [16, 128, 128];

    struct Harness {
        queue: Arc<FrameQueue>,
        observers: ObserverRegistry,
        capabilities: watch::Sender<SinkCapabilities>,
        status: mpsc::UnboundedReceiver<SourceStatus>,
    }

    fn source_with(device: ManualDevice) -> (CaptureSource, Harness) {
        let queue = Arc::new(FrameQueue::new(3).unwrap());
        let observers = ObserverRegistry::new();
        let (capabilities, caps_rx) = watch::channel(SinkCapabilities {
            preview_attached: true,
            ..SinkCapabilities::default()
        });
        let (status_tx, status) = mpsc::unbounded_channel();
        let links = SourceLinks {
            route: FrameRoute::queue(Arc::clone(&queue), RenderBarrier::new()),
            observers: observers.clone(),
            capabilities: caps_rx,
            status: status_tx,
        };
        let config = CaptureConfig::for_side(Side::Front).with_resolution(4, 4);
        let source = CaptureSource::new(Side::Front, config, Box::new(device), links).unwrap();
        (
            source,
            Harness {
                queue,
                observers,
                capabilities,
                status,
            },
        )
    }

    fn running_source() -> (CaptureSource, ManualTrigger, Harness) {
        let (device, trigger) = ManualDevice::new();
        let (mut source, harness) = source_with(device);
        source.start().unwrap();
        (source, trigger, harness)
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut source, trigger, mut harness) = running_source();
        source.start().unwrap();
        assert!(trigger.is_started());
        assert_eq!(trigger.open_count(), 1);
        assert_eq!(
            harness.status.try_recv().ok(),
            Some(SourceStatus::Started { side: Side::Front })
        );
        assert!(harness.status.try_recv().is_err());
    }

    #[test]
    fn test_frames_are_tagged_and_routed() {
        let (source, trigger, harness) = running_source();
        assert!(trigger.deliver_solid(BLACK, 10));
        assert!(trigger.deliver_solid(BLACK, 20));

        let first = harness.queue.pop(Side::Front).unwrap();
        let second = harness.queue.pop(Side::Front).unwrap();
        assert_eq!(first.side, Side::Front);
        assert_eq!((first.pts_ns, second.pts_ns), (10, 20));
        assert!(second.sequence > first.sequence);
        assert_eq!(source.stats().routed, 2);
    }

    #[test]
    fn test_stop_cuts_off_delivery() {
        let (mut source, trigger, harness) = running_source();
        trigger.deliver_solid(BLACK, 1);
        source.stop().unwrap();

        trigger.deliver_solid(BLACK, 2);
        trigger.deliver_solid(BLACK, 3);
        assert!(harness.queue.is_empty(Side::Front));
        assert_eq!(source.stats().discarded, 2);
        assert!(!trigger.is_started());
    }

    #[test]
    fn test_invalid_resolution_keeps_config() {
        let (mut source, trigger, _harness) = running_source();
        let before = source.config();
        assert!(matches!(
            source.change_resolution(641, 480),
            Err(CaptureError::InvalidConfig(_))
        ));
        assert_eq!(source.config(), before);
        assert!(source.is_running());
        assert_eq!(trigger.open_count(), 1);
    }

    #[test]
    fn test_stale_session_frame_discarded() {
        let (mut source, trigger, harness) = running_source();
        source.change_position(CameraPosition::Back).unwrap();
        assert_eq!(trigger.open_count(), 2);
        assert!(source.is_running());

        // Late callback from the first session
        let raw = RawFrame::packed(
            crate::backends::camera::PixelFormat::NV12,
            4,
            4,
            vec![0; 24],
            5,
        );
        assert!(trigger.deliver_to_session(0, raw));
        assert!(harness.queue.is_empty(Side::Front));

        trigger.deliver_solid(BLACK, 6);
        assert_eq!(harness.queue.pop(Side::Front).map(|f| f.pts_ns), Some(6));
    }

    #[test]
    fn test_device_failure_reported_once() {
        let (mut source, trigger, mut harness) = running_source();
        let _ = harness.status.try_recv();

        let error = BackendError::DeviceUnavailable("unplugged".to_string());
        trigger.emit_error(error.clone());
        trigger.emit_error(error.clone());

        assert_eq!(source.state(), SourceState::Failed);
        assert_eq!(
            harness.status.try_recv().ok(),
            Some(SourceStatus::Failed {
                side: Side::Front,
                error
            })
        );
        assert!(harness.status.try_recv().is_err());
        assert_eq!(source.start(), Err(CaptureError::SourceFailed(Side::Front)));

        source.retry().unwrap();
        assert!(source.is_running());
        assert_eq!(trigger.open_count(), 2);
    }

    #[test]
    fn test_open_failure_leaves_source_failed() {
        let (device, trigger) = ManualDevice::new();
        trigger.fail_next_open(BackendError::PermissionDenied("camera".to_string()));
        let (source, mut harness) = source_with(device);
        assert_eq!(source.state(), SourceState::Failed);
        assert!(matches!(
            harness.status.try_recv(),
            Ok(SourceStatus::Failed { side: Side::Front, .. })
        ));
    }

    #[test]
    fn test_observers_see_frames_without_sink() {
        let (_source, trigger, harness) = running_source();
        let observer = Arc::new(CountingObserver::new(ObserverCapabilities::RAW_SAMPLES));
        harness.observers.add(observer.clone());
        harness
            .capabilities
            .send_modify(|caps| caps.preview_attached = false);

        trigger.deliver_solid(BLACK, 1);
        assert_eq!(observer.samples(Side::Front), 1);
        assert!(harness.queue.is_empty(Side::Front));
    }
}
