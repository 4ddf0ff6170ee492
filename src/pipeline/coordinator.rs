// SPDX-License-Identifier: GPL-3.0-only

//! Front/back source ownership
//!
//! Each side sits behind its own lock. A slow `change_resolution` on one
//! side holds only that side's lock, so the other side keeps streaming and
//! can be controlled meanwhile.

use super::delegate::ObserverRegistry;
use super::route::FrameRoute;
use super::source::{CaptureSource, SourceLinks, SourceState, SourceStats, SourceStatus};
use crate::backends::camera::{
    CameraPosition, CaptureConfig, CaptureDevice, Orientation, Side, SideMap,
};
use crate::errors::{CaptureError, CaptureResult};
use crate::render::SinkCapabilities;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Owner of up to two capture sources
pub struct DualCaptureCoordinator {
    sources: SideMap<Mutex<Option<CaptureSource>>>,
    observers: ObserverRegistry,
    status_tx: mpsc::UnboundedSender<SourceStatus>,
    status_rx: Mutex<mpsc::UnboundedReceiver<SourceStatus>>,
}

impl std::fmt::Debug for DualCaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualCaptureCoordinator")
            .field("front", &self.state(Side::Front))
            .field("back", &self.state(Side::Back))
            .field("observers", &self.observers)
            .finish()
    }
}

impl Default for DualCaptureCoordinator {
    fn default() -> Self {
        Self::new(ObserverRegistry::new())
    }
}

impl DualCaptureCoordinator {
    pub fn new(observers: ObserverRegistry) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        Self {
            sources: SideMap::default(),
            observers,
            status_tx,
            status_rx: Mutex::new(status_rx),
        }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Create the source for `side`, replacing (and stopping) any previous one
    pub fn attach(
        &self,
        side: Side,
        config: CaptureConfig,
        device: Box<dyn CaptureDevice>,
        route: FrameRoute,
        capabilities: watch::Receiver<SinkCapabilities>,
    ) -> CaptureResult<()> {
        let links = SourceLinks {
            route,
            observers: self.observers.clone(),
            capabilities,
            status: self.status_tx.clone(),
        };
        let source = CaptureSource::new(side, config, device, links)?;
        if let Some(previous) = self.sources[side].lock().replace(source) {
            debug!(side = %side, "Replacing capture source");
            drop(previous);
        }
        Ok(())
    }

    /// Remove the source for `side`; dropping it closes the session
    pub fn detach(&self, side: Side) -> bool {
        let removed = self.sources[side].lock().take();
        if removed.is_some() {
            info!(side = %side, "Capture source detached");
        }
        removed.is_some()
    }

    pub fn is_attached(&self, side: Side) -> bool {
        self.sources[side].lock().is_some()
    }

    fn with_source<T>(
        &self,
        side: Side,
        f: impl FnOnce(&mut CaptureSource) -> CaptureResult<T>,
    ) -> CaptureResult<T> {
        let mut slot = self.sources[side].lock();
        let source = slot.as_mut().ok_or(CaptureError::NoSource(side))?;
        f(source)
    }

    pub fn start(&self, side: Side) -> CaptureResult<()> {
        self.with_source(side, CaptureSource::start)
    }

    pub fn stop(&self, side: Side) -> CaptureResult<()> {
        self.with_source(side, CaptureSource::stop)
    }

    /// Start both sides; each side succeeds or fails on its own
    pub fn start_both(&self) -> SideMap<CaptureResult<()>> {
        SideMap::from_fn(|side| self.start(side))
    }

    pub fn stop_both(&self) -> SideMap<CaptureResult<()>> {
        SideMap::from_fn(|side| self.stop(side))
    }

    pub fn change_position(&self, side: Side, position: CameraPosition) -> CaptureResult<()> {
        self.with_source(side, |source| source.change_position(position))
    }

    pub fn change_resolution(&self, side: Side, width: u32, height: u32) -> CaptureResult<()> {
        self.with_source(side, |source| source.change_resolution(width, height))
    }

    pub fn set_orientation(&self, side: Side, orientation: Orientation) -> CaptureResult<()> {
        self.with_source(side, |source| {
            source.set_orientation(orientation);
            Ok(())
        })
    }

    /// Reopen a failed source
    pub fn retry(&self, side: Side) -> CaptureResult<()> {
        self.with_source(side, CaptureSource::retry)
    }

    pub fn state(&self, side: Side) -> Option<SourceState> {
        self.sources[side].lock().as_ref().map(CaptureSource::state)
    }

    pub fn is_running(&self, side: Side) -> bool {
        self.state(side) == Some(SourceState::Running)
    }

    pub fn config(&self, side: Side) -> Option<CaptureConfig> {
        self.sources[side].lock().as_ref().map(CaptureSource::config)
    }

    pub fn stats(&self, side: Side) -> Option<SourceStats> {
        self.sources[side].lock().as_ref().map(CaptureSource::stats)
    }

    /// Status reports received since the last call
    pub fn statuses(&self) -> Vec<SourceStatus> {
        let mut rx = self.status_rx.lock();
        let mut statuses = Vec::new();
        while let Ok(status) = rx.try_recv() {
            statuses.push(status);
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::BackendError;
    use crate::backends::camera::synthetic::{ManualDevice, ManualTrigger};
    use crate::pipeline::queue::FrameQueue;
    use crate::pipeline::route::RenderBarrier;
    use std::sync::Arc;

    const GREY: [u8; 3] = [128, 128, 128];

    fn coordinator() -> (DualCaptureCoordinator, SideMap<ManualTrigger>, Arc<FrameQueue>) {
        let coordinator = DualCaptureCoordinator::default();
        let queue = Arc::new(FrameQueue::new(2).unwrap());
        let barrier = RenderBarrier::new();
        let (_tx, caps) = watch::channel(SinkCapabilities {
            texture_export: true,
            ..SinkCapabilities::default()
        });
        let triggers = SideMap::from_fn(|side| {
            let (device, trigger) = ManualDevice::new();
            let config = CaptureConfig::for_side(side).with_resolution(4, 2);
            let route = FrameRoute::queue(Arc::clone(&queue), Arc::clone(&barrier));
            coordinator
                .attach(side, config, Box::new(device), route, caps.clone())
                .unwrap();
            trigger
        });
        (coordinator, triggers, queue)
    }

    #[test]
    fn test_missing_side_reports_no_source() {
        let coordinator = DualCaptureCoordinator::default();
        assert_eq!(coordinator.start(Side::Back), Err(CaptureError::NoSource(Side::Back)));
    }

    #[test]
    fn test_stopping_one_side_leaves_other_running() {
        let (coordinator, triggers, queue) = coordinator();
        assert!(coordinator.start_both().iter().all(|(_, r)| r.is_ok()));

        coordinator.stop(Side::Front).unwrap();
        triggers[Side::Front].deliver_solid(GREY, 1);
        triggers[Side::Back].deliver_solid(GREY, 2);

        assert!(queue.is_empty(Side::Front));
        assert_eq!(queue.len(Side::Back), 1);
        assert!(coordinator.is_running(Side::Back));
    }

    #[test]
    fn test_failure_isolated_to_one_side() {
        let (coordinator, triggers, _queue) = coordinator();
        coordinator.start_both();
        coordinator.statuses();

        triggers[Side::Back].emit_error(BackendError::DeviceUnavailable("gone".to_string()));
        assert_eq!(coordinator.state(Side::Back), Some(SourceState::Failed));
        assert!(coordinator.is_running(Side::Front));

        let statuses = coordinator.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].side(), Side::Back);
    }

    #[test]
    fn test_change_resolution_routes_to_side() {
        let (coordinator, triggers, _queue) = coordinator();
        coordinator.change_resolution(Side::Back, 8, 6).unwrap();
        assert_eq!(coordinator.config(Side::Back).map(|c| (c.width, c.height)), Some((8, 6)));
        assert_eq!(coordinator.config(Side::Front).map(|c| (c.width, c.height)), Some((4, 2)));
        assert_eq!(triggers[Side::Front].open_count(), 1);
    }
}
