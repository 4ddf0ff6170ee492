// SPDX-License-Identifier: GPL-3.0-only
// Capture device abstraction with GStreamer and synthetic implementations

//! Camera capture devices
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   CaptureSource     │  ← Side tagging, routing, stop/reconfigure barrier
//! └──────────┬──────────┘
//!            │ Box<dyn CaptureDevice>
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureDevice Trait │  ← open_session / start / stop / close
//! └──────────┬──────────┘
//!            │
//!       ┌────┴──────┐
//!       ▼           ▼
//!  ┌─────────┐ ┌─────────┐
//!  │GStreamer│ │Synthetic│
//!  └─────────┘ └─────────┘
//! ```
//!
//! Devices deliver [`DeviceEvent`]s through the callback given to
//! `open_session`, on a thread the device owns.

pub mod frame_loop;
pub mod gstreamer;
pub mod synthetic;
pub mod types;

pub use frame_loop::{FrameLoopController, LoopAction};
pub use synthetic::{ManualDevice, ManualTrigger, SyntheticDevice};
pub use types::*;

use serde::{Deserialize, Serialize};

/// Something a capture device reports to its owner
#[derive(Debug)]
pub enum DeviceEvent {
    /// A new frame is available
    Frame(RawFrame),
    /// The device failed while streaming
    Error(BackendError),
}

/// Callback invoked by a device for every event of one session
pub type EventCallback = Box<dyn FnMut(DeviceEvent) + Send>;

/// Platform capture session
///
/// A session is opened for one [`CaptureConfig`]; changing the config means
/// closing and reopening. After `stop` or `close` return, the device may
/// still have a callback in flight; owners must filter those themselves.
pub trait CaptureDevice: Send {
    /// Backend identifier
    fn backend_type(&self) -> CaptureBackendType;

    /// Create a session for `config`, delivering events to `callback`
    fn open_session(
        &mut self,
        config: &CaptureConfig,
        callback: EventCallback,
    ) -> BackendResult<()>;

    /// Begin delivering frames
    fn start(&mut self) -> BackendResult<()>;

    /// Stop delivering frames, keeping the session open
    fn stop(&mut self) -> BackendResult<()>;

    /// Tear down the session and drop the callback
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Device node per camera position
///
/// `None` lets the backend pick its default source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePaths {
    #[serde(default)]
    pub front: Option<String>,
    #[serde(default)]
    pub back: Option<String>,
}

impl DevicePaths {
    pub fn for_position(&self, position: CameraPosition) -> Option<&str> {
        match position {
            CameraPosition::Front => self.front.as_deref(),
            CameraPosition::Back => self.back.as_deref(),
        }
    }
}

/// Create a capture device for the given backend type
pub fn create_device(backend: CaptureBackendType, paths: &DevicePaths) -> Box<dyn CaptureDevice> {
    match backend {
        CaptureBackendType::Synthetic => Box::new(synthetic::SyntheticDevice::new()),
        CaptureBackendType::GStreamer => Box::new(gstreamer::GStreamerDevice::new(paths.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_paths_by_position() {
        let paths = DevicePaths {
            front: Some("/dev/video0".to_string()),
            back: None,
        };
        assert_eq!(paths.for_position(CameraPosition::Front), Some("/dev/video0"));
        assert_eq!(paths.for_position(CameraPosition::Back), None);
    }

    #[test]
    fn test_create_synthetic_device() {
        let device = create_device(CaptureBackendType::Synthetic, &DevicePaths::default());
        assert_eq!(device.backend_type(), CaptureBackendType::Synthetic);
        assert!(!device.is_open());
    }
}
