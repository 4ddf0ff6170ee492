// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture devices
//!
//! [`SyntheticDevice`] generates NV12 test patterns on its own frame loop
//! thread, paced at the configured framerate. [`ManualDevice`] delivers
//! frames only when its [`ManualTrigger`] is told to, which lets callers
//! drive the capture callback deterministically.

use super::frame_loop::{FrameLoopController, LoopAction};
use super::types::*;
use super::{CaptureDevice, DeviceEvent, EventCallback};
use crate::constants::timing;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Picture generated by a synthetic device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticPattern {
    /// One colour, given as video-range (Y, U, V)
    Solid([u8; 3]),
    /// Eight vertical colour bars, scrolling one column per frame
    ColorBars,
}

impl SyntheticPattern {
    /// Default solid colour per camera position (red front, blue back)
    pub fn for_position(position: CameraPosition) -> Self {
        match position {
            CameraPosition::Front => SyntheticPattern::Solid([81, 90, 240]),
            CameraPosition::Back => SyntheticPattern::Solid([41, 240, 110]),
        }
    }
}

/// BT.601 video-range (Y, U, V) of white, yellow, cyan, green, magenta, red, blue, black
const BARS: [[u8; 3]; 8] = [
    [235, 128, 128],
    [210, 16, 146],
    [170, 166, 16],
    [145, 54, 34],
    [106, 202, 222],
    [81, 90, 240],
    [41, 240, 110],
    [16, 128, 128],
];

/// Generate one tightly packed NV12 frame
pub fn generate_nv12(
    width: u32,
    height: u32,
    pattern: SyntheticPattern,
    frame_index: u64,
) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0u8; w * h + w * (h / 2)];
    let (y_plane, uv_plane) = data.split_at_mut(w * h);

    let color_at = |x: usize| -> [u8; 3] {
        match pattern {
            SyntheticPattern::Solid(yuv) => yuv,
            SyntheticPattern::ColorBars => {
                let shifted = (x + frame_index as usize) % w.max(1);
                BARS[shifted * BARS.len() / w.max(1)]
            }
        }
    };

    for row in y_plane.chunks_mut(w.max(1)) {
        for (x, luma) in row.iter_mut().enumerate() {
            *luma = color_at(x)[0];
        }
    }
    for row in uv_plane.chunks_mut(w.max(1)) {
        for (pair, chroma) in row.chunks_mut(2).enumerate() {
            let [_, u, v] = color_at(pair * 2);
            chroma[0] = u;
            if let Some(slot) = chroma.get_mut(1) {
                *slot = v;
            }
        }
    }
    data
}

/// Test-pattern capture device paced by a frame loop thread
pub struct SyntheticDevice {
    config: Option<CaptureConfig>,
    callback: Arc<Mutex<Option<EventCallback>>>,
    frame_loop: Option<FrameLoopController>,
    pattern: Option<SyntheticPattern>,
    open_error: Option<BackendError>,
    fail_after: Option<(u64, BackendError)>,
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self {
            config: None,
            callback: Arc::new(Mutex::new(None)),
            frame_loop: None,
            pattern: None,
            open_error: None,
            fail_after: None,
        }
    }

    /// Use a fixed pattern instead of the per-position default
    pub fn with_pattern(mut self, pattern: SyntheticPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// A device whose sessions cannot be opened
    pub fn unavailable(error: BackendError) -> Self {
        let mut device = Self::new();
        device.open_error = Some(error);
        device
    }

    /// Report `error` after delivering `frames` frames
    pub fn failing_after(mut self, frames: u64, error: BackendError) -> Self {
        self.fail_after = Some((frames, error));
        self
    }
}

impl CaptureDevice for SyntheticDevice {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::Synthetic
    }

    fn open_session(
        &mut self,
        config: &CaptureConfig,
        callback: EventCallback,
    ) -> BackendResult<()> {
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }
        self.close();
        self.config = Some(*config);
        *self.callback.lock() = Some(callback);
        debug!(config = %config, "Synthetic session opened");
        Ok(())
    }

    fn start(&mut self) -> BackendResult<()> {
        let config = self.config.ok_or(BackendError::NoSession)?;
        if self.frame_loop.as_ref().is_some_and(FrameLoopController::is_running) {
            return Ok(());
        }

        let callback = Arc::clone(&self.callback);
        let pattern = self
            .pattern
            .unwrap_or_else(|| SyntheticPattern::for_position(config.position));
        let fail_after = self.fail_after.clone();
        let interval = Duration::from_secs(1) / config.framerate.max(1);
        let mut frame_index = 0u64;

        info!(config = %config, "Starting synthetic capture");

        self.frame_loop = Some(FrameLoopController::start(
            &format!("synthetic-{}", config.position),
            move || {
                let started = Instant::now();
                let mut guard = callback.lock();
                let Some(deliver) = guard.as_mut() else {
                    return LoopAction::Stop;
                };

                if let Some((limit, error)) = &fail_after
                    && frame_index >= *limit
                {
                    deliver(DeviceEvent::Error(error.clone()));
                    return LoopAction::Stop;
                }

                let data = generate_nv12(config.width, config.height, pattern, frame_index);
                let pts_ns = frame_index * interval.as_nanos() as u64;
                deliver(DeviceEvent::Frame(RawFrame::packed(
                    PixelFormat::NV12,
                    config.width,
                    config.height,
                    data,
                    pts_ns,
                )));
                drop(guard);

                if frame_index % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(
                        frame = frame_index,
                        position = %config.position,
                        "Synthetic frame delivered"
                    );
                }
                frame_index += 1;
                LoopAction::Idle(interval.saturating_sub(started.elapsed()))
            },
        ));
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        if self.config.is_none() {
            return Err(BackendError::NoSession);
        }
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
        }
        *self.callback.lock() = None;
        self.config = None;
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct ManualState {
    /// Callback of every session ever opened, newest last
    sessions: Vec<Option<EventCallback>>,
    config: Option<CaptureConfig>,
    open: bool,
    started: bool,
    open_count: usize,
    next_open_error: Option<BackendError>,
}

/// Capture device driven by a [`ManualTrigger`]
///
/// Callbacks of closed sessions are kept, so a late delivery from an old
/// session can be replayed with [`ManualTrigger::deliver_to_session`].
pub struct ManualDevice {
    state: Arc<Mutex<ManualState>>,
}

/// Handle that feeds frames into a [`ManualDevice`]
#[derive(Clone)]
pub struct ManualTrigger {
    state: Arc<Mutex<ManualState>>,
}

impl ManualDevice {
    pub fn new() -> (Self, ManualTrigger) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            ManualTrigger { state },
        )
    }
}

impl CaptureDevice for ManualDevice {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::Synthetic
    }

    fn open_session(
        &mut self,
        config: &CaptureConfig,
        callback: EventCallback,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.next_open_error.take() {
            return Err(error);
        }
        state.sessions.push(Some(callback));
        state.config = Some(*config);
        state.open = true;
        state.started = false;
        state.open_count += 1;
        Ok(())
    }

    fn start(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(BackendError::NoSession);
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(BackendError::NoSession);
        }
        state.started = false;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.started = false;
        state.config = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl ManualTrigger {
    /// Whether the current session is streaming
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Sessions opened so far
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Config of the open session
    pub fn config(&self) -> Option<CaptureConfig> {
        self.state.lock().config
    }

    /// Make the next `open_session` fail
    pub fn fail_next_open(&self, error: BackendError) {
        self.state.lock().next_open_error = Some(error);
    }

    /// Deliver a solid-colour frame sized to the current session
    ///
    /// Returns false when no session is open.
    pub fn deliver_solid(&self, yuv: [u8; 3], pts_ns: u64) -> bool {
        let Some(config) = self.config() else {
            return false;
        };
        let data = generate_nv12(config.width, config.height, SyntheticPattern::Solid(yuv), 0);
        self.deliver(RawFrame::packed(PixelFormat::NV12, config.width, config.height, data, pts_ns))
    }

    /// Deliver a frame through the newest session's callback
    pub fn deliver(&self, frame: RawFrame) -> bool {
        let newest = self.state.lock().sessions.len().checked_sub(1);
        match newest {
            Some(index) => self.deliver_to_session(index, frame),
            None => false,
        }
    }

    /// Deliver a frame through the callback of session `index` (0 = first)
    pub fn deliver_to_session(&self, index: usize, frame: RawFrame) -> bool {
        self.emit(index, DeviceEvent::Frame(frame))
    }

    /// Report a streaming error through the newest session
    pub fn emit_error(&self, error: BackendError) -> bool {
        let newest = self.state.lock().sessions.len().checked_sub(1);
        match newest {
            Some(index) => self.emit(index, DeviceEvent::Error(error)),
            None => false,
        }
    }

    fn emit(&self, index: usize, event: DeviceEvent) -> bool {
        // Run the callback without holding the device lock
        let callback = self
            .state
            .lock()
            .sessions
            .get_mut(index)
            .and_then(Option::take);
        let Some(mut callback) = callback else {
            return false;
        };
        callback(event);
        if let Some(slot) = self.state.lock().sessions.get_mut(index) {
            *slot = Some(callback);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_generate_nv12_solid() {
        let data = generate_nv12(4, 2, SyntheticPattern::Solid([81, 90, 240]), 0);
        assert_eq!(data.len(), 12);
        assert!(data[..8].iter().all(|&y| y == 81));
        assert_eq!(&data[8..], &[90, 240, 90, 240]);
    }

    #[test]
    fn test_color_bars_scroll() {
        let first = generate_nv12(16, 2, SyntheticPattern::ColorBars, 0);
        let second = generate_nv12(16, 2, SyntheticPattern::ColorBars, 2);
        assert_ne!(first[..16], second[..16]);
    }

    #[test]
    fn test_start_requires_session() {
        let mut device = SyntheticDevice::new();
        assert_eq!(device.start(), Err(BackendError::NoSession));
    }

    #[test]
    fn test_unavailable_device_fails_open() {
        let mut device =
            SyntheticDevice::unavailable(BackendError::PermissionDenied("camera".to_string()));
        let config = CaptureConfig::for_side(Side::Front).with_resolution(4, 4);
        let result = device.open_session(&config, Box::new(|_| {}));
        assert!(matches!(result, Err(BackendError::PermissionDenied(_))));
        assert!(!device.is_open());
    }

    #[test]
    fn test_synthetic_delivers_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut device = SyntheticDevice::new();
        let mut config = CaptureConfig::for_side(Side::Back).with_resolution(8, 8);
        config.framerate = 200;
        device
            .open_session(
                &config,
                Box::new(move |event| {
                    if let DeviceEvent::Frame(frame) = event {
                        assert!(frame.is_complete());
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
        device.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        device.stop().unwrap();

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_manual_trigger_replays_old_session() {
        let (mut device, trigger) = ManualDevice::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let config = CaptureConfig::for_side(Side::Front).with_resolution(2, 2);

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            device
                .open_session(&config, Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            device.close();
        }

        assert_eq!(trigger.open_count(), 2);
        let frame = RawFrame::packed(PixelFormat::NV12, 2, 2, vec![0; 6], 0);
        assert!(trigger.deliver_to_session(0, frame));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let frame = RawFrame::packed(PixelFormat::NV12, 2, 2, vec![0; 6], 0);
        assert!(!trigger.deliver_to_session(5, frame));
    }
}
