// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer capture device
//!
//! One pipeline per session:
//!
//! ```text
//! v4l2src device=… ! videoconvert ! videoscale ! video/x-raw,format=NV12,… ! appsink name=sink
//! ```
//!
//! Without a device path for the requested position, `videotestsrc` stands
//! in for the camera. Samples are handed on as mapped buffers, so the frame
//! keeps the GStreamer buffer alive until it is dropped.

use super::types::*;
use super::{CaptureDevice, DevicePaths, DeviceEvent, EventCallback};
use crate::constants::{pipeline, timing};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::{VideoFormat, VideoInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

type SharedCallback = Arc<Mutex<Option<EventCallback>>>;

struct Session {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    callback: SharedCallback,
    config: CaptureConfig,
}

impl Session {
    fn shutdown(self) {
        // Clear callbacks first so no new sample reaches the owner
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        *self.callback.lock() = None;

        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            debug!(error = %e, "Pipeline state change to NULL failed");
        }
        let (result, state, _) = self
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(timing::STOP_TIMEOUT_SECS));
        match result {
            Ok(_) => info!(
                state = ?state,
                position = %self.config.position,
                "GStreamer session closed"
            ),
            Err(e) => debug!(error = ?e, state = ?state, "Pipeline state change had issues"),
        }
    }
}

/// Capture device backed by a GStreamer appsink pipeline
pub struct GStreamerDevice {
    paths: DevicePaths,
    session: Option<Session>,
}

impl GStreamerDevice {
    pub fn new(paths: DevicePaths) -> Self {
        Self {
            paths,
            session: None,
        }
    }
}

/// Build the launch line for a session
pub fn launch_description(config: &CaptureConfig, device_path: Option<&str>) -> String {
    let source = match device_path {
        Some(path) => format!("v4l2src device={}", path),
        None => "videotestsrc is-live=true pattern=smpte".to_string(),
    };
    format!(
        "{} ! videoconvert ! videoscale ! \
         video/x-raw,format={},width={},height={},framerate={}/1 ! appsink name={}",
        source,
        pipeline::OUTPUT_FORMAT,
        config.width,
        config.height,
        config.framerate,
        pipeline::SINK_NAME
    )
}

/// Map a GStreamer error message to a device error
fn backend_error_from(err: &gstreamer::glib::Error, debug_info: Option<String>) -> BackendError {
    let detail = match debug_info {
        Some(extra) => format!("{} ({})", err, extra),
        None => err.to_string(),
    };
    match err.kind::<gstreamer::ResourceError>() {
        Some(gstreamer::ResourceError::NotAuthorized) => BackendError::PermissionDenied(detail),
        Some(gstreamer::ResourceError::NotFound)
        | Some(gstreamer::ResourceError::Busy)
        | Some(gstreamer::ResourceError::OpenRead)
        | Some(gstreamer::ResourceError::OpenReadWrite) => BackendError::DeviceUnavailable(detail),
        _ => BackendError::StreamError(detail),
    }
}

/// Wrap one appsink sample as a raw frame without copying pixel data
fn frame_from_sample(sample: &gstreamer::Sample) -> Result<Option<RawFrame>, BackendError> {
    let caps = sample
        .caps()
        .ok_or_else(|| BackendError::StreamError("No caps in sample".to_string()))?;
    let info = VideoInfo::from_caps(caps)
        .map_err(|e| BackendError::FormatNotSupported(e.to_string()))?;

    let format = match info.format() {
        VideoFormat::Nv12 => PixelFormat::NV12,
        VideoFormat::Nv21 => PixelFormat::NV21,
        VideoFormat::I420 => PixelFormat::I420,
        other => return Err(BackendError::FormatNotSupported(format!("{:?}", other))),
    };

    let buffer = sample
        .buffer_owned()
        .ok_or_else(|| BackendError::StreamError("No buffer in sample".to_string()))?;

    // Incomplete DMA transfers at high framerates; skip the frame
    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
        return Ok(None);
    }

    let pts_ns = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
    let mapped = buffer
        .into_mapped_buffer_readable()
        .map_err(|_| BackendError::StreamError("Failed to map buffer".to_string()))?;

    let offsets = info.offset();
    let strides = info.stride();
    let plane = |i: usize| -> (usize, u32) {
        match (offsets.get(i), strides.get(i)) {
            (Some(&offset), Some(&stride)) => (offset, stride.max(0) as u32),
            _ => (0, 0),
        }
    };
    let (y_offset, y_stride) = plane(0);
    let (uv_offset, uv_stride) = plane(1);
    let (v_offset, v_stride) = if format == PixelFormat::I420 { plane(2) } else { (0, 0) };

    Ok(Some(RawFrame {
        width: info.width(),
        height: info.height(),
        format,
        layout: PlaneLayout {
            y_offset,
            y_stride,
            uv_offset,
            uv_stride,
            v_offset,
            v_stride,
        },
        data: FrameData::Mapped(mapped),
        pts_ns,
    }))
}

impl CaptureDevice for GStreamerDevice {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::GStreamer
    }

    fn open_session(
        &mut self,
        config: &CaptureConfig,
        callback: EventCallback,
    ) -> BackendResult<()> {
        self.close();

        gstreamer::init().map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let device_path = self.paths.for_position(config.position);
        let description = launch_description(config, device_path);
        info!(position = %config.position, pipeline = %description, "Opening GStreamer session");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| {
                BackendError::InitializationFailed("Launch line is not a pipeline".to_string())
            })?;

        let appsink = pipeline
            .by_name(pipeline::SINK_NAME)
            .ok_or_else(|| BackendError::InitializationFailed("Failed to get appsink".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| BackendError::InitializationFailed("Failed to cast appsink".to_string()))?;

        appsink.set_property("emit-signals", true);
        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let shared: SharedCallback = Arc::new(Mutex::new(Some(callback)));
        let sample_callback = Arc::clone(&shared);
        let frame_counter = Arc::new(AtomicU64::new(0));
        let position = config.position;

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_num = frame_counter.fetch_add(1, Ordering::Relaxed);
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;

                    let event = match frame_from_sample(&sample) {
                        Ok(Some(frame)) => DeviceEvent::Frame(frame),
                        Ok(None) => {
                            if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                                warn!(
                                    frame = frame_num,
                                    "Buffer marked as corrupted, skipping frame"
                                );
                            }
                            return Ok(gstreamer::FlowSuccess::Ok);
                        }
                        Err(e) => DeviceEvent::Error(e),
                    };

                    if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(frame = frame_num, position = %position, "Sample received");
                    }

                    match sample_callback.lock().as_mut() {
                        Some(deliver) => {
                            deliver(event);
                            Ok(gstreamer::FlowSuccess::Ok)
                        }
                        None => Err(gstreamer::FlowError::Flushing),
                    }
                })
                .build(),
        );

        if let Some(bus) = pipeline.bus() {
            let bus_callback = Arc::clone(&shared);
            bus.set_sync_handler(move |_, message| {
                if let gstreamer::MessageView::Error(err) = message.view() {
                    let debug_info = err.debug().map(|d| d.to_string());
                    let backend_error = backend_error_from(&err.error(), debug_info);
                    error!(error = %backend_error, "GStreamer pipeline error");
                    if let Some(deliver) = bus_callback.lock().as_mut() {
                        deliver(DeviceEvent::Error(backend_error));
                    }
                }
                gstreamer::BusSyncReply::Pass
            });
        }

        // v4l2src opens the device on READY, so access problems surface here
        if pipeline.set_state(gstreamer::State::Ready).is_err() {
            let error = pipeline
                .bus()
                .and_then(|bus| bus.pop_filtered(&[gstreamer::MessageType::Error]))
                .and_then(|message| match message.view() {
                    gstreamer::MessageView::Error(err) => {
                        Some(backend_error_from(&err.error(), err.debug().map(|d| d.to_string())))
                    }
                    _ => None,
                })
                .unwrap_or_else(|| {
                    BackendError::DeviceUnavailable(
                        device_path.unwrap_or("videotestsrc").to_string(),
                    )
                });
            Session {
                pipeline,
                appsink,
                callback: shared,
                config: *config,
            }
            .shutdown();
            return Err(error);
        }

        self.session = Some(Session {
            pipeline,
            appsink,
            callback: shared,
            config: *config,
        });
        Ok(())
    }

    fn start(&mut self) -> BackendResult<()> {
        let session = self.session.as_ref().ok_or(BackendError::NoSession)?;

        session
            .pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| {
                BackendError::DeviceUnavailable(format!("Failed to start pipeline: {}", e))
            })?;

        let (result, state, pending) = session
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(timing::START_TIMEOUT_SECS));
        debug!(result = ?result, state = ?state, pending = ?pending, "Pipeline state");
        if state != gstreamer::State::Playing {
            warn!("Pipeline is not in PLAYING state");
        }
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        let session = self.session.as_ref().ok_or(BackendError::NoSession)?;
        session
            .pipeline
            .set_state(gstreamer::State::Paused)
            .map_err(|e| BackendError::StreamError(format!("Failed to pause pipeline: {}", e)))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for GStreamerDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_description_with_device() {
        let config = CaptureConfig::for_side(Side::Front).with_resolution(640, 480);
        let line = launch_description(&config, Some("/dev/video2"));
        assert!(line.starts_with("v4l2src device=/dev/video2 !"));
        assert!(line.contains("format=NV12,width=640,height=480,framerate=30/1"));
        assert!(line.ends_with("appsink name=sink"));
    }

    #[test]
    fn test_launch_description_falls_back_to_test_source() {
        let config = CaptureConfig::for_side(Side::Back);
        assert!(launch_description(&config, None).starts_with("videotestsrc is-live=true"));
    }

    #[test]
    fn test_start_without_session() {
        let mut device = GStreamerDevice::new(DevicePaths::default());
        assert_eq!(device.start(), Err(BackendError::NoSession));
        assert!(!device.is_open());
    }
}
