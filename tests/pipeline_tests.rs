// SPDX-License-Identifier: MPL-2.0

//! End-to-end tests: capture devices through the render loop to a surface

use camera_pipeline::backends::camera::{
    BackendError, CameraPosition, CaptureConfig, CaptureDevice, ManualDevice, ManualTrigger,
    PixelFormat, PixelFrame, RawFrame, Side, SideMap, SyntheticDevice,
};
use camera_pipeline::config::{PipelineConfig, Routing};
use camera_pipeline::gpu::GpuContext;
use camera_pipeline::gpu::software::SoftwareBackend;
use camera_pipeline::pipeline::{
    CameraPipeline, CountingObserver, ObserverCapabilities, SampleObserver, SourceState,
    SourceStatus,
};
use camera_pipeline::render::{CompositionPolicy, RecordingSurface};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> PipelineConfig {
    PipelineConfig {
        front: CaptureConfig::new(CameraPosition::Front, 4, 4),
        back: CaptureConfig::new(CameraPosition::Back, 4, 4),
        composition: CompositionPolicy::SideBySide,
        ..PipelineConfig::default()
    }
}

fn software_context() -> Arc<GpuContext> {
    GpuContext::new("test", Box::new(SoftwareBackend::new()))
}

/// Pipeline on manual devices, with a recording surface attached
fn manual_pipeline(
    config: PipelineConfig,
) -> (CameraPipeline, SideMap<ManualTrigger>, RecordingSurface) {
    let (front_device, front) = ManualDevice::new();
    let (back_device, back) = ManualDevice::new();
    let mut devices = SideMap::new(Some(front_device), Some(back_device));

    let pipeline = CameraPipeline::with_devices(config, software_context(), |side| {
        Box::new(devices[side].take().unwrap()) as Box<dyn CaptureDevice>
    })
    .unwrap();

    let surface = RecordingSurface::new();
    pipeline.attach_surface(Box::new(surface.clone()));
    (pipeline, SideMap::new(front, back), surface)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn assert_started(pipeline: &CameraPipeline) {
    for (side, result) in pipeline.start().iter() {
        assert!(result.is_ok(), "{} failed to start: {:?}", side, result);
    }
}

#[test]
fn test_frames_reach_surface_per_side() {
    let (pipeline, triggers, surface) = manual_pipeline(test_config());
    assert_started(&pipeline);

    assert!(triggers[Side::Front].deliver_solid([81, 90, 240], 1));
    assert!(triggers[Side::Back].deliver_solid([41, 240, 110], 2));
    assert!(wait_until(|| surface.count(Side::Front) == 1 && surface.count(Side::Back) == 1));

    let presented = surface.presented();
    let placement = |side| {
        presented
            .iter()
            .find(|(t, _)| t.side == side)
            .map(|(_, p)| p.rect.x)
            .unwrap()
    };
    assert_eq!(placement(Side::Front), 0.0);
    assert_eq!(placement(Side::Back), 0.5);

    let image = pipeline.sink().lock().export_image(Side::Front).unwrap();
    let [r, g, b, a] = image.get_pixel(0, 0).0;
    assert!(r >= 250 && g <= 3 && b <= 3, "{:?}", (r, g, b));
    assert_eq!(a, 255);

    let stats = pipeline.render_stats(Side::Front);
    assert_eq!(stats.converted, 1);
    assert_eq!(stats.failed, 0);
}

#[test]
fn test_stop_cuts_off_delivery() {
    let (pipeline, triggers, surface) = manual_pipeline(test_config());
    assert_started(&pipeline);
    let front = &triggers[Side::Front];

    front.deliver_solid([128, 128, 128], 1);
    assert!(wait_until(|| surface.count(Side::Front) == 1));

    assert!(pipeline.stop()[Side::Front].is_ok());
    assert_eq!(pipeline.coordinator().state(Side::Front), Some(SourceState::Stopped));
    assert!(!front.is_started());

    // Late callbacks after stop are discarded at the source
    front.deliver_solid([128, 128, 128], 2);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(surface.count(Side::Front), 1);
    assert_eq!(pipeline.coordinator().stats(Side::Front).unwrap().discarded, 1);
}

#[test]
fn test_position_change_discards_in_flight_frames() {
    let (pipeline, triggers, surface) = manual_pipeline(test_config());
    assert_started(&pipeline);
    let front = &triggers[Side::Front];

    pipeline
        .coordinator()
        .change_position(Side::Front, CameraPosition::Back)
        .unwrap();
    assert_eq!(front.open_count(), 2);
    assert_eq!(front.config().map(|c| c.position), Some(CameraPosition::Back));
    assert!(front.is_started());

    // Frame from the torn-down session arrives late
    let stale = RawFrame::packed(PixelFormat::NV12, 4, 4, vec![128; 24], 999);
    front.deliver_to_session(0, stale);
    front.deliver_solid([128, 128, 128], 1000);

    assert!(wait_until(|| surface.count(Side::Front) == 1));
    thread::sleep(Duration::from_millis(50));
    let presented = surface.presented();
    assert!(presented.iter().all(|(t, _)| t.pts_ns != 999));
    assert_eq!(presented.len(), 1);
    assert_eq!(presented[0].0.pts_ns, 1000);
}

#[test]
fn test_resolution_change_discards_frame_waiting_to_render() {
    let (pipeline, triggers, surface) = manual_pipeline(test_config());
    assert_started(&pipeline);
    let front = &triggers[Side::Front];
    let coordinator = pipeline.coordinator();
    let watermark = pipeline.render_barrier().watermark(Side::Front);

    // Hold the render step: the frame is taken off the queue but not converted
    let sink = pipeline.sink().lock();
    assert!(front.deliver_solid([81, 90, 240], 1));
    assert!(wait_until(|| pipeline.queue_stats(Side::Front).unwrap().popped == 1));

    thread::scope(|scope| {
        let change = scope.spawn(move || coordinator.change_resolution(Side::Front, 8, 8));
        assert!(wait_until(|| pipeline.render_barrier().watermark(Side::Front) > watermark));
        drop(sink);
        change.join().unwrap().unwrap();
    });

    assert!(wait_until(|| pipeline.render_stats(Side::Front).stale == 1));
    assert_eq!(pipeline.render_stats(Side::Front).converted, 0);
    assert_eq!(surface.count(Side::Front), 0);

    assert!(front.deliver_solid([81, 90, 240], 2));
    assert!(wait_until(|| surface.count(Side::Front) == 1));
    let presented = surface.presented();
    assert_eq!((presented[0].0.width, presented[0].0.height), (8, 8));
    assert_eq!(presented[0].0.pts_ns, 2);
}

#[test]
fn test_stop_discards_direct_frame_waiting_to_render() {
    let config = PipelineConfig {
        routing: Routing::Direct,
        ..test_config()
    };
    let (pipeline, triggers, surface) = manual_pipeline(config);
    assert_started(&pipeline);
    let front = &triggers[Side::Front];
    let coordinator = pipeline.coordinator();
    let watermark = pipeline.render_barrier().watermark(Side::Front);

    let sink = pipeline.sink().lock();
    assert!(front.deliver_solid([128, 128, 128], 1));
    thread::sleep(Duration::from_millis(50));

    thread::scope(|scope| {
        let stop = scope.spawn(move || coordinator.stop(Side::Front));
        assert!(wait_until(|| pipeline.render_barrier().watermark(Side::Front) > watermark));
        drop(sink);
        stop.join().unwrap().unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    assert_eq!(surface.count(Side::Front), 0);
    assert_eq!(pipeline.render_stats(Side::Front).converted, 0);

    // A restarted session is not held back by the raised watermark
    assert!(pipeline.start()[Side::Front].is_ok());
    assert!(front.deliver_solid([128, 128, 128], 2));
    assert!(wait_until(|| surface.count(Side::Front) == 1));
    assert_eq!(surface.presented()[0].0.pts_ns, 2);
}

#[test]
fn test_failed_side_freezes_while_other_continues() {
    let (pipeline, triggers, surface) = manual_pipeline(test_config());
    assert_started(&pipeline);
    pipeline.poll_status();

    triggers[Side::Front].deliver_solid([81, 90, 240], 1);
    assert!(wait_until(|| surface.count(Side::Front) == 1));

    triggers[Side::Front].emit_error(BackendError::StreamError("unplugged".into()));
    let statuses = pipeline.poll_status();
    assert!(
        statuses
            .iter()
            .any(|s| matches!(s, SourceStatus::Failed { side: Side::Front, .. }))
    );
    assert!(pipeline.sink().lock().is_frozen(Side::Front));
    assert!(!pipeline.sink().lock().is_frozen(Side::Back));

    // A second error from the same session is not reported again
    triggers[Side::Front].emit_error(BackendError::StreamError("unplugged".into()));
    assert!(pipeline.poll_status().is_empty());

    for pts in 0..3 {
        triggers[Side::Back].deliver_solid([41, 240, 110], pts);
        assert!(wait_until(|| surface.count(Side::Back) == pts as usize + 1));
    }
    triggers[Side::Front].deliver_solid([81, 90, 240], 2);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(surface.count(Side::Front), 1);
    // Last good frame is still available
    assert!(pipeline.sink().lock().last_presented(Side::Front).is_some());

    pipeline.coordinator().retry(Side::Front).unwrap();
    let statuses = pipeline.poll_status();
    assert!(statuses.contains(&SourceStatus::Started { side: Side::Front }));
    assert!(!pipeline.sink().lock().is_frozen(Side::Front));

    triggers[Side::Front].deliver_solid([81, 90, 240], 3);
    assert!(wait_until(|| surface.count(Side::Front) == 2));
}

#[test]
fn test_start_after_failure_requires_retry() {
    let (pipeline, triggers, _surface) = manual_pipeline(test_config());
    assert_started(&pipeline);

    triggers[Side::Back].emit_error(BackendError::DeviceUnavailable("busy".into()));
    assert_eq!(pipeline.coordinator().state(Side::Back), Some(SourceState::Failed));
    assert!(pipeline.start()[Side::Back].is_err());
    assert!(pipeline.start()[Side::Front].is_ok());
}

#[test]
fn test_direct_routing_delivers_without_queue() {
    let config = PipelineConfig {
        routing: Routing::Direct,
        ..test_config()
    };
    let (pipeline, triggers, surface) = manual_pipeline(config);
    assert_started(&pipeline);
    assert!(pipeline.queue_stats(Side::Front).is_none());

    for pts in 0..4 {
        triggers[Side::Front].deliver_solid([128, 128, 128], pts);
        triggers[Side::Back].deliver_solid([128, 128, 128], pts);
    }
    assert!(wait_until(|| surface.count(Side::Front) >= 1 && surface.count(Side::Back) >= 1));

    // Whatever reaches the surface arrives in capture order
    let presented = surface.presented();
    for side in [Side::Front, Side::Back] {
        let pts: Vec<u64> = presented
            .iter()
            .filter(|(t, _)| t.side == side)
            .map(|(t, _)| t.pts_ns)
            .collect();
        assert!(pts.windows(2).all(|w| w[0] < w[1]), "{:?}", pts);
    }
}

#[test]
fn test_observers_get_samples_without_preview() {
    let (front_device, front) = ManualDevice::new();
    let config = PipelineConfig {
        dual: false,
        ..test_config()
    };
    let mut device = Some(front_device);
    let pipeline = CameraPipeline::with_devices(config, software_context(), |_| {
        Box::new(device.take().unwrap()) as Box<dyn CaptureDevice>
    })
    .unwrap();
    assert!(!pipeline.coordinator().is_attached(Side::Back));

    let observer = Arc::new(CountingObserver::new(ObserverCapabilities::RAW_SAMPLES));
    pipeline.add_observer(observer.clone());
    assert_started(&pipeline);

    for pts in 0..3 {
        assert!(front.deliver_solid([128, 128, 128], pts));
    }
    // Sample callbacks run on the delivering thread
    assert_eq!(observer.samples(Side::Front), 3);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pipeline.render_stats(Side::Front).converted, 0);
    assert_eq!(pipeline.coordinator().stats(Side::Front).unwrap().routed, 0);
}

#[test]
fn test_texture_observers_follow_presentation() {
    let (pipeline, triggers, surface) = manual_pipeline(test_config());
    let observer = Arc::new(CountingObserver::new(ObserverCapabilities::TEXTURES));
    pipeline.add_observer(observer.clone());
    assert_started(&pipeline);

    triggers[Side::Back].deliver_solid([128, 128, 128], 1);
    assert!(wait_until(|| observer.textures(Side::Back) == 1));
    assert_eq!(surface.count(Side::Back), 1);
    assert_eq!(observer.samples(Side::Back), 0);
}

/// Records sequence numbers seen on the capture threads
#[derive(Default)]
struct SequenceObserver {
    seen: Mutex<Vec<(Side, u64)>>,
}

impl SampleObserver for SequenceObserver {
    fn capabilities(&self) -> ObserverCapabilities {
        ObserverCapabilities::RAW_SAMPLES
    }

    fn on_sample_ready(&self, frame: &PixelFrame, side: Side) {
        assert_eq!(frame.side, side);
        self.seen.lock().push((side, frame.sequence));
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_synthetic_devices_stream_both_sides() {
    let pipeline = CameraPipeline::with_devices(test_config(), software_context(), |_| {
        Box::new(SyntheticDevice::new()) as Box<dyn CaptureDevice>
    })
    .unwrap();
    let surface = RecordingSurface::new();
    pipeline.attach_surface(Box::new(surface.clone()));
    let observer = Arc::new(SequenceObserver::default());
    pipeline.add_observer(observer.clone());
    assert_started(&pipeline);

    assert!(wait_for(|| surface.count(Side::Front) >= 3 && surface.count(Side::Back) >= 3).await);
    pipeline.stop();

    let seen = observer.seen.lock().clone();
    for side in [Side::Front, Side::Back] {
        let sequences: Vec<u64> = seen
            .iter()
            .filter(|(s, _)| *s == side)
            .map(|(_, n)| *n)
            .collect();
        assert!(sequences.len() >= 3);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{:?}", sequences);
    }

    // Presented textures of one side never go backwards either
    let presented = surface.presented();
    let front: Vec<u64> = presented
        .iter()
        .filter(|(t, _)| t.side == Side::Front)
        .map(|(t, _)| t.sequence)
        .collect();
    assert!(front.windows(2).all(|w| w[0] < w[1]), "{:?}", front);
}

#[tokio::test]
async fn test_synthetic_failure_reported_once() {
    let pipeline = CameraPipeline::with_devices(test_config(), software_context(), |side| {
        let device = match side {
            Side::Front => SyntheticDevice::new()
                .failing_after(3, BackendError::StreamError("lost".into())),
            Side::Back => SyntheticDevice::new(),
        };
        Box::new(device) as Box<dyn CaptureDevice>
    })
    .unwrap();
    pipeline.attach_surface(Box::new(RecordingSurface::new()));
    assert_started(&pipeline);

    let mut failures = 0;
    let failed = wait_for(|| {
        failures += pipeline
            .poll_status()
            .iter()
            .filter(|s| matches!(s, SourceStatus::Failed { side: Side::Front, .. }))
            .count();
        failures > 0
    })
    .await;
    assert!(failed);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let again = pipeline
        .poll_status()
        .iter()
        .filter(|s| matches!(s, SourceStatus::Failed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(again, 0);
    assert_eq!(pipeline.coordinator().state(Side::Front), Some(SourceState::Failed));
    assert!(pipeline.coordinator().is_running(Side::Back));
}
