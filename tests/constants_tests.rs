// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use camera_pipeline::backends::camera::validate_resolution;
use camera_pipeline::constants::{gpu, limits, timing};

#[test]
fn test_default_resolution_is_valid() {
    // Defaults must pass the same check as user-provided resolutions
    assert!(validate_resolution(limits::DEFAULT_WIDTH, limits::DEFAULT_HEIGHT).is_ok());
}

#[test]
fn test_max_dimension_boundary() {
    assert!(validate_resolution(limits::MAX_DIMENSION, 2).is_ok());
    assert!(validate_resolution(limits::MAX_DIMENSION + 2, 2).is_err());
}

#[test]
fn test_framerate_limits() {
    assert!(limits::DEFAULT_FRAMERATE > 0);
    assert!(limits::DEFAULT_FRAMERATE <= limits::MAX_FRAMERATE);
}

#[test]
fn test_direct_channel_is_small() {
    // A direct route should hold fewer frames than a queue may
    assert!(limits::DIRECT_CHANNEL_CAPACITY >= 1);
    assert!(limits::DIRECT_CHANNEL_CAPACITY <= limits::MAX_QUEUE_CAPACITY);
}

#[test]
fn test_render_poll_shorter_than_frame() {
    let frame_interval = std::time::Duration::from_secs(1) / limits::DEFAULT_FRAMERATE;
    assert!(timing::RENDER_POLL_INTERVAL < frame_interval);
}

#[test]
fn test_workgroup_sizes_power_of_two() {
    assert!(gpu::CONVERT_WORKGROUP_SIZE.is_power_of_two());
    assert!(gpu::MIPMAP_WORKGROUP_SIZE.is_power_of_two());
}
