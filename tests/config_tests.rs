// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use camera_pipeline::backends::camera::{CameraPosition, Side};
use camera_pipeline::config::{PipelineConfig, Routing};
use camera_pipeline::errors::ConfigError;
use camera_pipeline::render::{CompositionPolicy, OutputFormat};
use camera_pipeline::shaders::{ColorMatrix, ColorRange};

#[test]
fn test_config_default() {
    let config = PipelineConfig::default();

    assert!(config.dual, "Both cameras should run by default");
    assert_eq!(config.routing, Routing::Queue);
    assert_eq!(
        config.composition,
        CompositionPolicy::PictureInPicture {
            main: Side::Back,
            inset: Side::Front
        }
    );
    assert_eq!(config.front.position, CameraPosition::Front);
    assert_eq!(config.back.position, CameraPosition::Back);
}

#[test]
fn test_full_json_document() {
    let json = r#"{
        "front": { "position": "back", "width": 640, "height": 480 },
        "back": { "position": "front", "width": 1920, "height": 1080, "framerate": 60 },
        "queue_capacity": 5,
        "routing": "direct",
        "colorimetry": { "matrix": "Bt709", "range": "Full" },
        "composition": "side_by_side",
        "texture_options": { "format": "bgra8", "mipmaps": true },
        "gpu": "software",
        "device_paths": { "front": "/dev/video2" }
    }"#;
    let config = PipelineConfig::from_json(json).unwrap();

    assert_eq!(config.front.position, CameraPosition::Back);
    assert_eq!((config.front.width, config.front.height), (640, 480));
    assert_eq!(config.front.framerate, 30);
    assert_eq!(config.back.framerate, 60);
    assert_eq!(config.queue_capacity, 5);
    assert_eq!(config.routing, Routing::Direct);
    assert_eq!(config.colorimetry.matrix, ColorMatrix::Bt709);
    assert_eq!(config.colorimetry.range, ColorRange::Full);
    assert_eq!(config.composition, CompositionPolicy::SideBySide);
    assert_eq!(config.texture_options.format, OutputFormat::Bgra8);
    assert!(config.texture_options.mipmaps);
    assert_eq!(config.device_paths.front.as_deref(), Some("/dev/video2"));
    assert_eq!(config.device_paths.back, None);
}

#[test]
fn test_odd_resolution_rejected() {
    let json = r#"{ "front": { "position": "front", "width": 641, "height": 480 } }"#;
    assert_eq!(
        PipelineConfig::from_json(json),
        Err(ConfigError::InvalidResolution {
            width: 641,
            height: 480
        })
    );
}

#[test]
fn test_single_mode_ignores_back_slot() {
    let mut config = PipelineConfig {
        dual: false,
        ..PipelineConfig::default()
    };
    config.back.width = 0;
    assert!(config.validate().is_ok());

    config.dual = true;
    assert!(config.validate().is_err());
}

#[test]
fn test_capacity_above_limit_rejected() {
    let config = PipelineConfig {
        queue_capacity: 1000,
        ..PipelineConfig::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::InvalidCapacity(1000)));
}

#[test]
fn test_save_and_load() {
    let dir = std::env::temp_dir().join(format!("camera-pipeline-config-{}", std::process::id()));
    let path = dir.join("nested").join("config.json");

    let mut config = PipelineConfig::default();
    config.capture_mut(Side::Back).width = 640;
    config.capture_mut(Side::Back).height = 360;
    config.composition = CompositionPolicy::Single(Side::Back);
    config.save(&path).unwrap();

    let loaded = PipelineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_load_missing_file_fails() {
    let path = std::env::temp_dir().join("camera-pipeline-does-not-exist.json");
    assert!(PipelineConfig::load(&path).is_err());
}
