// SPDX-License-Identifier: MPL-2.0

//! Camera Pipeline - dual-camera capture and GPU preview
//!
//! This library pulls planar luma/chroma frames from one or two cameras,
//! converts them into RGB textures on a dedicated GPU context and hands
//! them to a preview surface and to registered observers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture device abstraction (GStreamer, synthetic)
//! - [`pipeline`]: Frame queue, capture sources, coordinator and render loop
//! - [`render`]: Texture conversion, render targets and the render sink
//! - [`gpu`]: GPU context claiming and the wgpu/software backends
//! - [`shaders`]: WGSL programs and the colour transform
//! - [`config`]: Pipeline configuration
//!
//! # Example
//!
//! ```ignore
//! use camera_pipeline::{CameraPipeline, PipelineConfig};
//! use camera_pipeline::render::LoggingSurface;
//!
//! let pipeline = CameraPipeline::new(PipelineConfig::default())?;
//! pipeline.attach_surface(Box::new(LoggingSurface::default()));
//! pipeline.start();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipeline;
pub mod render;
pub mod shaders;

// Re-export commonly used types
pub use backends::camera::{CameraPosition, CaptureConfig, PixelFormat, PixelFrame, Side};
pub use config::PipelineConfig;
pub use errors::{AppError, AppResult};
pub use pipeline::{CameraPipeline, DualCaptureCoordinator, FrameQueue};
pub use render::{RenderSink, TextureConverter};
