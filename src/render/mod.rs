// SPDX-License-Identifier: GPL-3.0-only

//! Conversion and presentation
//!
//! - [`TextureConverter`]: frame planes to an RGB render target
//! - [`RenderSink`]: per-side targets, composition and the preview surface
//! - [`surfaces`]: preview surface implementations

pub mod converter;
pub mod sink;
pub mod surfaces;
pub mod target;

pub use converter::TextureConverter;
pub use sink::{
    CompositionPolicy, Placement, PresentOutcome, PreviewSurface, Rect, RenderSink,
    SinkCapabilities,
};
pub use surfaces::{LoggingSurface, RecordingSurface, SnapshotSurface};
pub use target::RenderTarget;

use crate::backends::camera::Side;
use crate::gpu::{TextureFormat, TextureHandle};
use serde::{Deserialize, Serialize};

/// Channel order of converted textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Rgba8,
    Bgra8,
}

impl OutputFormat {
    pub fn texture_format(&self) -> TextureFormat {
        match self {
            OutputFormat::Rgba8 => TextureFormat::Rgba8,
            OutputFormat::Bgra8 => TextureFormat::Bgra8,
        }
    }
}

/// Texture options requested by downstream consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextureOptions {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub mipmaps: bool,
}

/// Result of one conversion, valid until the side's next conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTexture {
    pub handle: TextureHandle,
    pub side: Side,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub mip_levels: u32,
    pub pts_ns: u64,
    pub sequence: u64,
    pub session: u64,
}
