// SPDX-License-Identifier: GPL-3.0-only

//! Render sink: per-side targets, composition and presentation
//!
//! The sink owns one [`RenderTarget`] per side and the optional preview
//! surface. Its capability flags are published on a `watch` channel so the
//! capture and render threads can read them without taking the sink lock.

use super::{OutputFormat, OutputTexture, RenderTarget, TextureOptions};
use crate::backends::camera::{Side, SideMap};
use crate::errors::AppError;
use crate::gpu::{GpuContext, GpuError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Flags describing what downstream features are active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkCapabilities {
    /// A preview surface is attached
    pub preview_attached: bool,
    /// Converted textures are read back or shared downstream
    pub texture_export: bool,
    /// The sink accepts frames from the sources at all
    pub raw_samples: bool,
    /// Format and mip chain requested for converted textures
    pub texture_options: TextureOptions,
}

impl Default for SinkCapabilities {
    fn default() -> Self {
        Self {
            preview_attached: false,
            texture_export: false,
            raw_samples: true,
            texture_options: TextureOptions::default(),
        }
    }
}

impl SinkCapabilities {
    /// Whether frames should be routed towards conversion
    pub fn wants_frames(&self) -> bool {
        self.raw_samples && (self.preview_attached || self.texture_export)
    }
}

/// How the two sides share the preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionPolicy {
    /// Only one side is shown, full size
    Single(Side),
    /// Front on the left half, back on the right half
    SideBySide,
    /// `main` fills the surface, `inset` sits in the bottom-right corner above it
    PictureInPicture { main: Side, inset: Side },
}

impl Default for CompositionPolicy {
    fn default() -> Self {
        CompositionPolicy::Single(Side::Front)
    }
}

/// Normalised rectangle on the preview surface (0.0..=1.0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const FULL: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };
}

/// Where a side's texture goes on the preview surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub side: Side,
    pub rect: Rect,
    /// Higher values are drawn on top
    pub z_order: u32,
}

/// Inset size of the picture-in-picture layout, relative to the surface
const INSET_SCALE: f32 = 0.3;
/// Inset margin from the surface edges
const INSET_MARGIN: f32 = 0.02;

impl CompositionPolicy {
    /// Placement of `side`, or `None` when the side is not shown
    pub fn placement(&self, side: Side) -> Option<Placement> {
        match *self {
            CompositionPolicy::Single(shown) => (shown == side).then_some(Placement {
                side,
                rect: Rect::FULL,
                z_order: 0,
            }),
            CompositionPolicy::SideBySide => {
                let x = match side {
                    Side::Front => 0.0,
                    Side::Back => 0.5,
                };
                Some(Placement {
                    side,
                    rect: Rect {
                        x,
                        y: 0.0,
                        width: 0.5,
                        height: 1.0,
                    },
                    z_order: 0,
                })
            }
            CompositionPolicy::PictureInPicture { main, inset } => {
                if side == main {
                    Some(Placement {
                        side,
                        rect: Rect::FULL,
                        z_order: 0,
                    })
                } else if side == inset {
                    let offset = 1.0 - INSET_SCALE - INSET_MARGIN;
                    Some(Placement {
                        side,
                        rect: Rect {
                            x: offset,
                            y: offset,
                            width: INSET_SCALE,
                            height: INSET_SCALE,
                        },
                        z_order: 1,
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// Screen-side collaborator that composites presented textures
pub trait PreviewSurface: Send {
    fn present(&mut self, texture: &OutputTexture, placement: Placement);
}

/// What happened to a presented texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Handed to the preview surface
    Presented,
    /// Kept for export; the policy does not show this side
    Hidden,
    /// Kept for export; no surface attached
    NoSurface,
    /// Ignored; the side holds its last good frame
    Frozen,
}

/// Owner of the render targets and the preview surface
pub struct RenderSink {
    context: Arc<GpuContext>,
    targets: SideMap<RenderTarget>,
    surface: Option<Box<dyn PreviewSurface>>,
    policy: CompositionPolicy,
    frozen: SideMap<bool>,
    last_presented: SideMap<Option<OutputTexture>>,
    presented: SideMap<u64>,
    capabilities: watch::Sender<SinkCapabilities>,
}

impl std::fmt::Debug for RenderSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSink")
            .field("context", &self.context.id())
            .field("policy", &self.policy)
            .field("frozen", &self.frozen)
            .field("capabilities", &*self.capabilities.borrow())
            .finish()
    }
}

impl RenderSink {
    pub fn new(
        context: Arc<GpuContext>,
        policy: CompositionPolicy,
        texture_options: TextureOptions,
    ) -> Self {
        let (capabilities, _) = watch::channel(SinkCapabilities {
            texture_options,
            ..SinkCapabilities::default()
        });
        Self {
            targets: SideMap::from_fn(|side| RenderTarget::new(Arc::clone(&context), side)),
            context,
            surface: None,
            policy,
            frozen: SideMap::default(),
            last_presented: SideMap::default(),
            presented: SideMap::default(),
            capabilities,
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Receiver for the capability flags
    pub fn subscribe(&self) -> watch::Receiver<SinkCapabilities> {
        self.capabilities.subscribe()
    }

    pub fn capabilities(&self) -> SinkCapabilities {
        *self.capabilities.borrow()
    }

    pub fn target(&self, side: Side) -> &RenderTarget {
        &self.targets[side]
    }

    pub fn target_mut(&mut self, side: Side) -> &mut RenderTarget {
        &mut self.targets[side]
    }

    pub fn attach_surface(&mut self, surface: Box<dyn PreviewSurface>) {
        self.surface = Some(surface);
        self.capabilities.send_modify(|caps| caps.preview_attached = true);
        info!("Preview surface attached");
    }

    pub fn detach_surface(&mut self) -> Option<Box<dyn PreviewSurface>> {
        let surface = self.surface.take();
        self.capabilities.send_modify(|caps| caps.preview_attached = false);
        if surface.is_some() {
            info!("Preview surface detached");
        }
        surface
    }

    pub fn set_texture_export(&mut self, enabled: bool) {
        self.capabilities.send_modify(|caps| caps.texture_export = enabled);
    }

    /// Stop or resume accepting frames from the sources
    pub fn set_accepting(&mut self, accepting: bool) {
        self.capabilities.send_modify(|caps| caps.raw_samples = accepting);
    }

    /// Request new texture options; targets reallocate on their next conversion
    pub fn set_texture_options(&mut self, options: TextureOptions) {
        self.capabilities.send_modify(|caps| caps.texture_options = options);
    }

    pub fn policy(&self) -> CompositionPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: CompositionPolicy) {
        debug!(?policy, "Composition policy changed");
        self.policy = policy;
    }

    /// Present a converted texture for `side`
    pub fn present(&mut self, texture: OutputTexture, side: Side) -> PresentOutcome {
        if self.frozen[side] {
            return PresentOutcome::Frozen;
        }
        self.last_presented[side] = Some(texture);
        self.presented[side] += 1;

        let Some(surface) = self.surface.as_mut() else {
            return PresentOutcome::NoSurface;
        };
        match self.policy.placement(side) {
            Some(placement) => {
                surface.present(&texture, placement);
                PresentOutcome::Presented
            }
            None => PresentOutcome::Hidden,
        }
    }

    /// Hold the last good frame of `side`, ignoring new ones until thawed
    pub fn freeze(&mut self, side: Side) {
        if !self.frozen[side] {
            info!(side = %side, "Preview frozen on last good frame");
            self.frozen[side] = true;
        }
    }

    pub fn thaw(&mut self, side: Side) {
        if self.frozen[side] {
            info!(side = %side, "Preview resumed");
            self.frozen[side] = false;
        }
    }

    pub fn is_frozen(&self, side: Side) -> bool {
        self.frozen[side]
    }

    pub fn last_presented(&self, side: Side) -> Option<OutputTexture> {
        self.last_presented[side]
    }

    /// Textures presented for `side` so far
    pub fn presented_count(&self, side: Side) -> u64 {
        self.presented[side]
    }

    /// Read back the side's last presented texture (mip level 0)
    pub fn read_texture(&self, side: Side) -> Result<(OutputTexture, Vec<u8>), GpuError> {
        let texture = self.last_presented[side]
            .ok_or_else(|| GpuError::Readback(format!("nothing presented on {} side", side)))?;
        let data = self.context.make_current().read_texture(texture.handle)?;
        Ok((texture, data))
    }

    /// Read back the side's last presented texture as an RGBA image
    pub fn export_image(&self, side: Side) -> Result<image::RgbaImage, AppError> {
        let (texture, mut data) = self.read_texture(side)?;
        if texture.format == OutputFormat::Bgra8 {
            for pixel in data.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }
        image::RgbaImage::from_raw(texture.width, texture.height, data)
            .ok_or_else(|| AppError::Other("Readback size does not match texture".to_string()))
    }

    /// Free the side's render target; the next conversion allocates a new one
    pub fn release_target(&mut self, side: Side) {
        let mut gpu = self.context.make_current();
        self.targets[side].release(&mut gpu);
        self.last_presented[side] = None;
    }
}
