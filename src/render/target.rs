// SPDX-License-Identifier: GPL-3.0-only

//! Off-screen colour attachment for one side
//!
//! A target is created empty and gets its texture on the first conversion.
//! It is reallocated only when the frame size or the texture options
//! change, so a resolution change costs exactly one reallocation.

use super::TextureOptions;
use crate::backends::camera::Side;
use crate::gpu::{CurrentContext, GpuContext, GpuError, TextureDesc, TextureHandle};
use crate::shaders::mip_level_count;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Attachment {
    handle: TextureHandle,
    width: u32,
    height: u32,
    options: TextureOptions,
    mip_levels: u32,
}

/// GPU colour attachment owned by the render sink
pub struct RenderTarget {
    context: Arc<GpuContext>,
    side: Side,
    attachment: Option<Attachment>,
    allocations: u64,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("context", &self.context.id())
            .field("side", &self.side)
            .field("size", &self.size())
            .field("allocations", &self.allocations)
            .finish()
    }
}

impl RenderTarget {
    pub fn new(context: Arc<GpuContext>, side: Side) -> Self {
        Self {
            context,
            side,
            attachment: None,
            allocations: 0,
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.attachment.map(|a| a.handle)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.attachment.map(|a| (a.width, a.height))
    }

    pub fn mip_levels(&self) -> u32 {
        self.attachment.map(|a| a.mip_levels).unwrap_or(0)
    }

    /// Number of textures allocated over the target's lifetime
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Make sure the attachment matches the size and options, returning its handle
    ///
    /// `gpu` must be a claim on this target's context.
    pub fn prepare(
        &mut self,
        gpu: &mut CurrentContext<'_>,
        width: u32,
        height: u32,
        options: TextureOptions,
    ) -> Result<TextureHandle, GpuError> {
        debug_assert_eq!(gpu.context_id(), self.context.id());

        if let Some(attachment) = self.attachment {
            if attachment.width == width
                && attachment.height == height
                && attachment.options == options
            {
                return Ok(attachment.handle);
            }
            self.release(gpu);
        }

        let mip_levels = if options.mipmaps {
            mip_level_count(width, height)
        } else {
            1
        };
        let desc = TextureDesc::new(width, height, options.format.texture_format())
            .with_mip_levels(mip_levels);
        let handle = gpu.create_texture(&desc)?;
        self.allocations += 1;
        debug!(
            side = %self.side,
            width,
            height,
            mip_levels,
            allocations = self.allocations,
            "Render target allocated"
        );

        self.attachment = Some(Attachment {
            handle,
            width,
            height,
            options,
            mip_levels,
        });
        Ok(handle)
    }

    /// Destroy the attachment; the next `prepare` allocates again
    pub fn release(&mut self, gpu: &mut CurrentContext<'_>) {
        if let Some(attachment) = self.attachment.take()
            && let Err(e) = gpu.destroy_texture(attachment.handle)
        {
            warn!(side = %self.side, error = %e, "Failed to destroy render target");
        }
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if self.attachment.is_none() {
            return;
        }
        let context = Arc::clone(&self.context);
        match context.try_make_current() {
            Some(mut gpu) => self.release(&mut gpu),
            None => warn!(side = %self.side, "GPU context busy, render target texture leaked"),
        }
    }
}
