// SPDX-License-Identifier: GPL-3.0-only

//! CPU reference backend
//!
//! Implements the same colour transform and mip downsample as the WGSL
//! programs. Used when no GPU adapter is available and by tests. An optional
//! memory budget makes allocation failures reproducible.

use super::{
    GpuBackend, GpuError, ProgramId, ProgramInputs, TextureDesc, TextureFormat, TextureHandle,
};
use crate::constants::limits;
use crate::shaders::unorm_to_u8;
use std::collections::HashMap;
use tracing::debug;

struct SoftTexture {
    desc: TextureDesc,
    /// One tightly packed buffer per mip level
    levels: Vec<Vec<u8>>,
}

impl SoftTexture {
    fn byte_size(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    fn texel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        let x = x.min(self.desc.width - 1) as usize;
        let y = y.min(self.desc.height - 1) as usize;
        let offset = (y * self.desc.width as usize + x) * bpp;
        &self.levels[0][offset..offset + bpp]
    }
}

/// CPU implementation of [`GpuBackend`]
pub struct SoftwareBackend {
    textures: HashMap<u64, SoftTexture>,
    next_id: u64,
    memory_budget: Option<usize>,
    max_dimension: u32,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            next_id: 1,
            memory_budget: None,
            max_dimension: limits::MAX_DIMENSION,
        }
    }

    /// Fail allocations once live textures would exceed `bytes`
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Bytes held by live textures
    pub fn allocated_bytes(&self) -> usize {
        self.textures.values().map(SoftTexture::byte_size).sum()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn texture(&self, handle: TextureHandle) -> Result<&SoftTexture, GpuError> {
        self.textures
            .get(&handle.0)
            .ok_or(GpuError::UnknownTexture(handle))
    }

    fn convert(&self, inputs: &ProgramInputs, target: &mut SoftTexture) -> Result<(), GpuError> {
        let [y_handle, uv_handle, v_handle] = inputs.planes;
        let tex_y = self.texture(y_handle)?;
        let tex_uv = self.texture(uv_handle)?;
        let tex_v = self.texture(v_handle)?;
        let params = &inputs.params;

        let width = params.width.min(target.desc.width);
        let height = params.height.min(target.desc.height);
        let row_len = target.desc.width as usize * 4;
        let output = &mut target.levels[0];

        for y in 0..height {
            for x in 0..width {
                let luma = tex_y.texel(x, y)[0];
                let (cx, cy) = (x / 2, y / 2);
                let (u, v) = match params.format {
                    // NV21 stores V before U
                    3 => {
                        let vu = tex_uv.texel(cx, cy);
                        (vu[1], vu[0])
                    }
                    2 => (tex_uv.texel(cx, cy)[0], tex_v.texel(cx, cy)[0]),
                    _ => {
                        let uv = tex_uv.texel(cx, cy);
                        (uv[0], uv[1])
                    }
                };
                let [r, g, b] = params.yuv_to_rgb(luma, u, v).map(unorm_to_u8);
                let offset = y as usize * row_len + x as usize * 4;
                let texel = if params.swap_rb != 0 { [b, g, r, 255] } else { [r, g, b, 255] };
                output[offset..offset + 4].copy_from_slice(&texel);
            }
        }
        Ok(())
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError> {
        if desc.width == 0
            || desc.height == 0
            || desc.width > self.max_dimension
            || desc.height > self.max_dimension
        {
            return Err(GpuError::Allocation(format!(
                "texture size {}x{} outside 1..={}",
                desc.width, desc.height, self.max_dimension
            )));
        }

        let bpp = desc.format.bytes_per_pixel() as usize;
        let levels: Vec<Vec<u8>> = (0..desc.mip_levels)
            .map(|level| {
                let w = (desc.width >> level).max(1) as usize;
                let h = (desc.height >> level).max(1) as usize;
                vec![0u8; w * h * bpp]
            })
            .collect();
        let size: usize = levels.iter().map(Vec::len).sum();

        if let Some(budget) = self.memory_budget {
            let used = self.allocated_bytes();
            if used + size > budget {
                return Err(GpuError::Allocation(format!(
                    "{} bytes requested, {} of {} in use",
                    size, used, budget
                )));
            }
        }

        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle.0, SoftTexture { desc: *desc, levels });
        debug!(
            texture = %handle,
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            "Texture created"
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        self.textures
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(GpuError::UnknownTexture(handle))
    }

    fn upload(
        &mut self,
        handle: TextureHandle,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError> {
        let texture = self
            .textures
            .get_mut(&handle.0)
            .ok_or(GpuError::UnknownTexture(handle))?;
        let desc = texture.desc;
        let row_len = desc.width as usize * desc.format.bytes_per_pixel() as usize;
        let stride = bytes_per_row as usize;
        if stride < row_len {
            return Err(GpuError::InvalidUpload(format!(
                "stride {} shorter than row {}",
                stride, row_len
            )));
        }
        let needed = stride * (desc.height as usize - 1) + row_len;
        if data.len() < needed {
            return Err(GpuError::InvalidUpload(format!(
                "{} bytes supplied, {} needed",
                data.len(),
                needed
            )));
        }

        let level0 = &mut texture.levels[0];
        for row in 0..desc.height as usize {
            let src = &data[row * stride..row * stride + row_len];
            level0[row * row_len..(row + 1) * row_len].copy_from_slice(src);
        }
        Ok(())
    }

    fn run_program(
        &mut self,
        program: ProgramId,
        inputs: &ProgramInputs,
        target: TextureHandle,
    ) -> Result<(), GpuError> {
        match program {
            ProgramId::YuvToRgb => {
                // Take the target out so the input planes can be borrowed alongside it
                let mut output = self
                    .textures
                    .remove(&target.0)
                    .ok_or(GpuError::UnknownTexture(target))?;
                let result = self.convert(inputs, &mut output);
                self.textures.insert(target.0, output);
                result
            }
        }
    }

    fn generate_mipmaps(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        let texture = self
            .textures
            .get_mut(&handle.0)
            .ok_or(GpuError::UnknownTexture(handle))?;
        let bpp = texture.desc.format.bytes_per_pixel() as usize;

        for level in 1..texture.levels.len() {
            let src_w = (texture.desc.width >> (level - 1)).max(1) as usize;
            let src_h = (texture.desc.height >> (level - 1)).max(1) as usize;
            let dst_w = (texture.desc.width >> level).max(1) as usize;
            let dst_h = (texture.desc.height >> level).max(1) as usize;

            let (head, tail) = texture.levels.split_at_mut(level);
            let src = &head[level - 1];
            let dst = &mut tail[0];

            for y in 0..dst_h {
                for x in 0..dst_w {
                    let x0 = (2 * x).min(src_w - 1);
                    let x1 = (2 * x + 1).min(src_w - 1);
                    let y0 = (2 * y).min(src_h - 1);
                    let y1 = (2 * y + 1).min(src_h - 1);
                    for c in 0..bpp {
                        let sum: u32 = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)]
                            .iter()
                            .map(|&(sx, sy)| src[(sy * src_w + sx) * bpp + c] as u32)
                            .sum();
                        dst[(y * dst_w + x) * bpp + c] = ((sum + 2) / 4) as u8;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_texture(&mut self, handle: TextureHandle) -> Result<Vec<u8>, GpuError> {
        Ok(self.texture(handle)?.levels[0].clone())
    }

    fn texture_desc(&self, handle: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&handle.0).map(|t| t.desc)
    }
}
