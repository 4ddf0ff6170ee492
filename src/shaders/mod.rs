// SPDX-License-Identifier: GPL-3.0-only
//! Shader sources and the colour math they implement
//!
//! The WGSL conversion program and the CPU reference path both take their
//! coefficients from [`ConvertParams`], so the two backends cannot drift.

use crate::backends::camera::PixelFormat;
use serde::{Deserialize, Serialize};

/// Luma/chroma to RGB compute shader
pub const YUV_TO_RGBA_SHADER: &str = include_str!("yuv_to_rgba.wgsl");

/// 2x2 box downsample used to fill mip chains
pub const MIPMAP_SHADER: &str = include_str!("mipmap.wgsl");

/// Luma/chroma matrix standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMatrix {
    /// ITU-R BT.601 (SD cameras, most webcams)
    #[default]
    Bt601,
    /// ITU-R BT.709 (HD cameras)
    Bt709,
}

impl ColorMatrix {
    /// Luma weights (Kr, Kb)
    fn luma_weights(&self) -> (f32, f32) {
        match self {
            ColorMatrix::Bt601 => (0.299, 0.114),
            ColorMatrix::Bt709 => (0.2126, 0.0722),
        }
    }

    /// Chroma contributions `[r_v, g_u, g_v, b_u]`
    ///
    /// R = Y + r_v·V, G = Y − g_u·U − g_v·V, B = Y + b_u·U
    pub fn coefficients(&self) -> [f32; 4] {
        let (kr, kb) = self.luma_weights();
        let kg = 1.0 - kr - kb;
        [
            2.0 * (1.0 - kr),
            2.0 * kb * (1.0 - kb) / kg,
            2.0 * kr * (1.0 - kr) / kg,
            2.0 * (1.0 - kb),
        ]
    }
}

/// Quantisation range of the luma/chroma samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorRange {
    /// Y in 16..=235, chroma in 16..=240
    #[default]
    Video,
    /// All samples use 0..=255
    Full,
}

/// Matrix and range used for conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Colorimetry {
    pub matrix: ColorMatrix,
    pub range: ColorRange,
}

/// Uniform buffer layout of the conversion program
///
/// Must match `ConvertParams` in `yuv_to_rgba.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvertParams {
    pub width: u32,
    pub height: u32,
    /// Format code: 1=NV12, 2=I420, 3=NV21
    pub format: u32,
    pub full_range: u32,
    /// Non-zero writes BGRA channel order
    pub swap_rb: u32,
    pub _pad: [u32; 3],
    /// `[r_v, g_u, g_v, b_u]`
    pub coeffs: [f32; 4],
}

impl ConvertParams {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        colorimetry: Colorimetry,
        swap_rb: bool,
    ) -> Self {
        Self {
            width,
            height,
            format: format.gpu_format_code(),
            full_range: u32::from(colorimetry.range == ColorRange::Full),
            swap_rb: u32::from(swap_rb),
            _pad: [0; 3],
            coeffs: colorimetry.matrix.coefficients(),
        }
    }

    /// Convert one sample triple to normalised RGB, as the shader does
    pub fn yuv_to_rgb(&self, y: u8, u: u8, v: u8) -> [f32; 3] {
        let (mut y, mut u, mut v) = (unorm(y), unorm(u), unorm(v));
        if self.full_range == 0 {
            y = (y - 16.0 / 255.0) * (255.0 / 219.0);
            u = (u - 128.0 / 255.0) * (255.0 / 224.0);
            v = (v - 128.0 / 255.0) * (255.0 / 224.0);
        } else {
            u -= 128.0 / 255.0;
            v -= 128.0 / 255.0;
        }
        let [r_v, g_u, g_v, b_u] = self.coeffs;
        [
            (y + r_v * v).clamp(0.0, 1.0),
            (y - g_u * u - g_v * v).clamp(0.0, 1.0),
            (y + b_u * u).clamp(0.0, 1.0),
        ]
    }
}

fn unorm(value: u8) -> f32 {
    value as f32 / 255.0
}

/// Store a normalised channel as an 8-bit unorm value (round to nearest)
#[inline]
pub fn unorm_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert one sample triple to 8-bit RGB with the given colorimetry
pub fn yuv_to_rgb8(y: u8, u: u8, v: u8, colorimetry: Colorimetry) -> [u8; 3] {
    let params = ConvertParams::new(1, 1, PixelFormat::NV12, colorimetry, false);
    params.yuv_to_rgb(y, u, v).map(unorm_to_u8)
}

/// Calculate compute shader dispatch size (workgroups needed)
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}

/// Number of mip levels in a full chain for the given size
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}
