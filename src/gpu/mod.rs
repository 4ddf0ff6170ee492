// SPDX-License-Identifier: GPL-3.0-only

//! GPU context management for frame conversion
//!
//! A [`GpuContext`] wraps one GPU device behind a lock. GPU calls are only
//! reachable through the [`CurrentContext`] guard returned by
//! [`GpuContext::make_current`], which releases the context when dropped.
//! The guard also tracks the single framebuffer bound as conversion target.
//!
//! Two backends implement [`GpuBackend`]:
//! - [`wgpu_backend::WgpuBackend`]: compute shaders on a Vulkan device
//! - [`software::SoftwareBackend`]: CPU reference used when no adapter exists

pub mod software;
pub mod wgpu_backend;

use crate::shaders::ConvertParams;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, trace, warn};

pub use wgpu;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a texture owned by one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Texel formats used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    /// Single 8-bit channel (luma, U or V planes)
    R8,
    /// Two 8-bit channels (interleaved chroma)
    Rg8,
    /// RGBA 8-bit output
    #[default]
    Rgba8,
    /// BGRA 8-bit output
    Bgra8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgba8 | TextureFormat::Bgra8 => 4,
        }
    }

    /// Whether the format can be a conversion target
    pub fn is_color_output(&self) -> bool {
        matches!(self, TextureFormat::Rgba8 | TextureFormat::Bgra8)
    }
}

/// Texture creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
        }
    }

    pub fn with_mip_levels(self, mip_levels: u32) -> Self {
        Self {
            mip_levels: mip_levels.max(1),
            ..self
        }
    }

    /// Bytes of mip level 0 when tightly packed
    pub fn level0_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel() as usize
    }
}

/// GPU programs the backends know how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramId {
    /// Planar luma/chroma to RGB colour conversion
    YuvToRgb,
}

/// Inputs of one program dispatch
#[derive(Debug, Clone, Copy)]
pub struct ProgramInputs {
    /// Luma, chroma (UV or U) and V plane textures
    pub planes: [TextureHandle; 3],
    pub params: ConvertParams,
}

/// Errors raised by GPU backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// No usable adapter or device
    AdapterUnavailable(String),
    /// Texture or buffer allocation failed
    Allocation(String),
    /// Handle does not belong to this context
    UnknownTexture(TextureHandle),
    /// Program dispatched with no framebuffer bound
    NoFramebufferBound,
    /// Upload data does not match the texture
    InvalidUpload(String),
    /// Reading a texture back to the CPU failed
    Readback(String),
    /// The device was lost
    DeviceLost(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::AdapterUnavailable(msg) => write!(f, "No GPU adapter: {}", msg),
            GpuError::Allocation(msg) => write!(f, "GPU allocation failed: {}", msg),
            GpuError::UnknownTexture(handle) => write!(f, "Unknown texture {}", handle),
            GpuError::NoFramebufferBound => write!(f, "No framebuffer bound"),
            GpuError::InvalidUpload(msg) => write!(f, "Invalid upload: {}", msg),
            GpuError::Readback(msg) => write!(f, "Readback failed: {}", msg),
            GpuError::DeviceLost(msg) => write!(f, "GPU device lost: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// Device operations used by the converter and the sink
///
/// Implementations are single-threaded; [`GpuContext`] serialises access.
pub trait GpuBackend: Send {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Largest texture edge the device accepts
    fn max_texture_dimension(&self) -> u32;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError>;

    fn destroy_texture(&mut self, handle: TextureHandle) -> Result<(), GpuError>;

    /// Upload mip level 0 from rows spaced `bytes_per_row` apart
    fn upload(
        &mut self,
        handle: TextureHandle,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError>;

    /// Run a program writing mip level 0 of `target`
    fn run_program(
        &mut self,
        program: ProgramId,
        inputs: &ProgramInputs,
        target: TextureHandle,
    ) -> Result<(), GpuError>;

    /// Fill mip levels 1.. from level 0
    fn generate_mipmaps(&mut self, handle: TextureHandle) -> Result<(), GpuError>;

    /// Tightly packed mip level 0, in the texture's channel order
    fn read_texture(&mut self, handle: TextureHandle) -> Result<Vec<u8>, GpuError>;

    fn texture_desc(&self, handle: TextureHandle) -> Option<TextureDesc>;
}

/// Which backend to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPreference {
    /// wgpu when an adapter exists, software otherwise
    #[default]
    Auto,
    Wgpu,
    Software,
}

impl fmt::Display for GpuPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuPreference::Auto => write!(f, "auto"),
            GpuPreference::Wgpu => write!(f, "wgpu"),
            GpuPreference::Software => write!(f, "software"),
        }
    }
}

/// One GPU device, shared between the converter and the sink
pub struct GpuContext {
    id: u64,
    label: String,
    backend: Mutex<Box<dyn GpuBackend>>,
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    pub fn new(label: impl Into<String>, backend: Box<dyn GpuBackend>) -> Arc<Self> {
        let context = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            backend: Mutex::new(backend),
        };
        info!(
            id = context.id,
            label = %context.label,
            backend = context.backend.lock().name(),
            "GPU context created"
        );
        Arc::new(context)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Claim the context for the calling thread
    ///
    /// Blocks while another thread holds it. The claim ends when the guard
    /// is dropped, on every exit path.
    pub fn make_current(&self) -> CurrentContext<'_> {
        let backend = self.backend.lock();
        trace!(context = self.id, "GPU context claimed");
        CurrentContext {
            context_id: self.id,
            backend,
            bound: None,
        }
    }

    /// Claim the context only if no other claim is held
    pub fn try_make_current(&self) -> Option<CurrentContext<'_>> {
        let backend = self.backend.try_lock()?;
        Some(CurrentContext {
            context_id: self.id,
            backend,
            bound: None,
        })
    }
}

/// Exclusive claim on a [`GpuContext`]
pub struct CurrentContext<'a> {
    context_id: u64,
    backend: MutexGuard<'a, Box<dyn GpuBackend>>,
    bound: Option<TextureHandle>,
}

impl CurrentContext<'_> {
    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.backend.max_texture_dimension()
    }

    /// Bind `target` as the conversion framebuffer, replacing any previous binding
    pub fn bind_framebuffer(&mut self, target: TextureHandle) -> Result<(), GpuError> {
        match self.backend.texture_desc(target) {
            Some(desc) if desc.format.is_color_output() => {
                self.bound = Some(target);
                Ok(())
            }
            Some(desc) => Err(GpuError::InvalidUpload(format!(
                "{:?} texture cannot be a framebuffer",
                desc.format
            ))),
            None => Err(GpuError::UnknownTexture(target)),
        }
    }

    pub fn unbind_framebuffer(&mut self) {
        self.bound = None;
    }

    pub fn bound_framebuffer(&self) -> Option<TextureHandle> {
        self.bound
    }

    pub fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError> {
        self.backend.create_texture(desc)
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        if self.bound == Some(handle) {
            self.bound = None;
        }
        self.backend.destroy_texture(handle)
    }

    pub fn upload(
        &mut self,
        handle: TextureHandle,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError> {
        self.backend.upload(handle, data, bytes_per_row)
    }

    /// Run a program into the bound framebuffer
    pub fn run_program(
        &mut self,
        program: ProgramId,
        inputs: &ProgramInputs,
    ) -> Result<(), GpuError> {
        let target = self.bound.ok_or(GpuError::NoFramebufferBound)?;
        self.backend.run_program(program, inputs, target)
    }

    pub fn generate_mipmaps(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        self.backend.generate_mipmaps(handle)
    }

    pub fn read_texture(&mut self, handle: TextureHandle) -> Result<Vec<u8>, GpuError> {
        self.backend.read_texture(handle)
    }

    pub fn texture_desc(&self, handle: TextureHandle) -> Option<TextureDesc> {
        self.backend.texture_desc(handle)
    }
}

impl Drop for CurrentContext<'_> {
    fn drop(&mut self) {
        self.bound = None;
        trace!(context = self.context_id, "GPU context released");
    }
}

/// Create a GPU context for the requested backend
pub fn create_context(preference: GpuPreference, label: &str) -> Result<Arc<GpuContext>, GpuError> {
    match preference {
        GpuPreference::Software => Ok(GpuContext::new(
            label,
            Box::new(software::SoftwareBackend::new()),
        )),
        GpuPreference::Wgpu => {
            let backend = pollster::block_on(wgpu_backend::WgpuBackend::new(label))?;
            Ok(GpuContext::new(label, Box::new(backend)))
        }
        GpuPreference::Auto => match pollster::block_on(wgpu_backend::WgpuBackend::new(label)) {
            Ok(backend) => Ok(GpuContext::new(label, Box::new(backend))),
            Err(e) => {
                warn!(error = %e, "wgpu unavailable, falling back to software conversion");
                Ok(GpuContext::new(
                    label,
                    Box::new(software::SoftwareBackend::new()),
                ))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn software_context() -> Arc<GpuContext> {
        GpuContext::new("test", Box::new(software::SoftwareBackend::new()))
    }

    #[test]
    fn test_run_program_requires_bound_framebuffer() {
        let context = software_context();
        let mut current = context.make_current();
        let plane = current
            .create_texture(&TextureDesc::new(2, 2, TextureFormat::R8))
            .unwrap();
        let inputs = ProgramInputs {
            planes: [plane; 3],
            params: bytemuck::Zeroable::zeroed(),
        };
        assert_eq!(
            current.run_program(ProgramId::YuvToRgb, &inputs),
            Err(GpuError::NoFramebufferBound)
        );
    }

    #[test]
    fn test_plane_texture_cannot_be_framebuffer() {
        let context = software_context();
        let mut current = context.make_current();
        let plane = current
            .create_texture(&TextureDesc::new(2, 2, TextureFormat::R8))
            .unwrap();
        assert!(current.bind_framebuffer(plane).is_err());
        assert_eq!(current.bound_framebuffer(), None);
    }

    #[test]
    fn test_binding_released_with_guard() {
        let context = software_context();
        let target = {
            let mut current = context.make_current();
            let target = current
                .create_texture(&TextureDesc::new(2, 2, TextureFormat::Rgba8))
                .unwrap();
            current.bind_framebuffer(target).unwrap();
            assert_eq!(current.bound_framebuffer(), Some(target));
            target
        };
        let current = context.make_current();
        assert_eq!(current.bound_framebuffer(), None);
        assert!(current.texture_desc(target).is_some());
    }

    #[test]
    fn test_contexts_have_distinct_ids() {
        assert_ne!(software_context().id(), software_context().id());
    }

    #[test]
    fn test_software_preference_never_fails() {
        let context = create_context(GpuPreference::Software, "test").unwrap();
        assert_eq!(context.make_current().backend_name(), "software");
    }
}
