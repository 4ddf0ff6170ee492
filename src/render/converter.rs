// SPDX-License-Identifier: GPL-3.0-only

//! Frame to texture conversion
//!
//! Each conversion claims the GPU context, uploads the luma plane as R8 and
//! the chroma as RG8 (semi-planar) or two R8 planes (I420), runs the colour
//! program into the side's render target and releases the context. Plane
//! textures are cached per side and only recreated when the frame geometry
//! or format changes.

use super::{OutputTexture, RenderTarget, SinkCapabilities, TextureOptions};
use crate::backends::camera::{PixelFormat, PixelFrame, Side, SideMap};
use crate::errors::ConvertError;
use crate::gpu::{
    CurrentContext, GpuContext, GpuError, ProgramId, ProgramInputs, TextureDesc, TextureFormat,
    TextureHandle,
};
use crate::render::OutputFormat;
use crate::shaders::{Colorimetry, ConvertParams};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct PlaneSet {
    format: PixelFormat,
    width: u32,
    height: u32,
    y: TextureHandle,
    uv: TextureHandle,
    v: TextureHandle,
}

impl PlaneSet {
    fn matches(&self, frame: &PixelFrame) -> bool {
        self.format == frame.format && self.width == frame.width && self.height == frame.height
    }

    fn create(gpu: &mut CurrentContext<'_>, frame: &PixelFrame) -> Result<Self, GpuError> {
        let (cw, ch) = (frame.width / 2, frame.height / 2);
        let uv_format = if frame.format.is_semi_planar() {
            TextureFormat::Rg8
        } else {
            TextureFormat::R8
        };
        // Semi-planar formats bind a 1x1 placeholder for the unused V plane
        let v_size = match frame.format {
            PixelFormat::I420 => (cw, ch),
            _ => (1, 1),
        };

        let y = gpu.create_texture(&TextureDesc::new(
            frame.width,
            frame.height,
            TextureFormat::R8,
        ))?;
        let uv = match gpu.create_texture(&TextureDesc::new(cw, ch, uv_format)) {
            Ok(uv) => uv,
            Err(e) => {
                let _ = gpu.destroy_texture(y);
                return Err(e);
            }
        };
        let v = match gpu.create_texture(&TextureDesc::new(v_size.0, v_size.1, TextureFormat::R8)) {
            Ok(v) => v,
            Err(e) => {
                let _ = gpu.destroy_texture(y);
                let _ = gpu.destroy_texture(uv);
                return Err(e);
            }
        };

        Ok(Self {
            format: frame.format,
            width: frame.width,
            height: frame.height,
            y,
            uv,
            v,
        })
    }

    fn destroy(self, gpu: &mut CurrentContext<'_>) {
        for handle in [self.y, self.uv, self.v] {
            if let Err(e) = gpu.destroy_texture(handle) {
                debug!(error = %e, "Failed to destroy plane texture");
            }
        }
    }
}

/// Converts pixel frames into RGB textures on one GPU context
pub struct TextureConverter {
    context: Arc<GpuContext>,
    colorimetry: Colorimetry,
    capabilities: watch::Receiver<SinkCapabilities>,
    planes: SideMap<Option<PlaneSet>>,
    conversions: u64,
    failures: u64,
}

impl TextureConverter {
    /// Create a converter reading texture options from the sink's capabilities
    pub fn new(
        context: Arc<GpuContext>,
        colorimetry: Colorimetry,
        capabilities: watch::Receiver<SinkCapabilities>,
    ) -> Self {
        Self {
            context,
            colorimetry,
            capabilities,
            planes: SideMap::default(),
            conversions: 0,
            failures: 0,
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    pub fn colorimetry(&self) -> Colorimetry {
        self.colorimetry
    }

    pub fn set_colorimetry(&mut self, colorimetry: Colorimetry) {
        self.colorimetry = colorimetry;
    }

    /// Successful conversions so far
    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    /// Failed conversions so far (frames dropped)
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Convert `frame` into `target`
    ///
    /// On failure the error is logged and returned; the caller drops the
    /// frame and carries on with the next one.
    pub fn convert(
        &mut self,
        frame: &PixelFrame,
        target: &mut RenderTarget,
    ) -> Result<OutputTexture, ConvertError> {
        match self.convert_frame(frame, target) {
            Ok(texture) => {
                self.conversions += 1;
                Ok(texture)
            }
            Err(e) => {
                self.failures += 1;
                warn!(
                    side = %frame.side,
                    sequence = frame.sequence,
                    error = %e,
                    "Frame conversion failed, dropping frame"
                );
                Err(e)
            }
        }
    }

    fn convert_frame(
        &mut self,
        frame: &PixelFrame,
        target: &mut RenderTarget,
    ) -> Result<OutputTexture, ConvertError> {
        if !Arc::ptr_eq(target.context(), &self.context) {
            return Err(ConvertError::ContextMismatch);
        }
        validate_frame(frame)?;

        let options: TextureOptions = self.capabilities.borrow().texture_options;
        let context = Arc::clone(&self.context);
        let mut gpu = context.make_current();

        let planes = self.ensure_planes(&mut gpu, frame)?;
        upload_planes(&mut gpu, &planes, frame)?;

        let output = target.prepare(&mut gpu, frame.width, frame.height, options)?;
        gpu.bind_framebuffer(output)?;

        let params = ConvertParams::new(
            frame.width,
            frame.height,
            frame.format,
            self.colorimetry,
            options.format == OutputFormat::Bgra8,
        );
        gpu.run_program(
            ProgramId::YuvToRgb,
            &ProgramInputs {
                planes: [planes.y, planes.uv, planes.v],
                params,
            },
        )?;
        if target.mip_levels() > 1 {
            gpu.generate_mipmaps(output)?;
        }
        gpu.unbind_framebuffer();

        Ok(OutputTexture {
            handle: output,
            side: frame.side,
            width: frame.width,
            height: frame.height,
            format: options.format,
            mip_levels: target.mip_levels(),
            pts_ns: frame.pts_ns,
            sequence: frame.sequence,
            session: frame.session,
        })
    }

    fn ensure_planes(
        &mut self,
        gpu: &mut CurrentContext<'_>,
        frame: &PixelFrame,
    ) -> Result<PlaneSet, GpuError> {
        let slot = &mut self.planes[frame.side];
        if let Some(planes) = slot
            && planes.matches(frame)
        {
            return Ok(*planes);
        }
        if let Some(old) = slot.take() {
            old.destroy(gpu);
        }
        let planes = PlaneSet::create(gpu, frame)?;
        debug!(
            side = %frame.side,
            width = frame.width,
            height = frame.height,
            format = %frame.format,
            "Plane textures allocated"
        );
        *slot = Some(planes);
        Ok(planes)
    }

    /// Free the cached plane textures of one side
    pub fn release_side(&mut self, side: Side) {
        if let Some(planes) = self.planes[side].take() {
            let mut gpu = self.context.make_current();
            planes.destroy(&mut gpu);
        }
    }
}

impl Drop for TextureConverter {
    fn drop(&mut self) {
        for side in Side::ALL {
            if let Some(planes) = self.planes[side].take() {
                match self.context.try_make_current() {
                    Some(mut gpu) => planes.destroy(&mut gpu),
                    None => warn!(side = %side, "GPU context busy, plane textures leaked"),
                }
            }
        }
    }
}

fn validate_frame(frame: &PixelFrame) -> Result<(), ConvertError> {
    if frame.width < 2 || frame.height < 2 || frame.width % 2 != 0 || frame.height % 2 != 0 {
        return Err(ConvertError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
        });
    }
    let expected = frame.layout.required_len(frame.format, frame.width, frame.height);
    if frame.data.len() < expected {
        return Err(ConvertError::IncompleteFrame {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

fn upload_planes(
    gpu: &mut CurrentContext<'_>,
    planes: &PlaneSet,
    frame: &PixelFrame,
) -> Result<(), GpuError> {
    let layout = &frame.layout;
    gpu.upload(planes.y, frame.y_plane(), layout.y_stride)?;
    gpu.upload(planes.uv, frame.uv_plane(), layout.uv_stride)?;
    if let Some(v_plane) = frame.v_plane() {
        gpu.upload(planes.v, v_plane, layout.v_stride)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{Orientation, RawFrame};
    use crate::gpu::software::SoftwareBackend;

    fn setup(
        backend: SoftwareBackend,
    ) -> (
        Arc<GpuContext>,
        TextureConverter,
        watch::Sender<SinkCapabilities>,
    ) {
        let context = GpuContext::new("test", Box::new(backend));
        let (tx, rx) = watch::channel(SinkCapabilities::default());
        let converter = TextureConverter::new(Arc::clone(&context), Colorimetry::default(), rx);
        (context, converter, tx)
    }

    fn nv12_frame(width: u32, height: u32, data: Vec<u8>) -> PixelFrame {
        let raw = RawFrame::packed(PixelFormat::NV12, width, height, data, 0);
        PixelFrame::from_raw(raw, Side::Front, Orientation::Rotate0, 1, 1)
    }

    #[test]
    fn test_context_mismatch_rejected() {
        let (_context, mut converter, _tx) = setup(SoftwareBackend::new());
        let other = GpuContext::new("other", Box::new(SoftwareBackend::new()));
        let mut target = RenderTarget::new(other, Side::Front);
        let frame = nv12_frame(2, 2, vec![128; 6]);
        assert_eq!(
            converter.convert(&frame, &mut target),
            Err(ConvertError::ContextMismatch)
        );
        assert_eq!(converter.failures(), 1);
    }

    #[test]
    fn test_incomplete_frame_rejected() {
        let (context, mut converter, _tx) = setup(SoftwareBackend::new());
        let mut target = RenderTarget::new(context, Side::Front);
        let frame = nv12_frame(4, 4, vec![0; 10]);
        assert_eq!(
            converter.convert(&frame, &mut target),
            Err(ConvertError::IncompleteFrame {
                expected: 24,
                actual: 10
            })
        );
    }

    #[test]
    fn test_allocation_failure_is_resource_error() {
        let (context, mut converter, _tx) = setup(SoftwareBackend::new().with_memory_budget(16));
        let mut target = RenderTarget::new(context, Side::Front);
        let frame = nv12_frame(8, 8, vec![128; 96]);
        assert!(matches!(
            converter.convert(&frame, &mut target),
            Err(ConvertError::Resource(GpuError::Allocation(_)))
        ));
    }

    #[test]
    fn test_output_format_follows_capabilities() {
        let (context, mut converter, tx) = setup(SoftwareBackend::new());
        let mut target = RenderTarget::new(Arc::clone(&context), Side::Front);
        tx.send_modify(|caps| caps.texture_options.format = OutputFormat::Bgra8);

        // BT.601 red
        let mut data = vec![81; 4];
        data.extend_from_slice(&[90, 240]);
        let texture = converter.convert(&nv12_frame(2, 2, data), &mut target).unwrap();
        assert_eq!(texture.format, OutputFormat::Bgra8);

        let pixels = context.make_current().read_texture(texture.handle).unwrap();
        assert!(pixels[0] <= 2, "blue channel first: {:?}", &pixels[..4]);
        assert!(pixels[2] >= 252, "red channel third: {:?}", &pixels[..4]);
    }
}
