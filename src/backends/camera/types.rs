// SPDX-License-Identifier: GPL-3.0-only
// Shared types for capture devices and the frame pipeline

//! Shared types for camera capture

use crate::constants::limits;
use crate::errors::ConfigError;
use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use std::time::Instant;

/// Logical camera stream a frame belongs to
///
/// The side is a stable slot identifier. It does not change when the slot
/// is pointed at a different physical device with `change_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Front,
    Back,
}

impl Side {
    /// Both sides, front first
    pub const ALL: [Side; 2] = [Side::Front, Side::Back];

    /// The other side
    pub fn opposite(&self) -> Side {
        match self {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Front => write!(f, "front"),
            Side::Back => write!(f, "back"),
        }
    }
}

/// A value kept per side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideMap<T> {
    pub front: T,
    pub back: T,
}

impl<T> SideMap<T> {
    pub fn new(front: T, back: T) -> Self {
        Self { front, back }
    }

    /// Build both entries from a closure over the side
    pub fn from_fn(mut f: impl FnMut(Side) -> T) -> Self {
        Self {
            front: f(Side::Front),
            back: f(Side::Back),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Side, &T)> {
        [(Side::Front, &self.front), (Side::Back, &self.back)].into_iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(Side, T) -> U) -> SideMap<U> {
        SideMap {
            front: f(Side::Front, self.front),
            back: f(Side::Back, self.back),
        }
    }
}

impl<T> Index<Side> for SideMap<T> {
    type Output = T;

    fn index(&self, side: Side) -> &T {
        match side {
            Side::Front => &self.front,
            Side::Back => &self.back,
        }
    }
}

impl<T> IndexMut<Side> for SideMap<T> {
    fn index_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Front => &mut self.front,
            Side::Back => &mut self.back,
        }
    }
}

/// Physical camera a capture session is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    #[default]
    Front,
    Back,
}

impl std::fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraPosition::Front => write!(f, "front"),
            CameraPosition::Back => write!(f, "back"),
        }
    }
}

/// Capture orientation in degrees (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Orientation {
    /// Create an orientation from an integer degree value (normalised to 0-360).
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Orientation::Rotate90,
            180 => Orientation::Rotate180,
            270 => Orientation::Rotate270,
            _ => Orientation::Rotate0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Orientation::Rotate0 => 0,
            Orientation::Rotate90 => 90,
            Orientation::Rotate180 => 180,
            Orientation::Rotate270 => 270,
        }
    }

    /// Check if the orientation swaps width and height on display
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Rotate90 | Orientation::Rotate270)
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Capture session configuration for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub position: CameraPosition,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
}

fn default_framerate() -> u32 {
    limits::DEFAULT_FRAMERATE
}

impl CaptureConfig {
    pub fn new(position: CameraPosition, width: u32, height: u32) -> Self {
        Self {
            position,
            width,
            height,
            orientation: Orientation::default(),
            framerate: limits::DEFAULT_FRAMERATE,
        }
    }

    /// Default configuration for a side (the front slot starts on the front camera)
    pub fn for_side(side: Side) -> Self {
        let position = match side {
            Side::Front => CameraPosition::Front,
            Side::Back => CameraPosition::Back,
        };
        Self::new(position, limits::DEFAULT_WIDTH, limits::DEFAULT_HEIGHT)
    }

    /// Copy of this config with a different resolution
    pub fn with_resolution(self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    /// Copy of this config bound to a different physical camera
    pub fn with_position(self, position: CameraPosition) -> Self {
        Self { position, ..self }
    }

    /// Reject configurations a 4:2:0 capture session cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_resolution(self.width, self.height)?;
        if self.framerate == 0 || self.framerate > limits::MAX_FRAMERATE {
            return Err(ConfigError::InvalidFramerate(self.framerate));
        }
        Ok(())
    }
}

impl std::fmt::Display for CaptureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps ({})",
            self.position, self.width, self.height, self.framerate, self.orientation
        )
    }
}

/// Check a resolution: positive, even (4:2:0 chroma) and within the texture limit
pub fn validate_resolution(width: u32, height: u32) -> Result<(), ConfigError> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(ConfigError::InvalidResolution { width, height });
    }
    if width > limits::MAX_DIMENSION || height > limits::MAX_DIMENSION {
        return Err(ConfigError::ResolutionTooLarge { width, height });
    }
    Ok(())
}

/// Planar luma/chroma pixel formats accepted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    NV12,
    /// NV21 - Semi-planar 4:2:0 (Y plane + interleaved VU plane)
    NV21,
    /// I420 - Planar 4:2:0 (separate Y, U, V planes)
    I420,
}

impl PixelFormat {
    /// Format code understood by the conversion program
    pub fn gpu_format_code(&self) -> u32 {
        match self {
            Self::NV12 => 1,
            Self::I420 => 2,
            Self::NV21 => 3,
        }
    }

    /// Whether chroma is stored interleaved in a single two-channel plane
    pub fn is_semi_planar(&self) -> bool {
        matches!(self, Self::NV12 | Self::NV21)
    }

    /// Average bytes per pixel (accounting for chroma subsampling)
    pub fn bytes_per_pixel(&self) -> f32 {
        1.5
    }

    /// GStreamer video/x-raw format string
    pub fn to_gst_format_string(&self) -> &'static str {
        match self {
            Self::NV12 => "NV12",
            Self::NV21 => "NV21",
            Self::I420 => "I420",
        }
    }

    /// Parse format from GStreamer format string
    pub fn from_gst_format(format: &str) -> Option<Self> {
        match format {
            "NV12" => Some(Self::NV12),
            "NV21" => Some(Self::NV21),
            "I420" | "YV12" => Some(Self::I420),
            _ => None,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_gst_format_string())
    }
}

/// Plane offsets and strides within one contiguous frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub y_offset: usize,
    pub y_stride: u32,
    /// Interleaved UV/VU plane for semi-planar formats, U plane for I420
    pub uv_offset: usize,
    pub uv_stride: u32,
    /// V plane (I420 only)
    pub v_offset: usize,
    pub v_stride: u32,
}

impl PlaneLayout {
    /// Tightly packed layout for a frame of the given size
    pub fn packed(format: PixelFormat, width: u32, height: u32) -> Self {
        let y_size = width as usize * height as usize;
        match format {
            PixelFormat::NV12 | PixelFormat::NV21 => Self {
                y_offset: 0,
                y_stride: width,
                uv_offset: y_size,
                uv_stride: width,
                v_offset: 0,
                v_stride: 0,
            },
            PixelFormat::I420 => {
                let chroma_size = (width as usize / 2) * (height as usize / 2);
                Self {
                    y_offset: 0,
                    y_stride: width,
                    uv_offset: y_size,
                    uv_stride: width / 2,
                    v_offset: y_size + chroma_size,
                    v_stride: width / 2,
                }
            }
        }
    }

    /// Minimum buffer length this layout needs for the given size
    pub fn required_len(&self, format: PixelFormat, width: u32, height: u32) -> usize {
        let chroma_rows = (height / 2) as usize;
        let y_end = self.y_offset + self.y_stride as usize * height as usize;
        let uv_row = if format.is_semi_planar() {
            width as usize
        } else {
            width as usize / 2
        };
        let uv_end = self.uv_offset + plane_len(self.uv_stride, uv_row, chroma_rows);
        let v_end = match format {
            PixelFormat::I420 => {
                self.v_offset + plane_len(self.v_stride, width as usize / 2, chroma_rows)
            }
            _ => 0,
        };
        y_end.max(uv_end).max(v_end)
    }
}

fn plane_len(stride: u32, row_bytes: usize, rows: usize) -> usize {
    if rows == 0 {
        return 0;
    }
    stride as usize * (rows - 1) + row_bytes
}

/// Pixel memory backing a frame
///
/// Either owned bytes or a mapped GStreamer buffer. The variant is never
/// shared: dropping it releases the platform buffer.
pub enum FrameData {
    /// Owned bytes (synthetic sources, copies, tests)
    Owned(Vec<u8>),
    /// Mapped GStreamer buffer, unmapped and released on drop
    Mapped(MappedBuffer<Readable>),
}

impl FrameData {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Owned(data) => write!(f, "FrameData::Owned({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Owned(data) => data.as_slice(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Frame as delivered by a capture device, before the source tags it
#[derive(Debug)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub layout: PlaneLayout,
    pub data: FrameData,
    /// Presentation timestamp in nanoseconds (device clock)
    pub pts_ns: u64,
}

impl RawFrame {
    /// Wrap a tightly packed buffer
    pub fn packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
        pts_ns: u64,
    ) -> Self {
        Self {
            width,
            height,
            format,
            layout: PlaneLayout::packed(format, width, height),
            data: FrameData::Owned(data),
            pts_ns,
        }
    }

    /// Check that the buffer is large enough for the advertised layout
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.layout.required_len(self.format, self.width, self.height)
    }
}

/// One captured frame travelling through the pipeline
///
/// Frames are move-only: each pipeline stage owns the frame it holds and
/// hands it on by value. Dropping a frame releases its pixel memory.
#[derive(Debug)]
pub struct PixelFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub layout: PlaneLayout,
    pub data: FrameData,
    pub pts_ns: u64,
    pub side: Side,
    pub orientation: Orientation,
    /// Per-source sequence number, monotonically increasing
    pub sequence: u64,
    /// Capture session this frame came from
    pub session: u64,
    /// When the capture callback saw the frame (latency diagnostics)
    pub captured_at: Instant,
}

impl PixelFrame {
    /// Tag a device frame with its side and session metadata
    pub fn from_raw(
        raw: RawFrame,
        side: Side,
        orientation: Orientation,
        sequence: u64,
        session: u64,
    ) -> Self {
        Self {
            width: raw.width,
            height: raw.height,
            format: raw.format,
            layout: raw.layout,
            data: raw.data,
            pts_ns: raw.pts_ns,
            side,
            orientation,
            sequence,
            session,
            captured_at: Instant::now(),
        }
    }

    /// Luma plane bytes, starting at the first row
    pub fn y_plane(&self) -> &[u8] {
        &self.data[self.layout.y_offset..]
    }

    /// Chroma plane bytes (interleaved UV/VU, or U for I420)
    pub fn uv_plane(&self) -> &[u8] {
        &self.data[self.layout.uv_offset..]
    }

    /// V plane bytes (I420 only)
    pub fn v_plane(&self) -> Option<&[u8]> {
        match self.format {
            PixelFormat::I420 => Some(&self.data[self.layout.v_offset..]),
            _ => None,
        }
    }

    /// Independent copy with owned data, for holding a frame past one traversal
    pub fn to_copied(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            format: self.format,
            layout: self.layout,
            data: FrameData::Owned(self.data.to_vec()),
            pts_ns: self.pts_ns,
            side: self.side,
            orientation: self.orientation,
            sequence: self.sequence,
            session: self.session,
            captured_at: self.captured_at,
        }
    }
}

/// Capture backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CaptureBackendType {
    /// Generated test pattern (no hardware needed)
    #[default]
    Synthetic,
    /// GStreamer appsink pipeline (v4l2src / pipewiresrc)
    GStreamer,
}

impl std::fmt::Display for CaptureBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureBackendType::Synthetic => write!(f, "synthetic"),
            CaptureBackendType::GStreamer => write!(f, "GStreamer"),
        }
    }
}

/// Result type for capture device operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for capture device operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Camera device missing or busy
    DeviceUnavailable(String),
    /// Access to the camera was refused
    PermissionDenied(String),
    /// Session could not be created
    InitializationFailed(String),
    /// Device does not support the requested format
    FormatNotSupported(String),
    /// Operation requires an open session
    NoSession,
    /// Device reported a failure while streaming
    StreamError(String),
}

impl BackendError {
    /// Whether the error ends the source's life until an explicit retry
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackendError::NoSession)
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            BackendError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::NoSession => write!(f, "No capture session open"),
            BackendError::StreamError(msg) => write!(f, "Stream error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}
