// SPDX-License-Identifier: GPL-3.0-only

//! Preview surface implementations

use super::{OutputFormat, OutputTexture, Placement, PreviewSurface};
use crate::backends::camera::{Side, SideMap};
use crate::constants::timing;
use crate::errors::AppError;
use crate::gpu::GpuContext;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Records every presentation; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    log: Arc<Mutex<Vec<(OutputTexture, Placement)>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> Vec<(OutputTexture, Placement)> {
        self.log.lock().clone()
    }

    pub fn count(&self, side: Side) -> usize {
        self.log.lock().iter().filter(|(t, _)| t.side == side).count()
    }
}

impl PreviewSurface for RecordingSurface {
    fn present(&mut self, texture: &OutputTexture, placement: Placement) {
        self.log.lock().push((*texture, placement));
    }
}

/// Logs presentations periodically, for headless runs
#[derive(Debug, Default)]
pub struct LoggingSurface {
    presented: SideMap<u64>,
}

impl PreviewSurface for LoggingSurface {
    fn present(&mut self, texture: &OutputTexture, placement: Placement) {
        let count = &mut self.presented[texture.side];
        *count += 1;
        if *count % timing::FRAME_LOG_INTERVAL == 1 {
            info!(
                side = %texture.side,
                width = texture.width,
                height = texture.height,
                sequence = texture.sequence,
                z = placement.z_order,
                "Presenting frame"
            );
        }
    }
}

/// Saves the first presented frame of each side as a PNG
pub struct SnapshotSurface {
    context: Arc<GpuContext>,
    output_dir: PathBuf,
    saved: Arc<Mutex<SideMap<Option<PathBuf>>>>,
}

impl SnapshotSurface {
    pub fn new(context: Arc<GpuContext>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            context,
            output_dir: output_dir.into(),
            saved: Arc::default(),
        }
    }

    /// Shared view of the files written so far
    pub fn saved(&self) -> Arc<Mutex<SideMap<Option<PathBuf>>>> {
        Arc::clone(&self.saved)
    }

    fn save(&self, texture: &OutputTexture) -> Result<PathBuf, AppError> {
        let mut data = self.context.make_current().read_texture(texture.handle)?;
        if texture.format == OutputFormat::Bgra8 {
            for pixel in data.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }
        let image = image::RgbaImage::from_raw(texture.width, texture.height, data)
            .ok_or_else(|| AppError::Other("Readback size does not match texture".to_string()))?;

        let path = snapshot_path(&self.output_dir, texture.side);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save(&path)?;
        Ok(path)
    }
}

/// `<dir>/snapshot_<side>_<timestamp>.png`
pub fn snapshot_path(dir: &Path, side: Side) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("snapshot_{}_{}.png", side, timestamp))
}

impl PreviewSurface for SnapshotSurface {
    fn present(&mut self, texture: &OutputTexture, _placement: Placement) {
        if self.saved.lock()[texture.side].is_some() {
            return;
        }
        match self.save(texture) {
            Ok(path) => {
                info!(side = %texture.side, path = %path.display(), "Snapshot saved");
                self.saved.lock()[texture.side] = Some(path);
            }
            Err(e) => warn!(side = %texture.side, error = %e, "Failed to save snapshot"),
        }
    }
}
