// SPDX-License-Identifier: GPL-3.0-only

//! Observer contract between capture and rendering
//!
//! Observers declare what they want through [`ObserverCapabilities`]
//! instead of implementing optional callbacks. The capture thread calls
//! `on_sample_ready` only for observers asking for raw samples; the render
//! thread calls `on_texture_ready` only for observers asking for textures.
//!
//! Callbacks borrow the frame or texture for the duration of the call.
//! An observer that needs a frame afterwards takes [`PixelFrame::to_copied`].

use crate::backends::camera::{PixelFrame, Side, SideMap};
use crate::render::OutputTexture;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What an observer wants to receive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverCapabilities {
    /// Raw pixel frames, on the capture thread, before routing
    pub raw_samples: bool,
    /// Converted textures, on the render thread, after presentation
    pub textures: bool,
}

impl ObserverCapabilities {
    pub const RAW_SAMPLES: Self = Self {
        raw_samples: true,
        textures: false,
    };

    pub const TEXTURES: Self = Self {
        raw_samples: false,
        textures: true,
    };

    pub const ALL: Self = Self {
        raw_samples: true,
        textures: true,
    };
}

/// Downstream consumer of captured frames (writers, filters, analysis)
///
/// Callbacks run on pipeline threads and must not block.
pub trait SampleObserver: Send + Sync {
    fn capabilities(&self) -> ObserverCapabilities;

    fn on_sample_ready(&self, _frame: &PixelFrame, _side: Side) {}

    fn on_texture_ready(&self, _texture: &OutputTexture, _side: Side) {}
}

/// Shared list of observers
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<Vec<Arc<dyn SampleObserver>>>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn SampleObserver>) {
        self.observers.write().push(observer);
    }

    /// Remove an observer previously added; returns whether it was found
    pub fn remove(&self, observer: &Arc<dyn SampleObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any observer wants raw samples
    pub fn wants_samples(&self) -> bool {
        self.observers
            .read()
            .iter()
            .any(|o| o.capabilities().raw_samples)
    }

    pub fn notify_sample(&self, frame: &PixelFrame, side: Side) {
        for observer in self.observers.read().iter() {
            if observer.capabilities().raw_samples {
                observer.on_sample_ready(frame, side);
            }
        }
    }

    pub fn notify_texture(&self, texture: &OutputTexture, side: Side) {
        for observer in self.observers.read().iter() {
            if observer.capabilities().textures {
                observer.on_texture_ready(texture, side);
            }
        }
    }
}

/// Observer counting samples and textures per side
#[derive(Debug, Default)]
pub struct CountingObserver {
    capabilities: ObserverCapabilities,
    samples: SideMap<AtomicU64>,
    textures: SideMap<AtomicU64>,
}

impl CountingObserver {
    pub fn new(capabilities: ObserverCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn samples(&self, side: Side) -> u64 {
        self.samples[side].load(Ordering::Relaxed)
    }

    pub fn textures(&self, side: Side) -> u64 {
        self.textures[side].load(Ordering::Relaxed)
    }
}

impl SampleObserver for CountingObserver {
    fn capabilities(&self) -> ObserverCapabilities {
        self.capabilities
    }

    fn on_sample_ready(&self, _frame: &PixelFrame, side: Side) {
        self.samples[side].fetch_add(1, Ordering::Relaxed);
    }

    fn on_texture_ready(&self, _texture: &OutputTexture, side: Side) {
        self.textures[side].fetch_add(1, Ordering::Relaxed);
    }
}
