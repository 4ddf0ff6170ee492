// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

/// Configuration limits and defaults
pub mod limits {
    /// Default per-side queue capacity (frames)
    ///
    /// Kept small so the preview never lags more than a few frames behind capture.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 3;

    /// Largest per-side queue capacity accepted from configuration
    pub const MAX_QUEUE_CAPACITY: usize = 16;

    /// Default capture width
    pub const DEFAULT_WIDTH: u32 = 1280;

    /// Default capture height
    pub const DEFAULT_HEIGHT: u32 = 720;

    /// Largest texture dimension the converter allocates
    pub const MAX_DIMENSION: u32 = 8192;

    /// Default capture framerate
    pub const DEFAULT_FRAMERATE: u32 = 30;

    /// Largest framerate accepted from configuration
    pub const MAX_FRAMERATE: u32 = 240;

    /// Capacity of a direct (queue-less) source-to-sink channel
    pub const DIRECT_CHANNEL_CAPACITY: usize = 2;
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffer queue size in the appsink (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Raw format requested from the capture element
    pub const OUTPUT_FORMAT: &str = "NV12";

    /// Name of the appsink element in launch lines
    pub const SINK_NAME: &str = "sink";
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Sleep between render loop polls when both queues are empty
    pub const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(2);

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Interval between stats lines in the CLI run loop
    pub const STATS_INTERVAL: Duration = Duration::from_secs(2);
}

/// GPU conversion constants
pub mod gpu {
    /// Workgroup edge length of the conversion compute shader
    pub const CONVERT_WORKGROUP_SIZE: u32 = 16;

    /// Workgroup edge length of the mip downsample compute shader
    pub const MIPMAP_WORKGROUP_SIZE: u32 = 8;
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
