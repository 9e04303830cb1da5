//! Compositor Module
//!
//! Keeps a composited pixel buffer per window and turns dirty buffers into
//! rate-limited, encoded snapshots.

pub mod codec;
pub mod registry;
pub mod window;

pub use codec::{RegionEncoding, SnapshotFormat, SnapshotSettings};
pub use registry::{CompositorRegistry, RegionStats};
pub use window::{Snapshot, WindowCompositor};

use crate::config::CaptureConfig;

impl From<&CaptureConfig> for SnapshotSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            format: config.snapshot_format(),
            quality: config.quality,
            scale: config.scale,
            max_dimension: config.max_dimension,
        }
    }
}
