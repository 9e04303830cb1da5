use image::{Rgb, RgbImage};
use image::imageops;
use parking_lot::Mutex;
use std::time::Instant;
use tracing::warn;

use super::codec::{self, SnapshotSettings};
use crate::error::PilotResult;

/// An encoded snapshot of one window
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Vec<u8>,
    /// Size of the encoded image (after any downscale)
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

/// Composited pixel state of one window
///
/// Damage regions are pasted into a window-sized buffer; snapshots copy the
/// buffer under the same lock and encode outside it, so a region arriving
/// during an encode lands in the next snapshot.
#[derive(Debug)]
pub struct WindowCompositor {
    pub wid: u32,
    surface: Mutex<Surface>,
}

#[derive(Debug)]
struct Surface {
    buffer: RgbImage,
    /// Buffer changed since the last snapshot
    dirty: bool,
    /// Snapshots emitted so far
    sequence: u64,
    last_sent: Option<Instant>,
}

impl WindowCompositor {
    pub fn new(wid: u32, width: u32, height: u32) -> Self {
        Self {
            wid,
            surface: Mutex::new(Surface {
                buffer: RgbImage::new(width, height),
                dirty: false,
                sequence: 0,
                last_sent: None,
            }),
        }
    }

    /// Current buffer size
    pub fn size(&self) -> (u32, u32) {
        self.surface.lock().buffer.dimensions()
    }

    pub fn is_dirty(&self) -> bool {
        self.surface.lock().dirty
    }

    pub fn sequence(&self) -> u64 {
        self.surface.lock().sequence
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.surface.lock().last_sent
    }

    pub(crate) fn mark_sent(&self, at: Instant) {
        self.surface.lock().last_sent = Some(at);
    }

    /// Read one composited pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb<u8>> {
        let surface = self.surface.lock();
        (x < surface.buffer.width() && y < surface.buffer.height()).then(|| *surface.buffer.get_pixel(x, y))
    }

    /// Composite a damage region at (x, y)
    ///
    /// Decoding happens before the lock is taken; the paste is clipped to the
    /// buffer bounds. Errors leave the buffer untouched.
    pub fn apply_region(&self, x: i32, y: i32, width: u32, height: u32, encoding: &str, data: &[u8]) -> PilotResult<()> {
        let region = codec::decode_region(encoding, width, height, data)?;

        let mut surface = self.surface.lock();
        imageops::replace(&mut surface.buffer, &region, i64::from(x), i64::from(y));
        surface.dirty = true;
        Ok(())
    }

    /// Reallocate the buffer, keeping the content that overlaps the origin
    pub fn resize(&self, width: u32, height: u32) {
        let mut surface = self.surface.lock();
        if surface.buffer.dimensions() == (width, height) {
            surface.dirty = true;
            return;
        }
        let mut buffer = RgbImage::new(width, height);
        imageops::replace(&mut buffer, &surface.buffer, 0, 0);
        surface.buffer = buffer;
        surface.dirty = true;
    }

    /// Encode the buffer if it changed since the last snapshot
    ///
    /// Returns `Ok(None)` for a clean buffer without doing any encode work.
    pub fn snapshot(&self, settings: &SnapshotSettings) -> PilotResult<Option<Snapshot>> {
        let (copy, sequence) = {
            let mut surface = self.surface.lock();
            if !surface.dirty {
                return Ok(None);
            }
            surface.dirty = false;
            surface.sequence += 1;
            (surface.buffer.clone(), surface.sequence)
        };

        match codec::encode_snapshot(copy, settings) {
            Ok((data, width, height)) => Ok(Some(Snapshot {
                data,
                width,
                height,
                sequence,
            })),
            Err(e) => {
                // Content is still unpublished
                self.surface.lock().dirty = true;
                warn!("Snapshot of window {} failed: {}", self.wid, e);
                Err(e)
            }
        }
    }

    /// Encode the buffer regardless of the dirty flag
    ///
    /// Used for on-demand screenshots: the dirty flag and sequence belong to
    /// the publish path and are left alone.
    pub fn snapshot_now(&self, settings: &SnapshotSettings) -> PilotResult<Snapshot> {
        let (copy, sequence) = {
            let surface = self.surface.lock();
            (surface.buffer.clone(), surface.sequence)
        };
        let (data, width, height) = codec::encode_snapshot(copy, settings)?;
        Ok(Snapshot {
            data,
            width,
            height,
            sequence,
        })
    }
}
