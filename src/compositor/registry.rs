use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::codec::SnapshotSettings;
use super::window::{Snapshot, WindowCompositor};
use crate::error::{PilotError, PilotResult};

/// Counters for damage that never reached a buffer
#[derive(Debug, Default)]
pub struct RegionStats {
    unsupported: AtomicU64,
    failed: AtomicU64,
    orphaned: AtomicU64,
}

impl RegionStats {
    /// Regions dropped for an unknown encoding tag
    pub fn unsupported(&self) -> u64 {
        self.unsupported.load(Ordering::Relaxed)
    }

    /// Regions dropped because the payload did not decode
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Regions dropped because the window was not registered
    pub fn orphaned(&self) -> u64 {
        self.orphaned.load(Ordering::Relaxed)
    }
}

/// Per-window compositors keyed by window ID
///
/// Compositors never leave the registry; callers address them by ID. The
/// map lock is held only to look up or clone entries, never while pasting
/// or encoding.
#[derive(Debug, Default)]
pub struct CompositorRegistry {
    windows: Mutex<HashMap<u32, Arc<WindowCompositor>>>,
    stats: RegionStats,
}

impl CompositorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a window, replacing any stale entry with the same ID
    pub fn create(&self, wid: u32, width: u32, height: u32) {
        let previous = self
            .windows
            .lock()
            .insert(wid, Arc::new(WindowCompositor::new(wid, width, height)));
        if previous.is_some() {
            debug!("Window {} re-created, previous buffer discarded", wid);
        }
    }

    /// Stop tracking a window and release its buffer
    pub fn destroy(&self, wid: u32) {
        self.windows.lock().remove(&wid);
    }

    /// Resize a window's buffer; unknown IDs are ignored
    pub fn resize(&self, wid: u32, width: u32, height: u32) {
        if let Some(win) = self.get(wid) {
            win.resize(width, height);
        }
    }

    /// Composite damage into a window; damage for unknown IDs is discarded
    ///
    /// Decode problems are counted and logged, never propagated.
    pub fn apply_region(&self, wid: u32, x: i32, y: i32, width: u32, height: u32, encoding: &str, data: &[u8]) {
        let Some(win) = self.get(wid) else {
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match win.apply_region(x, y, width, height, encoding, data) {
            Ok(()) => {}
            Err(PilotError::UnsupportedEncoding(tag)) => {
                let count = self.stats.unsupported.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Unsupported encoding {} for window {} ({} dropped)", tag, wid, count);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                debug!("Failed to composite region for window {}: {}", wid, e);
            }
        }
    }

    /// Snapshot every dirty window that is due
    ///
    /// A window whose last snapshot is younger than `min_interval` is skipped
    /// and stays dirty for a later cycle.
    pub fn collect_dirty_snapshots(&self, settings: &SnapshotSettings, min_interval: Duration) -> Vec<(u32, Snapshot)> {
        self.collect_dirty_snapshots_at(settings, min_interval, Instant::now())
    }

    pub fn collect_dirty_snapshots_at(
        &self,
        settings: &SnapshotSettings,
        min_interval: Duration,
        now: Instant,
    ) -> Vec<(u32, Snapshot)> {
        let mut results = Vec::new();
        for win in self.entries() {
            if let Some(last) = win.last_sent() {
                if now.saturating_duration_since(last) < min_interval {
                    continue;
                }
            }
            match win.snapshot(settings) {
                Ok(Some(snapshot)) => {
                    win.mark_sent(now);
                    results.push((win.wid, snapshot));
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping window {} this cycle: {}", win.wid, e),
            }
        }
        results
    }

    /// Encode a window now, clean or not
    ///
    /// The encode runs on the blocking pool.
    pub async fn snapshot_now(&self, wid: u32, settings: SnapshotSettings) -> PilotResult<Snapshot> {
        let window = self.get(wid).ok_or(PilotError::UnknownWindow(wid))?;
        tokio::task::spawn_blocking(move || window.snapshot_now(&settings))
            .await
            .map_err(|e| PilotError::Snapshot(e.to_string()))?
    }

    pub fn contains(&self, wid: u32) -> bool {
        self.windows.lock().contains_key(&wid)
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    pub fn window_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.windows.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Release every buffer
    pub fn clear(&self) {
        self.windows.lock().clear();
    }

    pub fn stats(&self) -> &RegionStats {
        &self.stats
    }

    fn get(&self, wid: u32) -> Option<Arc<WindowCompositor>> {
        self.windows.lock().get(&wid).cloned()
    }

    /// Stable copy of the current entries, ordered by ID
    fn entries(&self) -> Vec<Arc<WindowCompositor>> {
        let mut entries: Vec<_> = self.windows.lock().values().cloned().collect();
        entries.sort_unstable_by_key(|w| w.wid);
        entries
    }

    #[cfg(test)]
    pub(crate) fn pixel(&self, wid: u32, x: u32, y: u32) -> Option<image::Rgb<u8>> {
        self.get(wid)?.pixel(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::SnapshotFormat;

    fn raw() -> SnapshotSettings {
        SnapshotSettings {
            format: SnapshotFormat::Raw,
            quality: 70,
            scale: 1.0,
            max_dimension: 1920,
        }
    }

    #[test]
    fn test_only_updated_window_is_collected() {
        let registry = CompositorRegistry::new();
        registry.create(1, 20, 20);
        registry.create(2, 20, 20);
        registry.apply_region(2, 0, 0, 1, 1, "rgb24", &[1, 2, 3]);

        let first = registry.collect_dirty_snapshots(&raw(), Duration::ZERO);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, 2);
        assert_eq!(first[0].1.sequence, 1);

        assert!(registry.collect_dirty_snapshots(&raw(), Duration::ZERO).is_empty());
    }

    #[test]
    fn test_min_interval_defers_busy_window() {
        let registry = CompositorRegistry::new();
        registry.create(1, 4, 4);
        let t0 = Instant::now();
        let interval = Duration::from_millis(300);

        registry.apply_region(1, 0, 0, 1, 1, "rgb24", &[1, 2, 3]);
        assert_eq!(registry.collect_dirty_snapshots_at(&raw(), interval, t0).len(), 1);

        registry.apply_region(1, 0, 0, 1, 1, "rgb24", &[4, 5, 6]);
        let early = t0 + Duration::from_millis(100);
        assert!(registry.collect_dirty_snapshots_at(&raw(), interval, early).is_empty());

        let late = t0 + Duration::from_millis(400);
        let due = registry.collect_dirty_snapshots_at(&raw(), interval, late);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1.sequence, 2);
    }

    #[tokio::test]
    async fn test_unknown_window_is_safe() {
        let registry = CompositorRegistry::new();
        registry.create(1, 4, 4);

        registry.apply_region(99, 0, 0, 1, 1, "rgb24", &[1, 2, 3]);
        registry.resize(99, 10, 10);
        registry.destroy(99);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().orphaned(), 1);

        registry.destroy(1);
        registry.apply_region(1, 0, 0, 1, 1, "rgb24", &[1, 2, 3]);
        registry.resize(1, 10, 10);
        registry.destroy(1);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.snapshot_now(1, raw()).await,
            Err(PilotError::UnknownWindow(1))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_now_off_the_runtime() {
        let registry = CompositorRegistry::new();
        registry.create(7, 4, 2);
        registry.apply_region(7, 0, 0, 1, 1, "rgb24", &[9, 9, 9]);
        let snap = registry.snapshot_now(7, raw()).await.unwrap();
        assert_eq!((snap.width, snap.height), (4, 2));
        assert_eq!(&snap.data[..3], &[9, 9, 9]);
        // Still dirty for the publish cycle
        assert_eq!(registry.collect_dirty_snapshots(&raw(), Duration::ZERO).len(), 1);
    }

    #[test]
    fn test_bad_regions_are_counted() {
        let registry = CompositorRegistry::new();
        registry.create(1, 4, 4);
        registry.apply_region(1, 0, 0, 1, 1, "h264", &[0]);
        registry.apply_region(1, 0, 0, 2, 2, "rgb24", &[0]);
        assert_eq!(registry.stats().unsupported(), 1);
        assert_eq!(registry.stats().failed(), 1);
        assert!(registry.collect_dirty_snapshots(&raw(), Duration::ZERO).is_empty());
    }

    #[test]
    fn test_reused_id_starts_fresh() {
        let registry = CompositorRegistry::new();
        registry.create(7, 4, 4);
        registry.apply_region(7, 0, 0, 1, 1, "rgb24", &[9, 9, 9]);
        registry.destroy(7);
        registry.create(7, 8, 8);
        assert_eq!(registry.pixel(7, 0, 0), Some(image::Rgb([0, 0, 0])));
        assert!(registry.collect_dirty_snapshots(&raw(), Duration::ZERO).is_empty());
    }

    #[test]
    fn test_concurrent_damage_and_collection() {
        let registry = Arc::new(CompositorRegistry::new());
        for wid in 1..=4 {
            registry.create(wid, 32, 32);
        }
        let writers: Vec<_> = (1..=4u32)
            .map(|wid| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        registry.apply_region(wid, (i % 32) as i32, 0, 1, 1, "rgb24", &[1, 2, 3]);
                        if i % 50 == 0 {
                            registry.resize(wid, 32 + i / 50, 32);
                        }
                    }
                })
            })
            .collect();
        let mut last_seq = std::collections::HashMap::new();
        for _ in 0..50 {
            for (wid, snap) in registry.collect_dirty_snapshots(&raw(), Duration::ZERO) {
                let prev = last_seq.insert(wid, snap.sequence).unwrap_or(0);
                assert!(snap.sequence > prev);
                assert_eq!(snap.data.len(), (snap.width * snap.height * 3) as usize);
            }
        }
        for w in writers {
            w.join().unwrap();
        }
    }
}
