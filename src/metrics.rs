//! Process-wide counters exposed at `/debug/vars`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters tracking how much upstream work the proxy avoids.
#[derive(Debug, Default)]
pub struct Counters {
    pack_cache_hit: AtomicU64,
    sync_skipped: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an upload-pack response served from the pack cache.
    pub fn record_pack_cache_hit(&self) {
        self.pack_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a synchronization skipped because the refs were still fresh.
    pub fn record_sync_skipped(&self) {
        self.sync_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            pack_cache_hit: self.pack_cache_hit.load(Ordering::Relaxed),
            sync_skipped: self.sync_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values, serialized as the `/debug/vars` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    #[serde(rename = "packCacheHit")]
    pub pack_cache_hit: u64,
    #[serde(rename = "syncSkipped")]
    pub sync_skipped: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
