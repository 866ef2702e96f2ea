//! Bounded-staleness snapshot cache for the read path.

use crate::snapshot::{Snapshot, SnapshotError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Holds the last loaded snapshot for at most `ttl`.
///
/// Searches within the window share one snapshot; the first search after
/// it reloads. Concurrent misses may each load, and the last one wins.
#[derive(Debug)]
pub struct SnapshotCache {
    ttl: Duration,
    entry: RwLock<Option<(Instant, Arc<Snapshot>)>>,
}

impl SnapshotCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// Returns the cached snapshot if fresh, otherwise loads and caches one.
    pub fn get_or_load(
        &self,
        load: impl FnOnce() -> Result<Snapshot, SnapshotError>,
    ) -> Result<Arc<Snapshot>, SnapshotError> {
        if let Some((loaded_at, snapshot)) = self.entry.read().as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(snapshot));
            }
        }

        let snapshot = Arc::new(load()?);
        *self.entry.write() = Some((Instant::now(), Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    /// Drops the cached snapshot.
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }
}
