//! Per-area cache for fetched map data (building lists, terrain grids).
//!
//! Keys quantise coordinates to 1e-5° (about a metre), so two requests for
//! the same spot with float noise share an entry. Values are handed out by
//! clone; store them behind an `Arc` when they are large.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::geo::GeoPoint;

const COORD_SCALE: f64 = 1e5;

/// Identity of a fetched area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaKey {
    pub latitude_e5: i64,
    pub longitude_e5: i64,
    pub radius_m: u64,
    /// Grid resolution for terrain requests, 0 for building requests.
    pub resolution: usize,
}

impl AreaKey {
    fn quantised(center: GeoPoint, radius_m: f64, resolution: usize) -> Self {
        Self {
            latitude_e5: (center.latitude * COORD_SCALE).round() as i64,
            longitude_e5: (center.longitude * COORD_SCALE).round() as i64,
            radius_m: radius_m.max(0.0).round() as u64,
            resolution,
        }
    }

    pub fn buildings(center: GeoPoint, radius_m: f64) -> Self {
        Self::quantised(center, radius_m, 0)
    }

    pub fn terrain(center: GeoPoint, radius_m: f64, resolution: usize) -> Self {
        Self::quantised(center, radius_m, resolution)
    }
}

/// Thread-safe map from [`AreaKey`] to fetched data.
#[derive(Debug)]
pub struct AreaCache<V> {
    entries: Mutex<HashMap<AreaKey, V>>,
}

impl<V> Default for AreaCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> AreaCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    // Entries are inserted whole; a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<AreaKey, V>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, key: AreaKey, value: V) {
        log::debug!("caching area {key:?}");
        self.lock().insert(key, value);
    }

    pub fn contains(&self, key: &AreaKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<V: Clone> AreaCache<V> {
    pub fn get(&self, key: &AreaKey) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Cached value for `key`, or the result of `fetch` stored under it.
    ///
    /// The lock is not held while `fetch` runs; concurrent misses may both
    /// fetch and the later insert wins.
    pub fn get_or_fetch<E>(
        &self,
        key: AreaKey,
        fetch: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = fetch()?;
        self.put(key, value.clone());
        Ok(value)
    }
}
