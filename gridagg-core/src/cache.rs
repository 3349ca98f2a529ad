//! Bounded cache of rasterised geometries
//!
//! Rasterising a geometry is the most expensive step of a masked aggregation, so results
//! are cached under a key made of the exact geometry vertices, the grid cells, the
//! reference systems and the mask mode. Keys compare the full content, so distinct
//! geometries never share an entry.
//!
//! The cache is an explicit object owned by the caller (typically via
//! [`AggregationEngine`](crate::engine::AggregationEngine)) and can be shared between
//! engines with an `Arc`. Concurrent requests for the same uncached key coordinate through a
//! per-key slot so only one thread rasterises; the others block until the result is ready.
//! Failed computations are not retained.

use crate::errors::AggResult;
use crate::geometry::Geometry;
use crate::grid::SpatialGrid;
use crate::mask::{MaskMode, SpatialWeightRaster};
use log::debug;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Identity of a rasterisation
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    geometry: Vec<u64>,
    geometry_crs: String,
    grid: Vec<u64>,
    crs: String,
    mode: MaskMode,
}

impl CacheKey {
    pub fn new(geometry: &Geometry, grid: &SpatialGrid, mode: MaskMode) -> Self {
        Self {
            geometry: geometry.shape_key(),
            geometry_crs: geometry.crs.to_string(),
            grid: grid.key(),
            crs: grid.crs().to_string(),
            mode,
        }
    }

    /// Short digest for log records
    fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheKey({:016x}, {} vertices, {} on {:?})",
            self.digest(),
            self.geometry.len(),
            self.crs,
            self.mode
        )
    }
}

type Slot = Arc<OnceLock<AggResult<Arc<SpatialWeightRaster>>>>;

#[derive(Default)]
struct CacheState {
    slots: HashMap<CacheKey, Slot>,
    // least recently used first
    order: VecDeque<CacheKey>,
}

impl CacheState {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Least-recently-used cache of [`SpatialWeightRaster`]s
pub struct WeightCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl fmt::Debug for WeightCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl WeightCache {
    /// Create a cache holding at most `capacity` rasters
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached (or in-flight) entries
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.order.clear();
    }

    /// Return the cached raster for `key`, computing it with `compute` if absent
    ///
    /// Exactly one caller computes a missing entry; concurrent callers for the same key wait
    /// for that result. If `compute` fails the error is returned to every waiter and the
    /// entry is dropped so a later call can retry.
    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> AggResult<Arc<SpatialWeightRaster>>
    where
        F: FnOnce() -> AggResult<SpatialWeightRaster>,
    {
        if self.capacity == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return compute().map(Arc::new);
        }

        let slot = {
            let mut state = self.state.lock();
            match state.slots.get(&key).cloned() {
                Some(slot) => {
                    state.touch(&key);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Weight cache hit for {:?}", key);
                    slot
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("Weight cache miss for {:?}", key);
                    let slot: Slot = Arc::new(OnceLock::new());
                    state.slots.insert(key.clone(), slot.clone());
                    state.order.push_back(key.clone());
                    while state.order.len() > self.capacity {
                        if let Some(evicted) = state.order.pop_front() {
                            state.slots.remove(&evicted);
                            debug!("Evicted {:?} from weight cache", evicted);
                        }
                    }
                    slot
                }
            }
        };

        // The lock is released while rasterising; waiters block on the slot instead
        let result = slot.get_or_init(|| compute().map(Arc::new)).clone();
        if result.is_err() {
            let mut state = self.state.lock();
            if state
                .slots
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                state.slots.remove(&key);
                state.order.retain(|k| k != &key);
            }
        }
        result
    }
}

impl Default for WeightCache {
    fn default() -> Self {
        Self::new(64)
    }
}
