use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

use crate::document_parser::ParserAdapter;
use crate::error::{ReaderError, Result};
use crate::path_resolver::CanonicalPath;

/// Cache tuning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached workbooks, `None` for unbounded
    pub capacity: Option<usize>,
    /// Reload a cached workbook when its file has been modified since it was parsed.
    /// Off by default: once loaded a workbook is served as-is.
    pub revalidate: bool,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
}

/// A parsed document together with the file time it was parsed at
struct Loaded<D> {
    handle: Arc<D>,
    last_modified: Option<SystemTime>,
}

impl<D> Loaded<D> {
    /// Check if the cached document still matches the file on disk
    fn is_valid(&self, path: &CanonicalPath) -> bool {
        match (self.last_modified, file_modified(path)) {
            (Some(cached_time), Some(current_time)) => current_time <= cached_time,
            // A vanished file is stale; an unknown time is trusted.
            (_, None) => path.as_path().exists(),
            (None, Some(_)) => true,
        }
    }
}

/// Per-path load slot. `None` while nobody has loaded the path yet; the lock is
/// held for the whole parse, which is what makes concurrent callers wait.
type Slot<D> = Mutex<Option<Loaded<D>>>;

struct CacheEntry<D> {
    slot: Arc<Slot<D>>,
    last_used: u64,
    /// Set once the slot holds a parsed document. Only ready entries are
    /// reported as cached or picked for eviction.
    ready: bool,
}

struct CacheState<D> {
    entries: HashMap<CanonicalPath, CacheEntry<D>>,
    tick: u64,
}

/// Thread-safe cache of parsed workbooks keyed by resolved path.
///
/// The map lock is only held long enough to find or create the slot for a
/// path; parsing happens under the slot's own lock. Two callers asking for the
/// same uncached path get one parse between them, while callers for different
/// paths never wait on each other's parse. Failed loads are not cached.
///
/// Lock order is slot, then map. The map lock is never held while waiting on a
/// slot.
pub struct WorkbookCache<P: ParserAdapter> {
    adapter: P,
    config: CacheConfig,
    state: Mutex<CacheState<P::Document>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl<P: ParserAdapter> WorkbookCache<P> {
    pub fn new(adapter: P, config: CacheConfig) -> Self {
        Self {
            adapter,
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached document for `path`, parsing the file on first use.
    ///
    /// Blocks while the file is parsed; call it from a blocking context.
    pub fn get_or_load(&self, path: &CanonicalPath) -> Result<Arc<P::Document>> {
        loop {
            let slot = self.slot_for(path);
            let mut loaded = slot.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(current) = loaded.as_ref() {
                if !self.config.revalidate || current.is_valid(path) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&current.handle));
                }
                log::info!("Workbook changed on disk, reloading: {}", path);
                *loaded = None;
                self.set_ready(path, &slot, false);
            }

            // The slot left the map while we waited on it (a failed load or an
            // invalidation). Loading into it would cache a document no later
            // caller can reach, so start over with the live slot.
            if !self.is_live(path, &slot) {
                log::debug!("Retrying lookup on a detached slot: {}", path);
                continue;
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            return match self.load(path) {
                Ok(current) => {
                    let handle = Arc::clone(&current.handle);
                    *loaded = Some(current);
                    self.set_ready(path, &slot, true);
                    Ok(handle)
                }
                Err(e) => {
                    // Still holding the slot: waiters only wake once it is detached.
                    self.discard(path, &slot);
                    Err(e)
                }
            };
        }
    }

    /// Drop the cached document for `path`. Returns whether an entry existed.
    ///
    /// A parse already in flight for the path still completes for its callers;
    /// the next request parses the file again.
    pub fn invalidate(&self, path: &CanonicalPath) -> bool {
        let removed = self.lock_state().entries.remove(path).is_some();
        if removed {
            log::debug!("Invalidated cached workbook: {}", path);
        }
        removed
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.lock_state().entries.clear();
    }

    /// Whether a loaded document for `path` is currently cached
    pub fn is_cached(&self, path: &CanonicalPath) -> bool {
        self.lock_state()
            .entries
            .get(path)
            .is_some_and(|entry| entry.ready)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.lock_state().entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState<P::Document>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find or create the slot for `path`, evicting if over capacity
    fn slot_for(&self, path: &CanonicalPath) -> Arc<Slot<P::Document>> {
        let mut state = self.lock_state();
        state.tick += 1;
        let tick = state.tick;

        if let Some(entry) = state.entries.get_mut(path) {
            entry.last_used = tick;
            return Arc::clone(&entry.slot);
        }

        let slot = Arc::new(Mutex::new(None));
        state.entries.insert(
            path.clone(),
            CacheEntry {
                slot: Arc::clone(&slot),
                last_used: tick,
                ready: false,
            },
        );
        self.evict_over_capacity(&mut state, path);
        slot
    }

    /// Evict least recently used ready entries until the cache fits.
    ///
    /// Entries still loading are skipped, so the map can briefly hold more than
    /// `capacity` entries; the excess goes once those loads finish.
    fn evict_over_capacity(&self, state: &mut CacheState<P::Document>, keep: &CanonicalPath) {
        let Some(capacity) = self.config.capacity else {
            return;
        };
        let capacity = capacity.max(1);

        while state.entries.len() > capacity {
            let oldest = state
                .entries
                .iter()
                .filter(|(path, entry)| entry.ready && *path != keep)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(path, _)| path.clone());
            let Some(oldest) = oldest else { break };

            state.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            log::debug!("Evicted cached workbook: {}", oldest);
        }
    }

    /// Whether the map entry for `path` is still `slot`
    fn is_live(&self, path: &CanonicalPath, slot: &Arc<Slot<P::Document>>) -> bool {
        self.lock_state()
            .entries
            .get(path)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, slot))
    }

    /// Flag the entry for `path` as ready or not, if it still points at `slot`
    fn set_ready(&self, path: &CanonicalPath, slot: &Arc<Slot<P::Document>>, ready: bool) {
        let mut state = self.lock_state();
        match state.entries.get_mut(path) {
            Some(entry) if Arc::ptr_eq(&entry.slot, slot) => entry.ready = ready,
            _ => return,
        }
        if ready {
            self.evict_over_capacity(&mut state, path);
        }
    }

    /// Remove the entry for `path` if it still points at `slot`
    fn discard(&self, path: &CanonicalPath, slot: &Arc<Slot<P::Document>>) {
        let mut state = self.lock_state();
        if state
            .entries
            .get(path)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, slot))
        {
            state.entries.remove(path);
        }
    }

    fn load(&self, path: &CanonicalPath) -> Result<Loaded<P::Document>> {
        if !path.as_path().is_file() {
            return Err(ReaderError::FileNotFound(path.as_path().to_path_buf()));
        }

        // Read the time before parsing so a write during the parse counts as a change.
        let last_modified = file_modified(path);
        let document = self.adapter.parse(path.as_path())?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        log::info!("Loaded workbook into cache: {}", path);

        Ok(Loaded {
            handle: Arc::new(document),
            last_modified,
        })
    }
}

fn file_modified(path: &CanonicalPath) -> Option<SystemTime> {
    std::fs::metadata(path.as_path())
        .and_then(|metadata| metadata.modified())
        .ok()
}
