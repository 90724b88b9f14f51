//! The cache engine.
//!
//! [`Cache`] maps [`TileKey`]s to shared storage buffers with
//! at-most-once computation semantics:
//!
//! - The first [`get`](Cache::get) of an absent key reserves it and returns
//!   a [`LockStatus::MustCompute`] lock.
//! - Concurrent `get`s of a reserved key return
//!   [`LockStatus::ComputationPending`] locks that block in
//!   [`wait_for_pending_entry`](CacheEntryLock::wait_for_pending_entry).
//! - Inserting publishes the buffer and wakes every waiter; dropping the
//!   reservation wakes them as abandoned.
//!
//! Ready entries are evicted least-recently-used first, with separate byte
//! budgets for host memory and textures. Disk entries live in one
//! memory-mapped [`TileSegment`] per sample width and are evicted when a
//! segment runs out of slots. Published disk entries survive the process
//! and are restored when a cache reopens the same directory. Caches
//! attached to the same directory at once never share slots; a miss in one
//! copies a record the other published.
//!
//! `Cache` is a cheap handle; clones share the same engine.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};
use vfx_core::{BitDepth, Error, RectI, Result};

use crate::config::CacheConfig;
use crate::key::TileKey;
use crate::lock::{CacheEntryLock, LockStatus};
use crate::lru::LruBudget;
use crate::memory::format_bytes;
use crate::release::DeferredRelease;
use crate::segment::TileSegment;
use crate::storage::{DiskTile, PixelStorage, StorageBuffer, StorageMode, geometry_for_depth};

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups answered with cached data.
    pub hits: u64,
    /// Lookups that reserved the key for computation.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Ready entries.
    pub entries: usize,
    /// Reserved keys still being computed.
    pub pending: usize,
    /// Bytes of host-memory entries.
    pub ram_bytes: u64,
    /// Bytes of texture entries.
    pub texture_bytes: u64,
    /// Disk slots in use, published or held by images.
    pub disk_slots_used: u64,
}

impl CacheStats {
    /// Hit rate as percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug)]
struct ReadyEntry {
    buffer: Arc<StorageBuffer>,
    budget: usize,
    size: u64,
    tick: u64,
}

#[derive(Debug)]
enum Slot {
    Pending { ticket: u64 },
    Ready(ReadyEntry),
}

// Budgets: ram, texture, then one per disk segment (1, 2, 4 bytes per sample).
const RAM_BUDGET: usize = 0;
const TEXTURE_BUDGET: usize = 1;
const BUDGET_COUNT: usize = 5;

const fn segment_index(depth: BitDepth) -> usize {
    match depth.bytes_per_sample() {
        1 => 0,
        2 => 1,
        _ => 2,
    }
}

const fn budget_index(mode: StorageMode, depth: BitDepth) -> usize {
    match mode {
        StorageMode::Ram => RAM_BUDGET,
        StorageMode::Texture => TEXTURE_BUDGET,
        StorageMode::Disk => 2 + segment_index(depth),
    }
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<TileKey, Slot>,
    budgets: [LruBudget<TileKey>; BUDGET_COUNT],
    next_ticket: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    /// Removes a ready entry, returning its buffer.
    fn take_ready(&mut self, key: &TileKey) -> Option<Arc<StorageBuffer>> {
        match self.entries.get(key) {
            Some(Slot::Ready(_)) => {}
            _ => return None,
        }
        let Some(Slot::Ready(entry)) = self.entries.remove(key) else {
            return None;
        };
        self.budgets[entry.budget].forget(entry.tick, entry.size);
        if let Some(tile) = entry.buffer.as_disk() {
            tile.unpublish();
        }
        Some(entry.buffer)
    }

    /// Evicts the oldest entry of a budget.
    fn evict_oldest(&mut self, budget: usize) -> Option<Arc<StorageBuffer>> {
        let key = self.budgets[budget].oldest()?;
        let buffer = self.take_ready(&key)?;
        self.evictions += 1;
        trace!(%key, "evicted");
        Some(buffer)
    }
}

pub(crate) struct CacheShared {
    config: CacheConfig,
    state: Mutex<CacheState>,
    resolved: Condvar,
    segments: [Option<Arc<TileSegment>>; 3],
    release: DeferredRelease,
}

impl CacheShared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, key: &TileKey, ticket: u64, buffer: Arc<StorageBuffer>) -> Result<()> {
        let size = buffer.size_bytes();
        let budget = budget_index(buffer.mode(), buffer.bit_depth());
        let mut evicted = Vec::new();
        let result = {
            let mut state = self.lock();
            match state.entries.get(key) {
                Some(Slot::Pending { ticket: t }) if *t == ticket => {}
                _ => return Err(Error::other(format!("reservation of {key} was lost"))),
            }
            if buffer.mode() != StorageMode::Disk && !state.budgets[budget].can_hold(size) {
                state.entries.remove(key);
                Err(Error::allocation_failed(
                    size as usize,
                    format!(
                        "entry larger than the {} cache budget ({})",
                        buffer.mode(),
                        format_bytes(state.budgets[budget].max())
                    ),
                ))
            } else {
                while state.budgets[budget].over_budget_with(size) {
                    match state.evict_oldest(budget) {
                        Some(b) => evicted.push(b),
                        None => break,
                    }
                }
                if let Some(tile) = buffer.as_disk() {
                    if !tile.publish(key) {
                        debug!(%key, "key not persistable, entry kept in memory only");
                    }
                }
                let tick = state.budgets[budget].admit(key.clone(), size);
                state.entries.insert(
                    key.clone(),
                    Slot::Ready(ReadyEntry { buffer, budget, size, tick }),
                );
                trace!(%key, size, "inserted");
                Ok(())
            }
        };
        self.resolved.notify_all();
        self.release.release(evicted);
        result
    }

    pub(crate) fn abandon(&self, key: &TileKey, ticket: u64) {
        {
            let mut state = self.lock();
            if matches!(state.entries.get(key), Some(Slot::Pending { ticket: t }) if *t == ticket) {
                state.entries.remove(key);
                trace!(%key, "abandoned");
            }
        }
        self.resolved.notify_all();
    }

    /// Copies a record another attached cache published for `key` into a
    /// slot of this cache.
    fn adopt_published(&self, key: &TileKey) -> Option<Arc<StorageBuffer>> {
        let segment = self.segments[segment_index(key.bit_depth())].as_ref()?;
        let source = segment.find(key)?;
        let slot = segment.allocate_slot()?;
        let (tx, ty) = key.tile();
        let bounds = DiskTile::cell_bounds(key.bit_depth(), tx, ty);
        let tile = DiskTile::adopt(segment.clone(), slot, bounds, key.bit_depth(), false);
        if !segment.copy_published(source, key, slot) {
            debug!(%key, source, "shared record changed while copying");
            return None;
        }
        trace!(%key, source, slot, "adopted shared record");
        Some(Arc::new(StorageBuffer::Disk(tile)))
    }

    /// Blocks while `key` is reserved under `ticket`. Returns the buffer once
    /// published, `None` if the reservation went away without data.
    pub(crate) fn wait(&self, key: &TileKey, ticket: u64) -> Option<Arc<StorageBuffer>> {
        let mut state = self.lock();
        loop {
            match state.entries.get(key) {
                Some(Slot::Pending { ticket: t }) if *t == ticket => {
                    state = self
                        .resolved
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(Slot::Ready(entry)) => return Some(entry.buffer.clone()),
                _ => return None,
            }
        }
    }
}

/// Handle to a tile cache.
#[derive(Clone)]
pub struct Cache {
    shared: Arc<CacheShared>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Cache {
    /// Creates a cache, opening or creating disk segments when configured.
    ///
    /// Published records of existing segments become ready entries.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let mut budgets = Self::empty_budgets(&config);
        let mut entries = HashMap::new();
        let mut segments: [Option<Arc<TileSegment>>; 3] = [None, None, None];

        if let Some(disk) = &config.disk {
            std::fs::create_dir_all(&disk.dir)?;
            for depth in [BitDepth::Byte, BitDepth::Short, BitDepth::Float] {
                let geometry = geometry_for_depth(depth);
                let slots = (disk.max_bytes / 3 / geometry.slot_bytes() as u64).clamp(1, u32::MAX as u64) as u32;
                let path = disk.dir.join(format!("tiles_{}.seg", geometry.bytes_per_sample));
                let segment = Arc::new(TileSegment::open_or_create(
                    &path,
                    geometry,
                    slots,
                    disk.recreate_on_mismatch,
                )?);
                let index = segment_index(depth);
                for (slot, key) in segment.take_restored() {
                    let (tx, ty) = key.tile();
                    let bounds = DiskTile::cell_bounds(key.bit_depth(), tx, ty);
                    let tile = DiskTile::adopt(segment.clone(), slot, bounds, key.bit_depth(), true);
                    if entries.contains_key(&key) {
                        tile.unpublish();
                        continue;
                    }
                    let size = tile.size_bytes();
                    let budget = 2 + index;
                    let tick = budgets[budget].admit(key.clone(), size);
                    let buffer = Arc::new(StorageBuffer::Disk(tile));
                    entries.insert(key, Slot::Ready(ReadyEntry { buffer, budget, size, tick }));
                }
                segments[index] = Some(segment);
            }
        }

        Ok(Self::assemble(config, budgets, entries, segments))
    }

    fn assemble(
        config: CacheConfig,
        budgets: [LruBudget<TileKey>; BUDGET_COUNT],
        entries: HashMap<TileKey, Slot>,
        segments: [Option<Arc<TileSegment>>; 3],
    ) -> Self {
        debug!(
            ram = %format_bytes(config.max_ram_bytes),
            texture = %format_bytes(config.max_texture_bytes),
            disk = ?config.disk.as_ref().map(|d| d.dir.display().to_string()),
            restored = entries.len(),
            "cache created"
        );
        Self {
            shared: Arc::new(CacheShared {
                release: DeferredRelease::new(config.release_in_background),
                config,
                state: Mutex::new(CacheState {
                    entries,
                    budgets,
                    next_ticket: 1,
                    hits: 0,
                    misses: 0,
                    evictions: 0,
                }),
                resolved: Condvar::new(),
                segments,
            }),
        }
    }

    /// Host-memory cache with a byte budget and no disk storage.
    pub fn in_memory(max_ram_bytes: u64) -> Self {
        let config = CacheConfig {
            max_ram_bytes,
            disk: None,
            ..CacheConfig::default()
        };
        let budgets = Self::empty_budgets(&config);
        Self::assemble(config, budgets, HashMap::new(), [None, None, None])
    }

    fn empty_budgets(config: &CacheConfig) -> [LruBudget<TileKey>; BUDGET_COUNT] {
        [
            LruBudget::with_budget(config.max_ram_bytes),
            LruBudget::with_budget(config.max_texture_bytes),
            LruBudget::with_budget(u64::MAX),
            LruBudget::with_budget(u64::MAX),
            LruBudget::with_budget(u64::MAX),
        ]
    }

    /// Configuration the cache was created with.
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Looks up `key`, reserving it when absent.
    pub fn get(&self, key: &TileKey) -> CacheEntryLock {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        match state.entries.get_mut(key) {
            Some(Slot::Ready(entry)) => {
                entry.tick = state.budgets[entry.budget].touch(entry.tick);
                state.hits += 1;
                let buffer = entry.buffer.clone();
                drop(guard);
                CacheEntryLock::cached(self.shared.clone(), key.clone(), buffer)
            }
            Some(Slot::Pending { ticket }) => {
                let ticket = *ticket;
                drop(guard);
                CacheEntryLock::reserved(self.shared.clone(), key.clone(), LockStatus::ComputationPending, ticket)
            }
            None => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.entries.insert(key.clone(), Slot::Pending { ticket });
                drop(guard);
                let mut lock =
                    CacheEntryLock::reserved(self.shared.clone(), key.clone(), LockStatus::MustCompute, ticket);
                let adopted = match self.shared.adopt_published(key) {
                    Some(buffer) => lock.insert_in_cache(buffer).is_ok(),
                    None => false,
                };
                let mut state = self.shared.lock();
                if adopted {
                    state.hits += 1;
                } else {
                    state.misses += 1;
                }
                lock
            }
        }
    }

    /// Looks up `key`, waiting out pending computations.
    ///
    /// Returns a lock that is either [`LockStatus::Cached`] or
    /// [`LockStatus::MustCompute`].
    pub fn get_resolved(&self, key: &TileKey) -> CacheEntryLock {
        loop {
            let mut lock = self.get(key);
            if lock.status() != LockStatus::ComputationPending {
                return lock;
            }
            if lock.wait_for_pending_entry() == crate::lock::WaitOutcome::Cached {
                return lock;
            }
        }
    }

    /// Ready buffer of `key` without reserving or touching it.
    pub fn peek(&self, key: &TileKey) -> Option<Arc<StorageBuffer>> {
        match self.shared.lock().entries.get(key) {
            Some(Slot::Ready(entry)) => Some(entry.buffer.clone()),
            _ => None,
        }
    }

    /// Ready buffer of `key`, refreshing its recency. Never reserves.
    pub fn get_if_cached(&self, key: &TileKey) -> Option<Arc<StorageBuffer>> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        match state.entries.get_mut(key) {
            Some(Slot::Ready(entry)) => {
                entry.tick = state.budgets[entry.budget].touch(entry.tick);
                state.hits += 1;
                Some(entry.buffer.clone())
            }
            _ => None,
        }
    }

    /// Whether `key` has a ready entry.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.peek(key).is_some()
    }

    /// Removes the ready entry of `key`. Reservations are left alone.
    pub fn remove_entry(&self, key: &TileKey) -> bool {
        let removed = self.shared.lock().take_ready(key);
        match removed {
            Some(buffer) => {
                trace!(%key, "removed");
                self.shared.release.release(vec![buffer]);
                true
            }
            None => false,
        }
    }

    /// Drops every ready entry. Reservations survive.
    pub fn clear(&self) {
        let released: Vec<_> = {
            let mut state = self.shared.lock();
            let keys: Vec<TileKey> = state
                .entries
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| state.take_ready(k)).collect()
        };
        debug!(entries = released.len(), "cache cleared");
        self.shared.release.release(released);
    }

    /// Whether disk-backed tiles can be allocated.
    pub fn has_disk(&self) -> bool {
        self.shared.segments.iter().any(Option::is_some)
    }

    /// Allocates a zeroed disk tile of `depth` covering `bounds`.
    ///
    /// Evicts least-recently-used disk entries of the same segment while it
    /// is full. Fails with [`Error::AllocationFailed`] when nothing more can
    /// be evicted.
    pub fn allocate_disk_tile(&self, depth: BitDepth, bounds: RectI) -> Result<Arc<StorageBuffer>> {
        let index = segment_index(depth);
        let segment = self.shared.segments[index]
            .as_ref()
            .ok_or_else(|| Error::incompatible_storage("disk cache is not configured"))?;
        loop {
            if let Some(slot) = segment.allocate_slot() {
                return Ok(Arc::new(StorageBuffer::Disk(DiskTile::new(
                    segment.clone(),
                    slot,
                    bounds,
                    depth,
                ))));
            }
            let evicted = self.shared.lock().evict_oldest(2 + index);
            match evicted {
                // Dropped here so the slot returns before the next attempt.
                Some(buffer) => drop(buffer),
                None => {
                    return Err(Error::allocation_failed(
                        segment.geometry().slot_bytes(),
                        format!("disk segment {} is full", segment.path().display()),
                    ));
                }
            }
        }
    }

    /// Drops `buffers` on the release thread.
    pub fn release_later(&self, buffers: Vec<Arc<StorageBuffer>>) {
        self.shared.release.release(buffers);
    }

    /// Flushes disk segments.
    pub fn flush(&self) -> Result<()> {
        for segment in self.shared.segments.iter().flatten() {
            segment.flush()?;
        }
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        let pending = state
            .entries
            .values()
            .filter(|s| matches!(s, Slot::Pending { .. }))
            .count();
        let disk_slots_used = self
            .shared
            .segments
            .iter()
            .flatten()
            .map(|s| s.slot_count() as u64 - s.free_slots() as u64)
            .sum();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len() - pending,
            pending,
            ram_bytes: state.budgets[RAM_BUDGET].used(),
            texture_bytes: state.budgets[TEXTURE_BUDGET].used(),
            disk_slots_used,
        }
    }
}

impl Drop for CacheShared {
    fn drop(&mut self) {
        for segment in self.segments.iter().flatten() {
            if let Err(e) = segment.flush() {
                tracing::warn!(path = %segment.path().display(), error = %e, "segment flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::WaitOutcome;
    use crate::storage::SampleLayout;
    use vfx_core::RenderScale;

    fn key(tx: i32) -> TileKey {
        TileKey::new(1, 0.0, 0, "Color.RGBA", RenderScale::IDENTITY, BitDepth::Byte).with_tile(tx, 0)
    }

    fn ram(bytes: i32) -> Arc<StorageBuffer> {
        Arc::new(StorageBuffer::allocate_ram(RectI::from_size(bytes, 1), BitDepth::Byte, 1, SampleLayout::Packed).unwrap())
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = Cache::in_memory(1024);
        let mut lock = cache.get(&key(0));
        assert_eq!(lock.status(), LockStatus::MustCompute);
        lock.insert_in_cache(ram(16)).unwrap();
        assert_eq!(lock.status(), LockStatus::Cached);
        let hit = cache.get(&key(0));
        assert_eq!(hit.status(), LockStatus::Cached);
        assert_eq!(hit.buffer().unwrap().size_bytes(), 16);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert_eq!(stats.ram_bytes, 16);
    }

    #[test]
    fn test_drop_abandons() {
        let cache = Cache::in_memory(1024);
        let lock = cache.get(&key(0));
        let mut pending = cache.get(&key(0));
        assert_eq!(pending.status(), LockStatus::ComputationPending);
        drop(lock);
        assert_eq!(pending.wait_for_pending_entry(), WaitOutcome::Abandoned);
        assert_eq!(cache.get(&key(0)).status(), LockStatus::MustCompute);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = Cache::in_memory(32);
        for tx in 0..3 {
            cache.get(&key(tx)).insert_in_cache(ram(16)).unwrap();
        }
        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_oversized_entry_fails() {
        let cache = Cache::in_memory(8);
        let mut lock = cache.get(&key(0));
        let err = lock.insert_in_cache(ram(16)).unwrap_err();
        assert!(err.is_allocation_error());
        drop(lock);
        assert_eq!(cache.stats().pending, 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = Cache::in_memory(1024);
        cache.get(&key(0)).insert_in_cache(ram(4)).unwrap();
        cache.get(&key(1)).insert_in_cache(ram(4)).unwrap();
        let reserved = cache.get(&key(2));
        assert!(!cache.remove_entry(&key(2)));
        assert!(cache.remove_entry(&key(0)));
        assert!(!cache.contains(&key(0)));
        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.pending, stats.ram_bytes), (0, 1, 0));
        drop(reserved);
    }

    #[test]
    fn test_double_insert_rejected() {
        let cache = Cache::in_memory(1024);
        let mut lock = cache.get(&key(0));
        lock.insert_in_cache(ram(4)).unwrap();
        assert!(lock.insert_in_cache(ram(4)).is_err());
    }
}
