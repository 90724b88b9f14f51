//! Integration tests for the cache engine.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use vfx_cache::{
    Cache, CacheConfig, DiskCacheConfig, LockStatus, PixelStorage, SampleLayout, StorageBuffer,
    TileKey, WaitOutcome, tile_size_for_depth,
};
use vfx_core::{BitDepth, RectI, RenderScale, SamplesMut, SamplesRef};

fn key(channel: &str, tx: i32) -> TileKey {
    TileKey::new(0x5eed, 3.0, 0, channel, RenderScale::IDENTITY, BitDepth::Byte).with_tile(tx, 0)
}

fn filled_ram(value: u8) -> Arc<StorageBuffer> {
    let buf = StorageBuffer::allocate_ram(RectI::from_size(8, 8), BitDepth::Byte, 1, SampleLayout::Packed)
        .unwrap();
    if let SamplesMut::U8(s) = buf.write().unwrap().samples_mut() {
        s.fill(value);
    }
    Arc::new(buf)
}

fn first_byte(buf: &StorageBuffer) -> u8 {
    match buf.read().unwrap().samples() {
        SamplesRef::U8(s) => s[0],
        _ => panic!("unexpected depth"),
    }
}

#[test]
fn at_most_once_compute() {
    const THREADS: usize = 8;
    let cache = Cache::in_memory(1 << 20);
    let barrier = Arc::new(Barrier::new(THREADS));
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let statuses = statuses.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut lock = cache.get(&key("Color.R", 0));
                statuses.lock().unwrap().push(lock.status());
                match lock.status() {
                    LockStatus::MustCompute => {
                        // Give the others time to queue up behind the reservation.
                        thread::sleep(std::time::Duration::from_millis(20));
                        lock.insert_in_cache(filled_ram(i as u8 + 1)).unwrap();
                    }
                    LockStatus::ComputationPending => {
                        assert_eq!(lock.wait_for_pending_entry(), WaitOutcome::Cached);
                    }
                    LockStatus::Cached => {}
                }
                assert_eq!(lock.status(), LockStatus::Cached);
                first_byte(lock.buffer().unwrap())
            })
        })
        .collect();

    let values: Vec<u8> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let statuses = statuses.lock().unwrap();
    let computed = statuses.iter().filter(|s| **s == LockStatus::MustCompute).count();
    assert_eq!(computed, 1);
    assert!(values.iter().all(|v| *v == values[0]));
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn abandoned_computation_is_recomputed_by_waiter() {
    let cache = Cache::in_memory(1 << 20);
    let owner = cache.get(&key("Color.G", 0));
    assert_eq!(owner.status(), LockStatus::MustCompute);

    let waiter = {
        let cache = cache.clone();
        thread::spawn(move || {
            let mut lock = cache.get(&key("Color.G", 0));
            assert_eq!(lock.status(), LockStatus::ComputationPending);
            let outcome = lock.wait_for_pending_entry();
            let retry = cache.get(&key("Color.G", 0));
            (outcome, retry.status())
        })
    };
    thread::sleep(std::time::Duration::from_millis(20));
    owner.abandon();
    let (outcome, retry) = waiter.join().unwrap();
    assert_eq!(outcome, WaitOutcome::Abandoned);
    assert_eq!(retry, LockStatus::MustCompute);
    assert!(!cache.contains(&key("Color.G", 0)));
}

#[test]
fn lru_keeps_recently_used() {
    let cache = Cache::in_memory(3 * 64);
    for tx in 0..3 {
        cache.get(&key("Color.B", tx)).insert_in_cache(filled_ram(1)).unwrap();
    }
    // Touch the oldest so the second becomes the eviction candidate.
    assert_eq!(cache.get(&key("Color.B", 0)).status(), LockStatus::Cached);
    cache.get(&key("Color.B", 3)).insert_in_cache(filled_ram(1)).unwrap();
    assert!(cache.contains(&key("Color.B", 0)));
    assert!(!cache.contains(&key("Color.B", 1)));
    assert!(cache.contains(&key("Color.B", 2)));
    assert!(cache.contains(&key("Color.B", 3)));
}

#[test]
fn disk_entries_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let slot_bytes = 64 * 1024u64;
    let config = || {
        CacheConfig::with_ram_budget(1 << 20)
            .with_disk(DiskCacheConfig::new(dir.path()).with_max_bytes(3 * 4 * slot_bytes))
    };
    let (tw, th) = tile_size_for_depth(BitDepth::Byte);
    let bounds = RectI::from_size(tw, th);
    {
        let cache = Cache::new(config()).unwrap();
        assert!(cache.has_disk());
        let tile = cache.allocate_disk_tile(BitDepth::Byte, bounds).unwrap();
        if let SamplesMut::U8(s) = tile.write().unwrap().samples_mut() {
            s.fill(77);
        }
        cache.get(&key("Color.A", 0)).insert_in_cache(tile).unwrap();
        cache.flush().unwrap();
    }
    let cache = Cache::new(config()).unwrap();
    let lock = cache.get(&key("Color.A", 0));
    assert_eq!(lock.status(), LockStatus::Cached);
    let buf = lock.buffer().unwrap();
    assert_eq!(buf.bounds(), bounds);
    assert_eq!(first_byte(buf), 77);
}

#[test]
fn full_disk_segment_evicts_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::with_ram_budget(1 << 20)
        .with_disk(DiskCacheConfig::new(dir.path()).with_max_bytes(3 * 2 * 64 * 1024));
    let cache = Cache::new(config).unwrap();
    let bounds = RectI::from_size(256, 256);
    for tx in 0..3 {
        let tile = cache.allocate_disk_tile(BitDepth::Byte, bounds).unwrap();
        cache.get(&key("Color.R", tx)).insert_in_cache(tile).unwrap();
    }
    assert!(!cache.contains(&key("Color.R", 0)));
    assert!(cache.contains(&key("Color.R", 2)));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn disk_allocation_fails_when_nothing_to_evict() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::with_ram_budget(1 << 20)
        .with_disk(DiskCacheConfig::new(dir.path()).with_max_bytes(3 * 64 * 1024));
    let cache = Cache::new(config).unwrap();
    let bounds = RectI::from_size(256, 256);
    let _held = cache.allocate_disk_tile(BitDepth::Byte, bounds).unwrap();
    let err = cache.allocate_disk_tile(BitDepth::Byte, bounds).unwrap_err();
    assert!(err.is_allocation_error());
}

#[test]
fn disk_without_config_is_rejected() {
    let cache = Cache::in_memory(1024);
    assert!(!cache.has_disk());
    assert!(cache.allocate_disk_tile(BitDepth::Float, RectI::from_size(128, 128)).is_err());
}

#[test]
fn resolved_get_waits_for_publisher() {
    let cache = Cache::in_memory(1 << 20);
    let mut owner = cache.get(&key("Color.A", 0));
    assert_eq!(owner.status(), LockStatus::MustCompute);

    let reader = {
        let cache = cache.clone();
        thread::spawn(move || {
            let lock = cache.get_resolved(&key("Color.A", 0));
            (lock.status(), lock.buffer().map(|b| first_byte(b)))
        })
    };
    thread::sleep(std::time::Duration::from_millis(20));
    owner.insert_in_cache(filled_ram(42)).unwrap();
    assert_eq!(reader.join().unwrap(), (LockStatus::Cached, Some(42)));
    assert_eq!(cache.get(&key("Color.A", 0)).status(), LockStatus::Cached);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert!(stats.hits >= 1);
    assert!(stats.hit_rate() > 0.0 && stats.hit_rate() <= 100.0);
}

fn disk_config(dir: &std::path::Path, slots_per_segment: u64) -> CacheConfig {
    CacheConfig::with_ram_budget(1 << 20)
        .with_disk(DiskCacheConfig::new(dir).with_max_bytes(3 * slots_per_segment * 64 * 1024))
}

fn fill_disk(tile: &StorageBuffer, value: u8) {
    if let SamplesMut::U8(s) = tile.write().unwrap().samples_mut() {
        s.fill(value);
    }
}

#[test]
fn caches_sharing_a_directory_keep_separate_slots() {
    let dir = tempfile::tempdir().unwrap();
    let bounds = RectI::from_size(256, 256);
    let first = Cache::new(disk_config(dir.path(), 4)).unwrap();
    let published = first.allocate_disk_tile(BitDepth::Byte, bounds).unwrap();
    fill_disk(&published, 7);
    first.get(&key("Color.A", 0)).insert_in_cache(published.clone()).unwrap();

    let second = Cache::new(disk_config(dir.path(), 4)).unwrap();
    let scratch = second.allocate_disk_tile(BitDepth::Byte, bounds).unwrap();
    fill_disk(&scratch, 9);
    assert_eq!(first_byte(&published), 7);

    let lock = second.get(&key("Color.A", 0));
    assert_eq!(lock.status(), LockStatus::Cached);
    let copy = lock.buffer().unwrap().clone();
    assert_eq!(first_byte(&copy), 7);
    assert_ne!(copy.as_disk().unwrap().slot(), published.as_disk().unwrap().slot());
    fill_disk(&copy, 3);
    assert_eq!(first_byte(&published), 7);
    assert_eq!(first_byte(&first.get(&key("Color.A", 0)).buffer().unwrap().clone()), 7);

    let stats = second.stats();
    assert_eq!((stats.hits, stats.misses), (1, 0));
}

#[test]
fn keys_published_after_attach_are_found() {
    let dir = tempfile::tempdir().unwrap();
    let bounds = RectI::from_size(256, 256);
    let first = Cache::new(disk_config(dir.path(), 4)).unwrap();
    let second = Cache::new(disk_config(dir.path(), 4)).unwrap();

    let mut reader = second.get(&key("Color.R", 1));
    assert_eq!(reader.status(), LockStatus::MustCompute);
    reader.abandon();

    let tile = first.allocate_disk_tile(BitDepth::Byte, bounds).unwrap();
    fill_disk(&tile, 55);
    first.get(&key("Color.R", 1)).insert_in_cache(tile).unwrap();

    let lock = second.get(&key("Color.R", 1));
    assert_eq!(lock.status(), LockStatus::Cached);
    assert_eq!(first_byte(lock.buffer().unwrap()), 55);
    assert_eq!(lock.buffer().unwrap().bounds(), RectI::new(256, 0, 512, 256));
}
