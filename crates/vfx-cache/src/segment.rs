//! Memory-mapped tile segments.
//!
//! A segment is one file holding fixed-size tile payloads of a single
//! sample width, plus a table of metadata records describing which slot
//! holds which [`TileKey`]. The layout is versioned; files with an unknown
//! magic, version or geometry are rejected instead of misread.
//!
//! # File Layout
//!
//! ```text
//! +----------------------+  0
//! | SegmentHeader (40 B) |
//! +----------------------+  40
//! | SlotRecord x N       |  112 bytes each, native endianness
//! +----------------------+  padded to 4096
//! | payload slot 0       |  tile_width * tile_height * bytes_per_sample
//! | payload slot 1       |
//! | ...                  |
//! +----------------------+
//! ```
//!
//! # Sharing
//!
//! Slot ownership lives in the mapping, so several caches (in one process
//! or many) can attach to the same file. Each record carries a state word
//! changed only by atomic compare-and-swap:
//!
//! - `free`: nobody owns the slot.
//! - `claimed`: a tile owns the payload and has not published it.
//! - `ready`: the record names a published tile.
//!
//! Every transition bumps the record's generation, so a reader copying a
//! ready payload can detect that the slot changed underneath it.
//!
//! The header counts attached caches. The first cache to attach adopts
//! every ready record and frees slots left claimed by a previous run;
//! later caches find published records on lookup instead.

use std::fs::OpenOptions;
use std::mem::offset_of;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering, fence};
use std::sync::{Mutex, PoisonError};

use bytemuck::{Pod, Zeroable};
use memmap2::MmapMut;
use tracing::{debug, warn};

use vfx_core::{BitDepth, Error, RenderScale, Result};

use crate::key::TileKey;

/// File magic of a tile segment.
pub const SEGMENT_MAGIC: [u8; 8] = *b"VFXTILE\0";

/// Current layout version.
pub const SEGMENT_VERSION: u32 = 2;

/// Longest channel name a record can persist.
pub const MAX_CHANNEL_NAME: usize = 32;

const PAYLOAD_ALIGN: usize = 4096;

const STATE_FREE: u32 = 0;
const STATE_CLAIMED: u32 = 1;
const STATE_READY: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SegmentHeader {
    magic: [u8; 8],
    version: u32,
    bytes_per_sample: u32,
    tile_width: u32,
    tile_height: u32,
    slot_count: u32,
    attached: u32,
    _reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SlotRecord {
    content_hash: u64,
    time_bits: u64,
    proxy_x_bits: u64,
    proxy_y_bits: u64,
    checksum: u64,
    state: u32,
    generation: u32,
    view: i32,
    mip_level: u32,
    draft: u32,
    bit_depth: u32,
    tile_x: i32,
    tile_y: i32,
    channel_len: u32,
    _pad: u32,
    channel: [u8; MAX_CHANNEL_NAME],
}

const HEADER_SIZE: usize = std::mem::size_of::<SegmentHeader>();
const RECORD_SIZE: usize = std::mem::size_of::<SlotRecord>();
const ATTACHED_OFFSET: usize = offset_of!(SegmentHeader, attached);
const STATE_OFFSET: usize = offset_of!(SlotRecord, state);
const GENERATION_OFFSET: usize = offset_of!(SlotRecord, generation);
const KEY_TAIL_OFFSET: usize = offset_of!(SlotRecord, view);

impl SlotRecord {
    fn from_key(key: &TileKey) -> Option<Self> {
        let name = key.channel().as_bytes();
        if name.len() > MAX_CHANNEL_NAME {
            return None;
        }
        let (px, py) = key.proxy_scale().to_bits();
        let (tx, ty) = key.tile();
        let mut channel = [0u8; MAX_CHANNEL_NAME];
        channel[..name.len()].copy_from_slice(name);
        let mut record = Self {
            content_hash: key.content_hash(),
            time_bits: key.time().to_bits(),
            proxy_x_bits: px,
            proxy_y_bits: py,
            checksum: 0,
            state: STATE_FREE,
            generation: 0,
            view: key.view(),
            mip_level: key.mip_level(),
            draft: key.is_draft() as u32,
            bit_depth: key.bit_depth().tag(),
            tile_x: tx,
            tile_y: ty,
            channel_len: name.len() as u32,
            _pad: 0,
            channel,
        };
        record.checksum = record.compute_checksum();
        Some(record)
    }

    /// FNV-1a over every field except `state`, `generation` and `checksum`.
    fn compute_checksum(&self) -> u64 {
        let mut copy = *self;
        copy.state = 0;
        copy.generation = 0;
        copy.checksum = 0;
        bytemuck::bytes_of(&copy)
            .iter()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, &b| {
                (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
            })
    }

    fn to_key(&self) -> Option<TileKey> {
        if self.checksum != self.compute_checksum() {
            return None;
        }
        let depth = BitDepth::from_tag(self.bit_depth)?;
        let len = self.channel_len as usize;
        let channel = std::str::from_utf8(self.channel.get(..len)?).ok()?;
        let proxy = RenderScale {
            x: f64::from_bits(self.proxy_x_bits),
            y: f64::from_bits(self.proxy_y_bits),
        };
        Some(
            TileKey::new(
                self.content_hash,
                f64::from_bits(self.time_bits),
                self.view,
                channel,
                proxy,
                depth,
            )
            .with_mip_level(self.mip_level)
            .with_draft(self.draft != 0)
            .with_tile(self.tile_x, self.tile_y),
        )
    }
}

/// Payload geometry of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentGeometry {
    /// Bytes per sample of every payload.
    pub bytes_per_sample: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
}

impl SegmentGeometry {
    /// Payload size of one slot.
    pub fn slot_bytes(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize * self.bytes_per_sample as usize
    }
}

/// Summary of a segment, for tools.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// File path.
    pub path: PathBuf,
    /// Payload geometry.
    pub geometry: SegmentGeometry,
    /// Total slots.
    pub slot_count: u32,
    /// Slots claimed or published by any attached cache.
    pub used_slots: u32,
    /// Caches currently attached.
    pub attached: u32,
    /// File size in bytes.
    pub file_bytes: u64,
}

/// A memory-mapped tile segment.
pub struct TileSegment {
    path: PathBuf,
    geometry: SegmentGeometry,
    slot_count: u32,
    payload_offset: usize,
    base: NonNull<u8>,
    map: MmapMut,
    next_slot: AtomicU32,
    attached: bool,
    restored: Mutex<Vec<(u32, TileKey)>>,
}

// SAFETY: the mapping lives as long as the segment. State words are only
// touched atomically; record fields and payloads are written by the holder
// of a claimed slot.
unsafe impl Send for TileSegment {}
unsafe impl Sync for TileSegment {}

impl std::fmt::Debug for TileSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSegment")
            .field("path", &self.path)
            .field("geometry", &self.geometry)
            .field("slot_count", &self.slot_count)
            .field("attached", &self.attached)
            .finish()
    }
}

fn payload_offset(slot_count: u32) -> usize {
    let table = HEADER_SIZE + slot_count as usize * RECORD_SIZE;
    table.div_ceil(PAYLOAD_ALIGN) * PAYLOAD_ALIGN
}

fn file_size(geometry: &SegmentGeometry, slot_count: u32) -> u64 {
    payload_offset(slot_count) as u64 + slot_count as u64 * geometry.slot_bytes() as u64
}

fn read_header(map: &MmapMut) -> Result<SegmentHeader> {
    let bytes = map
        .get(..HEADER_SIZE)
        .ok_or_else(|| Error::invalid_segment("file shorter than header"))?;
    let header: SegmentHeader = bytemuck::pod_read_unaligned(bytes);
    if header.magic != SEGMENT_MAGIC {
        return Err(Error::invalid_segment("bad magic"));
    }
    if header.version != SEGMENT_VERSION {
        return Err(Error::invalid_segment(format!(
            "version {} (expected {SEGMENT_VERSION})",
            header.version
        )));
    }
    let geometry = SegmentGeometry {
        bytes_per_sample: header.bytes_per_sample,
        tile_width: header.tile_width,
        tile_height: header.tile_height,
    };
    if (map.len() as u64) < file_size(&geometry, header.slot_count) {
        return Err(Error::invalid_segment("file truncated"));
    }
    Ok(header)
}

impl TileSegment {
    /// Opens the segment at `path` for a cache, creating it when missing.
    ///
    /// An existing file must match `geometry` and `slot_count`. On a
    /// mismatch the file is recreated if `recreate_on_mismatch` is set and
    /// no other cache is attached, otherwise [`Error::InvalidSegment`] is
    /// returned.
    ///
    /// The returned segment is attached until it drops. When no other cache
    /// was attached, its ready records are handed out by
    /// [`take_restored`](Self::take_restored).
    pub fn open_or_create(
        path: impl AsRef<Path>,
        geometry: SegmentGeometry,
        slot_count: u32,
        recreate_on_mismatch: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        if slot_count == 0 {
            return Err(Error::allocation_failed(
                geometry.slot_bytes(),
                "disk budget smaller than one tile",
            ));
        }
        let exists = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if exists {
            match Self::open_existing(path) {
                Ok(mut seg) => {
                    let others = seg.attach();
                    if seg.geometry == geometry && seg.slot_count == slot_count {
                        if others == 0 {
                            seg.restore();
                        } else {
                            debug!(path = %path.display(), others, "joined shared tile segment");
                        }
                        return Ok(seg);
                    }
                    let mismatch = format!(
                        "{}: geometry {:?} x {} does not match {:?} x {}",
                        path.display(),
                        seg.geometry,
                        seg.slot_count,
                        geometry,
                        slot_count
                    );
                    if others > 0 {
                        return Err(Error::invalid_segment(format!("{mismatch}, in use by {others} cache(s)")));
                    }
                    if !recreate_on_mismatch {
                        return Err(Error::invalid_segment(mismatch));
                    }
                    drop(seg);
                    warn!(path = %path.display(), "recreating incompatible tile segment");
                }
                Err(e) if !recreate_on_mismatch => return Err(e),
                Err(e) => warn!(path = %path.display(), error = %e, "recreating unreadable tile segment"),
            }
        }
        let mut seg = Self::create(path, geometry, slot_count)?;
        seg.attach();
        Ok(seg)
    }

    fn create(path: &Path, geometry: SegmentGeometry, slot_count: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(file_size(&geometry, slot_count))?;
        // SAFETY: the file is sized above; concurrent users only touch
        // state words atomically and the payloads of slots they claimed.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let header = SegmentHeader {
            magic: SEGMENT_MAGIC,
            version: SEGMENT_VERSION,
            bytes_per_sample: geometry.bytes_per_sample,
            tile_width: geometry.tile_width,
            tile_height: geometry.tile_height,
            slot_count,
            attached: 0,
            _reserved: [0; 2],
        };
        map[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        map.flush_range(0, HEADER_SIZE)?;
        debug!(
            path = %path.display(),
            slots = slot_count,
            bytes = file_size(&geometry, slot_count),
            "created tile segment"
        );
        Ok(Self::from_map(path, geometry, slot_count, map))
    }

    /// Opens an existing segment without attaching, taking its geometry
    /// from the header. Used by tools.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: see `create`.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let header = read_header(&map)?;
        let geometry = SegmentGeometry {
            bytes_per_sample: header.bytes_per_sample,
            tile_width: header.tile_width,
            tile_height: header.tile_height,
        };
        Ok(Self::from_map(path, geometry, header.slot_count, map))
    }

    fn from_map(path: &Path, geometry: SegmentGeometry, slot_count: u32, mut map: MmapMut) -> Self {
        let base = NonNull::new(map.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            path: path.to_path_buf(),
            geometry,
            slot_count,
            payload_offset: payload_offset(slot_count),
            base,
            map,
            next_slot: AtomicU32::new(0),
            attached: false,
            restored: Mutex::new(Vec::new()),
        }
    }

    /// Registers this handle as an attached cache. Returns how many were
    /// attached before.
    fn attach(&mut self) -> u32 {
        self.attached = true;
        self.attached_word().fetch_add(1, Ordering::AcqRel)
    }

    /// Adopts ready records and frees slots a previous run left claimed.
    fn restore(&self) {
        let mut restored = Vec::new();
        let mut rejected = 0usize;
        let mut stale = 0usize;
        for slot in 0..self.slot_count {
            match self.state_word(slot).load(Ordering::Acquire) {
                STATE_READY => match self.record(slot).to_key() {
                    Some(key) if key.bit_depth().bytes_per_sample() as u32 == self.geometry.bytes_per_sample => {
                        restored.push((slot, key));
                    }
                    _ => {
                        rejected += 1;
                        self.transition(slot, STATE_READY, STATE_FREE);
                    }
                },
                STATE_CLAIMED => {
                    stale += 1;
                    self.transition(slot, STATE_CLAIMED, STATE_FREE);
                }
                _ => {}
            }
        }
        if rejected > 0 {
            warn!(path = %self.path.display(), rejected, "discarded corrupt segment records");
        }
        debug!(
            path = %self.path.display(),
            slots = self.slot_count,
            restored = restored.len(),
            stale,
            "opened tile segment"
        );
        *self.restored.lock().unwrap_or_else(PoisonError::into_inner) = restored;
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload geometry.
    pub fn geometry(&self) -> SegmentGeometry {
        self.geometry
    }

    /// Total slot count.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Slots nobody claimed or published.
    pub fn free_slots(&self) -> usize {
        (0..self.slot_count)
            .filter(|&slot| self.state_word(slot).load(Ordering::Acquire) == STATE_FREE)
            .count()
    }

    /// Caches currently attached to the file.
    pub fn attached_count(&self) -> u32 {
        self.attached_word().load(Ordering::Acquire)
    }

    /// Snapshot for tools.
    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            path: self.path.clone(),
            geometry: self.geometry,
            slot_count: self.slot_count,
            used_slots: self.slot_count - self.free_slots() as u32,
            attached: self.attached_count(),
            file_bytes: self.map.len() as u64,
        }
    }

    /// Keys of every ready record, in slot order.
    pub fn ready_keys(&self) -> Vec<(u32, TileKey)> {
        (0..self.slot_count)
            .filter_map(|slot| {
                if self.state_word(slot).load(Ordering::Acquire) == STATE_READY {
                    self.record(slot).to_key().map(|k| (slot, k))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Records restored at attach time. Returns them once.
    pub(crate) fn take_restored(&self) -> Vec<(u32, TileKey)> {
        std::mem::take(&mut *self.restored.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Claims a free slot.
    pub(crate) fn allocate_slot(&self) -> Option<u32> {
        let count = self.slot_count;
        let start = self.next_slot.load(Ordering::Relaxed) % count;
        (0..count).map(|i| (start + i) % count).find(|&slot| {
            let claimed = self.transition(slot, STATE_FREE, STATE_CLAIMED);
            if claimed {
                self.next_slot.store((slot + 1) % count, Ordering::Relaxed);
            }
            claimed
        })
    }

    /// Returns a claimed slot to the free pool.
    pub(crate) fn release_slot(&self, slot: u32) {
        if !self.transition(slot, STATE_CLAIMED, STATE_FREE) {
            debug!(path = %self.path.display(), slot, "released slot was not claimed");
        }
    }

    /// Writes the record for the claimed `slot` and marks it ready.
    ///
    /// Returns `false` when the key cannot be persisted or the slot was
    /// taken away by a forced purge.
    pub(crate) fn publish(&self, slot: u32, key: &TileKey) -> bool {
        let Some(record) = SlotRecord::from_key(key) else {
            return false;
        };
        if self.state_word(slot).load(Ordering::Acquire) != STATE_CLAIMED {
            return false;
        }
        let bytes = bytemuck::bytes_of(&record);
        let dst = self.record_ptr(slot).cast::<u8>();
        // SAFETY: the slot is claimed by the caller, so no one else writes
        // its key fields. State and generation are left to the atomics.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, STATE_OFFSET);
            std::ptr::copy_nonoverlapping(
                bytes[KEY_TAIL_OFFSET..].as_ptr(),
                dst.add(KEY_TAIL_OFFSET),
                RECORD_SIZE - KEY_TAIL_OFFSET,
            );
        }
        self.transition(slot, STATE_CLAIMED, STATE_READY)
    }

    /// Takes the record of `slot` back; the payload stays with its tile.
    pub(crate) fn unpublish(&self, slot: u32) {
        self.transition(slot, STATE_READY, STATE_CLAIMED);
    }

    /// Slot of a ready record for `key`, published by any attached cache.
    pub(crate) fn find(&self, key: &TileKey) -> Option<u32> {
        if key.channel().len() > MAX_CHANNEL_NAME {
            return None;
        }
        (0..self.slot_count).find(|&slot| {
            if self.state_word(slot).load(Ordering::Acquire) != STATE_READY {
                return false;
            }
            let record = self.record(slot);
            record.content_hash == key.content_hash() && record.to_key().as_ref() == Some(key)
        })
    }

    /// Copies the payload of the ready record `source` into the claimed
    /// slot `target`.
    ///
    /// Returns `false` when `source` no longer holds `key` or changed while
    /// being copied.
    pub(crate) fn copy_published(&self, source: u32, key: &TileKey, target: u32) -> bool {
        let generation = self.generation_word(source).load(Ordering::Acquire);
        if self.state_word(source).load(Ordering::Acquire) != STATE_READY
            || self.record(source).to_key().as_ref() != Some(key)
        {
            return false;
        }
        let (from, len) = self.payload(source);
        let (to, _) = self.payload(target);
        // SAFETY: both payloads lie in the mapping and differ since
        // `target` is claimed while `source` was ready.
        unsafe { std::ptr::copy_nonoverlapping(from.as_ptr(), to.as_ptr(), len) };
        fence(Ordering::Acquire);
        self.state_word(source).load(Ordering::Relaxed) == STATE_READY
            && self.generation_word(source).load(Ordering::Relaxed) == generation
    }

    /// Frees every ready record and returns how many there were.
    ///
    /// Fails while caches are attached unless `force` is set. A forced
    /// purge also frees claimed slots and resets the attach count, for
    /// directories left behind by a process that died.
    pub fn purge(&self, force: bool) -> Result<usize> {
        let attached = self.attached_count();
        if attached > 0 && !force {
            return Err(Error::other(format!(
                "{} is in use by {attached} cache(s)",
                self.path.display()
            )));
        }
        let mut purged = 0;
        for slot in 0..self.slot_count {
            if self.transition(slot, STATE_READY, STATE_FREE) {
                purged += 1;
            } else if force {
                self.transition(slot, STATE_CLAIMED, STATE_FREE);
            }
        }
        if force {
            self.attached_word().store(0, Ordering::Release);
        }
        self.restored.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.flush()?;
        Ok(purged)
    }

    /// Flushes the mapping to disk.
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    /// Start of the payload of `slot` and its length in bytes.
    pub(crate) fn payload(&self, slot: u32) -> (NonNull<u8>, usize) {
        debug_assert!(slot < self.slot_count);
        let len = self.geometry.slot_bytes();
        let offset = self.payload_offset + slot as usize * len;
        // SAFETY: offset + len lies within the mapping (checked at open).
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        (ptr, len)
    }

    /// Moves `slot` from `from` to `to`, bumping its generation.
    fn transition(&self, slot: u32, from: u32, to: u32) -> bool {
        let state = self.state_word(slot);
        if state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.generation_word(slot).fetch_add(1, Ordering::AcqRel);
        fence(Ordering::Release);
        true
    }

    fn record_ptr(&self, slot: u32) -> *mut SlotRecord {
        debug_assert!(slot < self.slot_count);
        // SAFETY: the record table lies within the mapping; records are
        // 8-byte aligned since the map is page aligned and sizes are
        // multiples of 8.
        unsafe { self.base.as_ptr().add(HEADER_SIZE + slot as usize * RECORD_SIZE) as *mut SlotRecord }
    }

    fn record(&self, slot: u32) -> SlotRecord {
        // SAFETY: see `record_ptr`.
        unsafe { self.record_ptr(slot).read_volatile() }
    }

    fn word(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: callers pass 4-byte aligned offsets inside the header or
        // record table, which live as long as the mapping.
        unsafe { AtomicU32::from_ptr(self.base.as_ptr().add(offset).cast::<u32>()) }
    }

    fn attached_word(&self) -> &AtomicU32 {
        self.word(ATTACHED_OFFSET)
    }

    fn state_word(&self, slot: u32) -> &AtomicU32 {
        debug_assert!(slot < self.slot_count);
        self.word(HEADER_SIZE + slot as usize * RECORD_SIZE + STATE_OFFSET)
    }

    fn generation_word(&self, slot: u32) -> &AtomicU32 {
        debug_assert!(slot < self.slot_count);
        self.word(HEADER_SIZE + slot as usize * RECORD_SIZE + GENERATION_OFFSET)
    }
}

impl Drop for TileSegment {
    fn drop(&mut self) {
        if self.attached {
            // Saturating: a forced purge may have reset the count.
            let _ = self
                .attached_word()
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        }
    }
}
