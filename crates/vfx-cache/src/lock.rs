//! Per-key cache entry locks.
//!
//! A [`CacheEntryLock`] is the handle [`Cache::get`](crate::Cache::get)
//! returns. Its status says who owns the computation of the key:
//!
//! ```text
//!              insert_in_cache()
//! MustCompute ------------------> Cached
//!      |
//!      | drop without insert
//!      v
//!  (reservation removed, waiters wake up as Abandoned)
//!
//! ComputationPending --wait_for_pending_entry()--> Cached | Abandoned
//! ```
//!
//! A pending lock never inherits the write obligation. After an abandoned
//! wait the caller issues a new `get`.

use std::sync::Arc;

use vfx_core::Result;

use crate::engine::CacheShared;
use crate::key::TileKey;
use crate::storage::StorageBuffer;

/// Status of a [`CacheEntryLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStatus {
    /// Data is present and readable.
    Cached,
    /// The caller owns the computation and must insert or drop the lock.
    MustCompute,
    /// Another party is computing the data.
    ComputationPending,
}

/// Result of [`CacheEntryLock::wait_for_pending_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The computing party published the entry.
    Cached,
    /// The computation was dropped; nothing was published.
    Abandoned,
}

/// Handle on one cache key.
pub struct CacheEntryLock {
    shared: Arc<CacheShared>,
    key: TileKey,
    status: LockStatus,
    ticket: u64,
    buffer: Option<Arc<StorageBuffer>>,
    resolved: bool,
}

impl std::fmt::Debug for CacheEntryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntryLock")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl CacheEntryLock {
    pub(crate) fn cached(shared: Arc<CacheShared>, key: TileKey, buffer: Arc<StorageBuffer>) -> Self {
        Self {
            shared,
            key,
            status: LockStatus::Cached,
            ticket: 0,
            buffer: Some(buffer),
            resolved: true,
        }
    }

    pub(crate) fn reserved(shared: Arc<CacheShared>, key: TileKey, status: LockStatus, ticket: u64) -> Self {
        debug_assert_ne!(status, LockStatus::Cached);
        Self {
            shared,
            key,
            status,
            ticket,
            buffer: None,
            resolved: status == LockStatus::ComputationPending,
        }
    }

    /// Current status.
    pub fn status(&self) -> LockStatus {
        self.status
    }

    /// Key of the entry.
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    /// Cached buffer, once the status is [`LockStatus::Cached`].
    pub fn buffer(&self) -> Option<&Arc<StorageBuffer>> {
        self.buffer.as_ref()
    }

    /// Publishes `buffer` under this key.
    ///
    /// Only valid on a [`LockStatus::MustCompute`] lock. On success the lock
    /// becomes [`LockStatus::Cached`] and every waiter wakes up. When the
    /// cache cannot make room the reservation is dropped and
    /// [`Error::AllocationFailed`](vfx_core::Error::AllocationFailed) is returned.
    pub fn insert_in_cache(&mut self, buffer: Arc<StorageBuffer>) -> Result<()> {
        if self.status != LockStatus::MustCompute || self.resolved {
            return Err(vfx_core::Error::other(format!(
                "insert on a {:?} lock for {}",
                self.status, self.key
            )));
        }
        self.resolved = true;
        self.shared.insert(&self.key, self.ticket, buffer.clone())?;
        self.status = LockStatus::Cached;
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Blocks until the party computing this key inserts or abandons it.
    ///
    /// Returns immediately for a cached lock. On [`WaitOutcome::Cached`] the
    /// lock adopts the published buffer. A must-compute lock never waits on
    /// itself and reports [`WaitOutcome::Abandoned`].
    pub fn wait_for_pending_entry(&mut self) -> WaitOutcome {
        match self.status {
            LockStatus::Cached => WaitOutcome::Cached,
            LockStatus::MustCompute => {
                debug_assert!(false, "waiting on own reservation of {}", self.key);
                WaitOutcome::Abandoned
            }
            LockStatus::ComputationPending => match self.shared.wait(&self.key, self.ticket) {
                Some(buffer) => {
                    self.status = LockStatus::Cached;
                    self.buffer = Some(buffer);
                    WaitOutcome::Cached
                }
                None => WaitOutcome::Abandoned,
            },
        }
    }

    /// Gives up the computation without publishing anything.
    pub fn abandon(mut self) {
        self.release_reservation();
    }

    fn release_reservation(&mut self) {
        if self.status == LockStatus::MustCompute && !self.resolved {
            self.resolved = true;
            self.shared.abandon(&self.key, self.ticket);
        }
    }
}

impl Drop for CacheEntryLock {
    fn drop(&mut self) {
        self.release_reservation();
    }
}
