//! Deferred buffer release.
//!
//! Dropping the last reference to a large buffer frees megabytes of memory
//! (or a texture) on the dropping thread. Render threads hand such buffers
//! to a dedicated reaper thread instead.

use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use tracing::{trace, warn};

use crate::storage::StorageBuffer;

type Batch = Vec<Arc<StorageBuffer>>;

/// Background thread dropping released buffers.
#[derive(Debug)]
pub(crate) struct DeferredRelease {
    sender: Option<Sender<Batch>>,
    join_handle: Option<JoinHandle<()>>,
}

impl DeferredRelease {
    /// Starts the reaper thread, or releases inline when `background` is off
    /// or the thread cannot be spawned.
    pub(crate) fn new(background: bool) -> Self {
        if !background {
            return Self::inline();
        }
        let (sender, receiver) = unbounded::<Batch>();
        let spawned = std::thread::Builder::new()
            .name("vfx-cache-release".to_owned())
            .spawn(move || {
                for batch in receiver {
                    trace!(buffers = batch.len(), "releasing buffers");
                    drop(batch);
                }
            });
        match spawned {
            Ok(join_handle) => Self {
                sender: Some(sender),
                join_handle: Some(join_handle),
            },
            Err(e) => {
                warn!(error = %e, "cannot spawn release thread, releasing inline");
                Self::inline()
            }
        }
    }

    fn inline() -> Self {
        Self {
            sender: None,
            join_handle: None,
        }
    }

    /// Drops `buffers` off the calling thread.
    pub(crate) fn release(&self, buffers: Batch) {
        if buffers.is_empty() {
            return;
        }
        match &self.sender {
            Some(sender) => {
                // A closed channel hands the batch back; drop it here.
                let _ = sender.send(buffers);
            }
            None => drop(buffers),
        }
    }
}

static SHARED: OnceLock<DeferredRelease> = OnceLock::new();

/// Drops `buffers` on a process-wide release thread, started on first use.
///
/// For owners that hold no [`Cache`](crate::Cache) handle.
pub fn release_in_background(buffers: Vec<Arc<StorageBuffer>>) {
    if buffers.is_empty() {
        return;
    }
    SHARED.get_or_init(|| DeferredRelease::new(true)).release(buffers);
}

impl Drop for DeferredRelease {
    fn drop(&mut self) {
        // Closing the channel ends the reaper loop once it is drained.
        self.sender.take();
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                warn!("release thread panicked");
            }
        }
    }
}
