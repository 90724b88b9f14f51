//! Worker pool for tile and scanline processors.
//!
//! Work is cut into one contiguous chunk per worker; the abort signal is
//! polled between items of a chunk. By default the global rayon pool runs
//! the chunks. [`set_max_threads`] or the `VFX_THREADS` environment variable
//! switch to a dedicated pool.

use std::sync::OnceLock;

use rayon::prelude::*;
use tracing::{debug, warn};
use vfx_core::abort::is_aborted;
use vfx_core::{AbortSignal, Error, RectI, Result};

/// Environment variable selecting the worker count.
pub const THREADS_ENV: &str = "VFX_THREADS";

static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();

fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("vfx-image-{i}"))
        .build()
    {
        Ok(pool) => {
            debug!(threads, "image worker pool ready");
            Some(pool)
        }
        Err(e) => {
            warn!(threads, error = %e, "cannot build worker pool, using the global pool");
            None
        }
    }
}

fn pool() -> Option<&'static rayon::ThreadPool> {
    POOL.get_or_init(|| {
        let threads = std::env::var(THREADS_ENV).ok()?.trim().parse::<usize>().ok()?;
        if threads == 0 { None } else { build_pool(threads) }
    })
    .as_ref()
}

/// Uses a dedicated pool of `threads` workers for image processors.
///
/// Must run before the first processor; fails once the pool is chosen.
pub fn set_max_threads(threads: usize) -> Result<()> {
    let mut installed = false;
    POOL.get_or_init(|| {
        installed = true;
        build_pool(threads.max(1))
    });
    if installed {
        Ok(())
    } else {
        Err(Error::other("image worker pool already configured"))
    }
}

/// Number of workers processors spread over.
pub fn max_threads() -> usize {
    pool().map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads)
}

fn install<R: Send>(op: impl FnOnce() -> R + Send) -> R {
    match pool() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

fn chunk_len(len: usize) -> usize {
    len.div_ceil(max_threads().max(1)).max(1)
}

/// Runs `op` over every item, one contiguous chunk per worker.
///
/// Returns the first error. Items after an abort are skipped.
pub(crate) fn for_each<T, F>(items: &[T], abort: Option<&AbortSignal>, op: F) -> Result<()>
where
    T: Sync,
    F: Fn(&T) -> Result<()> + Sync,
{
    if items.is_empty() {
        return Ok(());
    }
    let chunk = chunk_len(items.len());
    install(|| {
        items.par_chunks(chunk).try_for_each(|part| {
            for item in part {
                if is_aborted(abort) {
                    break;
                }
                op(item)?;
            }
            Ok(())
        })
    })
}

/// Mutable variant of [`for_each`].
pub(crate) fn for_each_mut<T, F>(items: &mut [T], abort: Option<&AbortSignal>, op: F) -> Result<()>
where
    T: Send,
    F: Fn(&mut T) -> Result<()> + Sync,
{
    if items.is_empty() {
        return Ok(());
    }
    let chunk = chunk_len(items.len());
    install(|| {
        items.par_chunks_mut(chunk).try_for_each(|part| {
            for item in part {
                if is_aborted(abort) {
                    break;
                }
                op(item)?;
            }
            Ok(())
        })
    })
}

/// Maps every item in parallel, keeping order.
pub(crate) fn map<T, R, F>(items: &[T], op: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    install(|| items.par_iter().map(&op).collect())
}

/// Row bands of `rect`, one per worker.
pub(crate) fn row_bands(rect: RectI) -> Vec<RectI> {
    rect.split_rows(max_threads())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_for_each_visits_all() {
        let items: Vec<usize> = (0..100).collect();
        let sum = AtomicUsize::new(0);
        for_each(&items, None, |v| {
            sum.fetch_add(*v, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(sum.into_inner(), 4950);
    }

    #[test]
    fn test_abort_skips_work() {
        let abort = AbortSignal::new();
        abort.abort();
        let mut items = vec![0u8; 16];
        for_each_mut(&mut items, Some(&abort), |v| {
            *v = 1;
            Ok(())
        })
        .unwrap();
        assert!(items.iter().all(|v| *v == 0));
    }

    #[test]
    fn test_first_error_propagates() {
        let items = [1, 2, 3];
        let err = for_each(&items, None, |v| {
            if *v == 2 { Err(Error::other("boom")) } else { Ok(()) }
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_map_keeps_order() {
        let out = map(&[1, 2, 3], |v| Ok(v * 10)).unwrap();
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn test_bands_cover() {
        let rect = RectI::new(0, 3, 7, 40);
        let bands = row_bands(rect);
        assert_eq!(bands.first().unwrap().y1, 3);
        assert_eq!(bands.last().unwrap().y2, 40);
    }
}
