//! Injected buffer pool.
//!
//! Buffers are checked out as [`PooledBuffer`] guards and go back to the free
//! list when the guard drops, so every exit path (errors and cancellation
//! included) returns them. A pool is shared by `Arc` and passed explicitly to
//! the components that need memory; there is no process-wide instance.
//!
//! Only buffers up to the pool's fixed size are kept for reuse. Larger
//! checkouts (whole segments, merged tiles) are freed on return.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently checked out
    pub outstanding: usize,
    /// Free buffers held for reuse
    pub retained: usize,
    /// Buffers allocated over the pool's lifetime
    pub allocations: u64,
    /// Checkouts served from the free list
    pub reuses: u64,
}

struct PoolState {
    free: Vec<Vec<u8>>,
    stats: PoolStats,
}

pub struct BufferPool {
    buffer_size: usize,
    max_retained: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    const DEFAULT_MAX_RETAINED: usize = 16;

    pub fn new(buffer_size: usize) -> Arc<Self> {
        Self::with_max_retained(buffer_size, Self::DEFAULT_MAX_RETAINED)
    }

    pub fn with_max_retained(buffer_size: usize, max_retained: usize) -> Arc<Self> {
        assert!(buffer_size > 0, "Buffer size must be greater than zero");
        Arc::new(Self {
            buffer_size,
            max_retained,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                stats: PoolStats::default(),
            }),
        })
    }

    /// The fixed size handed out by [`BufferPool::acquire`].
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check out a zeroed buffer of the pool's fixed size.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        self.acquire_len(self.buffer_size)
    }

    /// Check out a zeroed buffer of exactly `len` bytes.
    ///
    /// The smallest free buffer whose capacity fits is reused; otherwise a new
    /// one is allocated.
    pub fn acquire_len(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let reused = {
            let mut state = self.state.lock();
            let best = state
                .free
                .iter()
                .enumerate()
                .filter(|(_, buf)| buf.capacity() >= len)
                .min_by_key(|(_, buf)| buf.capacity())
                .map(|(index, _)| index);
            let reused = best.map(|index| state.free.swap_remove(index));
            state.stats.outstanding += 1;
            state.stats.retained = state.free.len();
            if reused.is_some() {
                state.stats.reuses += 1;
            } else {
                state.stats.allocations += 1;
            }
            reused
        };

        let mut data = reused.unwrap_or_else(|| Vec::with_capacity(len.max(self.buffer_size)));
        data.clear();
        data.resize(len, 0);

        PooledBuffer {
            data,
            pool: Arc::clone(self),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats.clone()
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().stats.outstanding
    }

    /// Drop every retained free buffer.
    pub fn trim(&self) {
        let mut state = self.state.lock();
        state.free.clear();
        state.stats.retained = 0;
    }

    fn release(&self, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.stats.outstanding = state.stats.outstanding.saturating_sub(1);
        if data.capacity() <= self.buffer_size && state.free.len() < self.max_retained {
            state.free.push(data);
        }
        state.stats.retained = state.free.len();
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("max_retained", &self.max_retained)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out buffer. Returned to its pool on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow or shrink the logical length, zero-filling new bytes.
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.release(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_return() {
        let pool = BufferPool::new(1024);
        {
            let buf = pool.acquire();
            assert_eq!(buf.len(), 1024);
            assert_eq!(pool.outstanding(), 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.retained, 1);
        assert_eq!(stats.allocations, 1);
    }

    #[test]
    fn test_short_checkout_reuses_fixed_buffer() {
        let pool = BufferPool::new(4096);
        drop(pool.acquire_len(256));
        assert_eq!(pool.stats().retained, 1);

        let buf = pool.acquire_len(200);
        assert_eq!(buf.len(), 200);
        assert_eq!(pool.stats().reuses, 1);
        assert_eq!(pool.stats().retained, 0);
        drop(buf);

        let full = pool.acquire();
        assert_eq!(full.len(), 4096);
        assert_eq!(pool.stats().reuses, 2);
    }

    #[test]
    fn test_oversized_checkout_is_freed() {
        let pool = BufferPool::new(1024);
        {
            let big = pool.acquire_len(1 << 20);
            assert_eq!(big.len(), 1 << 20);
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.retained, 0);

        let small = pool.acquire();
        assert_eq!(small.len(), 1024);
        assert_eq!(pool.stats().reuses, 0);
        assert_eq!(pool.stats().allocations, 2);
    }

    #[test]
    fn test_reused_buffer_is_zeroed() {
        let pool = BufferPool::new(16);
        {
            let mut buf = pool.acquire();
            buf.fill(0xAB);
        }
        let buf = pool.acquire();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_returned_on_error_path() {
        fn failing(pool: &Arc<BufferPool>) -> std::result::Result<(), String> {
            let _buf = pool.acquire();
            Err("boom".to_string())
        }

        let pool = BufferPool::new(32);
        assert!(failing(&pool).is_err());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = BufferPool::with_max_retained(8, 2);
        let buffers: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(buffers);
        assert_eq!(pool.stats().retained, 2);
        pool.trim();
        assert_eq!(pool.stats().retained, 0);
    }

    #[test]
    fn test_concurrent_checkout() {
        let pool = BufferPool::new(128);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.acquire();
                        buf[0] = 1;
                    }
                });
            }
        });
        assert_eq!(pool.outstanding(), 0);
    }
}
