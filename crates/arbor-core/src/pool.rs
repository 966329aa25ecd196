//! Recycling allocator for tensor byte buffers.
//!
//! Forward values released by the checkpoint controller and gradient buffers
//! superseded during accumulation are returned here instead of being freed,
//! then handed back out for later allocations of a compatible size. A buffer
//! is only ever recycled once its previous owner held the last reference, so
//! no consumer can observe a reused buffer mid-read.

use std::mem;

/// Total capacity cap for pooled buffers, in bytes.
const MAX_POOLED_BYTES: usize = 1 << 30;
/// When the cap is exceeded, largest buffers are dropped down to this level.
const TRIM_THRESHOLD: usize = MAX_POOLED_BYTES / 2;

/// Pool usage counters.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// Current total capacity of pooled buffers, in bytes.
    pub pooled_bytes: usize,
    /// Times a buffer was reused instead of allocated.
    pub hits: usize,
    /// Times a fresh buffer had to be allocated.
    pub misses: usize,
    /// Times a returned buffer was dropped due to the size cap.
    pub drops: usize,
}

/// A simple byte-buffer pool reused across graph generations.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Vec<Vec<u8>>,
    metrics: PoolMetrics,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grab a zeroed buffer of exactly `nbytes` length, reusing a pooled
    /// buffer with sufficient capacity when one exists.
    pub fn acquire_zeroed(&mut self, nbytes: usize) -> Vec<u8> {
        // smallest pooled buffer that fits
        let mut best: Option<usize> = None;
        for (i, buf) in self.free.iter().enumerate() {
            if buf.capacity() >= nbytes
                && best.map_or(true, |b: usize| buf.capacity() < self.free[b].capacity())
            {
                best = Some(i);
            }
        }

        match best {
            Some(i) => {
                self.metrics.hits += 1;
                let mut buf = self.free.swap_remove(i);
                self.metrics.pooled_bytes = self.metrics.pooled_bytes.saturating_sub(buf.capacity());
                buf.clear();
                buf.resize(nbytes, 0);
                buf
            }
            None => {
                self.metrics.misses += 1;
                vec![0u8; nbytes]
            }
        }
    }

    /// Return a buffer to the pool for reuse.
    pub fn recycle(&mut self, buf: Vec<u8>) {
        let bytes = buf.capacity() * mem::size_of::<u8>();
        if self.metrics.pooled_bytes + bytes <= MAX_POOLED_BYTES {
            self.metrics.pooled_bytes += bytes;
            self.free.push(buf);
            self.trim_excess();
        } else {
            self.metrics.drops += 1;
        }
    }

    /// Drop largest buffers until total pooled bytes fall under the trim
    /// threshold.
    fn trim_excess(&mut self) {
        while self.metrics.pooled_bytes > TRIM_THRESHOLD {
            let mut max_idx = 0;
            let mut max_bytes = 0;
            for (i, buf) in self.free.iter().enumerate() {
                if buf.capacity() > max_bytes {
                    max_bytes = buf.capacity();
                    max_idx = i;
                }
            }
            self.free.swap_remove(max_idx);
            self.metrics.pooled_bytes = self.metrics.pooled_bytes.saturating_sub(max_bytes);
            self.metrics.drops += 1;
        }
    }

    /// Snapshot of current pool metrics.
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_then_hit() {
        let mut pool = BufferPool::new();
        let buf = pool.acquire_zeroed(64);
        assert_eq!(pool.metrics().misses, 1);

        pool.recycle(buf);
        assert!(pool.metrics().pooled_bytes >= 64);

        let buf = pool.acquire_zeroed(32);
        assert_eq!(pool.metrics().hits, 1);
        assert_eq!(buf.len(), 32);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reused_buffer_is_zeroed() {
        let mut pool = BufferPool::new();
        let mut buf = pool.acquire_zeroed(16);
        buf.iter_mut().for_each(|b| *b = 0xff);
        pool.recycle(buf);

        let buf = pool.acquire_zeroed(16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_prefers_smallest_fit() {
        let mut pool = BufferPool::new();
        pool.recycle(vec![0u8; 1024]);
        pool.recycle(vec![0u8; 64]);

        let buf = pool.acquire_zeroed(48);
        assert!(buf.capacity() < 1024);
    }
}
