// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A per-stream-kind buffer pool. Raw pixel buffers are expensive to allocate at frame rate,
//! so the driver and workers borrow them from here instead of calling `Vec::with_capacity`
//! on every frame. A `PooledBuffer` is an RAII guard: dropping it returns the buffer to its
//! sub-pool automatically, the same discipline `cancel::CancelHandle` uses for cancellation.
//!
//! `max_pool_size` is a single cap shared across all three sub-pools, not a per-kind limit:
//! growth in any one kind counts against the same global ceiling.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::StreamKind;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("buffer pool is exhausted (max_pool_size={0} reached) while acquiring for {1}")]
    Exhausted(usize, StreamKind),

    #[error("buffer released for {0} does not belong to that kind's pool")]
    UntrackedBuffer(StreamKind),

    #[error("cannot resize pool to {new_max}: {in_use} buffers are currently in use")]
    ResizeBelowInUse { new_max: usize, in_use: usize },

    #[error("cannot clear pool: {in_use} buffers are currently in use")]
    ClearWhileInUse { in_use: usize },
}

/// Shared state every sub-pool checks its growth against, so the cap is global rather than
/// per-kind.
struct Shared {
    total_allocated: Mutex<usize>,
    max_pool_size: Mutex<usize>,
}

/// Owns one sub-pool per pixel-bearing stream kind (depth, infrared, color). Body frames are
/// variable-length record arrays rather than fixed-size pixel buffers, so body has no sub-pool.
pub struct BufferPool {
    depth: Arc<SubPool>,
    infrared: Arc<SubPool>,
    color: Arc<SubPool>,
    shared: Arc<Shared>,
}

struct SubPool {
    kind: StreamKind,
    buffer_size: usize,
    initial_size: usize,
    expand_size: usize,
    shared: Arc<Shared>,
    available: Mutex<VecDeque<Vec<u8>>>,
    allocated: Mutex<usize>,
}

/// An RAII-owned buffer borrowed from a `BufferPool`. Returns itself to the sub-pool it came
/// from when dropped.
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: Arc<SubPool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total_allocated: usize,
    pub available: usize,
    pub in_use: usize,
}

impl BufferPool {
    /// Builds a pool sized from configuration. `buffer_size` for each kind comes from
    /// `StreamKind::expected_byte_len`, which is fixed by sensor resolution. `max_pool_size` is
    /// a global cap shared across all three kinds.
    pub fn new(initial_size: usize, expand_size: usize, max_pool_size: usize) -> BufferPool {
        let shared = Arc::new(Shared {
            total_allocated: Mutex::new(initial_size * 3),
            max_pool_size: Mutex::new(max_pool_size),
        });
        let make = |kind: StreamKind| {
            Arc::new(SubPool::new(
                kind,
                kind.expected_byte_len().unwrap_or(0),
                initial_size,
                expand_size,
                Arc::clone(&shared),
            ))
        };
        BufferPool {
            depth: make(StreamKind::Depth),
            infrared: make(StreamKind::Infrared),
            color: make(StreamKind::Color),
            shared,
        }
    }

    fn sub_pool(&self, kind: StreamKind) -> &Arc<SubPool> {
        match kind {
            StreamKind::Depth => &self.depth,
            StreamKind::Infrared => &self.infrared,
            StreamKind::Color => &self.color,
            StreamKind::Body => panic!("body frames are not pool-backed"),
        }
    }

    fn all_pools(&self) -> [&Arc<SubPool>; 3] {
        [&self.depth, &self.infrared, &self.color]
    }

    /// Borrows a buffer for `kind`, expanding the sub-pool by `expand_size` if it's empty and
    /// the shared `max_pool_size` allows it, or erroring with `PoolError::Exhausted` once the
    /// global cap is hit.
    pub fn acquire(&self, kind: StreamKind) -> Result<PooledBuffer, PoolError> {
        self.sub_pool(kind).acquire()
    }

    /// Explicit early-release path (e.g. a Sensor dropping a queue-overflowed frame before its
    /// `PooledBuffer` would otherwise go out of scope). `kind` must match the pool the buffer
    /// was acquired from; a mismatch means the buffer isn't in that kind's outstanding set and
    /// is reported as `UntrackedBuffer` rather than silently accepted.
    pub fn release(&self, kind: StreamKind, buffer: PooledBuffer) -> Result<(), PoolError> {
        if !Arc::ptr_eq(self.sub_pool(kind), &buffer.pool) {
            warn!(kind = %kind, "rejecting release of buffer untracked for this kind");
            return Err(PoolError::UntrackedBuffer(kind));
        }
        drop(buffer);
        Ok(())
    }

    pub fn stats(&self, kind: StreamKind) -> PoolStats {
        self.sub_pool(kind).stats()
    }

    /// Rejects while any buffer is outstanding; otherwise drops every idle buffer and
    /// re-initializes every sub-pool back to `initial_size`.
    pub fn clear(&self) -> Result<(), PoolError> {
        let in_use: usize = self.all_pools().iter().map(|p| p.stats().in_use).sum();
        if in_use > 0 {
            warn!(in_use, "rejecting pool clear while buffers are outstanding");
            return Err(PoolError::ClearWhileInUse { in_use });
        }

        let mut total = self.shared.total_allocated.lock();
        *total = 0;
        for pool in self.all_pools() {
            pool.reinitialize();
            *total += pool.initial_size;
        }
        Ok(())
    }

    /// Rejects if `new_max` is below the buffers currently in use; otherwise raises (or lowers)
    /// the shared cap and discards idle buffers above the new total.
    pub fn resize(&self, new_max: usize) -> Result<(), PoolError> {
        let in_use: usize = self.all_pools().iter().map(|p| p.stats().in_use).sum();
        if new_max < in_use {
            warn!(new_max, in_use, "rejecting pool resize below current in-use buffers");
            return Err(PoolError::ResizeBelowInUse { new_max, in_use });
        }

        *self.shared.max_pool_size.lock() = new_max;

        let mut total = self.shared.total_allocated.lock();
        for pool in self.all_pools() {
            while *total > new_max {
                if pool.discard_one_idle() {
                    *total -= 1;
                } else {
                    break;
                }
            }
        }
        info!(new_max, total = *total, "buffer pool resized");
        Ok(())
    }
}

impl SubPool {
    fn new(
        kind: StreamKind,
        buffer_size: usize,
        initial_size: usize,
        expand_size: usize,
        shared: Arc<Shared>,
    ) -> SubPool {
        SubPool {
            kind,
            buffer_size,
            initial_size,
            expand_size,
            shared,
            allocated: Mutex::new(initial_size),
            available: Mutex::new(Self::fresh_buffers(initial_size, buffer_size)),
        }
    }

    fn fresh_buffers(count: usize, buffer_size: usize) -> VecDeque<Vec<u8>> {
        let mut available = VecDeque::with_capacity(count);
        for _ in 0..count {
            available.push_back(vec![0u8; buffer_size]);
        }
        available
    }

    fn reinitialize(&self) {
        *self.allocated.lock() = self.initial_size;
        *self.available.lock() = Self::fresh_buffers(self.initial_size, self.buffer_size);
    }

    fn discard_one_idle(&self) -> bool {
        let mut available = self.available.lock();
        if available.pop_back().is_some() {
            *self.allocated.lock() -= 1;
            true
        } else {
            false
        }
    }

    fn acquire(self: &Arc<Self>) -> Result<PooledBuffer, PoolError> {
        let mut available = self.available.lock();
        if let Some(data) = available.pop_front() {
            return Ok(PooledBuffer {
                data: Some(data),
                pool: Arc::clone(self),
            });
        }
        drop(available);

        let mut global_total = self.shared.total_allocated.lock();
        let max_pool_size = *self.shared.max_pool_size.lock();
        if *global_total >= max_pool_size {
            warn!(kind = %self.kind, max_pool_size, "buffer pool exhausted");
            return Err(PoolError::Exhausted(max_pool_size, self.kind));
        }
        let grow_by = self.expand_size.min(max_pool_size - *global_total).max(1);
        debug!(kind = %self.kind, grow_by, total = *global_total, "expanding buffer pool");

        let mut available = self.available.lock();
        for _ in 1..grow_by {
            available.push_back(vec![0u8; self.buffer_size]);
        }
        drop(available);

        *global_total += grow_by;
        *self.allocated.lock() += grow_by;

        Ok(PooledBuffer {
            data: Some(vec![0u8; self.buffer_size]),
            pool: Arc::clone(self),
        })
    }

    fn release(&self, mut data: Vec<u8>) {
        if data.len() != self.buffer_size {
            data.resize(self.buffer_size, 0);
        }
        self.available.lock().push_back(data);
        let stats = self.stats();
        debug!(kind = %self.kind, available = stats.available, in_use = stats.in_use, "buffer released");
    }

    fn stats(&self) -> PoolStats {
        let total_allocated = *self.allocated.lock();
        let available = self.available.lock().len();
        PoolStats {
            total_allocated,
            available,
            in_use: total_allocated.saturating_sub(available),
        }
    }
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_acquire_reuses_returned_buffer() {
        let pool = BufferPool::new(1, 1, 4);
        let buf = pool.acquire(StreamKind::Depth).expect("acquire");
        let ptr = buf.as_slice().as_ptr();
        drop(buf);

        let buf2 = pool.acquire(StreamKind::Depth).expect("acquire");
        assert_eq!(ptr, buf2.as_slice().as_ptr());
    }

    #[test]
    fn test_max_pool_size_is_a_global_cap_across_kinds() {
        // max_pool_size=2 is shared by all three kinds, not per-kind: depth and infrared
        // acquiring one buffer each should exhaust color's ability to grow.
        let pool = BufferPool::new(0, 1, 2);
        let _depth = pool.acquire(StreamKind::Depth).expect("depth");
        let _infrared = pool.acquire(StreamKind::Infrared).expect("infrared");
        let err = pool.acquire(StreamKind::Color);
        assert!(matches!(err, Err(PoolError::Exhausted(2, StreamKind::Color))));
    }

    #[test]
    fn test_stats_reflect_in_use() {
        let pool = BufferPool::new(2, 1, 8);
        let stats = pool.stats(StreamKind::Color);
        assert_eq!(2, stats.available);
        assert_eq!(0, stats.in_use);

        let _buf = pool.acquire(StreamKind::Color).expect("acquire");
        let stats = pool.stats(StreamKind::Color);
        assert_eq!(1, stats.available);
        assert_eq!(1, stats.in_use);
    }

    #[test]
    fn test_clear_rejects_while_outstanding() {
        let pool = BufferPool::new(3, 1, 8);
        let buf = pool.acquire(StreamKind::Depth).expect("acquire");
        assert!(matches!(pool.clear(), Err(PoolError::ClearWhileInUse { in_use: 1 })));
        drop(buf);
    }

    #[test]
    fn test_clear_drops_idle_buffers_and_resets_total() {
        let pool = BufferPool::new(3, 1, 8);
        pool.clear().expect("clear");
        let stats = pool.stats(StreamKind::Depth);
        assert_eq!(3, stats.available);
        assert_eq!(3, stats.total_allocated);
    }

    #[test]
    fn test_resize_rejects_below_in_use() {
        let pool = BufferPool::new(2, 1, 8);
        let _a = pool.acquire(StreamKind::Depth).expect("a");
        let _b = pool.acquire(StreamKind::Depth).expect("b");
        let err = pool.resize(1);
        assert!(matches!(err, Err(PoolError::ResizeBelowInUse { new_max: 1, in_use: 2 })));
    }

    #[test]
    fn test_resize_discards_idle_buffers_above_new_cap() {
        let pool = BufferPool::new(2, 1, 8);
        pool.resize(1).expect("resize");
        let total: usize = [StreamKind::Depth, StreamKind::Infrared, StreamKind::Color]
            .iter()
            .map(|kind| pool.stats(*kind).total_allocated)
            .sum();
        assert_eq!(1, total);
    }

    #[test]
    fn test_release_rejects_buffer_for_wrong_kind() {
        let pool = BufferPool::new(1, 1, 4);
        let buf = pool.acquire(StreamKind::Depth).expect("acquire");
        let err = pool.release(StreamKind::Color, buf);
        assert!(matches!(err, Err(PoolError::UntrackedBuffer(StreamKind::Color))));
    }

    #[test]
    fn test_release_accepts_matching_kind() {
        let pool = BufferPool::new(1, 1, 4);
        let buf = pool.acquire(StreamKind::Depth).expect("acquire");
        assert!(pool.release(StreamKind::Depth, buf).is_ok());
        assert_eq!(1, pool.stats(StreamKind::Depth).available);
    }
}
