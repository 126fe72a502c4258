use crate::{QueueError, guard::ShardGuard};
use crossbeam_utils::CachePadded;
use std::{
    collections::VecDeque,
    fmt,
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering},
};
use tracing::debug;

/// Cache-line width every [`Shard`] is aligned to.
pub const CACHE_LINE: usize = 64;

/// Number of shards used by [`ShardedQueue::new`](crate::ShardedQueue::new).
pub const DEFAULT_SHARD_COUNT: usize = 32;

/// One slot of the shard table.
///
/// A shard couples an ownership handle with a best-effort "has data" hint.
/// The handle points at a heap-allocated single-threaded FIFO while the shard
/// is available, and is null while some thread holds it through a
/// [`ShardGuard`]. Whoever swaps the pointer out owns the FIFO exclusively
/// until it is stored back.
///
/// Both fields sit on their own cache line so that CAS traffic on one shard's
/// handle does not invalidate a dequeuer reading the neighbouring hint.
#[repr(C, align(64))]
pub struct Shard<T> {
    handle: CachePadded<AtomicPtr<VecDeque<T>>>,
    hint_dirty: CachePadded<AtomicBool>,
    _owns: PhantomData<Box<VecDeque<T>>>,
}

impl<T> Shard<T> {
    fn new() -> Self {
        let fifo = Box::into_raw(Box::new(VecDeque::new()));
        Self {
            handle: CachePadded::new(AtomicPtr::new(fifo)),
            hint_dirty: CachePadded::new(AtomicBool::new(false)),
            _owns: PhantomData,
        }
    }

    /// Whether the shard is currently unowned.
    ///
    /// This is a relaxed snapshot and may be stale by the time it is returned.
    pub fn is_available(&self) -> bool {
        !self.handle.load(Ordering::Relaxed).is_null()
    }

    /// The last published "has data" hint.
    ///
    /// Never rely on this for correctness: it can be stale in both directions.
    pub fn hint_dirty(&self) -> bool {
        self.hint_dirty.load(Ordering::Relaxed)
    }

    /// Attempts to take ownership of the FIFO.
    ///
    /// A relaxed load filters out shards that are visibly owned before paying
    /// for the CAS. On success the acquire ordering pairs with the release
    /// store in [`Shard::restore`] of the previous owner.
    #[inline]
    fn try_claim(&self) -> Option<NonNull<VecDeque<T>>> {
        let current = self.handle.load(Ordering::Relaxed);
        if current.is_null() {
            return None;
        }
        self.handle
            .compare_exchange(current, ptr::null_mut(), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .and_then(NonNull::new)
    }

    /// Hands the FIFO back to the table.
    ///
    /// The hint is refreshed first with relaxed ordering, then the pointer is
    /// published with release ordering so the next acquirer observes every
    /// write made while the FIFO was owned.
    #[inline]
    pub(crate) fn restore(&self, fifo: NonNull<VecDeque<T>>) {
        // SAFETY: the caller owns `fifo` exclusively until the store below.
        let has_items = unsafe { !fifo.as_ref().is_empty() };
        self.hint_dirty.store(has_items, Ordering::Relaxed);
        self.handle.store(fifo.as_ptr(), Ordering::Release);
    }
}

// SAFETY: the FIFO behind `handle` is only ever touched by the single thread
// that won it through `try_claim`, so sharing a shard only ever moves `T`
// values between threads. `T: Send` is therefore sufficient.
unsafe impl<T: Send> Sync for Shard<T> {}

impl<T> fmt::Debug for Shard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("available", &self.is_available())
            .field("hint_dirty", &self.hint_dirty())
            .finish()
    }
}

/// Fixed-size array of shards with the acquisition protocol on top.
///
/// The shard count is a power of two so a start hint maps onto a slot with a
/// mask. Shards and their FIFOs are allocated once here and freed once when
/// the table is dropped; nothing is re-created in between.
///
/// # Teardown
///
/// Dropping the table frees every FIFO it still holds along with the items
/// inside. Every [`ShardGuard`] borrows the table, so the borrow checker
/// rules out a guard being alive while the table is dropped. A guard leaked
/// with [`std::mem::forget`] leaves its shard owned forever; that FIFO is
/// leaked rather than freed.
pub struct ShardTable<T> {
    shards: Box<[Shard<T>]>,
    mask: usize,
    offset_counter: AtomicUsize,
}

impl<T> ShardTable<T> {
    /// Allocates `shard_count` empty FIFOs.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidShardCount`] if `shard_count` is zero or
    /// not a power of two.
    pub fn new(shard_count: usize) -> Result<Self, QueueError> {
        if !shard_count.is_power_of_two() {
            return Err(QueueError::InvalidShardCount { count: shard_count });
        }

        Ok(Self::allocate(shard_count))
    }

    /// A table of [`DEFAULT_SHARD_COUNT`] shards.
    pub(crate) fn with_default_count() -> Self {
        Self::allocate(DEFAULT_SHARD_COUNT)
    }

    fn allocate(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            mask: shard_count - 1,
            offset_counter: AtomicUsize::new(0),
        }
    }

    /// Number of shards in the table.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always `false`; a table holds at least one shard.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Shard at `index`, masked into range.
    pub fn shard(&self, index: usize) -> &Shard<T> {
        &self.shards[index & self.mask]
    }

    /// Next value of the per-table counter used to diversify start offsets.
    pub fn next_offset(&self) -> usize {
        self.offset_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Takes ownership of some shard, scanning from `start` upwards.
    ///
    /// Every shard is eligible regardless of its hint, so producers never pay
    /// for the hint read. The scan wraps around the table and never gives
    /// up: if other threads hold every shard indefinitely, this spins
    /// indefinitely. There is no backoff.
    pub fn acquire_any(&self, start: usize) -> ShardGuard<'_, T> {
        let mut index = start;
        loop {
            let slot = index & self.mask;
            let shard = &self.shards[slot];
            if let Some(fifo) = shard.try_claim() {
                return ShardGuard::new(shard, slot, fifo);
            }
            index = index.wrapping_add(1);
        }
    }

    /// Takes ownership of a shard whose hint says it has data.
    ///
    /// Probes each shard at most once starting at `start`. Shards whose hint
    /// reads `false` are skipped without touching their handle. Returns
    /// `None` when no hinted shard could be won; callers treat that as "try
    /// again later".
    ///
    /// The hint is read with relaxed ordering and no prior synchronization,
    /// so a returned guard may hold an empty FIFO (another thread drained it
    /// after the hint was published) and `None` may be returned while items
    /// exist (the hint was not yet visible).
    pub fn acquire_dirty(&self, start: usize) -> Option<ShardGuard<'_, T>> {
        for step in 0..self.shards.len() {
            let slot = start.wrapping_add(step) & self.mask;
            let shard = &self.shards[slot];
            if !shard.hint_dirty() {
                continue;
            }
            if let Some(fifo) = shard.try_claim() {
                return Some(ShardGuard::new(shard, slot, fifo));
            }
        }
        None
    }

    /// Sets every shard's hint, empty or not.
    #[cfg(test)]
    pub(crate) fn mark_all_dirty(&self) {
        for shard in &*self.shards {
            shard.hint_dirty.store(true, Ordering::Relaxed);
        }
    }
}

impl<T> fmt::Debug for ShardTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let available = self.shards.iter().filter(|s| s.is_available()).count();
        let dirty = self.shards.iter().filter(|s| s.hint_dirty()).count();
        f.debug_struct("ShardTable")
            .field("shard_count", &self.shards.len())
            .field("available", &available)
            .field("hinted_dirty", &dirty)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for ShardTable<T> {
    fn drop(&mut self) {
        let mut undelivered = 0usize;
        for shard in &mut *self.shards {
            let fifo = *shard.handle.get_mut();
            if fifo.is_null() {
                continue;
            }
            // SAFETY: `&mut self` rules out live guards, and every non-null
            // handle came from `Box::into_raw` in `Shard::new`.
            let fifo = unsafe { Box::from_raw(fifo) };
            undelivered += fifo.len();
        }
        debug!(
            shard_count = self.shards.len(),
            undelivered, "dropping shard table"
        );
    }
}
