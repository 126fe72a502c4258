use crate::shard::Shard;
use std::{
    collections::VecDeque,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// Exclusive, temporary possession of one shard's FIFO.
///
/// A guard is produced by [`ShardTable::acquire_any`] or
/// [`ShardTable::acquire_dirty`] and dereferences to the shard's
/// [`VecDeque`]. While it is alive no other thread can reach that FIFO, so
/// it is mutated without any further synchronization.
///
/// Dropping the guard hands the FIFO back exactly once: the shard's hint is
/// refreshed from the FIFO's emptiness and the handle is republished with
/// release ordering. This happens on every exit path, including early returns
/// and unwinding.
///
/// Guards are move-only and tied to the thread that acquired them (`!Send`).
/// Moving a guard moves the obligation to release it; assigning over a guard
/// releases the shard it previously held. "Not found" is expressed as
/// `Option::None` from [`ShardTable::acquire_dirty`], so a guard always owns a
/// FIFO.
///
/// [`ShardTable::acquire_any`]: crate::shard::ShardTable::acquire_any
/// [`ShardTable::acquire_dirty`]: crate::shard::ShardTable::acquire_dirty
pub struct ShardGuard<'a, T> {
    shard: &'a Shard<T>,
    index: usize,
    fifo: NonNull<VecDeque<T>>,
    _owns: PhantomData<&'a mut VecDeque<T>>,
}

impl<'a, T> ShardGuard<'a, T> {
    /// `fifo` must have just been swapped out of `shard`'s handle.
    #[inline]
    pub(crate) const fn new(shard: &'a Shard<T>, index: usize, fifo: NonNull<VecDeque<T>>) -> Self {
        Self {
            shard,
            index,
            fifo,
            _owns: PhantomData,
        }
    }

    /// Index of the owned shard within its table.
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for ShardGuard<'_, T> {
    type Target = VecDeque<T>;

    #[inline]
    fn deref(&self) -> &VecDeque<T> {
        // SAFETY: the pointer was swapped out of the shard, so this guard is
        // its only holder until `drop` stores it back.
        unsafe { self.fifo.as_ref() }
    }
}

impl<T> DerefMut for ShardGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut VecDeque<T> {
        // SAFETY: see `deref`; `&mut self` makes the borrow unique.
        unsafe { self.fifo.as_mut() }
    }
}

impl<T> Drop for ShardGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.shard.restore(self.fifo);
    }
}

impl<T> fmt::Debug for ShardGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardGuard")
            .field("index", &self.index)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::shard::ShardTable;

    #[test]
    fn test_reassign_releases_previous_shard() {
        let table = ShardTable::<u8>::new(4).unwrap();
        table.acquire_any(0).push_back(1);
        table.acquire_any(2).push_back(2);

        let mut current = table.acquire_dirty(0);
        assert_eq!(current.as_ref().map(|g| g.index()), Some(0));
        current.as_mut().unwrap().clear();

        current = table.acquire_dirty(0);
        assert_eq!(current.as_ref().map(|g| g.index()), Some(2));
        assert!(table.shard(0).is_available());
        assert!(!table.shard(0).hint_dirty());
        assert!(!table.shard(2).is_available());

        drop(current);
        assert!(table.shard(2).is_available());
        assert!(table.shard(2).hint_dirty());
    }

    #[test]
    fn test_moved_guard_releases_once() {
        let table = ShardTable::<u8>::new(2).unwrap();
        let guard = table.acquire_any(1);
        let moved = Some(guard);
        assert!(!table.shard(1).is_available());

        let back = moved.map(|mut g| {
            g.push_back(3);
            g
        });
        assert!(!table.shard(1).is_available());
        drop(back);

        assert!(table.shard(1).is_available());
        assert_eq!(table.acquire_dirty(0).unwrap().pop_front(), Some(3));
    }

    #[test]
    fn test_early_return_releases() {
        fn take_if_even(table: &ShardTable<u8>) -> Option<u8> {
            let mut guard = table.acquire_dirty(0)?;
            let front = *guard.front()?;
            if front % 2 != 0 {
                return None;
            }
            guard.pop_front()
        }

        let table = ShardTable::<u8>::new(2).unwrap();
        assert_eq!(take_if_even(&table), None);

        table.acquire_any(0).push_back(3);
        assert_eq!(take_if_even(&table), None);
        assert!(table.shard(0).is_available());
        assert!(table.shard(0).hint_dirty());

        table.acquire_any(0).push_front(4);
        assert_eq!(take_if_even(&table), Some(4));
        assert!(table.shard(0).hint_dirty());
    }

    #[test]
    fn test_debug_reports_index_and_len() {
        let table = ShardTable::<u8>::new(2).unwrap();
        let mut guard = table.acquire_any(1);
        guard.extend([1, 2, 3]);
        let rendered = format!("{guard:?}");
        assert!(rendered.contains("index: 1"));
        assert!(rendered.contains("len: 3"));
    }
}
