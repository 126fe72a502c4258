use crate::{
    QueueError,
    selector::{AffinityPolicy, DEFAULT_RESAMPLE_INTERVAL, ShardSelector, thread_hint},
    shard::{DEFAULT_SHARD_COUNT, ShardTable},
    traits::{QueueConsumer, QueueFactory, QueueProducer},
};
use std::{cell::Cell, fmt, marker::PhantomData, sync::Arc};
use tracing::{debug, trace};

/// Concurrent queue spread over a fixed number of single-threaded FIFOs.
///
/// Every operation first picks a starting shard from an affinity hint, wins
/// exclusive ownership of one shard through an atomic exchange, works on that
/// shard's FIFO directly, and hands it back when the operation returns.
/// Contention is spread across shards instead of serialized on one
/// structure.
///
/// # Ordering
///
/// Items are FIFO within a shard only. There is no global order: two items
/// enqueued one after the other by different threads, or even by the same
/// thread across a core migration, may be dequeued in either order.
///
/// # Progress
///
/// Enqueueing scans for a free shard without bound or backoff; it only
/// returns once it owns one. Dequeueing probes each shard at most once per
/// acquisition and reports "nothing found" instead of waiting, which may
/// happen while items exist (the per-shard hint is advisory).
///
/// # Teardown
///
/// Dropping the queue frees all shards and the items still inside. Dropping
/// requires exclusive access, so no operation can be in flight; share the
/// queue through an [`Arc`] and join workers before the last reference goes.
///
/// # Examples
///
/// ```
/// use shardq::ShardedQueue;
///
/// let queue = ShardedQueue::new();
/// assert!(queue.enqueue("a"));
/// assert!(queue.enqueue_bulk(["b", "c"], 2));
///
/// let mut drained = queue.try_dequeue_bulk(8);
/// drained.sort_unstable();
/// assert_eq!(drained, ["a", "b", "c"]);
/// assert_eq!(queue.try_dequeue(), None);
/// ```
pub struct ShardedQueue<T> {
    table: ShardTable<T>,
    policy: AffinityPolicy,
}

impl<T> fmt::Debug for ShardedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedQueue")
            .field("table", &self.table)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T> Default for ShardedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating sharded queues.
///
/// # Examples
///
/// ```
/// use shardq::{ShardedQueue, traits::{QueueConsumer, QueueProducer}};
///
/// # fn main() -> Result<(), shardq::QueueError> {
/// let (producer, consumer) = ShardedQueue::<u64>::builder()
///     .shards(8)
///     .resample_interval(64)
///     .channels()?;
///
/// producer.push(42);
/// assert_eq!(consumer.try_pop()?, 42);
/// # Ok(())
/// # }
/// ```
pub struct ShardedQueueBuilder<T> {
    shards: usize,
    resample_interval: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for ShardedQueueBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedQueueBuilder")
            .field("shards", &self.shards)
            .field("resample_interval", &self.resample_interval)
            .finish()
    }
}

impl<T> Default for ShardedQueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ShardedQueueBuilder<T> {
    /// Create a new builder with 32 shards and a resample interval of 500
    pub const fn new() -> Self {
        Self {
            shards: DEFAULT_SHARD_COUNT,
            resample_interval: DEFAULT_RESAMPLE_INTERVAL,
            _marker: PhantomData,
        }
    }

    /// Set the number of shards (must be a power of 2)
    #[must_use]
    pub const fn shards(mut self, count: usize) -> Self {
        self.shards = count;
        self
    }

    /// Set how many calls reuse a sampled core id before it is refreshed
    #[must_use]
    pub const fn resample_interval(mut self, calls: u32) -> Self {
        self.resample_interval = calls;
        self
    }

    /// Build a queue
    pub fn build(self) -> Result<ShardedQueue<T>, QueueError> {
        let policy = AffinityPolicy::new(self.resample_interval)?;
        let table = ShardTable::new(self.shards)?;
        Ok(ShardedQueue::from_parts(table, policy))
    }

    /// Build a queue and create a producer/consumer pair over it
    pub fn channels(self) -> Result<(Producer<T>, Consumer<T>), QueueError> {
        let queue = Arc::new(self.build()?);
        Ok(queue.channel())
    }
}

impl<T> ShardedQueue<T> {
    /// Creates a queue with 32 shards.
    pub fn new() -> Self {
        Self::from_parts(ShardTable::with_default_count(), AffinityPolicy::default())
    }

    fn from_parts(table: ShardTable<T>, policy: AffinityPolicy) -> Self {
        debug!(
            shards = table.len(),
            resample_interval = policy.resample_interval(),
            "sharded queue created"
        );
        Self { table, policy }
    }

    /// Creates a queue with `shard_count` shards.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidShardCount`] unless `shard_count` is a
    /// non-zero power of two.
    pub fn with_shards(shard_count: usize) -> Result<Self, QueueError> {
        ShardedQueueBuilder::new().shards(shard_count).build()
    }

    /// Returns a builder for configuring a queue.
    pub const fn builder() -> ShardedQueueBuilder<T> {
        ShardedQueueBuilder::new()
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.table.len()
    }

    /// The affinity policy used by this queue's selectors.
    pub const fn policy(&self) -> AffinityPolicy {
        self.policy
    }

    /// The underlying shard table, for callers that want to hold a shard
    /// across several FIFO operations.
    pub const fn table(&self) -> &ShardTable<T> {
        &self.table
    }

    /// Enqueues `item` into whichever shard the calling thread wins first.
    ///
    /// Always returns `true`: the shard scan does not give up.
    pub fn enqueue(&self, item: T) -> bool {
        self.enqueue_from(thread_hint(self.policy), item)
    }

    /// Enqueues up to `count` items from `items` into a single shard.
    ///
    /// The whole batch lands in one shard, in iteration order, under one
    /// acquisition. If `items` yields fewer than `count` values, all of them
    /// are enqueued. Always returns `true`.
    pub fn enqueue_bulk<I>(&self, items: I, count: usize) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        self.enqueue_bulk_from(thread_hint(self.policy), items, count);
        true
    }

    /// Dequeues one item from a shard whose hint says it has data.
    ///
    /// Returns `None` when no hinted shard could be won, or when the won
    /// shard had already been drained by another thread. Neither case means
    /// the queue is empty; callers retry.
    pub fn try_dequeue(&self) -> Option<T> {
        self.dequeue_from(thread_hint(self.policy))
    }

    /// Dequeues up to `max_items` items, possibly from several shards.
    ///
    /// See [`ShardedQueue::try_dequeue_bulk_into`].
    pub fn try_dequeue_bulk(&self, max_items: usize) -> Vec<T> {
        let mut out = Vec::new();
        self.try_dequeue_bulk_into(&mut out, max_items);
        out
    }

    /// Dequeues up to `max_items` items into `out`, returning how many were
    /// moved.
    ///
    /// Each acquired shard is drained in place, front first, until either the
    /// request is met or that shard is empty; then another hinted shard is
    /// acquired. At most `shard_count() + 1` shards are acquired per call, so
    /// this never waits for items to appear. Items from one shard keep their
    /// relative order in `out`.
    pub fn try_dequeue_bulk_into<E>(&self, out: &mut E, max_items: usize) -> usize
    where
        E: Extend<T>,
    {
        let policy = self.policy;
        self.dequeue_bulk_from(|| thread_hint(policy), out, max_items)
    }

    fn enqueue_from(&self, hint: usize, item: T) -> bool {
        let mut guard = self.table.acquire_any(hint);
        guard.push_back(item);
        true
    }

    fn enqueue_bulk_from<I>(&self, hint: usize, items: I, count: usize) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut guard = self.table.acquire_any(hint);
        let before = guard.len();
        guard.extend(items.into_iter().take(count));
        guard.len() - before
    }

    fn dequeue_from(&self, hint: usize) -> Option<T> {
        self.table.acquire_dirty(hint)?.pop_front()
    }

    fn dequeue_bulk_from<H, E>(&self, mut hint: H, out: &mut E, max_items: usize) -> usize
    where
        H: FnMut() -> usize,
        E: Extend<T>,
    {
        if max_items == 0 {
            return 0;
        }

        let shard_count = self.table.len();
        let mut taken = 0;
        let mut probes = 0;
        let mut current = self.table.acquire_dirty(hint());

        while let Some(guard) = current.as_mut() {
            let batch = guard.len().min(max_items - taken);
            out.extend(guard.drain(..batch));
            taken += batch;

            if taken == max_items {
                break;
            }
            if probes == shard_count {
                trace!(taken, max_items, "bulk dequeue hit probe bound");
                break;
            }
            probes += 1;
            // The held shard is released only after the next one is won.
            current = self.table.acquire_dirty(hint());
        }
        taken
    }
}

impl<T> QueueProducer<T> for ShardedQueue<T> {
    fn push(&self, value: T) {
        self.enqueue(value);
    }

    fn push_bulk<I>(&self, items: I, count: usize) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        self.enqueue_bulk_from(thread_hint(self.policy), items, count)
    }
}

impl<T> QueueConsumer<T> for ShardedQueue<T> {
    fn try_pop(&self) -> Result<T, QueueError> {
        self.try_dequeue().ok_or(QueueError::Empty)
    }

    fn pop_bulk(&self, max_items: usize) -> Vec<T> {
        self.try_dequeue_bulk(max_items)
    }
}

/// Convenient type alias for [`ProducerHandle`].
pub type Producer<T> = ProducerHandle<T>;

/// Convenient type alias for [`ConsumerHandle`].
pub type Consumer<T> = ConsumerHandle<T>;

/// Producer handle carrying its own affinity selector.
///
/// Each handle draws its offset from the queue's own counter when created, so
/// handles used on the same core start on different shards. A handle is
/// `Send` but not `Sync`: move it to the thread that uses it. Cloning creates
/// a new handle with a fresh offset.
///
/// # Examples
///
/// ```
/// use shardq::{ShardedQueue, traits::{QueueConsumer, QueueFactory, QueueProducer}};
/// use std::{sync::Arc, thread};
///
/// let queue = Arc::new(ShardedQueue::<u64>::new());
/// let handles: Vec<_> = (0..4u64)
///     .map(|id| {
///         let producer = queue.producer();
///         thread::spawn(move || {
///             for i in 0..100 {
///                 producer.push(id * 1000 + i);
///             }
///         })
///     })
///     .collect();
///
/// for h in handles {
///     h.join().unwrap();
/// }
///
/// let consumer = queue.consumer();
/// assert_eq!(consumer.pop_bulk(1000).len(), 400);
/// ```
pub struct ProducerHandle<T> {
    queue: Arc<ShardedQueue<T>>,
    selector: Cell<ShardSelector>,
}

/// Consumer handle carrying its own affinity selector.
///
/// Same placement and threading rules as [`ProducerHandle`].
pub struct ConsumerHandle<T> {
    queue: Arc<ShardedQueue<T>>,
    selector: Cell<ShardSelector>,
}

fn handle_selector<T>(queue: &ShardedQueue<T>) -> Cell<ShardSelector> {
    Cell::new(ShardSelector::with_offset(queue.table.next_offset()))
}

fn next_handle_hint(selector: &Cell<ShardSelector>, policy: AffinityPolicy) -> usize {
    let mut current = selector.get();
    let hint = current.next_hint(policy);
    selector.set(current);
    hint
}

impl<T> ProducerHandle<T> {
    fn new(queue: Arc<ShardedQueue<T>>) -> Self {
        let selector = handle_selector(&queue);
        Self { queue, selector }
    }

    /// The 2-bit offset this handle adds to the core id.
    pub fn offset(&self) -> usize {
        self.selector.get().offset()
    }

    /// The queue this handle feeds.
    pub const fn queue(&self) -> &Arc<ShardedQueue<T>> {
        &self.queue
    }

    fn hint(&self) -> usize {
        next_handle_hint(&self.selector, self.queue.policy)
    }
}

impl<T> ConsumerHandle<T> {
    fn new(queue: Arc<ShardedQueue<T>>) -> Self {
        let selector = handle_selector(&queue);
        Self { queue, selector }
    }

    /// The 2-bit offset this handle adds to the core id.
    pub fn offset(&self) -> usize {
        self.selector.get().offset()
    }

    /// The queue this handle drains.
    pub const fn queue(&self) -> &Arc<ShardedQueue<T>> {
        &self.queue
    }

    /// Dequeues up to `max_items` items into `out`, returning how many were
    /// moved. Same contract as [`ShardedQueue::try_dequeue_bulk_into`].
    pub fn pop_bulk_into<E>(&self, out: &mut E, max_items: usize) -> usize
    where
        E: Extend<T>,
    {
        self.queue.dequeue_bulk_from(|| self.hint(), out, max_items)
    }

    fn hint(&self) -> usize {
        next_handle_hint(&self.selector, self.queue.policy)
    }
}

impl<T> Clone for ProducerHandle<T> {
    fn clone(&self) -> Self {
        // Create a new producer with a different offset
        Self::new(self.queue.clone())
    }
}

impl<T> Clone for ConsumerHandle<T> {
    fn clone(&self) -> Self {
        // Create a new consumer with a different offset
        Self::new(self.queue.clone())
    }
}

impl<T> fmt::Debug for ProducerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("offset", &self.offset())
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for ConsumerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("offset", &self.offset())
            .finish_non_exhaustive()
    }
}

impl<T> QueueProducer<T> for ProducerHandle<T> {
    fn push(&self, value: T) {
        self.queue.enqueue_from(self.hint(), value);
    }

    fn push_bulk<I>(&self, items: I, count: usize) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        self.queue.enqueue_bulk_from(self.hint(), items, count)
    }
}

impl<T> QueueConsumer<T> for ConsumerHandle<T> {
    fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.dequeue_from(self.hint()).ok_or(QueueError::Empty)
    }

    fn pop_bulk(&self, max_items: usize) -> Vec<T> {
        let mut out = Vec::new();
        self.pop_bulk_into(&mut out, max_items);
        out
    }
}

impl<T> QueueFactory<T> for Arc<ShardedQueue<T>> {
    type Producer = ProducerHandle<T>;
    type Consumer = ConsumerHandle<T>;

    fn producer(&self) -> Self::Producer {
        ProducerHandle::new(self.clone())
    }

    fn consumer(&self) -> Self::Consumer {
        ConsumerHandle::new(self.clone())
    }
}
