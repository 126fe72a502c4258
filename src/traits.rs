use crate::QueueError;

/// Trait for queue producers that can push items into a queue.
///
/// Implemented by [`ShardedQueue`] itself, which steers with a thread-local
/// selector, and by [`Producer`] handles, which carry their own.
///
/// [`ShardedQueue`]: crate::ShardedQueue
/// [`Producer`]: crate::queue::Producer
pub trait QueueProducer<T> {
    /// Push a value into some shard.
    ///
    /// Spins until a shard can be owned; it does not fail.
    fn push(&self, value: T);

    /// Push up to `count` values from `items` under a single shard
    /// acquisition.
    ///
    /// # Returns
    /// The number of values taken from `items`, which is less than `count`
    /// only when the iterator runs dry
    fn push_bulk<I>(&self, items: I, count: usize) -> usize
    where
        I: IntoIterator<Item = T>;
}

/// Trait for queue consumers that can pop items from a queue.
pub trait QueueConsumer<T> {
    /// Pop a value without blocking.
    ///
    /// # Returns
    /// The popped value, or `QueueError::Empty` if no hinted shard yielded
    /// one. `Empty` is transient under concurrency; retry later.
    fn try_pop(&self) -> Result<T, QueueError>;

    /// Pop up to `max_items` values, draining several shards if needed.
    ///
    /// # Returns
    /// The values in per-shard order; may hold fewer than requested
    fn pop_bulk(&self, max_items: usize) -> Vec<T>;
}

/// Trait for queues that can create producers and consumers.
pub trait QueueFactory<T> {
    /// The type of producers this queue creates
    type Producer: QueueProducer<T>;

    /// The type of consumers this queue creates
    type Consumer: QueueConsumer<T>;

    /// Create both producer and consumer handles in one call.
    ///
    /// # Returns
    /// A tuple containing `(producer, consumer)` handles
    fn channel(&self) -> (Self::Producer, Self::Consumer) {
        (self.producer(), self.consumer())
    }

    /// Create a new producer handle for this queue.
    fn producer(&self) -> Self::Producer;

    /// Create a new consumer handle for this queue.
    fn consumer(&self) -> Self::Consumer;
}
