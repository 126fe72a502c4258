//! # shardq: A Fixed Fan-Out Concurrent Queue
//!
//! shardq spreads a multi-producer multi-consumer queue over a fixed array of
//! independent single-threaded FIFOs ("shards"). Instead of a lock, each shard
//! is guarded by an atomic ownership handle: a thread swaps the handle out to
//! own the shard's FIFO, works on it without further synchronization, and
//! stores it back when done.
//!
//! ## Features
//!
//! - **Spread contention**: threads start on a shard picked from their core
//!   id, so threads on different cores rarely touch the same cache lines
//! - **Cache-line isolation**: every shard's handle and hint live on separate
//!   cache lines
//! - **Scoped ownership**: a [`ShardGuard`](guard::ShardGuard) returns its
//!   shard on every exit path, unwinding included
//! - **Bulk operations**: batches are moved under a single acquisition
//! - **Hinted dequeue**: consumers skip shards that look empty without
//!   touching their handle
//!
//! ## Usage
//!
//! ```rust
//! use shardq::ShardedQueue;
//!
//! let queue = ShardedQueue::new();
//! queue.enqueue(1u32);
//! queue.enqueue_bulk([2, 3, 4], 3);
//!
//! let mut items = Vec::new();
//! while let Some(item) = queue.try_dequeue() {
//!     items.push(item);
//! }
//! items.sort_unstable();
//! assert_eq!(items, [1, 2, 3, 4]);
//! ```
//!
//! ### Producer and Consumer Handles
//!
//! Handles carry their own affinity state and can be moved to worker threads:
//!
//! ```rust
//! use shardq::{
//!     ShardedQueue,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//! use std::thread;
//!
//! # fn main() -> Result<(), shardq::QueueError> {
//! let (producer, consumer) = ShardedQueue::<usize>::builder().shards(16).channels()?;
//!
//! let writer = thread::spawn(move || {
//!     for i in 0..100 {
//!         producer.push(i);
//!     }
//! });
//! writer.join().unwrap();
//!
//! let mut total = 0;
//! while let Ok(value) = consumer.try_pop() {
//!     total += value;
//! }
//! assert_eq!(total, (0..100).sum());
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees and Non-Guarantees
//!
//! - No item is lost or duplicated.
//! - Items are FIFO within a shard. There is **no** global FIFO order across
//!   shards.
//! - A failed dequeue is transient: the per-shard "has data" hint is read
//!   without synchronization and may be stale either way.
//! - Enqueue never fails, but it spins without bound if every shard stays
//!   owned by other threads.
//! - There is no blocking wait, no resizing and no global length.
//!
//! ## Error Handling
//!
//! Queue operations report outcomes through `bool`, `Option` and counts.
//! [`QueueError`] covers invalid construction parameters and the transient
//! `Empty` outcome of the handle API.
#![deny(
    missing_docs,
    unused_imports,
    unused_variables,
    dead_code,
    unreachable_code,
    unused_must_use
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Exclusive, scoped ownership of one shard's FIFO.
///
/// This module provides [`ShardGuard`], the token that hands a shard back to
/// its table when dropped.
///
/// [`ShardGuard`]: guard::ShardGuard
pub mod guard;

/// The public queue type, its builder, and producer/consumer handles.
///
/// [`ShardedQueue`] composes the shard table and the affinity selector into
/// enqueue, dequeue and bulk operations.
pub mod queue;

/// Per-thread affinity hints used to pick a starting shard.
///
/// This module provides [`ShardSelector`] and the [`AffinityPolicy`] that
/// controls how often it refreshes its cached core id.
///
/// [`ShardSelector`]: selector::ShardSelector
/// [`AffinityPolicy`]: selector::AffinityPolicy
pub mod selector;

/// Cache-line aligned shards and the table that hands them out.
///
/// [`ShardTable`] implements the acquisition protocol: an unbounded scan for
/// producers and a bounded, hint-filtered scan for consumers.
///
/// [`ShardTable`]: shard::ShardTable
pub mod shard;

/// Common traits for queue producers, consumers, and factories.
///
/// This module defines [`QueueProducer`], [`QueueConsumer`] and
/// [`QueueFactory`], implemented by the queue and its handles.
///
/// [`QueueProducer`]: traits::QueueProducer
/// [`QueueConsumer`]: traits::QueueConsumer
/// [`QueueFactory`]: traits::QueueFactory
pub mod traits;

pub use queue::{ShardedQueue, ShardedQueueBuilder};

use thiserror::Error;

/// Errors that can occur when building or draining a queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No item was obtained.
    ///
    /// Either no shard with a "has data" hint could be owned, or the owned
    /// shard had already been drained by another thread. This is transient;
    /// items may still be present.
    #[error("no item available")]
    Empty,

    /// The requested shard count is not usable.
    ///
    /// Shard counts must be non-zero powers of two so that a start hint maps
    /// onto a shard with a bitmask.
    #[error("invalid shard count {count}: must be a non-zero power of two")]
    InvalidShardCount {
        /// The rejected shard count.
        count: usize,
    },

    /// The affinity resample interval was zero.
    #[error("invalid resample interval: must be at least 1")]
    InvalidResampleInterval,
}
