//! # Brigade: Unbounded Lock-Free MPMC Queues
//!
//! Brigade provides unbounded multi-producer multi-consumer queues built on
//! a lock-free linked list with internal node recycling, plus a sharded
//! variant that spreads traffic over several subqueues and adapts each
//! consumer's polling order to where the elements actually are.
//!
//! ## Queue Types
//!
//! ### 1. Linked Queue ([`LinkedQueue`])
//! The foundational queue: a single lock-free FIFO. Dequeued nodes are parked
//! on an embedded freelist and handed back to later enqueues, so a
//! steady-state workload stops allocating entirely.
//!
//! ```rust
//! use brigade::{
//!     linked,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//!
//! let (producer, consumer) = linked::queue::<u64>();
//!
//! producer.push(42);
//! assert_eq!(consumer.pop(), Ok(42));
//! ```
//!
//! ### 2. Sharded Queue ([`ShardedQueue`])
//! A fixed set of independent linked queues. Each producer handle is pinned
//! to one subqueue, so producers never contend with each other across
//! shards. Each consumer handle keeps a "hitlist": a permutation of the
//! shard indices that floats productive shards toward the front, so a
//! consumer fed by one busy shard finds its next element on the first probe.
//!
//! ```rust
//! use brigade::{
//!     sharded::sharded_queue,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//!
//! # fn main() -> Result<(), brigade::QueueError> {
//! let (producer, consumer) = sharded_queue::<u64>().shards(4).channels()?;
//!
//! producer.push(100);
//! assert_eq!(consumer.pop()?, 100);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Modes
//!
//! Every queue supports mixed modes on the same instance:
//!
//! - `push` / `pop` / `try_pop` are safe under arbitrary producer and
//!   consumer concurrency.
//! - `push_single` / `pop_single` are faster single-producer /
//!   single-consumer paths. Their exclusivity preconditions cannot be
//!   checked at runtime, so they are `unsafe fn`s with the contract spelled
//!   out in their safety sections.
//!
//! ## Ordering Guarantees
//!
//! - With a single producer, consumers observe values in enqueue order.
//! - With multiple producers, each producer's values stay in that producer's
//!   submission order; interleaving between producers is unspecified.
//! - On a [`ShardedQueue`], a producer handle's values all land in one
//!   subqueue, so per-producer order survives sharding.
//! - Whenever a consumer observes a value, every write the producer made
//!   before pushing it is visible (release/acquire pairing on the links).
//!
//! ## Failure Model
//!
//! Enqueues cannot fail: the queues are unbounded and a fresh node is
//! allocated whenever the freelist is dry (allocation failure aborts, as
//! with any other `Box::new`). Dequeues fail only with
//! [`QueueError::Empty`]. From the spinning `pop` that means the queue
//! really was drained at that instant; from the non-spinning `try_pop` it
//! folds together "nothing there" and "another consumer held the tail",
//! and callers are deliberately given no way to tell those apart — an
//! immediate retry is always valid and cheap. There are no timeouts, no
//! internal retry policy, and no blocking; callers drive their own wait
//! strategy.
#![deny(
    missing_docs,
    unused_imports,
    unused_variables,
    dead_code,
    unreachable_code,
    unused_must_use,
    unsafe_op_in_unsafe_fn
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::similar_names
)]

/// The unbounded lock-free linked queue.
///
/// This module provides the foundational [`LinkedQueue`] implementation with
/// its producer/consumer handles and the [`queue`](linked::queue)
/// convenience constructor.
pub mod linked;

/// Sharding across multiple linked queues with adaptive consumer polling.
///
/// This module provides [`ShardedQueue`], which pins producers to subqueues
/// and lets each consumer learn a polling order (the hitlist) from observed
/// dequeue hits.
pub mod sharded;

/// Common traits for queue producers, consumers, and factories.
///
/// This module defines the abstractions shared by both queue types:
/// [`QueueProducer`], [`QueueConsumer`], and [`QueueFactory`].
///
/// [`QueueProducer`]: traits::QueueProducer
/// [`QueueConsumer`]: traits::QueueConsumer
/// [`QueueFactory`]: traits::QueueFactory
pub mod traits;

pub use linked::LinkedQueue;
pub use sharded::ShardedQueue;

use thiserror::Error;

/// Errors reported by queue operations.
///
/// Dequeues have a single failure outcome; everything else is caught at
/// construction time.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The dequeue attempt produced no element.
    ///
    /// A spinning `pop` only returns this once it holds the tail
    /// exclusively and finds no published successor, so the queue really
    /// was drained at that instant. A non-spinning `try_pop` also returns
    /// it after losing the tail race to another consumer; the two causes
    /// are indistinguishable by design, and retrying is always valid.
    #[error("queue is empty")]
    Empty,

    /// A sharded queue was requested with zero subqueues.
    ///
    /// Shard counts must be at least 1. There is no upper bound beyond
    /// available memory.
    #[error("shard count must be at least 1")]
    InvalidShardCount,
}
