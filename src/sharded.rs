use crate::{
    QueueError,
    linked::LinkedQueue,
    traits::{QueueConsumer, QueueFactory, QueueProducer},
};
use crossbeam_utils::CachePadded;
use std::{
    cell::RefCell,
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// A fixed set of independent [`LinkedQueue`]s with adaptive polling.
///
/// Sharding decouples the two kinds of contention a single queue mixes
/// together: each producer handle is pinned to one subqueue (producers on
/// different shards never touch the same head), and consumers only meet
/// producers on the shard they are currently draining.
///
/// Consumers keep no global state. Each [`ShardedConsumer`] owns a
/// "hitlist", a permutation of the shard indices starting as the identity.
/// Dequeues probe shards in hitlist order and promote the shard that
/// delivered, so a consumer drawn toward one busy shard amortizes its scan
/// to a single probe while still reaching every shard when traffic moves.
///
/// # Examples
///
/// ```rust
/// use brigade::{
///     sharded::sharded_queue,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// # fn main() -> Result<(), brigade::QueueError> {
/// let (producer, consumer) = sharded_queue::<u64>().shards(4).channels()?;
///
/// for i in 0..10 {
///     producer.push(i);
/// }
/// let sum: u64 = (0..10).map(|_| consumer.pop().unwrap()).sum();
/// assert_eq!(sum, 45);
/// # Ok(())
/// # }
/// ```
pub struct ShardedQueue<T: Send> {
    shards: Box<[CachePadded<LinkedQueue<T>>]>,
    next_producer: AtomicUsize,
}

impl<T: Send> ShardedQueue<T> {
    /// Create a queue with `shards` independent subqueues.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidShardCount`] if `shards` is zero.
    pub fn new(shards: usize) -> Result<Self, QueueError> {
        if shards == 0 {
            return Err(QueueError::InvalidShardCount);
        }
        Ok(Self {
            shards: (0..shards)
                .map(|_| CachePadded::new(LinkedQueue::new()))
                .collect(),
            next_producer: AtomicUsize::new(0),
        })
    }

    /// Number of subqueues.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Push directly to the subqueue at `shard`, bypassing producer
    /// assignment.
    ///
    /// Useful when the caller partitions traffic itself.
    ///
    /// # Panics
    ///
    /// Panics if `shard >= self.shard_count()`.
    pub fn push_to(&self, shard: usize, value: T) {
        self.shards[shard].push(value);
    }

    /// Pop from the subqueue at `shard` only, waiting out consumer
    /// contention on that shard.
    ///
    /// # Panics
    ///
    /// Panics if `shard >= self.shard_count()`.
    pub fn pop_from(&self, shard: usize) -> Result<T, QueueError> {
        self.shards[shard].pop()
    }
}

impl<T: Send> fmt::Debug for ShardedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedQueue")
            .field("shard_count", &self.shard_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ShardedQueue`]s.
///
/// # Examples
///
/// ```rust
/// use brigade::{
///     sharded::sharded_queue,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// # fn main() -> Result<(), brigade::QueueError> {
/// let (producer, consumer) = sharded_queue::<u32>().shards(8).channels()?;
///
/// producer.push(42);
/// assert_eq!(consumer.pop()?, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ShardedQueueBuilder<T: Send> {
    shards: Option<usize>,
    _phantom: PhantomData<T>,
}

impl<T: Send> Default for ShardedQueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> ShardedQueueBuilder<T> {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            shards: None,
            _phantom: PhantomData,
        }
    }

    /// Set the subqueue count (required, at least 1).
    #[must_use]
    pub const fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    /// Build the queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidShardCount`] if the shard count was not set or
    /// is zero.
    pub fn build(self) -> Result<Arc<ShardedQueue<T>>, QueueError> {
        let shards = self.shards.ok_or(QueueError::InvalidShardCount)?;
        Ok(Arc::new(ShardedQueue::new(shards)?))
    }

    /// Build the queue and return a producer/consumer handle pair.
    pub fn channels(self) -> Result<(ShardedProducer<T>, ShardedConsumer<T>), QueueError> {
        let queue = self.build()?;
        Ok((queue.producer(), queue.consumer()))
    }
}

/// Convenience entry point for building a [`ShardedQueue`].
///
/// # Examples
///
/// ```rust
/// use brigade::{sharded::sharded_queue, traits::QueueProducer};
///
/// # fn main() -> Result<(), brigade::QueueError> {
/// let (producer, _consumer) = sharded_queue::<i64>().shards(4).channels()?;
/// producer.push(-3);
/// # Ok(())
/// # }
/// ```
pub const fn sharded_queue<T: Send>() -> ShardedQueueBuilder<T> {
    ShardedQueueBuilder::new()
}

/// Producer handle for a [`ShardedQueue`], pinned to one subqueue.
///
/// The pin is handed out round-robin from a shared counter when the handle
/// is created, so spreading handles across threads spreads threads across
/// shards. All pushes through one handle keep that producer's submission
/// order within its shard.
///
/// `Clone` deliberately obtains a fresh assignment rather than copying the
/// pin: a cloned handle usually moves to another thread, and stacking two
/// threads on one shard would reintroduce the contention sharding removes.
pub struct ShardedProducer<T: Send> {
    queue: Arc<ShardedQueue<T>>,
    shard: usize,
}

impl<T: Send> Clone for ShardedProducer<T> {
    fn clone(&self) -> Self {
        self.queue.producer()
    }
}

impl<T: Send> fmt::Debug for ShardedProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedProducer")
            .field("shard", &self.shard)
            .finish_non_exhaustive()
    }
}

impl<T: Send> ShardedProducer<T> {
    /// The subqueue this handle pushes to.
    pub const fn shard_index(&self) -> usize {
        self.shard
    }
}

impl<T: Send> QueueProducer<T> for ShardedProducer<T> {
    fn push(&self, value: T) {
        self.queue.shards[self.shard].push(value);
    }
}

/// Consumer handle for a [`ShardedQueue`], carrying its private hitlist.
///
/// The hitlist is a permutation of `0..shard_count` that starts as the
/// identity. Every successful dequeue promotes the delivering shard toward
/// the front, so the scan order converges on the shards the producers
/// actually feed.
///
/// The handle is `Send` but not `Sync`: the hitlist is meaningful for one
/// thread's observation history, so each consuming thread takes its own
/// handle. `Clone` starts the new handle back at the identity permutation.
pub struct ShardedConsumer<T: Send> {
    queue: Arc<ShardedQueue<T>>,
    hitlist: RefCell<Box<[usize]>>,
}

impl<T: Send> Clone for ShardedConsumer<T> {
    fn clone(&self) -> Self {
        self.queue.consumer()
    }
}

impl<T: Send> fmt::Debug for ShardedConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedConsumer")
            .field("hitlist", &self.hitlist.borrow())
            .finish_non_exhaustive()
    }
}

/// Move the shard at `hit` to the front of the hitlist.
///
/// Stepwise swaps rather than a rotate: the hit entry walks to slot 0 and
/// every entry it displaces slides back by exactly one, so one productive
/// dequeue cannot demote the previous favorite further than one place.
fn promote(hitlist: &mut [usize], hit: usize) {
    for probe in 0..hit {
        hitlist.swap(hit, probe);
    }
}

impl<T: Send> ShardedConsumer<T> {
    /// The shard this consumer will probe first.
    pub fn preferred_shard(&self) -> usize {
        self.hitlist.borrow()[0]
    }

    /// Snapshot of the current probe order.
    pub fn hitlist(&self) -> Vec<usize> {
        self.hitlist.borrow().to_vec()
    }

    /// Pop on the single-consumer fast path, scanning shards in hitlist
    /// order.
    ///
    /// # Safety
    ///
    /// This handle's thread must be the only consumer of the whole sharded
    /// queue for the duration of the call; the per-shard single-consumer
    /// dequeue inherits that exclusivity.
    pub unsafe fn pop_single(&self) -> Result<T, QueueError> {
        let mut hitlist = self.hitlist.borrow_mut();
        for i in 0..hitlist.len() {
            // SAFETY: forwarded caller contract; no other consumer touches
            // any shard.
            if let Ok(value) = unsafe { self.queue.shards[hitlist[i]].pop_single() } {
                promote(&mut hitlist, i);
                return Ok(value);
            }
        }
        Err(QueueError::Empty)
    }
}

impl<T: Send> QueueConsumer<T> for ShardedConsumer<T> {
    /// Two passes over the hitlist: first skim every shard with the
    /// non-spinning dequeue to collect an easy win, then sweep again with
    /// the spinning dequeue to wait out consumers holding shard tails.
    fn pop(&self) -> Result<T, QueueError> {
        let mut hitlist = self.hitlist.borrow_mut();
        for i in 0..hitlist.len() {
            if let Ok(value) = self.queue.shards[hitlist[i]].try_pop() {
                promote(&mut hitlist, i);
                return Ok(value);
            }
        }
        for i in 0..hitlist.len() {
            if let Ok(value) = self.queue.shards[hitlist[i]].pop() {
                promote(&mut hitlist, i);
                return Ok(value);
            }
        }
        Err(QueueError::Empty)
    }

    /// One non-spinning pass. A shard held by another consumer is skipped
    /// like an empty one, so [`QueueError::Empty`] here may simply mean a
    /// retry would find something.
    fn try_pop(&self) -> Result<T, QueueError> {
        let mut hitlist = self.hitlist.borrow_mut();
        for i in 0..hitlist.len() {
            if let Ok(value) = self.queue.shards[hitlist[i]].try_pop() {
                promote(&mut hitlist, i);
                return Ok(value);
            }
        }
        Err(QueueError::Empty)
    }
}

impl<T: Send> QueueFactory<T> for Arc<ShardedQueue<T>> {
    type Producer = ShardedProducer<T>;
    type Consumer = ShardedConsumer<T>;

    fn producer(&self) -> Self::Producer {
        let shard = self.next_producer.fetch_add(1, Ordering::Relaxed) % self.shard_count();
        ShardedProducer {
            queue: self.clone(),
            shard,
        }
    }

    fn consumer(&self) -> Self::Consumer {
        ShardedConsumer {
            queue: self.clone(),
            hitlist: RefCell::new((0..self.shard_count()).collect()),
        }
    }
}
