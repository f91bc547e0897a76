use crate::{
    QueueError,
    traits::{QueueConsumer, QueueFactory, QueueProducer},
};
use crossbeam_utils::CachePadded;
use std::{
    fmt,
    mem::MaybeUninit,
    ptr,
    sync::{
        Arc,
        atomic::{AtomicPtr, Ordering},
    },
    thread,
};

/// One cell of the linked list.
///
/// The payload slot is only initialized while the node sits between the
/// queue's tail and head; sentinels and freelist residents hold garbage,
/// hence `MaybeUninit`.
struct Node<T> {
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn boxed(value: MaybeUninit<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// Endpoints touched by producers: the list head they splice onto and the
/// freelist end they pop recycled nodes from.
struct EnqueueEnds<T> {
    head: AtomicPtr<Node<T>>,
    free_tail: AtomicPtr<Node<T>>,
}

/// Endpoints touched by consumers: the sentinel tail whose successor is the
/// front element, and the freelist end retired nodes are pushed onto.
struct DequeueEnds<T> {
    tail: AtomicPtr<Node<T>>,
    free_head: AtomicPtr<Node<T>>,
}

/// An unbounded lock-free MPMC queue backed by a linked list.
///
/// The queue keeps a sentinel at its front: `tail` itself never carries a
/// live value, its successor does. Nodes whose value has been consumed are
/// not freed but parked on an internal freelist (a second lock-free list)
/// and handed back to later enqueues, so a workload that drains as fast as
/// it fills settles into zero allocations.
///
/// # Concurrency Modes
///
/// [`push`](Self::push), [`pop`](Self::pop) and [`try_pop`](Self::try_pop)
/// are safe under any number of concurrent producers and consumers.
/// [`push_single`](Self::push_single) and [`pop_single`](Self::pop_single)
/// skip the contention handling and are `unsafe`; their contracts are the
/// usual SPSC exclusivity guarantees.
///
/// # Examples
///
/// ```rust
/// use brigade::LinkedQueue;
///
/// let queue = LinkedQueue::new();
/// queue.push(1);
/// queue.push(2);
/// assert_eq!(queue.pop(), Ok(1));
/// assert_eq!(queue.pop(), Ok(2));
/// assert!(queue.pop().is_err());
/// ```
pub struct LinkedQueue<T: Send> {
    enq: CachePadded<EnqueueEnds<T>>,
    deq: CachePadded<DequeueEnds<T>>,
}

// SAFETY: the queue owns every node reachable from its endpoints, all shared
// mutation goes through atomics, and pushing/popping transfers ownership of
// the `T` along with the release/acquire edge on the link.
unsafe impl<T: Send> Send for LinkedQueue<T> {}
unsafe impl<T: Send> Sync for LinkedQueue<T> {}

impl<T: Send> LinkedQueue<T> {
    /// Create an empty queue.
    ///
    /// Allocates two sentinels, one per list; nothing else until the first
    /// push outruns the freelist.
    pub fn new() -> Self {
        let sentinel = Node::boxed(MaybeUninit::uninit());
        let free_sentinel = Node::boxed(MaybeUninit::uninit());
        Self {
            enq: CachePadded::new(EnqueueEnds {
                head: AtomicPtr::new(sentinel),
                free_tail: AtomicPtr::new(free_sentinel),
            }),
            deq: CachePadded::new(DequeueEnds {
                tail: AtomicPtr::new(sentinel),
                free_head: AtomicPtr::new(free_sentinel),
            }),
        }
    }

    /// Push a value; safe under arbitrary producer concurrency.
    ///
    /// Swaps itself in as the new head, then publishes the link from the
    /// previous head. Between those two steps the previous head is visible
    /// to other producers but not yet linked; consumers treat the missing
    /// link as "empty or in transit".
    pub fn push(&self, value: T) {
        let node = self.acquire_node(value);
        let prev = self.enq.head.swap(node, Ordering::AcqRel);
        // SAFETY: nodes are never freed while the queue is live, and winning
        // the swap makes this thread the only one linking `prev`.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
    }

    /// Push a value on the single-producer fast path.
    ///
    /// Two plain stores instead of a read-modify-write on the head.
    ///
    /// # Safety
    ///
    /// No other producer (neither `push` nor `push_single`) may run
    /// concurrently on this queue. A racing producer can link a node into
    /// the list twice, and its value would then be read out twice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use brigade::LinkedQueue;
    ///
    /// let queue = LinkedQueue::new();
    /// // SAFETY: this thread is the only producer.
    /// unsafe { queue.push_single(7) };
    /// assert_eq!(queue.pop(), Ok(7));
    /// ```
    pub unsafe fn push_single(&self, value: T) {
        let node = self.acquire_node(value);
        let head = self.enq.head.load(Ordering::Relaxed);
        // SAFETY: producer exclusivity (caller contract) means `head` cannot
        // move underneath us.
        unsafe {
            (*head).next.store(node, Ordering::Release);
        }
        self.enq.head.store(node, Ordering::Relaxed);
    }

    /// Pop the front value, yielding while another consumer holds the tail;
    /// safe under arbitrary consumer concurrency.
    ///
    /// Ownership of the tail pointer is taken by swapping null into it; a
    /// null result means some other consumer holds it, in which case the
    /// thread yields its quantum and retries. With no competitor the swap
    /// succeeds at once, so an empty uncontended queue returns
    /// [`QueueError::Empty`] without spinning.
    pub fn pop(&self) -> Result<T, QueueError> {
        let mut tail = self.deq.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        while tail.is_null() {
            thread::yield_now();
            tail = self.deq.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        }
        // SAFETY: the swap observed a non-null tail, so this thread is its
        // sole holder until it is released below.
        unsafe { self.pop_held(tail) }
    }

    /// Pop the front value without waiting on other consumers.
    ///
    /// A single failed attempt to take the tail reports
    /// [`QueueError::Empty`], the same result as an actually drained
    /// queue; the caller cannot tell the two apart and owns the retry
    /// policy.
    pub fn try_pop(&self) -> Result<T, QueueError> {
        let tail = self.deq.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        if tail.is_null() {
            // Another consumer holds the tail; surrender.
            return Err(QueueError::Empty);
        }
        // SAFETY: as in `pop`, a non-null swap result is exclusive.
        unsafe { self.pop_held(tail) }
    }

    /// Pop the front value on the single-consumer fast path.
    ///
    /// # Safety
    ///
    /// No other consumer (`pop`, `try_pop` or `pop_single`) may run
    /// concurrently on this queue. Racing consumers can read the same
    /// value slot twice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use brigade::{LinkedQueue, QueueError};
    ///
    /// let queue = LinkedQueue::new();
    /// queue.push(1);
    /// // SAFETY: this thread is the only consumer.
    /// unsafe {
    ///     assert_eq!(queue.pop_single(), Ok(1));
    ///     assert_eq!(queue.pop_single(), Err(QueueError::Empty));
    /// }
    /// ```
    pub unsafe fn pop_single(&self) -> Result<T, QueueError> {
        let tail = self.deq.tail.load(Ordering::Relaxed);
        // SAFETY: consumer exclusivity (caller contract) keeps `tail` ours
        // for the whole operation.
        unsafe {
            let next = (*tail).next.load(Ordering::Acquire);
            if next.is_null() {
                return Err(QueueError::Empty);
            }
            let value = (*next).value.assume_init_read();
            self.deq.tail.store(next, Ordering::Release);
            self.free_push(tail);
            Ok(value)
        }
    }

    /// Finishes a multi-consumer dequeue once the tail is held.
    ///
    /// # Safety
    ///
    /// `tail` must be the non-null pointer this thread obtained by swapping
    /// null into `deq.tail`, not yet released back.
    unsafe fn pop_held(&self, tail: *mut Node<T>) -> Result<T, QueueError> {
        // SAFETY: exclusive hold per the contract; `next`, once non-null,
        // is a fully published node.
        unsafe {
            let next = (*tail).next.load(Ordering::Acquire);
            if next.is_null() {
                // Nothing published; hand the tail back for the next consumer.
                self.deq.tail.swap(tail, Ordering::AcqRel);
                return Err(QueueError::Empty);
            }
            let value = (*next).value.assume_init_read();
            self.deq.tail.store(next, Ordering::Release);
            self.free_push(tail);
            Ok(value)
        }
    }

    /// Obtain a node for `value`: recycle from the freelist, or allocate.
    fn acquire_node(&self, value: T) -> *mut Node<T> {
        match self.free_pop() {
            Some(node) => {
                // SAFETY: a node popped off the freelist is exclusively
                // ours and its value slot holds no live payload.
                unsafe {
                    (*node).value.write(value);
                    (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
                }
                node
            }
            None => Node::boxed(MaybeUninit::new(value)),
        }
    }

    /// Park a retired node on the freelist.
    ///
    /// Mirrors the multi-producer push: clear the link, swap in as freelist
    /// head, publish from the previous head. Callers own `node` exclusively
    /// (it is the tail they just won, or the drop path).
    fn free_push(&self, node: *mut Node<T>) {
        // SAFETY: exclusive ownership of `node` per the above.
        unsafe {
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let prev = self.deq.free_head.swap(node, Ordering::AcqRel);
        // SAFETY: winning the swap makes this thread the only one linking
        // `prev`, and freelist nodes live as long as the queue.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
    }

    /// Try to take a recycled node off the freelist.
    fn free_pop(&self) -> Option<*mut Node<T>> {
        let mut node = self.enq.free_tail.load(Ordering::Relaxed);
        loop {
            // SAFETY: freelist nodes are never freed while the queue is live.
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            if next.is_null() {
                return None;
            }
            match self.enq.free_tail.compare_exchange(
                node,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(node),
                Err(current) => node = current,
            }
        }
    }
}

impl<T: Send> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> fmt::Debug for LinkedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // No len/is_empty: the queue keeps no size state and the tail may be
        // held by a consumer at any instant.
        f.debug_struct("LinkedQueue").finish_non_exhaustive()
    }
}

impl<T: Send> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out every concurrent operation, so the
        // single-consumer drain is exclusive and each raw free below touches
        // a node exactly once: the drained payload nodes land on the
        // freelist, the last main-list sentinel is freed directly, then the
        // freelist is drained down to its own final sentinel.
        unsafe {
            while self.pop_single().is_ok() {}
            drop(Box::from_raw(self.deq.tail.load(Ordering::Relaxed)));
            while let Some(node) = self.free_pop() {
                drop(Box::from_raw(node));
            }
            drop(Box::from_raw(self.enq.free_tail.load(Ordering::Relaxed)));
        }
    }
}

/// Create a linked queue and return its producer/consumer handle pair.
///
/// Both handles are cheap `Arc`-backed clones; clone as many of each as the
/// workload needs.
///
/// # Examples
///
/// ```rust
/// use brigade::{
///     linked,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// let (producer, consumer) = linked::queue::<u32>();
/// producer.push(5);
/// assert_eq!(consumer.pop(), Ok(5));
/// ```
pub fn queue<T: Send>() -> (Producer<T>, Consumer<T>) {
    Arc::new(LinkedQueue::new()).channel()
}

/// Producer handle for a [`LinkedQueue`].
///
/// Cloneable; every clone shares the same queue and is safe to use from any
/// thread concurrently with all other handles.
pub struct Producer<T: Send> {
    queue: Arc<LinkedQueue<T>>,
}

impl<T: Send> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T: Send> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

impl<T: Send> QueueProducer<T> for Producer<T> {
    fn push(&self, value: T) {
        self.queue.push(value);
    }
}

/// Consumer handle for a [`LinkedQueue`].
///
/// Cloneable; every clone shares the same queue. Concurrent consumers
/// serialize on the queue tail, with [`pop`](QueueConsumer::pop) waiting
/// out the holder and [`try_pop`](QueueConsumer::try_pop) surrendering.
pub struct Consumer<T: Send> {
    queue: Arc<LinkedQueue<T>>,
}

impl<T: Send> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T: Send> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").finish_non_exhaustive()
    }
}

impl<T: Send> QueueConsumer<T> for Consumer<T> {
    fn pop(&self) -> Result<T, QueueError> {
        self.queue.pop()
    }

    fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.try_pop()
    }
}

impl<T: Send> QueueFactory<T> for Arc<LinkedQueue<T>> {
    type Producer = Producer<T>;
    type Consumer = Consumer<T>;

    fn producer(&self) -> Self::Producer {
        Producer {
            queue: self.clone(),
        }
    }

    fn consumer(&self) -> Self::Consumer {
        Consumer {
            queue: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_threaded_round_trip() {
        let queue = LinkedQueue::new();
        unsafe {
            queue.push_single(1);
            queue.push_single(2);
            queue.push_single(3);
            assert_eq!(queue.pop_single(), Ok(1));
            assert_eq!(queue.pop_single(), Ok(2));
            assert_eq!(queue.pop_single(), Ok(3));
            assert_eq!(queue.pop_single(), Err(QueueError::Empty));
        }
    }

    #[test]
    fn mixed_modes_interoperate() {
        let queue = LinkedQueue::new();
        queue.push(10);
        unsafe { queue.push_single(20) };
        assert_eq!(queue.pop(), Ok(10));
        assert_eq!(queue.try_pop(), Ok(20));
        assert_eq!(queue.pop(), Err(QueueError::Empty));
    }

    #[test]
    fn try_pop_on_idle_empty_queue_reports_empty() {
        // With no competing consumer the tail swap succeeds and the queue
        // is seen to be genuinely drained; the tail must have been handed
        // back for the second attempt to see the same.
        let queue: LinkedQueue<u8> = LinkedQueue::new();
        assert_eq!(queue.try_pop(), Err(QueueError::Empty));
        assert_eq!(queue.try_pop(), Err(QueueError::Empty));
    }

    #[test]
    fn handles_share_one_queue() {
        let (producer, consumer) = queue::<String>();
        producer.push("a".to_string());
        producer.clone().push("b".to_string());
        assert_eq!(consumer.pop().unwrap(), "a");
        assert_eq!(consumer.clone().pop().unwrap(), "b");
        assert!(consumer.try_pop().is_err());
    }

    #[test]
    fn spsc_stress_preserves_order() {
        const COUNT: u32 = 1_000_000;

        let queue = Arc::new(LinkedQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..COUNT {
                    // SAFETY: this is the only producer thread.
                    unsafe { queue.push_single(i) };
                }
            })
        };

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut expected = 0;
                while expected < COUNT {
                    // SAFETY: this is the only consumer thread.
                    match unsafe { queue.pop_single() } {
                        Ok(value) => {
                            assert_eq!(value, expected);
                            expected += 1;
                        }
                        Err(_) => thread::yield_now(),
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(queue.try_pop(), Err(QueueError::Empty));
    }

    #[test]
    fn light_dequeue_never_deadlocks_on_empty() {
        const ATTEMPTS: usize = 10_000;

        let queue: Arc<LinkedQueue<u64>> = Arc::new(LinkedQueue::new());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut failures = 0usize;
                    for _ in 0..ATTEMPTS {
                        if queue.try_pop().is_err() {
                            failures += 1;
                        }
                    }
                    failures
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap() > 0);
        }
    }

    #[test]
    fn drop_releases_every_payload() {
        use std::sync::atomic::AtomicUsize;

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;

        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let queue = LinkedQueue::new();
        for _ in 0..100 {
            queue.push(Tracked);
        }
        for _ in 0..50 {
            drop(queue.pop().unwrap());
        }
        assert_eq!(DROPS.load(Ordering::Relaxed), 50);

        drop(queue);
        assert_eq!(DROPS.load(Ordering::Relaxed), 100);
    }

    mod mpmc {
        use super::*;
        use std::{
            collections::HashSet,
            sync::atomic::AtomicUsize,
        };
        use tokio::task;

        /// Multi-producer / multi-consumer conservation: every value in,
        /// exactly once out.
        #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
        async fn mpmc_stress_conserves_values() {
            let producers = 4usize;
            let consumers = 4usize;
            let items_per_producer = 250_000usize;

            let total = producers * items_per_producer;

            let (producer, consumer) = queue::<u64>();

            let seen = Arc::new(tokio::sync::Mutex::new(HashSet::<u64>::with_capacity(
                total,
            )));
            let consumed = Arc::new(AtomicUsize::new(0));

            let mut consumer_handles = Vec::with_capacity(consumers);
            for _ in 0..consumers {
                let consumer = consumer.clone();
                let seen = seen.clone();
                let consumed = consumed.clone();
                let h = task::spawn(async move {
                    loop {
                        if consumed.load(Ordering::SeqCst) >= total {
                            break;
                        }
                        match consumer.try_pop() {
                            Ok(value) => {
                                let inserted = seen.lock().await.insert(value);
                                assert!(inserted, "duplicate value observed: {value}");
                                consumed.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(QueueError::Empty) => {
                                task::yield_now().await;
                            }
                            Err(e) => panic!("unexpected queue error in consumer: {e:?}"),
                        }
                    }
                });
                consumer_handles.push(h);
            }

            let mut producer_handles = Vec::with_capacity(producers);
            for pid in 0..producers {
                let producer = producer.clone();
                let h = task::spawn(async move {
                    for i in 0..items_per_producer {
                        let value = ((pid as u64) << 32) | (i as u64);
                        producer.push(value);
                    }
                });
                producer_handles.push(h);
            }

            for h in producer_handles {
                h.await.expect("producer join");
            }
            for h in consumer_handles {
                h.await.expect("consumer join");
            }

            let seen_len = { seen.lock().await.len() };
            assert_eq!(seen_len, total, "expected all items consumed once");
        }

        /// Per-producer order: a consumer never sees one producer's values
        /// out of submission order.
        #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
        async fn producers_stay_in_program_order() {
            let producers = 4usize;
            let items_per_producer = 100_000usize;
            let total = producers * items_per_producer;

            let (producer, consumer) = queue::<u64>();

            let collector = task::spawn(async move {
                let mut last_seen = vec![None::<u64>; 8];
                let mut remaining = total;
                while remaining > 0 {
                    match consumer.try_pop() {
                        Ok(value) => {
                            let pid = (value >> 32) as usize;
                            let seq = value & 0xFFFF_FFFF;
                            if let Some(prev) = last_seen[pid] {
                                assert!(seq > prev, "producer {pid} reordered: {prev} then {seq}");
                            }
                            last_seen[pid] = Some(seq);
                            remaining -= 1;
                        }
                        Err(_) => task::yield_now().await,
                    }
                }
            });

            let mut handles = Vec::new();
            for pid in 0..producers {
                let producer = producer.clone();
                handles.push(task::spawn(async move {
                    for i in 0..items_per_producer {
                        producer.push(((pid as u64) << 32) | (i as u64));
                    }
                }));
            }

            for h in handles {
                h.await.unwrap();
            }
            collector.await.unwrap();
        }
    }
}
