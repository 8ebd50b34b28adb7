//! Lock-free bounded queue for one producer thread and one arbiter thread.
//!
//! `SharedQueue` is a fixed-size ring of atomic slot pointers. Head and tail are free-running
//! counters, so occupancy is `tail - head` and all `C` slots are usable. The queue is only ever
//! reached through its two handles: `Ingress`, owned by the producer, and `Drain`, owned by the
//! arbiter. Neither handle is `Clone`, which keeps each side single-threaded.
use std::ops::Deref;
use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::thread::yield_now;

use bytemuck::Pod;
use tracing::error;

use crate::comms::{QueueStats, Record};
use crate::MuxError;

#[derive(Debug)]
pub struct SharedQueue<const C: usize, T> {
    /// Each slot holds either null or one boxed record.
    buffers: [AtomicPtr<Record<T>>; C],
    /// Consumer position, only advanced by the `Drain`
    head: AtomicUsize,
    /// Producer position, only advanced by the `Ingress`
    tail: AtomicUsize,
    threshold: usize,
    /// Set once the `Ingress` is dropped.
    closed: AtomicBool,
    pushed: AtomicU64,
    popped: AtomicU64,
    overflows: AtomicU64,
    refused: AtomicU64,
    peak: AtomicUsize,
}

impl<const C: usize, T> SharedQueue<C, T> {
    /// Creates an empty queue whose high-water signal asserts above `threshold` records.
    pub fn new(threshold: usize) -> Result<Arc<Self>, MuxError> {
        if C == 0 {
            return Err(MuxError::ZeroCapacity);
        }
        if threshold >= C {
            return Err(MuxError::ThresholdTooHigh {
                threshold,
                capacity: C,
            });
        }
        let buffers = array_init::array_init(|_| AtomicPtr::new(ptr::null_mut()));
        Ok(Arc::new(Self {
            buffers,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            threshold,
            closed: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            peak: AtomicUsize::new(0),
        }))
    }

    /// Number of published records not yet taken by the `Drain`.
    pub fn occupancy(&self) -> usize {
        let head = self.head.load(Acquire);
        let tail = self.tail.load(Acquire);
        tail.wrapping_sub(head).min(C)
    }

    /// True when no published record is waiting.
    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    /// True when all `C` slots are occupied.
    pub fn is_full(&self) -> bool {
        self.occupancy() == C
    }

    /// Ingress `ready`: a push would be admitted.
    pub fn ready(&self) -> bool {
        !self.is_full()
    }

    /// True iff occupancy is above the configured threshold.
    pub fn high_water(&self) -> bool {
        self.occupancy() > self.threshold
    }

    /// Occupancy above which `high_water` asserts.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Fixed capacity `C`.
    pub fn capacity(&self) -> usize {
        C
    }

    /// Whether the producer side has hung up.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Relaxed),
            popped: self.popped.load(Relaxed),
            overflows: self.overflows.load(Relaxed),
            refused: self.refused.load(Relaxed),
            peak: self.peak.load(Relaxed),
        }
    }

    /// Producer side. Must only be called from the single `Ingress`.
    fn write(&self, record: Record<T>) -> Result<(), MuxError> {
        let tail = self.tail.load(Relaxed);
        let head = self.head.load(Acquire);

        if tail.wrapping_sub(head) >= C {
            let overflows = self.overflows.fetch_add(1, Relaxed) + 1;
            error!(
                capacity = C,
                threshold = self.threshold,
                overflows,
                "push into full shared queue, threshold undersized or producer ignored backpressure"
            );
            return Err(MuxError::Overflow { capacity: C });
        }

        // The slot must be null, as the consumer nulls every slot it releases.
        let new_ptr = Box::into_raw(Box::new(record));
        let old_ptr = self.buffers[tail % C].swap(new_ptr, Release);
        assert!(
            old_ptr.is_null(),
            "SharedQueue write overwrote an unread record, indicates a bug."
        );

        let next = tail.wrapping_add(1);
        self.tail.store(next, Release);
        self.pushed.fetch_add(1, Relaxed);
        self.peak.fetch_max(next.wrapping_sub(head).min(C), Relaxed);
        Ok(())
    }

    /// Consumer side. Must only be called from the single `Drain`.
    fn read(&self) -> Result<Record<T>, MuxError> {
        let head = self.head.load(Relaxed);
        if head == self.tail.load(Acquire) {
            return Err(MuxError::Empty);
        }

        let data_ptr = self.buffers[head % C].swap(ptr::null_mut(), Acquire);
        // The tail store is Release after the slot swap, so a published slot is never null.
        if data_ptr.is_null() {
            return Err(MuxError::Empty);
        }
        let record = unsafe { *Box::from_raw(data_ptr) };

        self.head.store(head.wrapping_add(1), Release);
        self.popped.fetch_add(1, Relaxed);
        Ok(record)
    }
}

impl<const C: usize, T> Drop for SharedQueue<C, T> {
    fn drop(&mut self) {
        for slot in self.buffers.iter_mut() {
            let ptr = *slot.get_mut();
            if !ptr.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    }
}

// SAFETY: records move between exactly two threads through owned boxes, so `T: Send` suffices.
unsafe impl<const C: usize, T: Send> Send for SharedQueue<C, T> {}
unsafe impl<const C: usize, T: Send> Sync for SharedQueue<C, T> {}

/// Builds a queue and returns its producer and arbiter handles.
pub fn channel<const C: usize, T: Pod>(
    threshold: usize,
    width: usize,
) -> Result<(Ingress<C, T>, Drain<C, T>), MuxError> {
    let queue = SharedQueue::new(threshold)?;
    Ok((Ingress::new(Arc::clone(&queue), width)?, Drain::new(queue)))
}

/// Producer handle of a `SharedQueue`.
#[derive(Debug)]
pub struct Ingress<const C: usize, T> {
    queue: Arc<SharedQueue<C, T>>,
    width: usize,
}

impl<const C: usize, T: Pod> Ingress<C, T> {
    /// Wraps the producer side of `queue`, accepting words of at most `width` bits.
    pub(crate) fn new(queue: Arc<SharedQueue<C, T>>, width: usize) -> Result<Self, MuxError> {
        if width == 0 || width > Record::<T>::MAX_WIDTH {
            return Err(MuxError::WordWidth {
                width,
                max: Record::<T>::MAX_WIDTH,
            });
        }
        Ok(Self { queue, width })
    }

    /// Offers one word. A full queue is an overflow: the word is dropped, and the error is logged
    /// and counted.
    pub fn try_push(&self, record: Record<T>) -> Result<(), MuxError> {
        if !record.fits(self.width) {
            return Err(MuxError::WordTooWide { width: self.width });
        }
        self.queue.write(record)
    }

    /// Waits for `ready` and then pushes, yielding the thread while the queue is full. A word that
    /// had to wait adds one to `QueueStats::refused`.
    pub fn push_spin(&self, record: Record<T>) -> Result<(), MuxError> {
        let mut waited = false;
        while !self.queue.ready() {
            waited = true;
            yield_now();
        }
        if waited {
            self.queue.refused.fetch_add(1, Relaxed);
        }
        self.try_push(record)
    }

    /// Configured word width in bits.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl<const C: usize, T> Deref for Ingress<C, T> {
    type Target = SharedQueue<C, T>;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl<const C: usize, T> Drop for Ingress<C, T> {
    fn drop(&mut self) {
        self.queue.closed.store(true, Release);
    }
}

/// Arbiter handle of a `SharedQueue`.
#[derive(Debug)]
pub struct Drain<const C: usize, T> {
    queue: Arc<SharedQueue<C, T>>,
}

impl<const C: usize, T> Drain<C, T> {
    pub(crate) fn new(queue: Arc<SharedQueue<C, T>>) -> Self {
        Self { queue }
    }

    /// Removes and returns the head record.
    pub fn pop(&mut self) -> Result<Record<T>, MuxError> {
        self.queue.read()
    }

    /// Discards every record currently visible and returns how many were dropped. Words the
    /// producer publishes afterwards are kept.
    pub fn reset(&mut self) -> usize {
        let mut discarded = 0;
        while self.queue.read().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// True once the producer has hung up and every word it sent has been taken.
    pub fn is_finished(&self) -> bool {
        self.queue.is_closed() && self.queue.is_empty()
    }
}

impl<const C: usize, T> Deref for Drain<C, T> {
    type Target = SharedQueue<C, T>;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

#[cfg(test)]
mod spsc_tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sequential_write_read() {
        let (tx, mut rx) = channel::<3, i32>(2, 32).unwrap();

        // reading from an empty queue should complain
        assert_eq!(rx.pop().unwrap_err(), MuxError::Empty);

        tx.try_push(Record::word(42)).expect("first write okay");
        tx.try_push(Record::last(1337)).expect("second write okay");
        assert_eq!(tx.occupancy(), 2);

        // read them back in order
        assert_eq!(rx.pop().unwrap(), Record::word(42));
        assert_eq!(rx.pop().unwrap(), Record::last(1337));

        // and now it's empty again
        assert_eq!(rx.pop().unwrap_err(), MuxError::Empty);
        assert_eq!(rx.occupancy(), 0);
    }

    #[test]
    fn capacity_full_and_recover() {
        // every one of the C slots is usable
        let (tx, mut rx) = channel::<3, u8>(1, 8).unwrap();

        assert!(tx.try_push(Record::word(10)).is_ok());
        assert!(!tx.high_water());
        assert!(tx.try_push(Record::word(20)).is_ok());
        assert!(tx.high_water());
        assert!(tx.try_push(Record::word(30)).is_ok());
        assert!(tx.is_full());

        let e = tx.try_push(Record::word(40)).unwrap_err();
        assert_eq!(e, MuxError::Overflow { capacity: 3 });
        assert_eq!(tx.stats().overflows, 1);

        assert_eq!(rx.pop().unwrap().payload, 10);
        tx.try_push(Record::last(40)).expect("recovered after read");

        assert_eq!(rx.pop().unwrap().payload, 20);
        assert_eq!(rx.pop().unwrap().payload, 30);
        assert_eq!(rx.pop().unwrap(), Record::last(40));
        assert_eq!(rx.pop().unwrap_err(), MuxError::Empty);

        let stats = rx.stats();
        assert_eq!(stats.pushed, 4);
        assert_eq!(stats.popped, 4);
        assert_eq!(stats.peak, 3);
    }

    #[test]
    fn rejects_wide_words_and_bad_shapes() {
        let (tx, _rx) = channel::<4, u16>(2, 12).unwrap();
        assert_eq!(tx.width(), 12);
        assert_eq!(
            tx.try_push(Record::word(0xffff)).unwrap_err(),
            MuxError::WordTooWide { width: 12 }
        );
        assert!(tx.try_push(Record::word(0x0fff)).is_ok());

        assert_eq!(
            channel::<4, u16>(2, 17).unwrap_err(),
            MuxError::WordWidth { width: 17, max: 16 }
        );
        assert_eq!(
            channel::<4, u16>(4, 16).unwrap_err(),
            MuxError::ThresholdTooHigh {
                threshold: 4,
                capacity: 4
            }
        );
        assert_eq!(
            channel::<0, u16>(0, 16).unwrap_err(),
            MuxError::ZeroCapacity
        );
    }

    #[test]
    fn reset_and_hangup() {
        let (tx, mut rx) = channel::<4, u8>(2, 8).unwrap();
        tx.try_push(Record::word(1)).unwrap();
        tx.try_push(Record::word(2)).unwrap();
        assert_eq!(rx.reset(), 2);
        assert!(rx.is_empty());

        tx.try_push(Record::last(3)).unwrap();
        assert!(!rx.is_finished());
        drop(tx);
        assert!(rx.is_closed());
        assert!(!rx.is_finished());
        assert_eq!(rx.pop().unwrap(), Record::last(3));
        assert!(rx.is_finished());
    }

    #[test]
    fn dropping_a_loaded_queue_frees_records() {
        let queue = SharedQueue::<4, Vec<u8>>::new(1).unwrap();
        queue.write(Record::word(vec![1, 2, 3])).unwrap();
        queue.write(Record::last(vec![4])).unwrap();
        assert_eq!(Arc::strong_count(&queue), 1);
        drop(queue);
    }

    #[test]
    fn waiting_push_counts_one_refusal_per_word() {
        let (tx, mut rx) = channel::<1, u8>(0, 8).unwrap();
        tx.push_spin(Record::word(1)).unwrap();
        assert_eq!(tx.stats().refused, 0);

        let writer = thread::spawn(move || {
            tx.push_spin(Record::last(2)).unwrap();
            tx.stats()
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.pop().unwrap(), Record::word(1));

        let stats = writer.join().unwrap();
        assert_eq!(stats.refused, 1);
        assert_eq!(stats.overflows, 0);
        assert_eq!(rx.pop().unwrap(), Record::last(2));
    }

    #[test]
    fn spsc_concurrent_spinning() {
        // tiny queue of size 1; writer must spin until reader catches up
        let (tx, mut rx) = channel::<1, u32>(0, 32).unwrap();

        let writer = thread::spawn(move || {
            for i in 0..100 {
                tx.push_spin(Record::new(i, i % 10 == 9)).unwrap();
            }
        });

        let reader = thread::spawn(move || {
            for expected in 0..100 {
                // spin on empty
                loop {
                    match rx.pop() {
                        Ok(v) => {
                            assert_eq!(v, Record::new(expected, expected % 10 == 9));
                            break;
                        }
                        Err(MuxError::Empty) => continue,
                        Err(e) => panic!("unexpected read error: {e:?}"),
                    }
                }
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn spsc_concurrent_large_queue() {
        const CAPACITY: usize = 1024;
        const NUM_WORDS: u64 = 100_000;

        let (tx, mut rx) = channel::<CAPACITY, u64>(CAPACITY - 64, 64).unwrap();

        let writer = thread::spawn(move || {
            for i in 0..NUM_WORDS {
                loop {
                    match tx.try_push(Record::word(i)) {
                        Ok(_) => break,
                        Err(MuxError::Overflow { .. }) => thread::sleep(Duration::from_nanos(2)),
                        Err(e) => panic!("unexpected write error: {e:?}"),
                    }
                }
            }
        });

        let reader = thread::spawn(move || {
            for expected in 0..NUM_WORDS {
                loop {
                    match rx.pop() {
                        Ok(v) => {
                            assert_eq!(
                                v.payload, expected,
                                "Data integrity check failed at word {expected}"
                            );
                            break;
                        }
                        Err(MuxError::Empty) => thread::sleep(Duration::from_nanos(2)),
                        Err(e) => panic!("unexpected read error: {e:?}"),
                    }
                }
            }
            assert!(rx.occupancy() <= CAPACITY);
        });

        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn spsc_concurrent_alternating_write_read() {
        const ITERATIONS: u32 = 1000;

        let (tx, mut rx) = channel::<4, u32>(2, 32).unwrap();

        let writer = thread::spawn(move || {
            for i in 0..ITERATIONS {
                tx.push_spin(Record::word(i)).unwrap();
                // lil randomness
                if i % 50 == 0 {
                    thread::sleep(Duration::from_nanos(1));
                }
            }
            tx.stats()
        });

        let reader = thread::spawn(move || {
            for expected in 0..ITERATIONS {
                loop {
                    match rx.pop() {
                        Ok(v) => {
                            assert_eq!(
                                v.payload, expected,
                                "Alternating check: expected {expected}, got {}",
                                v.payload
                            );
                            break;
                        }
                        Err(MuxError::Empty) => thread::yield_now(),
                        Err(e) => panic!("unexpected read error: {e:?}"),
                    }
                }
                if expected % 75 == 0 {
                    thread::sleep(Duration::from_nanos(1));
                }
            }
        });

        let stats = writer.join().unwrap();
        reader.join().unwrap();
        // push_spin waits on ready, so it never overflows
        assert_eq!(stats.overflows, 0);
        assert_eq!(stats.pushed, ITERATIONS as u64);
    }
}
