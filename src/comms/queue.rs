//! Fixed-capacity FIFO with occupancy tracking and a programmable high-water signal.
//!
//! `BoundedQueue` stores up to `C` records in an array indexed modulo `C`. It is owned by a single
//! step engine, so every mutation goes through `&mut self`; `step` applies one producer push and
//! one consumer pop as a single synchronous update, judging both against the state at the start
//! of the step.
//!
//! # Sizing
//!
//! A producer that sees `high_water()` may still be committed to `max_burst` more words. Choosing
//! the threshold as `C - max_burst` (see `with_max_burst`) keeps such a producer from ever finding
//! the queue full.
use tracing::error;

use crate::comms::{QueueStats, Record};
use crate::MuxError;

#[derive(Debug)]
pub struct BoundedQueue<const C: usize, T> {
    slots: [Option<Record<T>>; C],
    /// Index of the oldest stored record
    head: usize,
    occupancy: usize,
    threshold: usize,
    stats: QueueStats,
}

impl<const C: usize, T> BoundedQueue<C, T> {
    /// Creates an empty queue whose high-water signal asserts above `threshold` records.
    pub fn new(threshold: usize) -> Result<Self, MuxError> {
        if C == 0 {
            return Err(MuxError::ZeroCapacity);
        }
        if threshold >= C {
            return Err(MuxError::ThresholdTooHigh {
                threshold,
                capacity: C,
            });
        }
        Ok(Self {
            slots: array_init::array_init(|_| None),
            head: 0,
            occupancy: 0,
            threshold,
            stats: QueueStats::default(),
        })
    }

    /// Creates an empty queue sized for producers that may deliver `max_burst` more records after
    /// first observing high-water.
    pub fn with_max_burst(max_burst: usize) -> Result<Self, MuxError> {
        if C == 0 {
            return Err(MuxError::ZeroCapacity);
        }
        if max_burst == 0 || max_burst > C {
            return Err(MuxError::BurstExceedsCapacity {
                max_burst,
                capacity: C,
            });
        }
        Self::new(C - max_burst)
    }

    /// Admits `record` at the tail. Pushing into a full queue is an overflow: it is logged,
    /// counted, and handed back as an error.
    pub fn push(&mut self, record: Record<T>) -> Result<(), MuxError> {
        if self.is_full() {
            return Err(self.overflow());
        }
        self.admit(record);
        Ok(())
    }

    /// Removes and returns the head record.
    pub fn pop(&mut self) -> Result<Record<T>, MuxError> {
        if self.is_empty() {
            return Err(MuxError::Empty);
        }
        Ok(self.release())
    }

    /// Applies at most one push and at most one pop as one logical step.
    ///
    /// Both preconditions are checked against the occupancy at the start of the step, so a push
    /// into a full queue fails even when the same step pops. On error nothing is applied.
    pub fn step(
        &mut self,
        push: Option<Record<T>>,
        pop: bool,
    ) -> Result<Option<Record<T>>, MuxError> {
        if pop && self.is_empty() {
            return Err(MuxError::Empty);
        }
        if push.is_some() && self.is_full() {
            return Err(self.overflow());
        }
        let popped = pop.then(|| self.release());
        if let Some(record) = push {
            self.admit(record);
        }
        Ok(popped)
    }

    /// Discards every stored record and returns how many were dropped.
    pub fn reset(&mut self) -> usize {
        let discarded = self.occupancy;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.occupancy = 0;
        discarded
    }

    /// True when all `C` slots are occupied.
    pub fn is_full(&self) -> bool {
        self.occupancy == C
    }

    /// True when no record is stored.
    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// Ingress `ready`: the queue can accept a word this step.
    pub fn ready(&self) -> bool {
        !self.is_full()
    }

    /// Number of records currently stored.
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// True iff occupancy is above the configured threshold.
    pub fn high_water(&self) -> bool {
        self.occupancy > self.threshold
    }

    /// Occupancy above which `high_water` asserts.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Fixed capacity `C`.
    pub fn capacity(&self) -> usize {
        C
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub(crate) fn note_refused(&mut self) {
        self.stats.refused += 1;
    }

    fn admit(&mut self, record: Record<T>) {
        let tail = (self.head + self.occupancy) % C;
        debug_assert!(self.slots[tail].is_none(), "tail slot still holds a record");
        self.slots[tail] = Some(record);
        self.occupancy += 1;
        self.stats.pushed += 1;
        self.stats.peak = self.stats.peak.max(self.occupancy);
    }

    fn release(&mut self) -> Record<T> {
        let record = match self.slots[self.head].take() {
            Some(record) => record,
            None => panic!("BoundedQueue head slot empty with occupancy {}", self.occupancy),
        };
        self.head = (self.head + 1) % C;
        self.occupancy -= 1;
        self.stats.popped += 1;
        record
    }

    fn overflow(&mut self) -> MuxError {
        self.stats.overflows += 1;
        error!(
            capacity = C,
            threshold = self.threshold,
            overflows = self.stats.overflows,
            "push into full queue, threshold undersized or producer ignored backpressure"
        );
        MuxError::Overflow { capacity: C }
    }
}
