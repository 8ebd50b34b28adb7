//! Discrete-step packet arbiter over owned queues.
//!
//! `PacketArbiter` owns one `BoundedQueue` per source and a `RoundRobin`. Each call to `step` is
//! one clock edge: the ingress `ready` signals, queue occupancy and the consumer's readiness are
//! sampled first, the arbitration decision is made from that snapshot, and only then are the
//! arbiter's pop and every producer push committed together. A word pushed in a step is therefore
//! never delivered in the same step.
use bytemuck::Pod;
use tracing::{info, trace};

use crate::comms::{queue::BoundedQueue, QueueStats, Record};
use crate::config::ArbiterConfig;
use crate::scheduling::{Decision, Owner, RoundRobin};
use crate::MuxError;

/// One word on the egress channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Egress<T> {
    pub source: usize,
    pub record: Record<T>,
}

/// Everything that crossed a handshake in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<const N: usize, T> {
    /// The word handed to the consumer, if any.
    pub egress: Option<Egress<T>>,
    /// Offered words that were not admitted because their queue was full. The producer still
    /// owns them and must offer them again.
    pub refused: [Option<Record<T>>; N],
    pub decision: Decision,
}

impl<const N: usize, T> Step<N, T> {
    /// True unless `source` offered a word that was refused.
    pub fn accepted(&self, source: usize) -> bool {
        self.refused.get(source).is_some_and(Option::is_none)
    }
}

#[derive(Debug)]
pub struct PacketArbiter<const N: usize, const C: usize, T> {
    queues: [BoundedQueue<C, T>; N],
    rr: RoundRobin<N>,
    width: usize,
    cycle: u64,
}

impl<const N: usize, const C: usize, T: Pod> PacketArbiter<N, C, T> {
    /// Builds `N` empty queues from a validated `config`.
    pub fn new(config: &ArbiterConfig) -> Result<Self, MuxError> {
        let threshold = config.validate::<T, N, C>()?;
        let queues = array_init::try_array_init(|_| BoundedQueue::new(threshold))?;
        Ok(Self {
            queues,
            rr: RoundRobin::new(),
            width: config.word_width,
            cycle: 0,
        })
    }

    /// Advances one logical step.
    ///
    /// `ingress[i]` is the word source `i` offers this step (its `valid`), and `consumer_ready` is
    /// the egress `ready`. Words wider than the configured width are rejected before anything is
    /// applied.
    pub fn step(
        &mut self,
        ingress: [Option<Record<T>>; N],
        consumer_ready: bool,
    ) -> Result<Step<N, T>, MuxError> {
        if ingress.iter().flatten().any(|word| !word.fits(self.width)) {
            return Err(MuxError::WordTooWide { width: self.width });
        }

        // sample
        let occupied: [bool; N] = std::array::from_fn(|i| !self.queues[i].is_empty());
        let ready: [bool; N] = std::array::from_fn(|i| self.queues[i].ready());
        let decision = self.rr.decide(&occupied, consumer_ready);

        // commit
        let mut refused: [Option<Record<T>>; N] = [None; N];
        let mut egress = None;
        for (i, offered) in ingress.into_iter().enumerate() {
            let push = match offered {
                Some(word) if !ready[i] => {
                    self.queues[i].note_refused();
                    refused[i] = Some(word);
                    None
                }
                other => other,
            };
            let pop = decision == Decision::Deliver(i);
            match self.queues[i].step(push, pop) {
                Ok(Some(record)) => egress = Some(Egress { source: i, record }),
                Ok(None) => {}
                Err(MuxError::Empty) => {
                    panic!("arbiter popped empty queue {i} while it owned it")
                }
                Err(err) => return Err(err),
            }
        }

        let last = egress.as_ref().is_some_and(|e| e.record.last);
        self.rr.commit(decision, last);
        if let Some(e) = &egress {
            trace!(cycle = self.cycle, source = e.source, last, "delivered word");
        }
        self.cycle += 1;

        Ok(Step {
            egress,
            refused,
            decision,
        })
    }

    /// Advances one step with no producer offering a word.
    pub fn tick(&mut self, consumer_ready: bool) -> Result<Step<N, T>, MuxError> {
        self.step([None; N], consumer_ready)
    }

    /// Pushes a word straight into a queue, outside the step handshake. A full queue is an
    /// overflow.
    pub fn push(&mut self, source: usize, record: Record<T>) -> Result<(), MuxError> {
        if !record.fits(self.width) {
            return Err(MuxError::WordTooWide { width: self.width });
        }
        self.queues
            .get_mut(source)
            .ok_or(MuxError::InvalidSource(source))?
            .push(record)
    }

    /// Clears every queue and returns the arbiter to idle with the pointer at 0. Any record in
    /// progress is abandoned; returns the number of queued words discarded.
    pub fn reset(&mut self) -> usize {
        let owner = self.rr.owner();
        let discarded: usize = self.queues.iter_mut().map(BoundedQueue::reset).sum();
        self.rr.reset();
        info!(?owner, discarded, cycle = self.cycle, "arbiter reset");
        discarded
    }
}

impl<const N: usize, const C: usize, T> PacketArbiter<N, C, T> {
    /// Ingress `ready` of `source` for the next step.
    pub fn ready(&self, source: usize) -> bool {
        self.queues.get(source).is_some_and(BoundedQueue::ready)
    }

    /// Occupancy of `source`'s queue, 0 for an unknown source.
    pub fn occupancy(&self, source: usize) -> usize {
        self.queues.get(source).map_or(0, BoundedQueue::occupancy)
    }

    /// High-water signal of `source`'s queue.
    pub fn high_water(&self, source: usize) -> bool {
        self.queues.get(source).is_some_and(BoundedQueue::high_water)
    }

    /// Counters of `source`'s queue.
    pub fn stats(&self, source: usize) -> Option<QueueStats> {
        self.queues.get(source).map(BoundedQueue::stats)
    }

    /// Read-only view of `source`'s queue.
    pub fn queue(&self, source: usize) -> Option<&BoundedQueue<C, T>> {
        self.queues.get(source)
    }

    /// Source currently holding the output, if any.
    pub fn owner(&self) -> Owner {
        self.rr.owner()
    }

    /// Source the next idle scan starts from.
    pub fn pointer(&self) -> usize {
        self.rr.pointer()
    }

    /// Steps taken since construction.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// True when every queue is empty and no record is open.
    pub fn is_idle(&self) -> bool {
        self.rr.owner() == Owner::Idle && self.queues.iter().all(BoundedQueue::is_empty)
    }
}
