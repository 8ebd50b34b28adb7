//! Arbiter task for producers running on their own threads.
//!
//! Each source gets a `SharedQueue`; its `Ingress` goes to the producer thread and its `Drain`
//! stays here. `poll` runs one arbitration step against whatever the producers have published so
//! far, and `run` keeps polling until every producer has hung up and its queue is drained.
use std::sync::Arc;
use std::thread::yield_now;

use bytemuck::Pod;
use tracing::{debug, info};

use crate::comms::spsc::{Drain, Ingress, SharedQueue};
use crate::comms::{QueueStats, Record};
use crate::config::ArbiterConfig;
use crate::scheduling::{Owner, RoundRobin};
use crate::MuxError;

#[derive(Debug)]
pub struct ThreadedArbiter<const N: usize, const C: usize, T> {
    drains: [Drain<C, T>; N],
    ingress: [Option<Ingress<C, T>>; N],
    rr: RoundRobin<N>,
    forwarded: u64,
}

impl<const N: usize, const C: usize, T: Pod> ThreadedArbiter<N, C, T> {
    /// Builds one shared queue per source from a validated `config`. All ingress handles start out
    /// held by the arbiter until taken.
    pub fn new(config: &ArbiterConfig) -> Result<Self, MuxError> {
        let threshold = config.validate::<T, N, C>()?;
        let queues: [Arc<SharedQueue<C, T>>; N] =
            array_init::try_array_init(|_| SharedQueue::new(threshold))?;
        let ingress = array_init::try_array_init(|i| {
            Ingress::new(Arc::clone(&queues[i]), config.word_width).map(Some)
        })?;
        let drains = array_init::array_init(|i| Drain::new(Arc::clone(&queues[i])));
        Ok(Self {
            drains,
            ingress,
            rr: RoundRobin::new(),
            forwarded: 0,
        })
    }

    /// Hands out the producer handle of `source`. Each handle can be taken once.
    pub fn take_ingress(&mut self, source: usize) -> Result<Ingress<C, T>, MuxError> {
        self.ingress
            .get_mut(source)
            .ok_or(MuxError::InvalidSource(source))?
            .take()
            .ok_or(MuxError::IngressTaken(source))
    }

    /// Runs one arbitration step, returning the word forwarded to the consumer, if any.
    pub fn poll(&mut self, consumer_ready: bool) -> Option<(usize, Record<T>)> {
        let delivered = self.rr.serve(&mut self.drains, consumer_ready);
        if delivered.is_some() {
            self.forwarded += 1;
        }
        delivered
    }

    /// Forwards words to `sink` until every producer has hung up and all queues are empty.
    /// `sink` is the consumer and is always ready. Returns the number of words forwarded.
    pub fn run<F>(&mut self, mut sink: F) -> u64
    where
        F: FnMut(usize, Record<T>),
    {
        let start = self.forwarded;
        loop {
            match self.poll(true) {
                Some((source, record)) => sink(source, record),
                None if self.is_finished() => break,
                None => yield_now(),
            }
        }
        let forwarded = self.forwarded - start;
        debug!(forwarded, "all producers finished");
        forwarded
    }

    /// Discards every word currently queued and returns to idle with the pointer at 0.
    pub fn reset(&mut self) -> usize {
        let owner = self.rr.owner();
        let discarded: usize = self.drains.iter_mut().map(Drain::reset).sum();
        self.rr.reset();
        info!(?owner, discarded, "threaded arbiter reset");
        discarded
    }
}

impl<const N: usize, const C: usize, T> ThreadedArbiter<N, C, T> {
    /// True once every producer has hung up and every queue is empty. A source whose handle was
    /// never taken can receive nothing and counts as finished.
    pub fn is_finished(&self) -> bool {
        self.ingress
            .iter()
            .zip(&self.drains)
            .all(|(ingress, drain)| ingress.is_some() || drain.is_finished())
    }

    /// Occupancy of `source`'s queue, 0 for an unknown source.
    pub fn occupancy(&self, source: usize) -> usize {
        self.drains.get(source).map_or(0, |d| d.occupancy())
    }

    /// High-water signal of `source`'s queue.
    pub fn high_water(&self, source: usize) -> bool {
        self.drains.get(source).is_some_and(|d| d.high_water())
    }

    /// Counters of `source`'s queue.
    pub fn stats(&self, source: usize) -> Option<QueueStats> {
        self.drains.get(source).map(|d| d.stats())
    }

    /// Source currently holding the output, if any.
    pub fn owner(&self) -> Owner {
        self.rr.owner()
    }

    /// Source the next idle scan starts from.
    pub fn pointer(&self) -> usize {
        self.rr.pointer()
    }

    /// Words handed to the consumer since construction.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}
