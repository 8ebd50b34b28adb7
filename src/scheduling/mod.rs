//! Record-atomic round-robin arbitration.
//!
//! `RoundRobin` is the bare state machine: an owner and a pointer. It decides each step from the
//! current state alone (`decide`) and only then mutates (`commit`), so a step engine can sample
//! every input before anything changes. `arbiter::PacketArbiter` drives it over owned
//! `BoundedQueue`s in discrete steps; `threaded::ThreadedArbiter` drives it over `Drain` handles
//! fed by producer threads.
//!
//! A source that never finishes its record holds the output forever. That is the cost of never
//! interleaving records, and the arbiter does not try to break it.
use tracing::debug;

use crate::comms::{queue::BoundedQueue, spsc::Drain, Record};
use crate::MuxError;

pub mod arbiter;
pub mod threaded;

/// A queue the arbiter can drain.
pub trait Lane<T> {
    fn is_empty(&self) -> bool;
    fn pop(&mut self) -> Result<Record<T>, MuxError>;
    /// Discards queued words, returning how many were dropped.
    fn reset(&mut self) -> usize;
}

impl<const C: usize, T> Lane<T> for BoundedQueue<C, T> {
    fn is_empty(&self) -> bool {
        BoundedQueue::is_empty(self)
    }

    fn pop(&mut self) -> Result<Record<T>, MuxError> {
        BoundedQueue::pop(self)
    }

    fn reset(&mut self) -> usize {
        BoundedQueue::reset(self)
    }
}

impl<const C: usize, T> Lane<T> for Drain<C, T> {
    fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    fn pop(&mut self) -> Result<Record<T>, MuxError> {
        Drain::pop(self)
    }

    fn reset(&mut self) -> usize {
        Drain::reset(self)
    }
}

/// Which source, if any, holds the output until its record ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Owner {
    Idle,
    Owned(usize),
}

/// What the arbiter does in one step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Idle and every queue is empty.
    Wait,
    /// Idle; source `i` becomes the owner. Nothing is transferred this step.
    Grant(usize),
    /// Pop one word from the owner and hand it to the consumer.
    Deliver(usize),
    /// Owner's queue is empty mid-record; hold ownership and transfer nothing.
    Stall(usize),
    /// Consumer is not ready; hold everything.
    Blocked(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRobin<const N: usize> {
    owner: Owner,
    /// Next source to consider first when idle
    pointer: usize,
}

impl<const N: usize> Default for RoundRobin<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RoundRobin<N> {
    /// Idle, with the pointer at source 0.
    pub fn new() -> Self {
        Self {
            owner: Owner::Idle,
            pointer: 0,
        }
    }

    /// Source currently holding the output, if any.
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Source the next idle scan starts from.
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Computes this step's action from the current state, without mutating it.
    ///
    /// `occupied[i]` is whether queue `i` holds at least one word, `ready` the consumer's
    /// readiness, both sampled at the start of the step.
    pub fn decide(&self, occupied: &[bool; N], ready: bool) -> Decision {
        match self.owner {
            Owner::Idle => (0..N)
                .map(|k| (self.pointer + k) % N)
                .find(|&i| occupied[i])
                .map_or(Decision::Wait, Decision::Grant),
            Owner::Owned(i) if !ready => Decision::Blocked(i),
            Owner::Owned(i) if occupied[i] => Decision::Deliver(i),
            Owner::Owned(i) => Decision::Stall(i),
        }
    }

    /// Applies a decision. `last` is the end marker of the word delivered this step, and is
    /// ignored for every other decision.
    pub fn commit(&mut self, decision: Decision, last: bool) {
        match decision {
            Decision::Grant(i) => {
                debug!(source = i, pointer = self.pointer, "granted ownership");
                self.owner = Owner::Owned(i);
            }
            Decision::Deliver(i) if last => {
                self.pointer = (i + 1) % N;
                self.owner = Owner::Idle;
                debug!(source = i, pointer = self.pointer, "record complete, released");
            }
            Decision::Wait | Decision::Deliver(_) | Decision::Stall(_) | Decision::Blocked(_) => {}
        }
    }

    /// Runs one step over `lanes`: decide, pop the owner's head word if delivering, commit.
    ///
    /// # Panics
    ///
    /// Panics if a lane reports empty after the step found it occupied. Only the arbiter pops, so
    /// this means the lane broke its single-consumer contract.
    pub fn serve<T, L: Lane<T>>(
        &mut self,
        lanes: &mut [L; N],
        ready: bool,
    ) -> Option<(usize, Record<T>)> {
        let occupied = std::array::from_fn(|i| !lanes[i].is_empty());
        let decision = self.decide(&occupied, ready);
        let delivered = match decision {
            Decision::Deliver(i) => match lanes[i].pop() {
                Ok(record) => Some((i, record)),
                Err(err) => panic!("arbiter lost a word on owned source {i}: {err}"),
            },
            _ => None,
        };
        self.commit(decision, delivered.as_ref().is_some_and(|(_, r)| r.last));
        delivered
    }

    /// Returns to idle with the pointer at source 0.
    pub fn reset(&mut self) {
        self.owner = Owner::Idle;
        self.pointer = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_grants_first_occupied_from_pointer() {
        let mut rr = RoundRobin::<4>::new();
        assert_eq!(rr.decide(&[false; 4], true), Decision::Wait);
        assert_eq!(rr.decide(&[false, false, true, true], true), Decision::Grant(2));

        rr.pointer = 3;
        assert_eq!(rr.decide(&[true, false, true, true], false), Decision::Grant(3));
        // wraps past the end
        assert_eq!(rr.decide(&[false, true, true, false], true), Decision::Grant(1));
    }

    #[test]
    fn owner_holds_until_last_word() {
        let mut rr = RoundRobin::<3>::new();
        let d = rr.decide(&[false, true, true], true);
        rr.commit(d, false);
        assert_eq!(rr.owner(), Owner::Owned(1));

        // stalled producer keeps ownership even with other sources waiting
        assert_eq!(rr.decide(&[true, false, true], true), Decision::Stall(1));
        // consumer backpressure
        assert_eq!(rr.decide(&[true, true, true], false), Decision::Blocked(1));

        let d = rr.decide(&[true, true, true], true);
        assert_eq!(d, Decision::Deliver(1));
        rr.commit(d, false);
        assert_eq!(rr.owner(), Owner::Owned(1));
        assert_eq!(rr.pointer(), 0);

        rr.commit(d, true);
        assert_eq!(rr.owner(), Owner::Idle);
        assert_eq!(rr.pointer(), 2);

        rr.reset();
        assert_eq!(rr, RoundRobin::new());
    }

    #[test]
    fn serve_over_bounded_queues() {
        let mut lanes: [BoundedQueue<4, u8>; 2] =
            [BoundedQueue::new(2).unwrap(), BoundedQueue::new(2).unwrap()];
        lanes[0].push(Record::word(1)).unwrap();
        lanes[0].push(Record::last(2)).unwrap();
        lanes[1].push(Record::last(3)).unwrap();

        let mut rr = RoundRobin::<2>::new();
        let mut out = Vec::new();
        for _ in 0..8 {
            if let Some(word) = rr.serve(&mut lanes, true) {
                out.push(word);
            }
        }
        assert_eq!(
            out,
            vec![(0, Record::word(1)), (0, Record::last(2)), (1, Record::last(3))]
        );
        assert_eq!(rr.owner(), Owner::Idle);
        assert_eq!(rr.pointer(), 0);
    }
}
