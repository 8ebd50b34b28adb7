//! Per-source buffering for record streams.
//!
//! This module provides the word type carried through the system and the two flavors of
//! bounded queue that hold it: `queue::BoundedQueue` for the discrete-step engine, where one
//! owner applies every update of a step at once, and `spsc::SharedQueue`, a lock-free ring shared
//! between exactly one producer thread and the arbiter thread. `frame` cuts byte frames into
//! records and stitches the arbitrated stream back into frames.
use bytemuck::Pod;

pub mod frame;
pub mod queue;
pub mod spsc;

/// One fixed-width word of a record.
///
/// A logical record is a run of words from one source, terminated by a word with `last` set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Record<T> {
    pub payload: T,
    pub last: bool,
}

impl<T> Record<T> {
    /// A word with an explicit end marker.
    pub fn new(payload: T, last: bool) -> Self {
        Self { payload, last }
    }

    /// A word in the middle of a record.
    pub fn word(payload: T) -> Self {
        Self::new(payload, false)
    }

    /// The closing word of a record.
    pub fn last(payload: T) -> Self {
        Self::new(payload, true)
    }
}

impl<T: Pod> Record<T> {
    /// Width in bits of the widest word `T` can carry.
    pub const MAX_WIDTH: usize = std::mem::size_of::<T>() * 8;

    /// Checks that no payload bit at or above `width` is set.
    ///
    /// Bits are numbered in memory order, least significant first within each byte, which is
    /// the integer bit order on little-endian targets.
    pub fn fits(&self, width: usize) -> bool {
        bytemuck::bytes_of(&self.payload)
            .iter()
            .enumerate()
            .all(|(i, &byte)| {
                let low = i * 8;
                if width >= low + 8 {
                    true
                } else if width <= low {
                    byte == 0
                } else {
                    byte >> (width - low) == 0
                }
            })
    }
}

/// Running counters for one queue.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Words admitted.
    pub pushed: u64,
    /// Words released.
    pub popped: u64,
    /// Pushes attempted against a full queue.
    pub overflows: u64,
    /// Offers turned away because the queue was not ready. The step engine counts every refused
    /// offer, so a word offered for three blocked steps counts three times; `Ingress::push_spin`
    /// counts each word that had to wait once, however long it spun.
    pub refused: u64,
    /// Highest occupancy seen since construction.
    pub peak: usize,
}
